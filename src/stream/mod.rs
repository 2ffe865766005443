//! Live event streams from the training backend.
//!
//! - `frames`: inbound envelope decoding and outbound chat encoding
//! - `transport`: socket traits and the WebSocket implementation
//! - `connection`: per-channel state machine with bounded backoff reconnect
//! - `demo`: synthetic metrics/tips/chat when no backend is used
//! - `client`: the `StreamClient` facade the rest of the crate talks to

pub mod client;
pub mod connection;
pub mod demo;
pub mod frames;
pub mod transport;

pub use client::{StreamClient, StreamMode};
pub use connection::{
    reconnect_delay, Channel, Connection, ConnectionState, MAX_RECONNECT_ATTEMPTS,
};
pub use demo::{DemoGenerator, DemoSequence, DemoTick};
pub use transport::{Connector, Socket, TransportError, WsConnector};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("{channel} channel is not connected; message dropped")]
    NotConnected { channel: Channel },
    #[error("{channel} channel does not accept outbound messages")]
    SendUnsupported { channel: Channel },
    #[error("failed to encode outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}
