// tests/common/mod.rs
//! Common test utilities for stream integration tests.
#![allow(dead_code)]

pub mod mock_transport;

pub use mock_transport::{MockConnector, MockPeer};

use trainwatch_lib::types::now_timestamp;

/// Training-channel metrics envelope as the backend sends it.
pub fn metrics_frame(epoch: u32, accuracy: f64, loss: f64) -> String {
    serde_json::json!({
        "type": "metrics",
        "payload": {
            "epoch": epoch,
            "accuracy": accuracy,
            "loss": loss,
            "status": "Ongoing",
            "timestamp": now_timestamp()
        }
    })
    .to_string()
}

/// Training-channel tip envelope.
pub fn tip_frame(id: &str, message: &str) -> String {
    serde_json::json!({
        "type": "tip",
        "payload": {
            "id": id,
            "message": message,
            "timestamp": now_timestamp(),
            "type": "info"
        }
    })
    .to_string()
}
