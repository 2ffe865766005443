//! Trainwatch client library.
//!
//! Connects a training dashboard to a model-training backend. It handles:
//! - Live training metrics, agent tips and chat over two WebSocket channels
//! - Bounded exponential-backoff reconnection per channel
//! - A demo mode that synthesizes the same streams with no backend
//! - The request/reply training API (control, config, datasets, export)
//! - Dashboard state aggregation on top of the streams
//!
//! # Architecture
//!
//! - `types`: value records shared across layers
//! - `bus`: typed publish/subscribe with explicit unsubscribe handles
//! - `stream`: connections, frame decoding, demo generator, `StreamClient`
//! - `api`: HTTP client for the training backend
//! - `dashboard`: consumer-side state (history, tips, transcript, config)
//! - `settings`: base URL and demo-mode configuration

pub mod api;
pub mod bus;
pub mod dashboard;
pub mod settings;
pub mod stream;
pub mod types;

pub use api::{ApiError, ModelFormat, TrainingApi, TrainingBackend};
pub use bus::{EventBus, StreamEvent, Subscription};
pub use dashboard::{Dashboard, DashboardSnapshot};
pub use settings::{Settings, SettingsError, SettingsStore};
pub use stream::{Channel, ConnectionState, StreamClient, StreamError, StreamMode};

// ---------------------------------------------------------------------------
// Shared error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("{0}")]
    Other(String),
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("trainwatch=debug,info")),
        )
        .try_init();
}
