//! Request/reply client for the training backend's HTTP API.
//!
//! ## Structure
//!
//! - `types`: error type, model export formats, small response shapes
//! - `traits`: `TrainingBackend`, the seam the dashboard state depends on
//! - `client`: `TrainingApi`, the reqwest implementation

pub mod client;
pub mod traits;
pub mod types;

pub use client::TrainingApi;
pub use traits::TrainingBackend;
pub use types::{ApiError, ModelFormat};
