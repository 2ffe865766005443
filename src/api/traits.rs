use async_trait::async_trait;

use super::types::ApiError;
use crate::types::Config;

/// Training control and configuration calls used by the dashboard state.
#[async_trait]
pub trait TrainingBackend: Send + Sync {
    async fn start_training(&self) -> Result<serde_json::Value, ApiError>;

    async fn stop_training(&self) -> Result<serde_json::Value, ApiError>;

    async fn restart_training(&self) -> Result<serde_json::Value, ApiError>;

    /// Current configuration as the backend sees it.
    async fn get_config(&self) -> Result<Config, ApiError>;

    /// Replace the backend configuration wholesale.
    async fn update_config(&self, config: &Config) -> Result<serde_json::Value, ApiError>;
}
