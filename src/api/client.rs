use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::traits::TrainingBackend;
use super::types::{ApiError, DatasetLocationResponse, DatasetPathRequest, ModelFormat};
use crate::settings::{Settings, SettingsError};
use crate::types::{Config, DatasetKind, DatasetRef};

/// Timeout for the `HEAD /health` liveness probe.
pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(3);

/// Simulated latency of dataset uploads in demo mode.
pub const DEMO_UPLOAD_DELAY: Duration = Duration::from_secs(1);

const DEMO_PATH_SIZE: u64 = 1024 * 1024;

/// HTTP client for the training backend.
pub struct TrainingApi {
    base_url: String,
    demo_mode: bool,
    client: reqwest::Client,
}

impl TrainingApi {
    pub fn new(base_url: impl Into<String>, demo_mode: bool) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            demo_mode,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self::new(settings.api_base()?, settings.demo_mode))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_demo_mode(&self) -> bool {
        self.demo_mode
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_connect() {
            ApiError::Unreachable {
                base_url: self.base_url.clone(),
            }
        } else {
            ApiError::Request(err.to_string())
        }
    }

    async fn check(
        &self,
        response: reqwest::Response,
        action: &'static str,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        debug!("{action}: status={status}");
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let body = if body.trim().is_empty() {
            status.canonical_reason().unwrap_or("unknown status").to_string()
        } else {
            body
        };
        Err(ApiError::Status {
            action,
            status: status.as_u16(),
            body,
        })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        action: &'static str,
    ) -> Result<T, ApiError> {
        let text = response.text().await.map_err(|e| self.request_error(e))?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{action}: {e}")))
    }

    async fn post_control(
        &self,
        path: &str,
        action: &'static str,
    ) -> Result<serde_json::Value, ApiError> {
        let response = self
            .client
            .post(self.endpoint(path))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, action).await?;
        self.json(response, action).await
    }

    /// Upload a local dataset file as multipart field `dataset`.
    pub async fn upload_dataset(&self, file: &Path) -> Result<DatasetRef, ApiError> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dataset")
            .to_string();

        if self.demo_mode {
            info!("demo mode: simulating upload of {name}");
            let size = tokio::fs::metadata(file).await?.len();
            tokio::time::sleep(DEMO_UPLOAD_DELAY).await;
            return Ok(DatasetRef {
                path: format!("/mock/datasets/{name}"),
                kind: DatasetKind::infer_from_file_name(&name),
                name,
                size: Some(size),
                format: None,
            });
        }

        let bytes = tokio::fs::read(file).await?;
        let part = reqwest::multipart::Part::bytes(bytes).file_name(name);
        let form = reqwest::multipart::Form::new().part("dataset", part);
        let response = self
            .client
            .post(self.endpoint("/upload-dataset"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "upload dataset").await?;
        self.json(response, "upload dataset").await
    }

    /// Point the backend at a dataset that already exists on its side.
    pub async fn upload_dataset_path(&self, path: &str) -> Result<DatasetRef, ApiError> {
        if self.demo_mode {
            info!("demo mode: simulating dataset path {path}");
            tokio::time::sleep(DEMO_UPLOAD_DELAY).await;
            return Ok(DatasetRef {
                name: DatasetRef::file_name_of(path),
                path: path.to_string(),
                kind: DatasetKind::infer_from_path(path),
                size: Some(DEMO_PATH_SIZE),
                format: None,
            });
        }

        let response = self
            .client
            .post(self.endpoint("/upload-dataset-path"))
            .json(&DatasetPathRequest { path })
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "use dataset path").await?;
        self.json(response, "use dataset path").await
    }

    pub async fn available_datasets(&self) -> Result<Vec<DatasetRef>, ApiError> {
        let response = self
            .client
            .get(self.endpoint("/available-datasets"))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "list datasets").await?;
        self.json(response, "list datasets").await
    }

    /// Register a chosen dataset location; returns the path as resolved by
    /// the backend.
    pub async fn register_dataset_location(
        &self,
        dataset: &DatasetRef,
    ) -> Result<String, ApiError> {
        let body = serde_json::json!({
            "path": dataset.path,
            "name": dataset.name,
            "size": dataset.size,
            "type": dataset.kind.as_str(),
        });
        let response = self
            .client
            .post(self.endpoint("/dataset-location"))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "set dataset location").await?;
        let parsed: DatasetLocationResponse = self.json(response, "set dataset location").await?;
        Ok(parsed.path)
    }

    /// Fetch the trained model blob.
    pub async fn download_model(&self, format: ModelFormat) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}?format={}", self.endpoint("/download-model"), format.as_str());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "download model").await?;
        let bytes = response.bytes().await.map_err(|e| self.request_error(e))?;
        Ok(bytes.to_vec())
    }

    /// Download the model and write it into `dir`, named after `config`.
    pub async fn save_model(
        &self,
        format: ModelFormat,
        config: &Config,
        dir: &Path,
    ) -> Result<PathBuf, ApiError> {
        let bytes = self.download_model(format).await?;
        tokio::fs::create_dir_all(dir).await?;
        let target = dir.join(format.suggested_file_name(config));
        tokio::fs::write(&target, &bytes).await?;
        info!("saved {} byte model to {}", bytes.len(), target.display());
        Ok(target)
    }

    async fn fetch_config(&self) -> Result<Config, ApiError> {
        let response = self
            .client
            .get(self.endpoint("/config"))
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "get config").await?;
        self.json(response, "get config").await
    }

    /// `HEAD /health` with a short timeout. Always `false` in demo mode.
    pub async fn check_health(&self) -> bool {
        if self.demo_mode {
            return false;
        }
        match self
            .client
            .head(self.endpoint("/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("health probe failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl TrainingBackend for TrainingApi {
    async fn start_training(&self) -> Result<serde_json::Value, ApiError> {
        self.post_control("/start-training", "start training").await
    }

    async fn stop_training(&self) -> Result<serde_json::Value, ApiError> {
        self.post_control("/stop-training", "stop training").await
    }

    async fn restart_training(&self) -> Result<serde_json::Value, ApiError> {
        self.post_control("/restart-training", "restart training").await
    }

    /// Falls back to the default config in demo mode or when the backend
    /// cannot be read.
    async fn get_config(&self) -> Result<Config, ApiError> {
        if self.demo_mode {
            debug!("demo mode: using default config");
            return Ok(Config::default());
        }

        let fetched = self.fetch_config().await;

        match fetched {
            Ok(config) => Ok(config),
            Err(e) => {
                warn!("error fetching config, using defaults: {e}");
                Ok(Config::default())
            }
        }
    }

    async fn update_config(&self, config: &Config) -> Result<serde_json::Value, ApiError> {
        config.validate().map_err(ApiError::InvalidConfig)?;
        let response = self
            .client
            .put(self.endpoint("/config"))
            .json(config)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;
        let response = self.check(response, "update config").await?;
        self.json(response, "update config").await
    }
}
