//! Value records shared by the stream client, the request/reply API and the
//! dashboard state.
//!
//! Field names follow the backend's JSON wire format: metrics, tips and chat
//! messages are flat snake-case objects, `Config` uses camelCase keys.

use std::fmt;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current time as an ISO-8601 / RFC 3339 string.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Fresh identifier for a locally created tip or chat message.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Training metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    Ongoing,
    Idle,
    Completed,
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrainingStatus::Ongoing => write!(f, "Ongoing"),
            TrainingStatus::Idle => write!(f, "Idle"),
            TrainingStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// One training step as reported by the backend or the demo generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epoch: u32,
    pub accuracy: f64,
    pub loss: f64,
    pub status: TrainingStatus,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Agent tips
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipKind {
    Info,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTip {
    pub id: String,
    pub message: String,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub kind: TipKind,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: String,
}

impl ChatMessage {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            sender,
            content: content.into(),
            timestamp: now_timestamp(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Sender::Agent, content)
    }
}

// ---------------------------------------------------------------------------
// Datasets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    Csv,
    Images,
    Text,
    #[serde(other)]
    Custom,
}

impl DatasetKind {
    /// Guess the dataset type of an uploaded file from its name.
    pub fn infer_from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            DatasetKind::Csv
        } else if lower.ends_with(".zip") && lower.contains("image") {
            DatasetKind::Images
        } else if lower.ends_with(".txt") || lower.ends_with(".json") {
            DatasetKind::Text
        } else {
            DatasetKind::Custom
        }
    }

    /// Guess the dataset type of a server-side path. Any archive, or any path
    /// mentioning images, counts as an image set.
    pub fn infer_from_path(path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        if lower.ends_with(".csv") {
            DatasetKind::Csv
        } else if lower.ends_with(".zip") || lower.contains("image") {
            DatasetKind::Images
        } else if lower.ends_with(".txt") || lower.ends_with(".json") {
            DatasetKind::Text
        } else {
            DatasetKind::Custom
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Csv => "csv",
            DatasetKind::Images => "images",
            DatasetKind::Text => "text",
            DatasetKind::Custom => "custom",
        }
    }
}

/// Reference to a dataset the backend can locate by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DatasetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

impl DatasetRef {
    /// Last path component, or `"dataset"` when the path has none.
    pub fn file_name_of(path: &str) -> String {
        Path::new(path)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("dataset")
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Training configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub learning_rate: f64,
    pub batch_size: u32,
    pub epochs: u32,
    pub optimizer: String,
    pub model_type: String,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<DatasetRef>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            batch_size: 32,
            epochs: 100,
            optimizer: "adam".to_string(),
            model_type: "resnet50".to_string(),
            model_name: "default".to_string(),
            dataset: None,
        }
    }
}

impl Config {
    /// Reject values the backend would refuse anyway.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.learning_rate > 0.0) {
            return Err(format!("learning rate must be > 0, got {}", self.learning_rate));
        }
        if self.batch_size == 0 {
            return Err("batch size must be > 0".to_string());
        }
        if self.epochs == 0 {
            return Err("epochs must be > 0".to_string());
        }
        Ok(())
    }
}
