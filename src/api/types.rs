//! Types for the request/reply API.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Config;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(
        "network error: unable to reach {base_url}. Check that the backend is running or enable demo mode"
    )]
    Unreachable { base_url: String },
    #[error("request failed: {0}")]
    Request(String),
    #[error("{action} failed ({status}): {body}")]
    Status {
        action: &'static str,
        status: u16,
        body: String,
    },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Export format accepted by `GET /download-model?format=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
    #[default]
    Pytorch,
    Onnx,
    Tensorflow,
}

impl ModelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFormat::Pytorch => "pytorch",
            ModelFormat::Onnx => "onnx",
            ModelFormat::Tensorflow => "tensorflow",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ModelFormat::Pytorch => "pt",
            ModelFormat::Onnx => "onnx",
            ModelFormat::Tensorflow => "h5",
        }
    }

    /// File name for a downloaded model: the model type, or the model name
    /// when the type is `custom`.
    pub fn suggested_file_name(&self, config: &Config) -> String {
        let stem = if config.model_type == "custom" {
            config.model_name.as_str()
        } else {
            config.model_type.as_str()
        };
        let stem = if stem.trim().is_empty() { "model" } else { stem.trim() };
        format!("{stem}.{}", self.extension())
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pytorch" | "pt" => Some(ModelFormat::Pytorch),
            "onnx" => Some(ModelFormat::Onnx),
            "tensorflow" | "h5" => Some(ModelFormat::Tensorflow),
            _ => None,
        }
    }
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DatasetPathRequest<'a> {
    pub path: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DatasetLocationResponse {
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggested_names() {
        let config = Config::default();
        assert_eq!(ModelFormat::Pytorch.suggested_file_name(&config), "resnet50.pt");

        let custom = Config {
            model_type: "custom".to_string(),
            model_name: "my-net".to_string(),
            ..Config::default()
        };
        assert_eq!(ModelFormat::Tensorflow.suggested_file_name(&custom), "my-net.h5");
        assert_eq!(ModelFormat::Onnx.suggested_file_name(&custom), "my-net.onnx");
    }

    #[test]
    fn parses_formats() {
        assert_eq!(ModelFormat::parse("ONNX"), Some(ModelFormat::Onnx));
        assert_eq!(ModelFormat::parse("h5"), Some(ModelFormat::Tensorflow));
        assert_eq!(ModelFormat::parse("caffe"), None);
    }
}
