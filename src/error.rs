// Error types for organscope

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for organscope operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

/// Errors that can occur while analyzing an image
#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    #[error("Model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    #[error("Model loading error: {0}")]
    ModelLoading(String),

    #[error("Inference error: {0}")]
    InferenceRuntime(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<image::ImageError> for AnalysisError {
    fn from(err: image::ImageError) -> Self {
        AnalysisError::ImageDecode(err.to_string())
    }
}

/// Stable failure names handed to whatever transport relays the result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ImageDecode,
    ModelNotFound,
    InferenceRuntime,
    Configuration,
    Internal,
}

impl AnalysisError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageDecode(_) => ErrorKind::ImageDecode,
            Self::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            Self::InferenceRuntime(_) | Self::Candle(_) => ErrorKind::InferenceRuntime,
            Self::InvalidConfig(_) => ErrorKind::Configuration,
            Self::ModelLoading(_) | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// True when the caller sent something that is not an image
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::ImageDecode
    }
}
