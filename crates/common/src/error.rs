//! Error types shared across Vizcast crates.

use std::path::PathBuf;

/// Top-level error type for Vizcast operations.
#[derive(Debug, thiserror::Error)]
pub enum VizcastError {
    #[error("Backend error: {message}")]
    Backend { message: String },

    #[error("Frame error: {message}")]
    Frame { message: String },

    #[error("Encoder error: {message}")]
    Encoder { message: String },

    #[error("Muxer error: {message}")]
    Muxer { message: String },

    #[error("Recording error: {message}")]
    Recording { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using VizcastError.
pub type VizcastResult<T> = Result<T, VizcastError>;

impl VizcastError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame {
            message: msg.into(),
        }
    }

    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder {
            message: msg.into(),
        }
    }

    pub fn muxer(msg: impl Into<String>) -> Self {
        Self::Muxer {
            message: msg.into(),
        }
    }

    pub fn recording(msg: impl Into<String>) -> Self {
        Self::Recording {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }
}
