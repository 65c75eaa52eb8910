//! Error types for the medical imaging training workspace.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Direction of a failed file operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "reading"),
            Access::Write => write!(f, "writing"),
        }
    }
}

/// Main error type for the workspace.
#[derive(Error, Debug)]
pub enum Error {
    /// A read or write against a specific path failed
    #[error("File I/O error {access} {}: {reason}", path.display())]
    FileIo {
        path: PathBuf,
        access: Access,
        reason: String,
    },

    /// A preprocessing or evaluation transform failed
    #[error("Data processing error at {stage}: {detail}")]
    DataProcessing { stage: String, detail: String },

    /// Model construction, forward pass or persistence failed
    #[error("Model error: {0}")]
    Model(String),

    /// Structural misconfiguration detected before a run starts
    #[error("Configuration error in {context}: {detail}")]
    Config { context: String, detail: String },

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn read(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::FileIo {
            path: path.into(),
            access: Access::Read,
            reason: reason.to_string(),
        }
    }

    pub fn write(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        Error::FileIo {
            path: path.into(),
            access: Access::Write,
            reason: reason.to_string(),
        }
    }

    pub fn config(context: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::Config {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub fn processing(stage: impl Into<String>, detail: impl fmt::Display) -> Self {
        Error::DataProcessing {
            stage: stage.into(),
            detail: detail.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::processing("image", err)
    }
}

/// Specialized Result type for workspace operations.
pub type Result<T> = std::result::Result<T, Error>;
