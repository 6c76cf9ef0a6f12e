//! Error types shared across the retail workspace

use thiserror::Error;

/// Result type alias for shared infrastructure operations
pub type Result<T> = std::result::Result<T, RetailError>;

/// Infrastructure-level failures that are not tied to a single source file
#[derive(Error, Debug)]
pub enum RetailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid file identifier '{0}': must be a non-empty file stem without path separators")]
    InvalidFileId(String),

    #[error("Unsupported text encoding: {0}")]
    UnsupportedEncoding(String),
}

impl RetailError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
