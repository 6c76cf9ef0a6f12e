//! Pipeline error taxonomy
//!
//! File-scoped failures ([`EtlError::TransformFailed`], [`EtlError::LoadFailed`]) are caught at
//! the file boundary by the pipeline runner. Everything else aborts the run.

use retail_common::RetailError;
use thiserror::Error;

use crate::schema::FileId;

/// Result type alias for pipeline operations
pub type EtlResult<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    /// Listing, reading or writing infrastructure is unreachable
    #[error("Storage unavailable while {context}: {cause}")]
    StorageUnavailable { context: String, cause: String },

    /// One source file could not be transformed; it stays pending
    #[error("Transform failed for '{file}': {cause}")]
    TransformFailed { file: FileId, cause: String },

    /// Destination write or registry insert failed; the file stays pending
    #[error("Load failed for '{file}': {cause}")]
    LoadFailed { file: FileId, cause: String },

    /// Pipeline configuration cannot be applied without losing data
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EtlError {
    pub fn storage(context: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::StorageUnavailable {
            context: context.into(),
            cause: cause.to_string(),
        }
    }

    pub fn transform(file: &FileId, cause: impl std::fmt::Display) -> Self {
        Self::TransformFailed {
            file: file.clone(),
            cause: cause.to_string(),
        }
    }

    pub fn load(file: &FileId, cause: impl std::fmt::Display) -> Self {
        Self::LoadFailed {
            file: file.clone(),
            cause: cause.to_string(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error is isolated to one file and must not abort the batch
    pub fn is_file_scoped(&self) -> bool {
        matches!(self, Self::TransformFailed { .. } | Self::LoadFailed { .. })
    }
}

impl From<RetailError> for EtlError {
    fn from(err: RetailError) -> Self {
        match err {
            RetailError::Io(e) => Self::storage("accessing local files", e),
            other => Self::Configuration(other.to_string()),
        }
    }
}
