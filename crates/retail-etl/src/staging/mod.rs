//! Staging areas holding raw and cleaned CSV files
//!
//! The reconciler lists both areas, the transformer reads raw and writes cleaned, and the
//! loader reads cleaned. A cleaned file only becomes visible once fully written.

use async_trait::async_trait;
use std::fmt;

use crate::error::EtlResult;
use crate::schema::FileId;

pub mod local;
pub mod s3;

pub use local::LocalStaging;
pub use s3::{S3Staging, S3StagingConfig};

/// Read failure distinguishing a missing file from an unreachable backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    NotFound(FileId),
    Unavailable(String),
}

impl fmt::Display for StagingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StagingError::NotFound(id) => write!(f, "{} is not staged", id.file_name()),
            StagingError::Unavailable(cause) => write!(f, "staging unavailable: {}", cause),
        }
    }
}

impl std::error::Error for StagingError {}

#[async_trait]
pub trait StagingArea: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Identifiers of every complete `.csv` file, sorted
    async fn list_ids(&self) -> EtlResult<Vec<FileId>>;

    async fn read(&self, id: &FileId) -> Result<Vec<u8>, StagingError>;

    /// Publish a file under `id`, replacing any previous content
    async fn write(&self, id: &FileId, content: Vec<u8>) -> EtlResult<()>;
}
