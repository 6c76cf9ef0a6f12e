//! Destination table and processed-file registry
//!
//! Both live in one store so that a file's rows and its registry entry commit together.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::schema::{CanonicalRecord, FileId};

pub mod memory;
pub mod postgres;

pub use memory::MemorySalesStore;
pub use postgres::PgSalesStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store refused the write
    #[error("{0}")]
    Rejected(String),
}

/// Result of one atomic file commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { rows: usize },
    /// Another run registered the file first; nothing was written
    AlreadyRegistered,
}

#[async_trait]
pub trait SalesStore: Send + Sync {
    fn describe(&self) -> String;

    /// Every registered file identifier
    async fn processed_files(&self) -> Result<BTreeSet<FileId>, StoreError>;

    async fn is_registered(&self, id: &FileId) -> Result<bool, StoreError>;

    /// Append `records` and register `id` in one transaction.
    ///
    /// On any error neither the rows nor the registry entry are visible afterwards.
    async fn commit_file(
        &self,
        id: &FileId,
        records: &[CanonicalRecord],
    ) -> Result<CommitOutcome, StoreError>;
}
