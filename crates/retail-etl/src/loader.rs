//! Cleaned file -> destination table, registered exactly once

use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::error::{EtlError, EtlResult};
use crate::schema::FileId;
use crate::staging::{StagingArea, StagingError};
use crate::store::{CommitOutcome, SalesStore};
use crate::transformer::read_cleaned;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { file: FileId, rows: usize },
    /// The registry already held the file; nothing was written
    AlreadyLoaded { file: FileId },
}

impl LoadOutcome {
    pub fn file(&self) -> &FileId {
        match self {
            LoadOutcome::Loaded { file, .. } | LoadOutcome::AlreadyLoaded { file } => file,
        }
    }

    pub fn rows(&self) -> usize {
        match self {
            LoadOutcome::Loaded { rows, .. } => *rows,
            LoadOutcome::AlreadyLoaded { .. } => 0,
        }
    }
}

pub struct Loader {
    cleaned: Arc<dyn StagingArea>,
    store: Arc<dyn SalesStore>,
}

impl Loader {
    pub fn new(cleaned: Arc<dyn StagingArea>, store: Arc<dyn SalesStore>) -> Self {
        Self { cleaned, store }
    }

    /// Append the cleaned rows of `id` and register it, atomically.
    ///
    /// Loading an already registered file is a no-op reported as [`LoadOutcome::AlreadyLoaded`].
    #[instrument(skip(self), fields(file = %id))]
    pub async fn load(&self, id: &FileId) -> EtlResult<LoadOutcome> {
        let registered = self
            .store
            .is_registered(id)
            .await
            .map_err(|e| EtlError::load(id, e))?;
        if registered {
            info!("File already registered, skipping load");
            return Ok(LoadOutcome::AlreadyLoaded { file: id.clone() });
        }

        let bytes = self.cleaned.read(id).await.map_err(|e| match e {
            StagingError::NotFound(_) => EtlError::load(id, e),
            StagingError::Unavailable(cause) => {
                EtlError::storage(format!("reading {} from cleaned staging", id.file_name()), cause)
            },
        })?;
        let records = read_cleaned(&bytes)
            .map_err(|e| EtlError::load(id, format!("malformed cleaned file: {}", e)))?;

        match self.store.commit_file(id, &records).await {
            Ok(CommitOutcome::Committed { rows }) => {
                info!(rows, "Loaded file");
                Ok(LoadOutcome::Loaded {
                    file: id.clone(),
                    rows,
                })
            },
            Ok(CommitOutcome::AlreadyRegistered) => {
                warn!("File was registered by a concurrent loader");
                Ok(LoadOutcome::AlreadyLoaded { file: id.clone() })
            },
            Err(e) => Err(EtlError::load(id, e)),
        }
    }
}
