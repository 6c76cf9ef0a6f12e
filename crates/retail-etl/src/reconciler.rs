use std::sync::Arc;
use tracing::{info, instrument};

use crate::error::{EtlError, EtlResult};
use crate::schema::FileId;
use crate::staging::StagingArea;
use crate::store::SalesStore;

/// Decides which raw files have not been loaded yet
pub struct Reconciler {
    raw: Arc<dyn StagingArea>,
    store: Arc<dyn SalesStore>,
}

impl Reconciler {
    pub fn new(raw: Arc<dyn StagingArea>, store: Arc<dyn SalesStore>) -> Self {
        Self { raw, store }
    }

    /// Raw identifiers absent from the registry, sorted. Read-only.
    #[instrument(skip(self), fields(raw = %self.raw.describe()))]
    pub async fn pending_files(&self) -> EtlResult<Vec<FileId>> {
        let registry = async {
            self.store
                .processed_files()
                .await
                .map_err(|e| EtlError::storage(format!("reading {} registry", self.store.describe()), e))
        };
        let (raw_ids, registered) = tokio::try_join!(self.raw.list_ids(), registry)?;

        let total = raw_ids.len();
        let pending: Vec<FileId> = raw_ids
            .into_iter()
            .filter(|id| !registered.contains(id))
            .collect();

        info!(
            raw_files = total,
            registered = registered.len(),
            pending = pending.len(),
            "Reconciled raw staging with registry"
        );
        Ok(pending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::staging::LocalStaging;
    use crate::store::MemorySalesStore;

    fn id(name: &str) -> FileId {
        name.parse().unwrap()
    }

    #[tokio::test]
    async fn test_pending_is_raw_minus_registry() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["orders_mar.csv", "orders_jan.csv", "orders_feb.csv", "README.md"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let store = Arc::new(MemorySalesStore::new());
        store.commit_file(&id("orders_feb"), &[]).await.unwrap();
        // Registered but no longer staged
        store.commit_file(&id("orders_dec"), &[]).await.unwrap();

        let reconciler = Reconciler::new(Arc::new(LocalStaging::new(dir.path())), store);
        let pending = reconciler.pending_files().await.unwrap();
        assert_eq!(pending, vec![id("orders_jan"), id("orders_mar")]);
    }

    #[tokio::test]
    async fn test_empty_raw_staging() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(
            Arc::new(LocalStaging::new(dir.path())),
            Arc::new(MemorySalesStore::new()),
        );
        assert!(reconciler.pending_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_registry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemorySalesStore::new());
        store.set_unavailable(true);

        let reconciler = Reconciler::new(Arc::new(LocalStaging::new(dir.path())), store);
        let err = reconciler.pending_files().await.unwrap_err();
        assert!(matches!(err, EtlError::StorageUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_raw_staging_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let reconciler = Reconciler::new(
            Arc::new(LocalStaging::new(dir.path().join("missing"))),
            Arc::new(MemorySalesStore::new()),
        );
        let err = reconciler.pending_files().await.unwrap_err();
        assert!(matches!(err, EtlError::StorageUnavailable { .. }));
    }
}
