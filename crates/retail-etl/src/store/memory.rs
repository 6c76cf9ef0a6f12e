//! In-process store with the same atomicity contract as [`super::PgSalesStore`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{CommitOutcome, SalesStore, StoreError};
use crate::schema::{CanonicalRecord, FileId};

#[derive(Debug, Default)]
struct State {
    registry: BTreeMap<FileId, DateTime<Utc>>,
    rows: Vec<(FileId, CanonicalRecord)>,
    failing: HashSet<FileId>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct MemorySalesStore {
    state: Mutex<State>,
}

impl MemorySalesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every later commit of `id` fail without side effects
    pub fn fail_commits_for(&self, id: &FileId) {
        self.lock().failing.insert(id.clone());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Simulate an unreachable database for every operation
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Destination rows with their source file, in insertion order
    pub fn rows(&self) -> Vec<(FileId, CanonicalRecord)> {
        self.lock().rows.clone()
    }

    pub fn rows_for(&self, id: &FileId) -> Vec<CanonicalRecord> {
        self.lock()
            .rows
            .iter()
            .filter(|(source, _)| source == id)
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub fn registry(&self) -> BTreeMap<FileId, DateTime<Utc>> {
        self.lock().registry.clone()
    }
}

fn unavailable() -> StoreError {
    StoreError::Rejected("store is unavailable".to_string())
}

#[async_trait]
impl SalesStore for MemorySalesStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn processed_files(&self) -> Result<BTreeSet<FileId>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state.registry.keys().cloned().collect())
    }

    async fn is_registered(&self, id: &FileId) -> Result<bool, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        Ok(state.registry.contains_key(id))
    }

    async fn commit_file(
        &self,
        id: &FileId,
        records: &[CanonicalRecord],
    ) -> Result<CommitOutcome, StoreError> {
        // Single lock scope is the transaction
        let mut state = self.lock();
        if state.unavailable {
            return Err(unavailable());
        }
        if state.failing.contains(id) {
            return Err(StoreError::Rejected(format!("injected failure for {}", id)));
        }
        if state.registry.contains_key(id) {
            return Ok(CommitOutcome::AlreadyRegistered);
        }

        state.registry.insert(id.clone(), Utc::now());
        state
            .rows
            .extend(records.iter().cloned().map(|record| (id.clone(), record)));

        Ok(CommitOutcome::Committed {
            rows: records.len(),
        })
    }
}
