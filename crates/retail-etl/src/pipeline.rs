//! One ingestion run: reconcile, then transform and load each pending file
//!
//! File-scoped failures are recorded and the run continues. A fatal error or a cancellation
//! stops scheduling new files; files already in flight finish their load transaction.

use chrono::{DateTime, Utc};
use futures::future;
use futures::stream::{self, StreamExt};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{EtlError, EtlResult};
use crate::loader::{LoadOutcome, Loader};
use crate::reconciler::Reconciler;
use crate::schema::FileId;
use crate::staging::StagingArea;
use crate::store::SalesStore;
use crate::transformer::{TransformSettings, Transformer};

pub const DEFAULT_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Transform => f.write_str("transform"),
            Stage::Load => f.write_str("load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Loaded { file: FileId, rows: usize, rows_dropped: usize },
    AlreadyLoaded { file: FileId },
    Failed { file: FileId, stage: Stage, error: String },
}

impl FileOutcome {
    pub fn file(&self) -> &FileId {
        match self {
            FileOutcome::Loaded { file, .. }
            | FileOutcome::AlreadyLoaded { file }
            | FileOutcome::Failed { file, .. } => file,
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pending: Vec<FileId>,
    /// Outcomes of the files that were processed, in identifier order
    pub outcomes: Vec<FileOutcome>,
    /// Pending files never started because the run was cancelled or aborted
    pub not_scheduled: Vec<FileId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunReport {
    pub fn loaded(&self) -> impl Iterator<Item = &FileId> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            FileOutcome::Loaded { file, .. } => Some(file),
            _ => None,
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, FileOutcome::Failed { .. }))
    }

    pub fn rows_loaded(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                FileOutcome::Loaded { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    /// No file failed and every pending file was attempted
    pub fn is_clean(&self) -> bool {
        self.failed().next().is_none() && self.not_scheduled.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        (self.completed_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

pub struct Pipeline {
    reconciler: Reconciler,
    transformer: Transformer,
    loader: Loader,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        raw: Arc<dyn StagingArea>,
        cleaned: Arc<dyn StagingArea>,
        store: Arc<dyn SalesStore>,
        settings: TransformSettings,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(raw.clone(), store.clone()),
            transformer: Transformer::new(raw, cleaned.clone(), settings),
            loader: Loader::new(cleaned, store),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Files in flight at once; values below one are treated as one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn transformer(&self) -> &Transformer {
        &self.transformer
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub async fn pending_files(&self) -> EtlResult<Vec<FileId>> {
        self.reconciler.pending_files().await
    }

    /// Transform then load one file
    async fn process_file(&self, id: FileId) -> EtlResult<FileOutcome> {
        let report = match self.transformer.transform(&id).await {
            Ok(report) => report,
            Err(e) if e.is_file_scoped() => {
                warn!(file = %id, error = %e, "Transform failed, file stays pending");
                return Ok(FileOutcome::Failed {
                    file: id,
                    stage: Stage::Transform,
                    error: e.to_string(),
                });
            },
            Err(e) => return Err(e),
        };

        match self.loader.load(&id).await {
            Ok(LoadOutcome::Loaded { rows, .. }) => Ok(FileOutcome::Loaded {
                file: id,
                rows,
                rows_dropped: report.rows_dropped,
            }),
            Ok(LoadOutcome::AlreadyLoaded { .. }) => Ok(FileOutcome::AlreadyLoaded { file: id }),
            Err(e) if e.is_file_scoped() => {
                warn!(file = %id, error = %e, "Load failed, file stays pending");
                Ok(FileOutcome::Failed {
                    file: id,
                    stage: Stage::Load,
                    error: e.to_string(),
                })
            },
            Err(e) => Err(e),
        }
    }

    /// Run until every pending file is processed, a fatal error occurs, or `cancel` fires
    pub async fn run(&self, cancel: &CancellationToken) -> EtlResult<RunReport> {
        let started_at = Utc::now();
        let pending = self.reconciler.pending_files().await?;

        info!(
            pending = pending.len(),
            concurrency = self.concurrency,
            "Starting ingestion run"
        );

        // Child token lets a fatal error stop scheduling without cancelling the caller's token
        let stop = cancel.child_token();
        let mut outcomes = Vec::with_capacity(pending.len());
        let mut fatal: Option<EtlError> = None;

        let mut results = stream::iter(pending.iter().cloned())
            .take_while(|_| future::ready(!stop.is_cancelled()))
            .map(|id| self.process_file(id))
            .buffer_unordered(self.concurrency);

        while let Some(result) = results.next().await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(error = %e, "Fatal error, stopping the run after in-flight files");
                    stop.cancel();
                    if fatal.is_none() {
                        fatal = Some(e);
                    }
                },
            }
        }
        drop(results);

        if let Some(e) = fatal {
            return Err(e);
        }

        outcomes.sort_by(|a, b| a.file().cmp(b.file()));
        let not_scheduled: Vec<FileId> = pending
            .iter()
            .filter(|id| outcomes.iter().all(|outcome| outcome.file() != *id))
            .cloned()
            .collect();
        if !not_scheduled.is_empty() {
            warn!(remaining = not_scheduled.len(), "Run cancelled before all files were scheduled");
        }

        let report = RunReport {
            pending,
            outcomes,
            not_scheduled,
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            loaded = report.loaded().count(),
            failed = report.failed().count(),
            rows = report.rows_loaded(),
            duration_secs = report.duration_secs(),
            "Ingestion run finished"
        );
        Ok(report)
    }
}
