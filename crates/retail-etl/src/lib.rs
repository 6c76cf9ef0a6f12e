//! Retail Sales ETL Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Incremental, exactly-once ingestion of retail sales CSV drops into PostgreSQL.
//!
//! # Overview
//!
//! A run moves every new source file through three stages:
//!
//! - **Reconciler**: raw staging identifiers minus the processed-file registry
//! - **Transformer**: drop, rename, completeness filter and categorical recoding, written to
//!   cleaned staging
//! - **Loader**: one transaction inserting the rows and the registry entry
//!
//! Categorical columns are recoded through a persisted [`vocabulary::CategoryVocabulary`],
//! so a value has the same code in every file and every run.
//!
//! # Example
//!
//! ```no_run
//! use retail_etl::{config::EtlConfig, pipeline::Pipeline, store::MemorySalesStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EtlConfig::load()?;
//! let (raw, cleaned) = config.staging().await?;
//! let settings = config.transform_settings().await?;
//! let pipeline = Pipeline::new(raw, cleaned, Arc::new(MemorySalesStore::new()), settings);
//!
//! let report = pipeline.run(&CancellationToken::new()).await?;
//! println!("loaded {} rows", report.rows_loaded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod reconciler;
pub mod schema;
pub mod staging;
pub mod store;
pub mod transformer;
pub mod vocabulary;

// Re-export commonly used types
pub use error::{EtlError, EtlResult};
pub use loader::{LoadOutcome, Loader};
pub use pipeline::{FileOutcome, Pipeline, RunReport};
pub use reconciler::Reconciler;
pub use schema::{CanonicalRecord, FileId};
pub use transformer::{TransformReport, TransformSettings, Transformer};
pub use vocabulary::{CategoricalColumn, CategoryVocabulary};
