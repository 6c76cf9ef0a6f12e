//! Retail Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the retail ingestion workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`RetailError`] and the [`Result`] alias used by infrastructure code
//! - **Logging**: environment-driven `tracing` setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use retail_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{Result, RetailError};
