//! Pipeline configuration
//!
//! Values come from the environment (a `.env` file is honoured) with the defaults below.
//! Everything is validated before any file is touched.

use encoding_rs::Encoding;
use retail_common::RetailError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use crate::error::{EtlError, EtlResult};
use crate::schema::{ColumnMapping, SchemaConfig};
use crate::staging::{LocalStaging, S3Staging, S3StagingConfig, StagingArea};
use crate::transformer::TransformSettings;
use crate::vocabulary::CategoryVocabulary;

// ============================================================================
// Defaults
// ============================================================================

/// Default raw staging location (directory or S3 key prefix)
pub const DEFAULT_RAW_PREFIX: &str = "data/retail/raw";

/// Default cleaned staging location
pub const DEFAULT_CLEANED_PREFIX: &str = "data/retail/cleaned";

/// Encoding of the historical source drops
pub const DEFAULT_SOURCE_ENCODING: &str = "ISO-8859-1";

pub const DEFAULT_VOCABULARY_PATH: &str = "config/vocabulary.toml";

pub const DEFAULT_CONCURRENCY: usize = crate::pipeline::DEFAULT_CONCURRENCY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StagingBackend {
    #[default]
    Local,
    S3,
}

impl FromStr for StagingBackend {
    type Err = RetailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "fs" => Ok(Self::Local),
            "s3" | "minio" => Ok(Self::S3),
            other => Err(RetailError::config(format!(
                "unknown staging backend '{}', expected 'local' or 's3'",
                other
            ))),
        }
    }
}

impl fmt::Display for StagingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::S3 => f.write_str("s3"),
        }
    }
}

/// Resolve a WHATWG encoding label such as `ISO-8859-1` or `utf-8`
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, RetailError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| RetailError::UnsupportedEncoding(label.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub raw_prefix: String,
    pub cleaned_prefix: String,
    pub staging_backend: StagingBackend,
    pub source_encoding: String,
    /// Schema TOML; the built-in mapping applies when unset
    pub schema_path: Option<PathBuf>,
    pub vocabulary_path: PathBuf,
    pub concurrency: usize,
    pub s3: S3StagingConfig,
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            raw_prefix: DEFAULT_RAW_PREFIX.to_string(),
            cleaned_prefix: DEFAULT_CLEANED_PREFIX.to_string(),
            staging_backend: StagingBackend::Local,
            source_encoding: DEFAULT_SOURCE_ENCODING.to_string(),
            schema_path: None,
            vocabulary_path: PathBuf::from(DEFAULT_VOCABULARY_PATH),
            concurrency: DEFAULT_CONCURRENCY,
            s3: S3StagingConfig::from_env(),
        }
    }
}

impl EtlConfig {
    /// Load `.env`, then read the environment
    pub fn load() -> EtlResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_env()
    }

    pub fn from_env() -> EtlResult<Self> {
        let concurrency = match std::env::var("RETAIL_CONCURRENCY") {
            Ok(value) => value.trim().parse().map_err(|_| {
                EtlError::config(format!("RETAIL_CONCURRENCY must be a positive integer, got '{}'", value))
            })?,
            Err(_) => DEFAULT_CONCURRENCY,
        };

        let staging_backend = match std::env::var("RETAIL_STAGING_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StagingBackend::default(),
        };

        let config = Self {
            raw_prefix: std::env::var("RETAIL_RAW_PREFIX")
                .unwrap_or_else(|_| DEFAULT_RAW_PREFIX.to_string()),
            cleaned_prefix: std::env::var("RETAIL_CLEANED_PREFIX")
                .unwrap_or_else(|_| DEFAULT_CLEANED_PREFIX.to_string()),
            staging_backend,
            source_encoding: std::env::var("RETAIL_SOURCE_ENCODING")
                .unwrap_or_else(|_| DEFAULT_SOURCE_ENCODING.to_string()),
            schema_path: std::env::var("RETAIL_SCHEMA_PATH").ok().map(PathBuf::from),
            vocabulary_path: std::env::var("RETAIL_VOCABULARY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_VOCABULARY_PATH)),
            concurrency,
            s3: S3StagingConfig::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EtlResult<()> {
        if self.concurrency == 0 {
            return Err(EtlError::config("RETAIL_CONCURRENCY must be at least 1"));
        }

        if self.raw_prefix.trim_matches('/') == self.cleaned_prefix.trim_matches('/') {
            return Err(EtlError::config(format!(
                "raw and cleaned staging must differ (both are '{}')",
                self.raw_prefix
            )));
        }

        self.encoding()?;

        if self.staging_backend == StagingBackend::S3 && self.s3.bucket.is_empty() {
            return Err(EtlError::config("S3_BUCKET cannot be empty"));
        }

        Ok(())
    }

    pub fn encoding(&self) -> EtlResult<&'static Encoding> {
        Ok(resolve_encoding(&self.source_encoding)?)
    }

    pub async fn column_mapping(&self) -> EtlResult<ColumnMapping> {
        let schema = match &self.schema_path {
            Some(path) => {
                info!(path = %path.display(), "Loading schema mapping");
                SchemaConfig::load(path).await?
            },
            None => SchemaConfig::default(),
        };
        schema.validate()
    }

    pub async fn vocabulary(&self) -> EtlResult<CategoryVocabulary> {
        CategoryVocabulary::load(&self.vocabulary_path).await
    }

    /// Mapping, vocabulary and encoding for the transformer
    pub async fn transform_settings(&self) -> EtlResult<TransformSettings> {
        Ok(TransformSettings {
            mapping: self.column_mapping().await?,
            vocabulary: Arc::new(self.vocabulary().await?),
            encoding: self.encoding()?,
        })
    }

    /// Raw and cleaned staging areas on the configured backend
    pub async fn staging(&self) -> EtlResult<(Arc<dyn StagingArea>, Arc<dyn StagingArea>)> {
        match self.staging_backend {
            StagingBackend::Local => Ok((
                Arc::new(LocalStaging::new(&self.raw_prefix)),
                Arc::new(LocalStaging::new(&self.cleaned_prefix)),
            )),
            StagingBackend::S3 => {
                let client = self.s3.client().await?;
                Ok((
                    Arc::new(S3Staging::new(client.clone(), &self.s3.bucket, &self.raw_prefix)),
                    Arc::new(S3Staging::new(client, &self.s3.bucket, &self.cleaned_prefix)),
                ))
            },
        }
    }
}
