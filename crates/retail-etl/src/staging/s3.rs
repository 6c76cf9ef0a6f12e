//! Staging area in an S3-compatible bucket (AWS, MinIO)

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    Client,
};
use serde::{Deserialize, Serialize};
use std::env;
use tracing::{debug, info, instrument};

use super::{StagingArea, StagingError};
use crate::error::{EtlError, EtlResult};
use crate::schema::FileId;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET: &str = "retail-staging";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3StagingConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    /// Static credentials; the default AWS provider chain is used when absent
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl S3StagingConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            access_key: env::var("S3_ACCESS_KEY").ok(),
            secret_key: env::var("S3_SECRET_KEY").ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Build a client shared by the raw and cleaned staging areas
    pub async fn client(&self) -> EtlResult<Client> {
        let builder = match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "retail-staging");
                aws_sdk_s3::Config::builder()
                    .behavior_version(aws_sdk_s3::config::BehaviorVersion::latest())
                    .credentials_provider(credentials)
                    .region(Region::new(self.region.clone()))
            },
            (None, None) => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
            _ => {
                return Err(EtlError::config(
                    "S3_ACCESS_KEY and S3_SECRET_KEY must be set together",
                ))
            },
        };

        let mut builder = builder.force_path_style(self.path_style);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            bucket = %self.bucket,
            endpoint = ?self.endpoint,
            region = %self.region,
            "S3 staging client initialized"
        );
        Ok(Client::from_conf(builder.build()))
    }
}

/// `<prefix>/<id>.csv` objects in one bucket
#[derive(Clone)]
pub struct S3Staging {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Staging {
    pub fn new(client: Client, bucket: impl Into<String>, prefix: &str) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn key_prefix(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    pub fn key_for(&self, id: &FileId) -> String {
        format!("{}{}", self.key_prefix(), id.file_name())
    }

    /// Identifier for a listed key directly under the prefix
    fn id_for_key(&self, key: &str) -> Option<FileId> {
        let name = key.strip_prefix(&self.key_prefix())?;
        if name.contains('/') {
            return None;
        }
        FileId::from_file_name(name)
    }
}

#[async_trait]
impl StagingArea for S3Staging {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    #[instrument(skip(self), fields(location = %self.describe()))]
    async fn list_ids(&self) -> EtlResult<Vec<FileId>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.key_prefix())
            .into_paginator()
            .send();

        let mut ids = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| EtlError::storage(format!("listing {}", self.describe()), e))?;
            ids.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter_map(|key| self.id_for_key(key)),
            );
        }

        ids.sort();
        debug!(count = ids.len(), "Listed staged objects");
        Ok(ids)
    }

    #[instrument(skip(self), fields(location = %self.describe()))]
    async fn read(&self, id: &FileId) -> Result<Vec<u8>, StagingError> {
        let key = self.key_for(id);
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StagingError::NotFound(id.clone())
                } else {
                    StagingError::Unavailable(format!("s3://{}/{}: {}", self.bucket, key, e))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StagingError::Unavailable(format!("s3://{}/{}: {}", self.bucket, key, e)))?
            .into_bytes()
            .to_vec();

        debug!(bytes = data.len(), key = %key, "Downloaded staged object");
        Ok(data)
    }

    #[instrument(skip(self, content), fields(location = %self.describe()))]
    async fn write(&self, id: &FileId, content: Vec<u8>) -> EtlResult<()> {
        let key = self.key_for(id);
        let size = content.len();

        // A single PUT is published atomically
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("text/csv")
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| EtlError::storage(format!("writing s3://{}/{}", self.bucket, key), e))?;

        debug!(bytes = size, key = %key, "Uploaded staged object");
        Ok(())
    }
}
