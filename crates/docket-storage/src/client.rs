//! R2 client implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::blob::{BlobStore, ByteRange};
use crate::error::{StorageError, StorageResult};

/// Connection settings for an R2 bucket.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// S3-compatible endpoint of the account
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// R2 accepts "auto"
    pub region: String,
}

fn required_var(name: &str) -> StorageResult<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| StorageError::config_error(format!("{} not set", name)))
}

impl R2Config {
    /// Reads `R2_ENDPOINT_URL`, `R2_ACCESS_KEY_ID`, `R2_SECRET_ACCESS_KEY`,
    /// `R2_BUCKET_NAME` and the optional `R2_REGION`.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: required_var("R2_ENDPOINT_URL")?,
            access_key_id: required_var("R2_ACCESS_KEY_ID")?,
            secret_access_key: required_var("R2_SECRET_ACCESS_KEY")?,
            bucket_name: required_var("R2_BUCKET_NAME")?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    bucket: String,
}

/// Map an SDK error, recognising missing keys.
fn map_get_error(key: &str, e: impl std::fmt::Display) -> StorageError {
    let message = e.to_string();
    if message.contains("NoSuchKey") || message.contains("NotFound") {
        StorageError::not_found(key)
    } else {
        StorageError::download_failed(message)
    }
}

impl R2Client {
    pub fn new(config: R2Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
        }
    }

    /// Client for the bucket named by [`R2Config::from_env`].
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(R2Config::from_env()?))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload bytes to R2.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!(key = %key, bytes = data.len(), "Uploading object");

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    /// Download object as bytes.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.get_object_range(key, None).await
    }

    /// Get object with optional byte range.
    pub async fn get_object_range(
        &self,
        key: &str,
        range: Option<ByteRange>,
    ) -> StorageResult<Vec<u8>> {
        debug!(key = %key, range = ?range, "Downloading object");

        let mut request = self.client.get_object().bucket(&self.bucket).key(key);
        if let Some(range) = range {
            request = request.range(range.to_header());
        }

        let response = request.send().await.map_err(|e| map_get_error(key, e))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    /// Delete an object.
    pub async fn delete_object(&self, key: &str) -> StorageResult<()> {
        debug!(key = %key, "Deleting object");

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        Ok(())
    }

    /// List object keys under a prefix.
    pub async fn list_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(keys)
    }

    /// Delete multiple objects, at most 1000 per request.
    pub async fn delete_objects(&self, keys: &[String]) -> StorageResult<u32> {
        let mut deleted = 0u32;

        for batch in keys.chunks(1000) {
            let objects = batch
                .iter()
                .map(|k| {
                    aws_sdk_s3::types::ObjectIdentifier::builder()
                        .key(k)
                        .build()
                        .map_err(|e| StorageError::delete_failed(e.to_string()))
                })
                .collect::<StorageResult<Vec<_>>>()?;

            let delete = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| StorageError::delete_failed(e.to_string()))?;

            deleted += batch.len() as u32;
        }

        if deleted > 0 {
            info!(count = deleted, "Deleted objects");
        }
        Ok(deleted)
    }

    /// `HEAD` the bucket; checked once at startup.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("head_bucket {}: {}", self.bucket, e)))?;
        Ok(())
    }
}

#[async_trait]
impl BlobStore for R2Client {
    async fn download(&self, path: &str, range: Option<ByteRange>) -> StorageResult<Vec<u8>> {
        self.get_object_range(path, range).await
    }
}
