//! Durable object storage — uploads with bounded retry.
//!
//! Accepted images land under `{date}/`, diagnostics under `{date}/logs/`.
//! Every upload gets up to 3 attempts with doubling backoff and random
//! jitter; a permanent failure is recorded, never propagated — remaining
//! artifacts keep flowing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::StorageError;

/// Fixed source tag attached to every stored object.
pub const SOURCE_TAG: &str = "mail-capture";

/// Maximum attempts per artifact.
pub const MAX_UPLOAD_ATTEMPTS: u32 = 3;

/// Kind of stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    MailImage,
    Log,
    Trace,
    Screenshot,
}

/// Final status of an upload attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Stored,
    Failed,
}

/// Record of one artifact's upload attempt sequence.
#[derive(Debug, Clone, Serialize)]
pub struct StoredArtifact {
    pub kind: ArtifactKind,
    pub date_partition: String,
    pub key: String,
    pub attempts: u32,
    pub status: UploadStatus,
}

/// Durable object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError>;
}

/// Uploads artifacts with retry, producing a `StoredArtifact` either way.
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    backoff_base: Duration,
    retention_days: u32,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            backoff_base: Duration::from_millis(500),
            retention_days: 10,
        }
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Upload one artifact with up to [`MAX_UPLOAD_ATTEMPTS`] tries.
    pub async fn upload(
        &self,
        kind: ArtifactKind,
        date_partition: &str,
        key: String,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> StoredArtifact {
        let metadata = self.object_metadata(date_partition);

        for attempt in 1..=MAX_UPLOAD_ATTEMPTS {
            match self.store.put(&key, &bytes, content_type, &metadata).await {
                Ok(()) => {
                    info!(key = %key, attempt, size = bytes.len(), "Uploaded artifact");
                    return StoredArtifact {
                        kind,
                        date_partition: date_partition.to_string(),
                        key,
                        attempts: attempt,
                        status: UploadStatus::Stored,
                    };
                }
                Err(e) => {
                    warn!(key = %key, attempt, error = %e, "Upload attempt failed");
                    if attempt < MAX_UPLOAD_ATTEMPTS {
                        tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
                    }
                }
            }
        }

        StoredArtifact {
            kind,
            date_partition: date_partition.to_string(),
            key,
            attempts: MAX_UPLOAD_ATTEMPTS,
            status: UploadStatus::Failed,
        }
    }

    fn object_metadata(&self, date_partition: &str) -> HashMap<String, String> {
        HashMap::from([
            ("capture-date".to_string(), date_partition.to_string()),
            ("source".to_string(), SOURCE_TAG.to_string()),
            (
                "automation-version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            ),
            (
                "retention-days".to_string(),
                self.retention_days.to_string(),
            ),
        ])
    }
}

/// Doubling delay with ±50% random jitter.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let nominal = base.as_millis() as u64 * (1u64 << (attempt - 1));
    let jittered = rand::thread_rng().gen_range(nominal / 2..=nominal + nominal / 2);
    Duration::from_millis(jittered)
}

/// Content type by file extension (diagnostic uploads carry mixed formats).
pub fn content_type_for(filename: &str) -> &'static str {
    if filename.ends_with(".json") {
        "application/json"
    } else if filename.ends_with(".html") {
        "text/html"
    } else if filename.ends_with(".png") {
        "image/png"
    } else {
        "text/plain"
    }
}

/// S3-compatible HTTP object store (`PUT {base}/{key}` with metadata
/// headers).
pub struct HttpObjectStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.base_url)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StorageError> {
        let mut request = self
            .client
            .put(self.object_url(key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        for (name, value) in metadata {
            request = request.header(format!("x-amz-meta-{name}"), value);
        }

        let response = request.send().await.map_err(|e| StorageError::RequestFailed {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(StorageError::RejectedStatus {
                key: key.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}
