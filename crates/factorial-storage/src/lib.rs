//! Artifact store: content keyed by number, storing the decimal body of
//! `n!`. Two interchangeable backends sit behind the [`ArtifactStore`]
//! trait: a local filesystem store (always available, used in tests and
//! single-host deployments) and an S3 store for production.

use async_trait::async_trait;
use std::time::Duration;

pub const KEY_PREFIX: &str = "factorials/";

/// Operations time out after this long; the pipeline treats a timeout as a
/// transient failure subject to the usual retry discipline.
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("artifact not found for key {0}")]
    NotFound(String),
    #[error("artifact operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("S3 error: {0}")]
    S3(String),
    #[error("stored artifact was not valid UTF-8")]
    InvalidUtf8,
}

/// Deterministic key for a number's artifact: `factorials/<n>.txt`.
pub fn generate_key(number: u64) -> String {
    format!("{KEY_PREFIX}{number}.txt")
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Writes `body` under the deterministic key for `number`, returning
    /// that key. Overwrites existing content; idempotent for the same
    /// `(number, body)` pair.
    async fn put(&self, number: u64, body: &str) -> Result<String, StorageError>;

    /// Reads the stored body back out. Fails if `key` does not exist.
    async fn get(&self, key: &str) -> Result<String, StorageError>;
}

/// Filesystem-backed artifact store, mirroring the local-storage fallback
/// used when no object store is configured.
pub struct LocalArtifactStore {
    base_path: std::path::PathBuf,
}

impl LocalArtifactStore {
    pub fn new(base_path: impl Into<std::path::PathBuf>) -> Self {
        LocalArtifactStore {
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, key: &str) -> std::path::PathBuf {
        self.base_path.join(key)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn put(&self, number: u64, body: &str) -> Result<String, StorageError> {
        let key = generate_key(number);
        let path = self.resolve(&key);
        let write = async {
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            tokio::fs::write(&path, body.as_bytes()).await?;
            Ok::<_, std::io::Error>(())
        };
        tokio::time::timeout(OPERATION_TIMEOUT, write)
            .await
            .map_err(|_| StorageError::Timeout(OPERATION_TIMEOUT))??;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let path = self.resolve(key);
        let read = tokio::fs::read(&path);
        let bytes = tokio::time::timeout(OPERATION_TIMEOUT, read)
            .await
            .map_err(|_| StorageError::Timeout(OPERATION_TIMEOUT))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::Io(e)
                }
            })?;
        String::from_utf8(bytes).map_err(|_| StorageError::InvalidUtf8)
    }
}

/// S3-backed artifact store. The AWS SDK client already scopes each request
/// to a single connection from its pool and releases it on completion
/// (success or error), so no extra handle bookkeeping is needed here.
pub struct S3ArtifactStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        S3ArtifactStore {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn put(&self, number: u64, body: &str) -> Result<String, StorageError> {
        let key = generate_key(number);
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(aws_sdk_s3::primitives::ByteStream::from(body.as_bytes().to_vec()))
            .send();
        tokio::time::timeout(OPERATION_TIMEOUT, put)
            .await
            .map_err(|_| StorageError::Timeout(OPERATION_TIMEOUT))?
            .map_err(|e| StorageError::S3(e.to_string()))?;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<String, StorageError> {
        let get = self.client.get_object().bucket(&self.bucket).key(key).send();
        let output = tokio::time::timeout(OPERATION_TIMEOUT, get)
            .await
            .map_err(|_| StorageError::Timeout(OPERATION_TIMEOUT))?
            .map_err(|e| {
                if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::S3(e.to_string())
                }
            })?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(e.to_string()))?
            .into_bytes();
        String::from_utf8(bytes.to_vec()).map_err(|_| StorageError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_is_deterministic_and_collision_free() {
        assert_eq!(generate_key(0), "factorials/0.txt");
        assert_eq!(generate_key(10000), "factorials/10000.txt");
        assert_ne!(generate_key(1), generate_key(10));
    }

    #[tokio::test]
    async fn local_store_round_trips_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let key = store.put(5, "120").await.unwrap();
        assert_eq!(key, "factorials/5.txt");
        assert_eq!(store.get(&key).await.unwrap(), "120");
    }

    #[tokio::test]
    async fn local_store_put_is_idempotent_for_same_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.put(3, "6").await.unwrap();
        store.put(3, "6").await.unwrap();
        assert_eq!(store.get(&generate_key(3)).await.unwrap(), "6");
    }

    #[tokio::test]
    async fn local_store_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        let err = store.get("factorials/999.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn local_store_overwrites_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::new(dir.path());
        store.put(7, "old").await.unwrap();
        store.put(7, "new").await.unwrap();
        assert_eq!(store.get(&generate_key(7)).await.unwrap(), "new");
    }
}
