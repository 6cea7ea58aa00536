//! Storage Gateway.
//!
//! Every blob is addressed by an opaque key. Callers never learn which backend
//! is active: the backend is picked once in [`create_storage`] and handed out
//! as `Arc<dyn Storage>`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::info;

use crate::config::settings::StorageConfig;

pub mod local;
pub mod s3;
pub mod staged;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use staged::{StagedFile, stage_source};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Object already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Operation not supported by the {0} backend")]
    Unsupported(StorageBackend),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Local => f.write_str("local"),
            StorageBackend::S3 => f.write_str("s3"),
        }
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" | "fs" => Ok(StorageBackend::Local),
            "s3" | "minio" | "remote" => Ok(StorageBackend::S3),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    fn backend(&self) -> StorageBackend;

    /// Store `data` under a fresh key. Keys are write-once.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    /// Same as [`Storage::put`] but streams the body from a local file.
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Signed link to `key`, valid for `ttl`. Backends that cannot hand out
    /// access-limited links report `Unsupported`; blobs are then only served
    /// through the authenticated delivery routes.
    async fn get_url(&self, key: &str, ttl: Duration) -> StorageResult<String>;

    /// Idempotent: a missing key is not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete every key under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64>;

    /// Filesystem path of `key` when the backend keeps blobs on local disk.
    async fn local_path(&self, key: &str) -> StorageResult<Option<PathBuf>>;

    /// Copy `key` into a fresh temporary file. The caller owns the returned
    /// path and must remove it.
    async fn download_to_local(&self, key: &str) -> StorageResult<PathBuf>;

    /// Signed URL a client can `PUT` the object to directly.
    async fn issue_upload_url(&self, key: &str, content_type: &str) -> StorageResult<String>;
}

/// Rejects keys that are empty, absolute, or contain `..` segments.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.starts_with('/') || key.starts_with('\\') || key.contains('\0') {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    if key.split(['/', '\\']).any(|segment| segment == ".." || segment == ".") {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Temp file name for a staged download, keeping the key's extension so
/// ffmpeg can sniff the container.
pub(crate) fn staging_file_name(key: &str) -> String {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    format!("staged-{}.{}", uuid::Uuid::new_v4(), ext)
}

pub async fn create_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config.backend {
        StorageBackend::Local => {
            let storage = LocalStorage::new(&config.local_root, &config.staging_dir).await?;
            info!("✅ Using local storage at {}", config.local_root.display());
            Ok(Arc::new(storage))
        }
        StorageBackend::S3 => {
            let missing = |name: &str| StorageError::Config(format!("{} not configured", name));
            let endpoint = config.s3_endpoint.as_deref().ok_or_else(|| missing("S3_ENDPOINT"))?;
            let bucket = config.s3_bucket.as_deref().ok_or_else(|| missing("S3_BUCKET"))?;
            let access_key = config
                .s3_access_key
                .as_deref()
                .ok_or_else(|| missing("AWS_ACCESS_KEY_ID"))?;
            let secret_key = config
                .s3_secret_key
                .as_deref()
                .ok_or_else(|| missing("AWS_SECRET_ACCESS_KEY"))?;

            let storage = S3Storage::new(
                endpoint,
                bucket,
                &config.s3_region,
                access_key,
                secret_key,
                &config.staging_dir,
            )
            .await?;
            Ok(Arc::new(storage))
        }
    }
}
