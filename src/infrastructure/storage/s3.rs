use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info, warn};

use super::{Storage, StorageBackend, StorageError, StorageResult, staging_file_name, validate_key};

/// Lifetime of URLs handed to clients for direct uploads.
const UPLOAD_URL_TTL: Duration = Duration::from_secs(3600);

/// S3-compatible object store (AWS, MinIO).
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    staging_dir: PathBuf,
}

impl S3Storage {
    pub async fn new(
        endpoint: &str,
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        staging_dir: impl AsRef<Path>,
    ) -> StorageResult<Self> {
        let credentials = Credentials::new(access_key, secret_key, None, None, "static");

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .build();

        let client = Client::from_conf(config);

        info!("✅ Connected to S3 bucket '{}' at {}", bucket, endpoint);

        Ok(Self {
            client,
            bucket: bucket.to_string(),
            staging_dir: staging_dir.as_ref().to_path_buf(),
        })
    }

    fn presigning(ttl: Duration) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(ttl).map_err(|e| StorageError::PresignFailed(e.to_string()))
    }
}

/// Puts are conditional on the key being absent (`If-None-Match: *`); the
/// store answers `412 PreconditionFailed` when it is taken.
fn put_error(key: &str, status: Option<u16>, code: Option<&str>, detail: String) -> StorageError {
    if status == Some(412) || code == Some("PreconditionFailed") {
        StorageError::AlreadyExists(key.to_string())
    } else {
        StorageError::UploadFailed(detail)
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::S3
    }

    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let size = data.len();

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                put_error(
                    key,
                    e.raw_response().map(|r| r.status().as_u16()),
                    e.code(),
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        debug!(bucket = %self.bucket, key = %key, size_bytes = size, "S3 put");
        Ok(())
    }

    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        validate_key(key)?;
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", path.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .if_none_match("*")
            .send()
            .await
            .map_err(|e| {
                put_error(
                    key,
                    e.raw_response().map(|r| r.status().as_u16()),
                    e.code(),
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        debug!(bucket = %self.bucket, key = %key, "S3 put_file from {}", path.display());
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        validate_key(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::DownloadFailed(DisplayErrorContext(&e).to_string())
                }
            })?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes();

        Ok(data)
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        match self.client.head_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().is_some_and(|se| se.is_not_found()) => Ok(false),
            Err(e) => Err(StorageError::DownloadFailed(DisplayErrorContext(&e).to_string())),
        }
    }

    async fn get_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(Self::presigning(ttl)?)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        // S3 answers 204 for missing keys as well.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(DisplayErrorContext(&e).to_string()))?;

        debug!(bucket = %self.bucket, key = %key, "S3 delete");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64> {
        validate_key(prefix)?;
        let mut removed = 0;
        let mut continuation: Option<String> = None;

        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::DeleteFailed(DisplayErrorContext(&e).to_string()))?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    self.delete(key).await?;
                    removed += 1;
                }
            }

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        info!(bucket = %self.bucket, prefix = %prefix, removed, "S3 prefix deleted");
        Ok(removed)
    }

    async fn local_path(&self, _key: &str) -> StorageResult<Option<PathBuf>> {
        Ok(None)
    }

    async fn download_to_local(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(key.to_string())
                } else {
                    StorageError::DownloadFailed(DisplayErrorContext(&e).to_string())
                }
            })?;

        fs::create_dir_all(&self.staging_dir).await?;
        let target = self.staging_dir.join(staging_file_name(key));

        let mut reader = resp.body.into_async_read();
        let mut file = fs::File::create(&target).await?;
        if let Err(e) = tokio::io::copy(&mut reader, &mut file).await {
            drop(file);
            if let Err(cleanup) = fs::remove_file(&target).await {
                warn!("Failed to remove partial download {}: {}", target.display(), cleanup);
            }
            return Err(StorageError::DownloadFailed(format!("{}: {}", key, e)));
        }

        info!(bucket = %self.bucket, key = %key, "⬇️ Downloaded to {}", target.display());
        Ok(target)
    }

    async fn issue_upload_url(&self, key: &str, content_type: &str) -> StorageResult<String> {
        validate_key(key)?;
        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(Self::presigning(UPLOAD_URL_TTL)?)
            .await
            .map_err(|e| StorageError::PresignFailed(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taken_key_maps_to_already_exists() {
        let err = put_error("hls/j/r/segment_000.ts", Some(412), None, "412".to_string());
        assert!(matches!(err, StorageError::AlreadyExists(ref key) if key == "hls/j/r/segment_000.ts"));

        let err = put_error("a.ts", None, Some("PreconditionFailed"), String::new());
        assert!(matches!(err, StorageError::AlreadyExists(_)));
    }

    #[test]
    fn test_other_put_failures_stay_upload_errors() {
        let err = put_error("a.ts", Some(403), Some("AccessDenied"), "denied".to_string());
        assert!(matches!(err, StorageError::UploadFailed(ref detail) if detail == "denied"));
        assert!(matches!(
            put_error("a.ts", None, None, "timeout".to_string()),
            StorageError::UploadFailed(_)
        ));
    }
}
