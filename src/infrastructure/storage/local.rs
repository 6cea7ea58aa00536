use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{Storage, StorageBackend, StorageError, StorageResult, staging_file_name, validate_key};

/// Blobs live as plain files below a managed root directory.
#[derive(Clone, Debug)]
pub struct LocalStorage {
    root: PathBuf,
    staging_dir: PathBuf,
}

impl LocalStorage {
    pub async fn new(root: impl AsRef<Path>, staging_dir: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).await.map_err(|e| {
            StorageError::Config(format!(
                "Failed to create storage root {}: {}",
                root.display(),
                e
            ))
        })?;
        let root = fs::canonicalize(root).await?;

        Ok(Self {
            root,
            staging_dir: staging_dir.as_ref().to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a key onto the root, refusing anything that would land outside it
    /// (including through symlinks of already existing ancestors).
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let path = self.root.join(key);

        let mut probe = Some(path.as_path());
        while let Some(candidate) = probe {
            match std::fs::canonicalize(candidate) {
                Ok(canonical) => {
                    if !canonical.starts_with(&self.root) {
                        return Err(StorageError::InvalidKey(format!(
                            "{} resolves outside the storage root",
                            key
                        )));
                    }
                    break;
                }
                Err(_) => probe = candidate.parent(),
            }
        }

        Ok(path)
    }

    async fn ensure_parent_dir(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn create_new(path: &Path, key: &str) -> StorageResult<fs::File> {
        Self::ensure_parent_dir(path).await?;
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => StorageError::AlreadyExists(key.to_string()),
                _ => StorageError::UploadFailed(format!("{}: {}", path.display(), e)),
            })
    }

    async fn count_files(dir: &Path) -> StorageResult<u64> {
        let mut count = 0;
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                if entry.file_type().await?.is_dir() {
                    pending.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let mut file = Self::create_new(&path, key).await?;

        file.write_all(&data)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", path.display(), e)))?;
        file.sync_all().await?;

        debug!(key = %key, size_bytes = data.len(), "Local storage put");
        Ok(())
    }

    async fn put_file(&self, key: &str, source: &Path, _content_type: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        let mut reader = fs::File::open(source).await?;
        let mut file = Self::create_new(&path, key).await?;

        let size = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("{}: {}", path.display(), e)))?;
        file.sync_all().await?;

        debug!(key = %key, size_bytes = size, "Local storage put_file");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::DownloadFailed(format!("{}: {}", path.display(), e))),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.resolve(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Files on disk have no access-limited form; they are never exposed
    /// directly.
    async fn get_url(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        validate_key(key)?;
        Err(StorageError::Unsupported(StorageBackend::Local))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Local storage delete");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::DeleteFailed(format!("{}: {}", path.display(), e))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64> {
        let dir = self.resolve(prefix.trim_end_matches('/'))?;
        if !fs::try_exists(&dir).await.unwrap_or(false) {
            return Ok(0);
        }
        if !fs::metadata(&dir).await?.is_dir() {
            fs::remove_file(&dir).await?;
            return Ok(1);
        }

        let removed = Self::count_files(&dir).await?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::DeleteFailed(format!("{}: {}", dir.display(), e))),
        }

        info!(prefix = %prefix, removed, "Local storage prefix deleted");
        Ok(removed)
    }

    async fn local_path(&self, key: &str) -> StorageResult<Option<PathBuf>> {
        let path = self.resolve(key)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            Ok(Some(path))
        } else {
            Ok(None)
        }
    }

    async fn download_to_local(&self, key: &str) -> StorageResult<PathBuf> {
        let source = self.resolve(key)?;
        if !fs::try_exists(&source).await.unwrap_or(false) {
            return Err(StorageError::NotFound(key.to_string()));
        }

        fs::create_dir_all(&self.staging_dir).await?;
        let target = self.staging_dir.join(staging_file_name(key));
        fs::copy(&source, &target).await.map_err(|e| {
            StorageError::DownloadFailed(format!("{} -> {}: {}", key, target.display(), e))
        })?;

        Ok(target)
    }

    async fn issue_upload_url(&self, _key: &str, _content_type: &str) -> StorageResult<String> {
        Err(StorageError::Unsupported(StorageBackend::Local))
    }
}
