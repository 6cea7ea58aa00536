use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Storage, StorageResult};

/// A local copy of a stored blob, ready for tools that need a real file.
///
/// A `Temporary` file was downloaded for this caller and is removed when the
/// guard drops, whichever way the caller exits. A `Borrowed` path belongs to
/// the backend and is never touched.
#[derive(Debug)]
pub enum StagedFile {
    Borrowed(PathBuf),
    Temporary(PathBuf),
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        match self {
            StagedFile::Borrowed(path) | StagedFile::Temporary(path) => path,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, StagedFile::Temporary(_))
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let StagedFile::Temporary(path) = self else {
            return;
        };
        match std::fs::remove_file(path.as_path()) {
            Ok(()) => debug!("Removed staged copy {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Staged copy {} was already removed", path.display())
            }
            Err(e) => warn!("Failed to remove staged copy {}: {}", path.display(), e),
        }
    }
}

/// Use the backend's own file when it has one, otherwise download a
/// temporary copy.
pub async fn stage_source(storage: &dyn Storage, key: &str) -> StorageResult<StagedFile> {
    if let Some(path) = storage.local_path(key).await? {
        return Ok(StagedFile::Borrowed(path));
    }
    let path = storage.download_to_local(key).await?;
    Ok(StagedFile::Temporary(path))
}
