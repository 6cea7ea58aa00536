use std::path::Path;

use axum::extract::multipart::Field;
use futures_util::StreamExt;
use tempfile::{Builder, NamedTempFile};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("Upload exceeds the {limit_bytes} byte limit")]
    TooLarge { limit_bytes: u64 },

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A multipart file written to local disk. The file is deleted when this
/// value drops.
#[derive(Debug)]
pub struct SpooledUpload {
    pub file: NamedTempFile,
    pub size: u64,
    pub file_name: String,
    pub content_type: String,
}

impl SpooledUpload {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Streams `field` into a temp file under `dir`, giving up as soon as more
/// than `max_bytes` have arrived.
pub async fn spool_field(
    mut field: Field<'_>,
    dir: &Path,
    max_bytes: u64,
) -> Result<SpooledUpload, SpoolError> {
    let file_name = field.file_name().unwrap_or("video.mp4").to_string();
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| mime_guess::from_path(&file_name).first_or_octet_stream().to_string());

    tokio::fs::create_dir_all(dir).await?;
    let suffix = Path::new(&file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    let temp = Builder::new().prefix("upload-").suffix(&suffix).tempfile_in(dir)?;
    let mut file = tokio::fs::File::from_std(temp.reopen()?);

    let mut size: u64 = 0;
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            error!("Stream error: {}", e);
            SpoolError::Stream(e.to_string())
        })?;

        size += chunk.len() as u64;
        if size > max_bytes {
            return Err(SpoolError::TooLarge { limit_bytes: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!("Spooled {} ({} bytes) to {}", file_name, size, temp.path().display());
    Ok(SpooledUpload {
        file: temp,
        size,
        file_name,
        content_type,
    })
}
