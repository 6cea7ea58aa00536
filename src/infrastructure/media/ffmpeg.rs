use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use super::manifest::{ManifestError, PLAYLIST_FILE, SEGMENT_PATTERN};
use super::stderr_tail;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoder unavailable: {0}")]
    Unavailable(String),

    #[error("{stage} exited with {status}: {stderr}")]
    Failed {
        stage: &'static str,
        status: String,
        stderr: String,
    },

    #[error("expected output missing: {0}")]
    MissingOutput(String),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Out-of-process encoder producing a segmented HLS rendition and a still.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Segments `input` into `output_dir` and returns the manifest path.
    async fn segment(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError>;

    /// Writes one frame near the start of `input` to `output`.
    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    binary: String,
    segment_seconds: u32,
    preset: String,
    thumbnail_offset_secs: f64,
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<String>, segment_seconds: u32, preset: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            segment_seconds: segment_seconds.max(1),
            preset: preset.into(),
            thumbnail_offset_secs: 1.0,
        }
    }

    fn hls_args(&self, input: &Path, output_dir: &Path) -> Vec<OsString> {
        let seconds = self.segment_seconds.to_string();
        let keyframes = format!("expr:gte(t,n_forced*{})", seconds);
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-i"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                self.preset.as_str(),
                "-crf",
                "23",
                // Key frames on every boundary so segments are exactly `seconds` long.
                "-force_key_frames",
                keyframes.as_str(),
                "-sc_threshold",
                "0",
                "-c:a",
                "aac",
                "-b:a",
                "128k",
                "-ar",
                "44100",
                "-ac",
                "2",
                "-f",
                "hls",
                "-hls_time",
                seconds.as_str(),
                "-hls_playlist_type",
                "vod",
                "-hls_segment_filename",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output_dir.join(SEGMENT_PATTERN).into_os_string());
        args.push(OsString::from("-y"));
        args.push(output_dir.join(PLAYLIST_FILE).into_os_string());
        args
    }

    fn thumbnail_args(input: &Path, output: &Path, offset_secs: f64) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-loglevel", "error", "-ss"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(OsString::from(format!("{:.3}", offset_secs)));
        args.push(OsString::from("-i"));
        args.push(input.as_os_str().to_owned());
        args.extend(
            ["-frames:v", "1", "-vf", "scale=320:-1", "-y"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }

    async fn run(&self, stage: &'static str, args: Vec<OsString>) -> Result<(), TranscodeError> {
        debug!("Running {} {:?}", self.binary, args);
        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                    TranscodeError::Unavailable(format!("{}: {}", self.binary, e))
                }
                _ => TranscodeError::Io(e),
            })?;

        if !output.status.success() {
            return Err(TranscodeError::Failed {
                stage,
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr, 500),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn segment(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError> {
        tokio::fs::create_dir_all(output_dir).await?;
        self.run("hls", self.hls_args(input, output_dir)).await?;

        let manifest = output_dir.join(PLAYLIST_FILE);
        if !tokio::fs::try_exists(&manifest).await.unwrap_or(false) {
            return Err(TranscodeError::MissingOutput(manifest.display().to_string()));
        }
        Ok(manifest)
    }

    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        let first = self
            .run("thumbnail", Self::thumbnail_args(input, output, self.thumbnail_offset_secs))
            .await;

        let produced = tokio::fs::try_exists(output).await.unwrap_or(false);
        match first {
            Ok(()) if produced => return Ok(()),
            Err(TranscodeError::Unavailable(reason)) => {
                return Err(TranscodeError::Unavailable(reason));
            }
            Ok(()) => warn!("No frame at {}s, retrying thumbnail at 0s", self.thumbnail_offset_secs),
            Err(e) => warn!("Thumbnail at {}s failed ({}), retrying at 0s", self.thumbnail_offset_secs, e),
        }

        // Sources shorter than the offset yield no frame.
        self.run("thumbnail", Self::thumbnail_args(input, output, 0.0)).await?;
        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            return Err(TranscodeError::MissingOutput(output.display().to_string()));
        }
        Ok(())
    }
}
