use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::stderr_tail;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe tool unavailable: {0}")]
    Unavailable(String),

    #[error("container could not be parsed: {0}")]
    Unreadable(String),

    #[error("probe timed out after {0:?}")]
    TimedOut(Duration),
}

/// Reads a container's duration from its metadata, without decoding.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn duration_secs(&self, path: &Path) -> Result<f64, ProbeError>;
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    binary: String,
    timeout: Duration,
}

impl FfprobeProbe {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn duration_secs(&self, path: &Path) -> Result<f64, ProbeError> {
        let run = Command::new(&self.binary)
            .args(["-v", "error", "-show_entries", "format=duration", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => return Err(ProbeError::TimedOut(self.timeout)),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(ProbeError::Unavailable(format!("{}: {}", self.binary, e)));
            }
            Ok(Err(e)) => return Err(ProbeError::Unavailable(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            return Err(ProbeError::Unreadable(stderr_tail(&output.stderr, 300)));
        }

        let duration = parse_ffprobe_duration(&output.stdout)?;
        debug!("Probed {}: {:.3}s", path.display(), duration);
        Ok(duration)
    }
}

pub fn parse_ffprobe_duration(stdout: &[u8]) -> Result<f64, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::Unreadable(format!("unexpected ffprobe output: {}", e)))?;

    parsed
        .format
        .and_then(|f| f.duration)
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ProbeError::Unreadable("container reports no duration".to_string()))
}
