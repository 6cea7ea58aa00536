pub mod ffmpeg;
pub mod manifest;
pub mod probe;

pub use ffmpeg::{FfmpegTranscoder, TranscodeError, Transcoder};
pub use probe::{FfprobeProbe, MediaProbe, ProbeError};

/// Last `max` bytes of a child's stderr, lossily decoded and trimmed.
pub fn stderr_tail(bytes: &[u8], max: usize) -> String {
    let start = bytes.len().saturating_sub(max);
    let tail = String::from_utf8_lossy(&bytes[start..]).trim().to_string();
    if tail.is_empty() {
        "no diagnostic output".to_string()
    } else {
        tail
    }
}
