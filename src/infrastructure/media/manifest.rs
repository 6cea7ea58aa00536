//! HLS media playlists (`.m3u8`) as produced by ffmpeg's `hls` muxer.

use std::fmt::Write as _;

use thiserror::Error;

pub const PLAYLIST_FILE: &str = "playlist.m3u8";
pub const THUMBNAIL_FILE: &str = "thumbnail.jpg";
pub const SEGMENT_EXTENSION: &str = "ts";
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

pub const PLAYLIST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const THUMBNAIL_CONTENT_TYPE: &str = "image/jpeg";

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("missing #EXTM3U header")]
    MissingHeader,

    #[error("line {line}: invalid segment duration '{value}'")]
    InvalidDuration { line: usize, value: String },

    #[error("line {0}: #EXTINF without a segment URI")]
    MissingUri(usize),

    #[error("playlist lists no segments")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentEntry {
    pub duration: f64,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<SegmentEntry>,
    pub ended: bool,
}

impl MediaPlaylist {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(idx, line)| (idx + 1, line.trim()))
            .filter(|(_, line)| !line.is_empty());

        match lines.next() {
            Some((_, "#EXTM3U")) => {}
            _ => return Err(ManifestError::MissingHeader),
        }

        let mut playlist = MediaPlaylist {
            target_duration: 0,
            media_sequence: 0,
            segments: Vec::new(),
            ended: false,
        };
        let mut pending: Option<(usize, f64)> = None;

        for (line_no, line) in lines {
            if let Some(value) = line.strip_prefix("#EXTINF:") {
                if let Some((open_line, _)) = pending {
                    return Err(ManifestError::MissingUri(open_line));
                }
                let raw = value.split(',').next().unwrap_or_default().trim();
                let duration = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite() && *d >= 0.0)
                    .ok_or_else(|| ManifestError::InvalidDuration {
                        line: line_no,
                        value: raw.to_string(),
                    })?;
                pending = Some((line_no, duration));
            } else if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
                playlist.target_duration = value.trim().parse().unwrap_or(0);
            } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
                playlist.media_sequence = value.trim().parse().unwrap_or(0);
            } else if line == "#EXT-X-ENDLIST" {
                playlist.ended = true;
            } else if line.starts_with('#') {
                continue;
            } else {
                let (_, duration) = pending.take().ok_or(ManifestError::MissingUri(line_no))?;
                playlist.segments.push(SegmentEntry {
                    duration,
                    uri: line.to_string(),
                });
            }
        }

        if let Some((line_no, _)) = pending {
            return Err(ManifestError::MissingUri(line_no));
        }
        if playlist.segments.is_empty() {
            return Err(ManifestError::Empty);
        }

        Ok(playlist)
    }

    /// Playlist text as published. Target duration is raised to cover the
    /// longest segment and the type is pinned to VOD.
    pub fn render(&self) -> String {
        let target = self
            .segments
            .iter()
            .map(|s| s.duration.ceil() as u64)
            .max()
            .unwrap_or(0)
            .max(self.target_duration);

        let mut out = String::new();
        out.push_str("#EXTM3U\n#EXT-X-VERSION:3\n");
        let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", target);
        let _ = writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence);
        out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
        for segment in &self.segments {
            let _ = writeln!(out, "#EXTINF:{:.6},", segment.duration);
            out.push_str(&segment.uri);
            out.push('\n');
        }
        if self.ended {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }
}

/// Plain file name with the segment extension: no separators, no `..`.
pub fn is_valid_segment_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 128 || name.contains("..") {
        return false;
    }
    let Some(stem) = name
        .strip_suffix(SEGMENT_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
    else {
        return false;
    };
    !stem.is_empty()
        && stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
