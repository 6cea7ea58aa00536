//! Where a job's derived outputs live, in storage and on local disk.
//!
//! Each run publishes under its own prefix, `hls/{job_id}/{run_id}/`, so a
//! superseded run can never overwrite or delete what a later run published.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::infrastructure::media::manifest::{PLAYLIST_FILE, THUMBNAIL_FILE};

/// Everything any run of the job ever published.
pub fn output_prefix(job_id: Uuid) -> String {
    format!("hls/{}/", job_id)
}

pub fn run_prefix(job_id: Uuid, run_id: Uuid) -> String {
    format!("{}{}/", output_prefix(job_id), run_id)
}

pub fn run_key(job_id: Uuid, run_id: Uuid, file_name: &str) -> String {
    format!("{}{}", run_prefix(job_id, run_id), file_name)
}

pub fn playlist_key(job_id: Uuid, run_id: Uuid) -> String {
    run_key(job_id, run_id, PLAYLIST_FILE)
}

pub fn thumbnail_key(job_id: Uuid, run_id: Uuid) -> String {
    run_key(job_id, run_id, THUMBNAIL_FILE)
}

/// Key of a file published next to `playlist_key`. Segment URIs in the
/// playlist are relative to it.
pub fn sibling_key(playlist_key: &str, file_name: &str) -> String {
    match playlist_key.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, file_name),
        None => file_name.to_string(),
    }
}

/// Scratch space of every run of the job.
pub fn job_work_root(root: &Path, job_id: Uuid) -> PathBuf {
    root.join(job_id.to_string())
}

/// Scratch directory of one run; neither concurrent jobs nor an overlapping
/// stale run of the same job share it.
pub fn work_dir(root: &Path, job_id: Uuid, run_id: Uuid) -> PathBuf {
    job_work_root(root, job_id).join(run_id.to_string())
}
