#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::sync::{Mutex, Semaphore};
use uuid::Uuid;

use video_pipeline::common::upload::SpooledUpload;
use video_pipeline::config::settings::{AppConfig, IntakeConfig, StorageConfig, TranscodeConfig};
use video_pipeline::infrastructure::media::manifest::{MediaPlaylist, PLAYLIST_FILE, SegmentEntry};
use video_pipeline::infrastructure::media::{MediaProbe, ProbeError, TranscodeError, Transcoder};
use video_pipeline::infrastructure::storage::{
    LocalStorage, Storage, StorageBackend, StorageResult,
};
use video_pipeline::middleware::auth::Requester;
use video_pipeline::modules::intake::validator::IntakeValidator;
use video_pipeline::modules::jobs::layout;
use video_pipeline::modules::jobs::model::{Category, Job, JobStatus, NewJob};
use video_pipeline::modules::jobs::{InMemoryJobStore, JobStore};
use video_pipeline::state::AppState;
use video_pipeline::workers::{self, TranscodeOrchestrator, TranscodeWorkers};

pub const SEGMENT_SECONDS: u32 = 4;

/// Reports a fixed duration for every file.
pub struct StubProbe {
    pub duration: f64,
}

#[async_trait]
impl MediaProbe for StubProbe {
    async fn duration_secs(&self, path: &Path) -> Result<f64, ProbeError> {
        if !path.exists() {
            return Err(ProbeError::Unreadable(format!("{} does not exist", path.display())));
        }
        Ok(self.duration)
    }
}

/// Fixed-duration segmentation of a `total_secs` long source, the last
/// segment carrying the remainder, named the way ffmpeg is told to.
pub fn planned_playlist(total_secs: f64, segment_secs: u32) -> MediaPlaylist {
    let step = f64::from(segment_secs.max(1));
    let count = if total_secs > 0.0 {
        (total_secs / step).ceil() as usize
    } else {
        0
    };

    MediaPlaylist {
        target_duration: u64::from(segment_secs.max(1)),
        media_sequence: 0,
        segments: (0..count)
            .map(|index| SegmentEntry {
                duration: step.min(total_secs - index as f64 * step),
                uri: format!("segment_{:03}.ts", index),
            })
            .collect(),
        ended: true,
    }
}

/// Writes what ffmpeg would for a source of `duration` seconds, and records
/// the inputs it was given.
pub struct FakeTranscoder {
    pub duration: f64,
    pub fail_segmenting: bool,
    pub inputs: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeTranscoder {
    pub fn new(duration: f64) -> Arc<Self> {
        Arc::new(Self {
            duration,
            fail_segmenting: false,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            duration: 0.0,
            fail_segmenting: true,
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub async fn inputs(&self) -> Vec<(PathBuf, bool)> {
        self.inputs.lock().await.clone()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn segment(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError> {
        self.inputs.lock().await.push((input.to_path_buf(), input.exists()));

        if self.fail_segmenting {
            return Err(TranscodeError::Failed {
                stage: "hls",
                status: "exit status: 1".to_string(),
                stderr: "Invalid data found when processing input".to_string(),
            });
        }

        tokio::fs::create_dir_all(output_dir).await?;
        let playlist = planned_playlist(self.duration, SEGMENT_SECONDS);
        for segment in &playlist.segments {
            tokio::fs::write(output_dir.join(&segment.uri), b"\x47segment").await?;
        }
        let manifest = output_dir.join(PLAYLIST_FILE);
        tokio::fs::write(&manifest, playlist.render()).await?;
        Ok(manifest)
    }

    async fn thumbnail(&self, _input: &Path, output: &Path) -> Result<(), TranscodeError> {
        tokio::fs::write(output, b"\xff\xd8jpeg").await?;
        Ok(())
    }
}

/// Holds every run in `segment` until the test hands out permits.
pub struct GatedTranscoder {
    pub gate: Arc<Semaphore>,
    pub inner: Arc<FakeTranscoder>,
}

impl GatedTranscoder {
    pub fn new(duration: f64) -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transcoder = Arc::new(Self {
            gate: gate.clone(),
            inner: FakeTranscoder::new(duration),
        });
        (transcoder, gate)
    }
}

#[async_trait]
impl Transcoder for GatedTranscoder {
    async fn segment(&self, input: &Path, output_dir: &Path) -> Result<PathBuf, TranscodeError> {
        let _permit = self.gate.acquire().await;
        self.inner.segment(input, output_dir).await
    }

    async fn thumbnail(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        self.inner.thumbnail(input, output).await
    }
}

/// Local storage that pretends to be remote: nothing is reachable by path,
/// so every consumer has to download.
pub struct RemoteOnlyStorage {
    pub inner: LocalStorage,
    pub downloads: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Storage for RemoteOnlyStorage {
    fn backend(&self) -> StorageBackend {
        StorageBackend::S3
    }
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.inner.put(key, data, content_type).await
    }
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        self.inner.put_file(key, path, content_type).await
    }
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }
    async fn get_url(&self, key: &str, _ttl: Duration) -> StorageResult<String> {
        Ok(format!("https://bucket.example/{}?X-Amz-Signature=test", key))
    }
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64> {
        self.inner.delete_prefix(prefix).await
    }
    async fn local_path(&self, _key: &str) -> StorageResult<Option<PathBuf>> {
        Ok(None)
    }
    async fn download_to_local(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.inner.download_to_local(key).await?;
        self.downloads.lock().await.push(path.clone());
        Ok(path)
    }
    async fn issue_upload_url(&self, key: &str, _content_type: &str) -> StorageResult<String> {
        Ok(format!("https://bucket.example/{}?X-Amz-Signature=upload", key))
    }
}

/// Counts every call before delegating.
pub struct CountingStorage {
    pub inner: Arc<dyn Storage>,
    pub calls: AtomicUsize,
    pub puts: AtomicUsize,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn Storage>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Storage for CountingStorage {
    fn backend(&self) -> StorageBackend {
        self.inner.backend()
    }
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        self.hit();
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(key, data, content_type).await
    }
    async fn put_file(&self, key: &str, path: &Path, content_type: &str) -> StorageResult<()> {
        self.hit();
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_file(key, path, content_type).await
    }
    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.hit();
        self.inner.get(key).await
    }
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.hit();
        self.inner.exists(key).await
    }
    async fn get_url(&self, key: &str, ttl: Duration) -> StorageResult<String> {
        self.hit();
        self.inner.get_url(key, ttl).await
    }
    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.hit();
        self.inner.delete(key).await
    }
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<u64> {
        self.hit();
        self.inner.delete_prefix(prefix).await
    }
    async fn local_path(&self, key: &str) -> StorageResult<Option<PathBuf>> {
        self.hit();
        self.inner.local_path(key).await
    }
    async fn download_to_local(&self, key: &str) -> StorageResult<PathBuf> {
        self.hit();
        self.inner.download_to_local(key).await
    }
    async fn issue_upload_url(&self, key: &str, content_type: &str) -> StorageResult<String> {
        self.hit();
        self.inner.issue_upload_url(key, content_type).await
    }
}

pub struct Dirs {
    pub root: TempDir,
}

impl Dirs {
    pub fn new() -> Self {
        Self {
            root: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn storage_root(&self) -> PathBuf {
        self.root.path().join("uploads")
    }

    pub fn staging(&self) -> PathBuf {
        self.root.path().join("staging")
    }

    pub fn work(&self) -> PathBuf {
        self.root.path().join("work")
    }

    /// Run directories holding published outputs of `job_id`.
    pub fn published_runs(&self, job_id: Uuid) -> Vec<PathBuf> {
        match std::fs::read_dir(self.storage_root().join("hls").join(job_id.to_string())) {
            Ok(entries) => entries.filter_map(Result::ok).map(|e| e.path()).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Files a staged download could have left behind.
    pub fn staged_leftovers(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.staging()) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("staged-"))
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    pub async fn local_storage(&self) -> LocalStorage {
        LocalStorage::new(self.storage_root(), self.staging())
            .await
            .expect("local storage")
    }
}

pub fn test_config(dirs: &Dirs) -> AppConfig {
    AppConfig {
        server_port: 0,
        database_url: None,
        jwt_secret: "test-secret".to_string(),
        storage: StorageConfig {
            backend: StorageBackend::Local,
            local_root: dirs.storage_root(),
            public_base_url: "http://localhost:3000".to_string(),
            staging_dir: dirs.staging(),
            s3_endpoint: None,
            s3_bucket: None,
            s3_region: "us-east-1".to_string(),
            s3_access_key: None,
            s3_secret_key: None,
        },
        intake: IntakeConfig {
            max_upload_bytes: 200 * 1024 * 1024,
            allowed_extensions: vec!["mp4".to_string(), "mov".to_string(), "avi".to_string()],
            max_duration_curricular: 60,
            max_duration_enrichment: 240,
            ffprobe_path: "ffprobe".to_string(),
            probe_timeout: Duration::from_secs(5),
        },
        transcode: TranscodeConfig {
            ffmpeg_path: "ffmpeg".to_string(),
            segment_seconds: SEGMENT_SECONDS,
            preset: "fast".to_string(),
            work_dir: dirs.work(),
            workers: 2,
            queue_capacity: 16,
            stale_after: Duration::from_secs(7200),
            sweep_interval: Duration::from_secs(60),
        },
        signed_url_ttl: Duration::from_secs(3600),
    }
}

/// Application state wired with in-memory jobs, the given storage and
/// media fakes, and running workers.
pub fn build_state(
    config: AppConfig,
    storage: Arc<dyn Storage>,
    probe_duration: f64,
    transcoder: Arc<dyn Transcoder>,
) -> (AppState, Arc<InMemoryJobStore>, TranscodeWorkers) {
    let jobs = Arc::new(InMemoryJobStore::new());
    let validator = IntakeValidator::new(
        config.intake.policy(),
        Arc::new(StubProbe {
            duration: probe_duration,
        }),
    );
    let orchestrator = Arc::new(TranscodeOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        transcoder,
        config.transcode.work_dir.clone(),
    ));
    let (queue, workers) = workers::queue::start(orchestrator, 2, 16);
    let state = AppState::new(config, jobs.clone(), storage, validator, queue);
    (state, jobs, workers)
}

pub fn owner() -> Requester {
    Requester {
        user_id: Uuid::new_v4(),
        is_admin: false,
    }
}

pub fn admin() -> Requester {
    Requester {
        user_id: Uuid::new_v4(),
        is_admin: true,
    }
}

/// A fake video file as it arrives from a multipart upload.
pub fn spooled(dirs: &Dirs, file_name: &str, bytes: &[u8]) -> SpooledUpload {
    std::fs::create_dir_all(dirs.staging()).expect("staging dir");
    let file = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(".mp4")
        .tempfile_in(dirs.staging())
        .expect("temp upload");
    std::fs::write(file.path(), bytes).expect("write upload");
    SpooledUpload {
        file,
        size: bytes.len() as u64,
        file_name: file_name.to_string(),
        content_type: "video/mp4".to_string(),
    }
}

/// Stores a source blob and records a pending job for it.
pub async fn seed_job(storage: &dyn Storage, jobs: &dyn JobStore, owner: Uuid) -> Job {
    let id = Uuid::new_v4();
    let source_key = format!("videos/{}/{}_lesson.mp4", owner, id);
    storage
        .put(&source_key, Bytes::from_static(b"\x00\x00\x00\x18ftypmp42"), "video/mp4")
        .await
        .expect("seed source");
    jobs.create(NewJob {
        id,
        owner_id: owner,
        title: "Lesson".to_string(),
        source_key,
        category: Category::Curricular,
        status: JobStatus::Pending,
        approved: false,
    })
    .await
    .expect("seed job")
}

pub async fn wait_for_status(jobs: &dyn JobStore, id: Uuid, status: JobStatus) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(job) = jobs.find(id).await.expect("find job") {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job never reached the expected status")
}

/// Key of a file published next to the job's playlist.
pub fn published_key(job: &Job, file_name: &str) -> String {
    let playlist = job.playlist_key.as_deref().expect("job has a playlist");
    layout::sibling_key(playlist, file_name)
}

pub async fn wait_for_terminal(jobs: &dyn JobStore, id: Uuid) -> Job {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(job) = jobs.find(id).await.expect("find job") {
                if matches!(job.status, JobStatus::Ready | JobStatus::Failed) {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
