use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, EnvKey};
use crate::infrastructure::storage::StorageBackend;
use crate::modules::intake::validator::{CategoryLimits, IntakePolicy};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    /// Absent means the in-memory job store is used (development only).
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub storage: StorageConfig,
    pub intake: IntakeConfig,
    pub transcode: TranscodeConfig,
    pub signed_url_ttl: Duration,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_root: PathBuf,
    pub public_base_url: String,
    pub staging_dir: PathBuf,
    pub s3_endpoint: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

#[derive(Clone, Debug)]
pub struct IntakeConfig {
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub max_duration_curricular: u64,
    pub max_duration_enrichment: u64,
    pub ffprobe_path: String,
    pub probe_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub segment_seconds: u32,
    pub preset: String,
    pub work_dir: PathBuf,
    pub workers: usize,
    pub queue_capacity: usize,
    pub stale_after: Duration,
    pub sweep_interval: Duration,
}

impl AppConfig {
    pub fn new() -> Result<Self, std::env::VarError> {
        let max_upload_mb: u64 = env::get_parsed(EnvKey::MaxUploadSizeMb, 200);

        Ok(Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get_opt(EnvKey::DatabaseUrl),
            jwt_secret: env::get(EnvKey::JwtSecret)?,
            storage: StorageConfig {
                backend: env::get_parsed(EnvKey::StorageBackend, StorageBackend::Local),
                local_root: PathBuf::from(env::get_or(EnvKey::LocalStorageRoot, "./data/uploads")),
                public_base_url: env::get_or(EnvKey::PublicBaseUrl, "http://localhost:3000"),
                staging_dir: env::get_opt(EnvKey::StagingDir)
                    .map(PathBuf::from)
                    .unwrap_or_else(std::env::temp_dir),
                s3_endpoint: env::get_opt(EnvKey::S3Endpoint),
                s3_bucket: env::get_opt(EnvKey::S3Bucket),
                s3_region: env::get_or(EnvKey::S3Region, "us-east-1"),
                s3_access_key: env::get_opt(EnvKey::S3AccessKey),
                s3_secret_key: env::get_opt(EnvKey::S3SecretKey),
            },
            intake: IntakeConfig {
                max_upload_bytes: max_upload_mb * 1024 * 1024,
                allowed_extensions: env::get_list(EnvKey::AllowedVideoExtensions, "mp4,mov,avi"),
                max_duration_curricular: env::get_parsed(EnvKey::MaxDurationCurricular, 60),
                max_duration_enrichment: env::get_parsed(EnvKey::MaxDurationEnrichment, 240),
                ffprobe_path: env::get_or(EnvKey::FfprobePath, "ffprobe"),
                probe_timeout: Duration::from_secs(env::get_parsed(EnvKey::ProbeTimeoutSecs, 15)),
            },
            transcode: TranscodeConfig {
                ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
                segment_seconds: env::get_parsed(EnvKey::HlsSegmentSeconds, 4u32).max(1),
                preset: env::get_or(EnvKey::HlsPreset, "fast"),
                work_dir: PathBuf::from(env::get_or(EnvKey::WorkDir, "./data/hls-work")),
                workers: env::get_parsed(EnvKey::TranscodeWorkers, 2usize).max(1),
                queue_capacity: env::get_parsed(EnvKey::TranscodeQueueCapacity, 64usize).max(1),
                stale_after: Duration::from_secs(env::get_parsed(EnvKey::StaleProcessingSecs, 7200)),
                sweep_interval: Duration::from_secs(
                    env::get_parsed(EnvKey::PendingSweepSecs, 60u64).max(1),
                ),
            },
            signed_url_ttl: Duration::from_secs(env::get_parsed(EnvKey::SignedUrlTtlSecs, 3600)),
        })
    }
}

impl IntakeConfig {
    pub fn policy(&self) -> IntakePolicy {
        IntakePolicy {
            allowed_extensions: self.allowed_extensions.clone(),
            max_upload_bytes: self.max_upload_bytes,
            limits: CategoryLimits {
                curricular_secs: self.max_duration_curricular,
                enrichment_secs: self.max_duration_enrichment,
            },
        }
    }
}
