use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    StorageBackend,
    LocalStorageRoot,
    PublicBaseUrl,
    S3Endpoint,
    S3Bucket,
    S3Region,
    S3AccessKey,
    S3SecretKey,
    JwtSecret,
    MaxUploadSizeMb,
    AllowedVideoExtensions,
    MaxDurationCurricular,
    MaxDurationEnrichment,
    HlsSegmentSeconds,
    HlsPreset,
    FfmpegPath,
    FfprobePath,
    ProbeTimeoutSecs,
    WorkDir,
    StagingDir,
    TranscodeWorkers,
    TranscodeQueueCapacity,
    SignedUrlTtlSecs,
    StaleProcessingSecs,
    PendingSweepSecs,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::StorageBackend => "STORAGE_BACKEND",
            EnvKey::LocalStorageRoot => "LOCAL_STORAGE_ROOT",
            EnvKey::PublicBaseUrl => "PUBLIC_BASE_URL",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3Bucket => "S3_BUCKET",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3AccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::S3SecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::JwtSecret => "JWT_SECRET",
            EnvKey::MaxUploadSizeMb => "MAX_UPLOAD_SIZE_MB",
            EnvKey::AllowedVideoExtensions => "ALLOWED_VIDEO_EXTENSIONS",
            EnvKey::MaxDurationCurricular => "VIDEO_MAX_DURATION_CURRICULAR",
            EnvKey::MaxDurationEnrichment => "VIDEO_MAX_DURATION_ENRICHMENT",
            EnvKey::HlsSegmentSeconds => "HLS_SEGMENT_SECONDS",
            EnvKey::HlsPreset => "HLS_PRESET",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::FfprobePath => "FFPROBE_PATH",
            EnvKey::ProbeTimeoutSecs => "PROBE_TIMEOUT_SECS",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::StagingDir => "STAGING_DIR",
            EnvKey::TranscodeWorkers => "TRANSCODE_WORKERS",
            EnvKey::TranscodeQueueCapacity => "TRANSCODE_QUEUE_CAPACITY",
            EnvKey::SignedUrlTtlSecs => "SIGNED_URL_TTL_SECS",
            EnvKey::StaleProcessingSecs => "STALE_PROCESSING_SECS",
            EnvKey::PendingSweepSecs => "PENDING_SWEEP_SECS",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Comma separated list, lowercased and trimmed.
pub fn get_list(key: EnvKey, default: &str) -> Vec<String> {
    get_or(key, default)
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
