//! Synchronous checks on a candidate upload. Nothing here writes anywhere;
//! callers create records and store blobs only after [`IntakeValidator::validate`]
//! succeeds.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::infrastructure::media::{MediaProbe, ProbeError};
use crate::modules::jobs::model::Category;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("File extension '{0}' is not allowed")]
    InvalidExtension(String),

    #[error("File exceeds the maximum upload size of {limit_bytes} bytes")]
    FileTooLarge { limit_bytes: u64 },

    #[error("Unknown category '{0}'")]
    InvalidCategory(String),

    #[error("Video could not be read: {0}")]
    CorruptMedia(String),

    /// Probed duration (rounded up) and the category ceiling, in seconds.
    #[error("Video is {0}s long; the limit for this category is {1}s")]
    DurationExceeded(u64, u64),

    #[error("Media probe unavailable: {0}")]
    ProbeUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryLimits {
    pub curricular_secs: u64,
    pub enrichment_secs: u64,
}

impl CategoryLimits {
    pub fn limit_for(&self, category: Category) -> u64 {
        match category {
            Category::Curricular => self.curricular_secs,
            Category::Enrichment => self.enrichment_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntakePolicy {
    /// Lowercase, without the leading dot.
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
    pub limits: CategoryLimits,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidatedUpload {
    pub category: Category,
    pub duration_secs: f64,
}

pub struct IntakeValidator {
    policy: IntakePolicy,
    probe: Arc<dyn MediaProbe>,
}

impl IntakeValidator {
    pub fn new(policy: IntakePolicy, probe: Arc<dyn MediaProbe>) -> Self {
        Self { policy, probe }
    }

    pub fn policy(&self) -> &IntakePolicy {
        &self.policy
    }

    pub fn check_extension(&self, filename: &str) -> Result<String, ValidationError> {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        if ext.is_empty() || !self.policy.allowed_extensions.contains(&ext) {
            return Err(ValidationError::InvalidExtension(ext));
        }
        Ok(ext)
    }

    pub fn check_size(&self, byte_size: u64) -> Result<(), ValidationError> {
        if byte_size > self.policy.max_upload_bytes {
            return Err(ValidationError::FileTooLarge {
                limit_bytes: self.policy.max_upload_bytes,
            });
        }
        Ok(())
    }

    pub fn check_category(&self, declared: &str) -> Result<Category, ValidationError> {
        declared
            .parse::<Category>()
            .map_err(|_| ValidationError::InvalidCategory(declared.trim().to_string()))
    }

    pub fn check_duration(&self, category: Category, duration_secs: f64) -> Result<(), ValidationError> {
        let limit = self.policy.limits.limit_for(category);
        if duration_secs > limit as f64 {
            return Err(ValidationError::DurationExceeded(duration_secs.ceil() as u64, limit));
        }
        Ok(())
    }

    /// Everything that can be decided without reading the file.
    pub fn check_metadata(
        &self,
        filename: &str,
        declared_category: &str,
        byte_size: u64,
    ) -> Result<Category, ValidationError> {
        self.check_extension(filename)?;
        self.check_size(byte_size)?;
        self.check_category(declared_category)
    }

    /// Full check, including a metadata-only duration probe of `path`.
    pub async fn validate(
        &self,
        filename: &str,
        declared_category: &str,
        byte_size: u64,
        path: &Path,
    ) -> Result<ValidatedUpload, ValidationError> {
        let category = self.check_metadata(filename, declared_category, byte_size)?;

        let duration_secs = self.probe.duration_secs(path).await.map_err(|e| match e {
            ProbeError::Unreadable(reason) => ValidationError::CorruptMedia(reason),
            ProbeError::Unavailable(reason) => ValidationError::ProbeUnavailable(reason),
            ProbeError::TimedOut(after) => {
                ValidationError::ProbeUnavailable(format!("timed out after {:?}", after))
            }
        })?;

        self.check_duration(category, duration_secs)?;
        debug!(%category, duration_secs, "Upload {} passed validation", filename);

        Ok(ValidatedUpload {
            category,
            duration_secs,
        })
    }
}
