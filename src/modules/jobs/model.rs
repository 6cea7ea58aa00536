use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Uploading,
    Processing,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Ready => "ready",
            JobStatus::Failed => "failed",
        }
    }

    /// Edges of the job lifecycle. `Processing -> Pending` is only taken by a
    /// reprocess of a stale run; the store enforces the staleness part.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Uploading)
                | (Pending, Processing)
                | (Uploading, Processing)
                | (Uploading, Failed)
                | (Processing, Ready)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    /// Every status that may move to `target`.
    pub fn sources_for(target: JobStatus) -> Vec<JobStatus> {
        JobStatus::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::Ready,
        JobStatus::Failed,
    ];
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown job status '{}'", s))
    }
}

/// Declared purpose of a video; each category has its own duration ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Curricular,
    Enrichment,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Curricular => "curricular",
            Category::Enrichment => "enrichment",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "curricular" | "منهجي" => Ok(Category::Curricular),
            "enrichment" | "اثرائي" | "إثرائي" => Ok(Category::Enrichment),
            other => Err(format!("unknown category '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Job {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub source_key: String,
    pub category: Category,
    pub status: JobStatus,
    pub playlist_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub failure_reason: Option<String>,
    pub approved: bool,
    /// Stamped by each claim; only that run may finish the job.
    pub run_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub processing_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

impl Job {
    /// Derived keys exist exactly when ready; a failure reason only when failed.
    pub fn holds_invariants(&self) -> bool {
        let keys_set = self.playlist_key.is_some() && self.thumbnail_key.is_some();
        let keys_clear = self.playlist_key.is_none() && self.thumbnail_key.is_none();
        let keys_ok = if self.status == JobStatus::Ready {
            keys_set
        } else {
            keys_clear
        };
        keys_ok && (self.failure_reason.is_none() || self.status == JobStatus::Failed)
    }

    pub fn is_accessible_by(&self, user_id: Uuid, is_admin: bool) -> bool {
        is_admin || self.owner_id == user_id || self.approved
    }
}

/// Row shape of `video_jobs`; enums are stored as text.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub source_key: String,
    pub category: String,
    pub status: String,
    pub playlist_key: Option<String>,
    pub thumbnail_key: Option<String>,
    pub failure_reason: Option<String>,
    pub approved: bool,
    pub run_id: Option<Uuid>,
    pub processing_started_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for Job {
    type Error = String;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
            source_key: row.source_key,
            category: row.category.parse()?,
            status: row.status.parse()?,
            playlist_key: row.playlist_key,
            thumbnail_key: row.thumbnail_key,
            failure_reason: row.failure_reason,
            approved: row.approved,
            run_id: row.run_id,
            processing_started_at: row.processing_started_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub source_key: String,
    pub category: Category,
    /// `Pending` for uploads received by the service, `Uploading` for direct uploads.
    pub status: JobStatus,
    pub approved: bool,
}
