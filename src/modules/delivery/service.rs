use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::dto::JobStatusResponse;
use crate::infrastructure::media::manifest::is_valid_segment_name;
use crate::infrastructure::storage::{Storage, StorageError};
use crate::middleware::auth::Requester;
use crate::modules::jobs::layout;
use crate::modules::jobs::model::{Job, JobStatus};
use crate::modules::jobs::repository::{JobError, JobStore};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Video {0} not found")]
    NotFound(Uuid),

    #[error("Forbidden: video is not available to you")]
    Forbidden,

    #[error("Invalid segment name '{0}'")]
    InvalidSegment(String),

    #[error("Segment '{0}' not found")]
    SegmentNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Job(#[from] JobError),
}

/// A servable artifact, or the reason it is not servable yet.
#[derive(Debug)]
pub enum Delivery<T> {
    Ready(T),
    NotReady(JobStatus),
}

/// Delivery routes below `/api/v1/videos/{id}/`.
const PLAYLIST_ROUTE: [&str; 2] = ["hls", "playlist.m3u8"];
const THUMBNAIL_ROUTE: [&str; 1] = ["thumbnail"];

/// Read side of the pipeline. Never touches a running transcode.
#[derive(Clone)]
pub struct DeliveryService {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn Storage>,
    url_ttl: Duration,
    public_base_url: String,
}

impl From<&AppState> for DeliveryService {
    fn from(state: &AppState) -> Self {
        Self::new(
            state.jobs.clone(),
            state.storage.clone(),
            state.config.signed_url_ttl,
            state.config.storage.public_base_url.clone(),
        )
    }
}

impl DeliveryService {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn Storage>,
        url_ttl: Duration,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            storage,
            url_ttl,
            public_base_url: public_base_url.into(),
        }
    }

    /// Signed storage link when the backend has one, otherwise the
    /// access-checked delivery route.
    async fn link(&self, id: Uuid, key: &str, route: &[&str]) -> Result<String, DeliveryError> {
        match self.storage.get_url(key, self.url_ttl).await {
            Ok(url) => Ok(url),
            Err(StorageError::Unsupported(_)) => {
                let id = id.to_string();
                let mut url = Url::parse(&self.public_base_url)
                    .map_err(|e| StorageError::Config(format!("Invalid PUBLIC_BASE_URL: {}", e)))?;
                url.path_segments_mut()
                    .map_err(|_| StorageError::Config("PUBLIC_BASE_URL cannot be a base".to_string()))?
                    .pop_if_empty()
                    .extend(["api", "v1", "videos", id.as_str()])
                    .extend(route);
                Ok(url.to_string())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Owner, administrator, or content approved by moderation.
    async fn accessible_job(&self, id: Uuid, requester: &Requester) -> Result<Job, DeliveryError> {
        let job = self.jobs.find(id).await?.ok_or(DeliveryError::NotFound(id))?;
        if !job.is_accessible_by(requester.user_id, requester.is_admin) {
            return Err(DeliveryError::Forbidden);
        }
        Ok(job)
    }

    pub async fn get_status(&self, id: Uuid, requester: &Requester) -> Result<JobStatusResponse, DeliveryError> {
        let job = self.accessible_job(id, requester).await?;

        let playlist_url = match &job.playlist_key {
            Some(key) => Some(self.link(job.id, key, &PLAYLIST_ROUTE).await?),
            None => None,
        };
        let thumbnail_url = match &job.thumbnail_key {
            Some(key) => Some(self.link(job.id, key, &THUMBNAIL_ROUTE).await?),
            None => None,
        };

        Ok(JobStatusResponse {
            job_id: job.id,
            title: job.title,
            category: job.category,
            processing_status: job.status,
            playlist_url,
            thumbnail_url,
            failure_reason: job.failure_reason,
        })
    }

    pub async fn get_playlist(&self, id: Uuid, requester: &Requester) -> Result<Delivery<Bytes>, DeliveryError> {
        let job = self.accessible_job(id, requester).await?;
        let Some(key) = job.playlist_key.filter(|_| job.status == JobStatus::Ready) else {
            return Ok(Delivery::NotReady(job.status));
        };

        Ok(Delivery::Ready(self.storage.get(&key).await?))
    }

    pub async fn get_thumbnail(&self, id: Uuid, requester: &Requester) -> Result<Delivery<Bytes>, DeliveryError> {
        let job = self.accessible_job(id, requester).await?;
        let Some(key) = job.thumbnail_key.filter(|_| job.status == JobStatus::Ready) else {
            return Ok(Delivery::NotReady(job.status));
        };

        Ok(Delivery::Ready(self.storage.get(&key).await?))
    }

    /// The name is checked before anything else is looked up.
    pub async fn get_segment(
        &self,
        id: Uuid,
        segment_name: &str,
        requester: &Requester,
    ) -> Result<Delivery<Bytes>, DeliveryError> {
        if !is_valid_segment_name(segment_name) {
            return Err(DeliveryError::InvalidSegment(segment_name.to_string()));
        }

        let job = self.accessible_job(id, requester).await?;
        let Some(playlist_key) = job.playlist_key.filter(|_| job.status == JobStatus::Ready) else {
            return Ok(Delivery::NotReady(job.status));
        };

        // Segments are published next to the playlist of the run that won.
        let key = layout::sibling_key(&playlist_key, segment_name);
        debug!(job_id = %id, key = %key, "Serving segment");
        match self.storage.get(&key).await {
            Ok(bytes) => Ok(Delivery::Ready(bytes)),
            Err(StorageError::NotFound(_)) => Err(DeliveryError::SegmentNotFound(segment_name.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
