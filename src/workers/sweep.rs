use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::queue::{QueueError, TranscodeQueue, TranscodeTask};
use crate::modules::jobs::repository::JobStore;

const SWEEP_BATCH: i64 = 100;

/// Re-queues pending jobs last touched at or before `updated_before`.
/// Returns how many were submitted; stops early when the queue fills up.
/// Jobs still waiting in the queue from an earlier sweep are skipped.
pub async fn sweep_pending(
    jobs: &dyn JobStore,
    queue: &TranscodeQueue,
    updated_before: OffsetDateTime,
) -> usize {
    let pending = match jobs.list_pending(updated_before, SWEEP_BATCH).await {
        Ok(pending) => pending,
        Err(e) => {
            error!("Pending sweep failed to list jobs: {}", e);
            return 0;
        }
    };

    let mut submitted = 0;
    for job in pending {
        let task = TranscodeTask {
            job_id: job.id,
            source_key: job.source_key,
        };
        match queue.try_submit(task) {
            Ok(()) => submitted += 1,
            Err(QueueError::AlreadyQueued(_)) => continue,
            Err(QueueError::Full(_)) | Err(QueueError::Closed) => break,
        }
    }
    submitted
}

/// Sweeps once at startup, then every `interval` until `token` is cancelled.
///
/// Jobs updated within the last interval are left alone: they were just
/// submitted, or a reprocess is still clearing their outputs.
pub async fn run_pending_sweep(
    jobs: Arc<dyn JobStore>,
    queue: TranscodeQueue,
    interval: Duration,
    token: CancellationToken,
) {
    info!(interval_secs = interval.as_secs(), "🧹 Pending sweep started");

    let recovered = sweep_pending(jobs.as_ref(), &queue, OffsetDateTime::now_utc()).await;
    if recovered > 0 {
        info!(recovered, "Re-queued pending jobs from before startup");
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let submitted = sweep_pending(jobs.as_ref(), &queue, OffsetDateTime::now_utc() - interval).await;
        if submitted > 0 {
            info!(submitted, "Re-queued pending jobs");
        } else {
            debug!("Pending sweep found nothing to do");
        }
    }

    info!("🧹 Pending sweep stopped");
}
