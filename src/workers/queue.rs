//! Bounded transcode queue feeding a fixed pool of workers.
//!
//! Each run executes in its own spawned task so a panic inside the pipeline
//! is contained and the job is marked failed instead of being left
//! `processing`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_channel::{Receiver, Sender, TrySendError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::transcoder::{ProcessOutcome, TranscodeOrchestrator};

pub const PANIC_REASON: &str = "transcode worker panicked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeTask {
    pub job_id: Uuid,
    pub source_key: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Transcode queue is full; job {0} stays queued for the next sweep")]
    Full(Uuid),

    #[error("Job {0} is already waiting in the transcode queue")]
    AlreadyQueued(Uuid),

    #[error("Transcode queue is shut down")]
    Closed,
}

/// Submission side; cheap to clone into handlers.
#[derive(Clone)]
pub struct TranscodeQueue {
    sender: Sender<TranscodeTask>,
    /// Jobs sitting in the channel, not yet picked up by a worker.
    waiting: Arc<Mutex<HashSet<Uuid>>>,
}

/// Running workers; consumed by [`TranscodeWorkers::shutdown`].
pub struct TranscodeWorkers {
    queue: TranscodeQueue,
    handles: Vec<JoinHandle<()>>,
}

pub fn start(
    orchestrator: Arc<TranscodeOrchestrator>,
    workers: usize,
    capacity: usize,
) -> (TranscodeQueue, TranscodeWorkers) {
    let (sender, receiver) = async_channel::bounded(capacity.max(1));
    let queue = TranscodeQueue {
        sender,
        waiting: Arc::new(Mutex::new(HashSet::new())),
    };

    let handles = (0..workers.max(1))
        .map(|worker| {
            tokio::spawn(worker_loop(
                worker,
                receiver.clone(),
                queue.clone(),
                orchestrator.clone(),
            ))
        })
        .collect();

    info!(workers = workers.max(1), capacity = capacity.max(1), "🎥 Transcode workers started");
    (
        queue.clone(),
        TranscodeWorkers { queue, handles },
    )
}

impl TranscodeQueue {
    /// Never waits: a full queue is reported and the job is left for the sweep.
    /// A job already waiting in the queue is not queued twice.
    pub fn try_submit(&self, task: TranscodeTask) -> Result<(), QueueError> {
        let job_id = task.job_id;
        if !self.mark_waiting(job_id) {
            debug!(job_id = %job_id, "Job already queued");
            return Err(QueueError::AlreadyQueued(job_id));
        }

        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(task)) => {
                self.unmark_waiting(job_id);
                warn!(job_id = %task.job_id, "Transcode queue full");
                Err(QueueError::Full(task.job_id))
            }
            Err(TrySendError::Closed(_)) => {
                self.unmark_waiting(job_id);
                Err(QueueError::Closed)
            }
        }
    }

    /// Waits for a free slot.
    pub async fn submit(&self, task: TranscodeTask) -> Result<(), QueueError> {
        let job_id = task.job_id;
        if !self.mark_waiting(job_id) {
            return Err(QueueError::AlreadyQueued(job_id));
        }
        self.sender.send(task).await.map_err(|_| {
            self.unmark_waiting(job_id);
            QueueError::Closed
        })
    }

    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn close(&self) {
        self.sender.close();
    }

    fn mark_waiting(&self, job_id: Uuid) -> bool {
        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id)
    }

    fn unmark_waiting(&self, job_id: Uuid) {
        self.waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
    }
}

impl TranscodeWorkers {
    /// Stops accepting tasks, lets workers drain what is queued, and waits
    /// for them.
    pub async fn shutdown(self) {
        self.queue.close();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Transcode worker ended abnormally: {}", e);
            }
        }
        info!("🛑 Transcode workers stopped");
    }
}

async fn worker_loop(
    worker: usize,
    tasks: Receiver<TranscodeTask>,
    queue: TranscodeQueue,
    orchestrator: Arc<TranscodeOrchestrator>,
) {
    while let Ok(task) = tasks.recv().await {
        // From here on the claim guards the job; it may be queued again.
        queue.unmark_waiting(task.job_id);
        info!(worker, job_id = %task.job_id, "📦 Received transcoding job");

        let Some(claim) = orchestrator.claim(task.job_id).await else {
            continue;
        };

        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.execute(claim, &task.source_key).await })
        };

        match run.await {
            Ok(ProcessOutcome::Ready(_)) | Ok(ProcessOutcome::Skipped) | Ok(ProcessOutcome::Superseded) => {}
            Ok(ProcessOutcome::Failed(reason)) => {
                warn!(worker, job_id = %claim.job_id, "Job failed: {}", reason);
            }
            Err(e) if e.is_panic() => {
                orchestrator.fail(claim, PANIC_REASON).await;
            }
            Err(e) => error!(worker, job_id = %claim.job_id, "Transcode task aborted: {}", e),
        }
    }
}
