mod common;

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::Mutex;

use common::{
    CountingStorage, Dirs, FakeTranscoder, GatedTranscoder, RemoteOnlyStorage, build_state, owner,
    published_key, seed_job, spooled, test_config, wait_for_status, wait_for_terminal,
};
use video_pipeline::infrastructure::media::FfmpegTranscoder;
use video_pipeline::infrastructure::media::manifest::MediaPlaylist;
use video_pipeline::infrastructure::storage::Storage;
use video_pipeline::modules::intake::service::{IntakeError, IntakeService};
use video_pipeline::modules::intake::validator::ValidationError;
use video_pipeline::modules::jobs::layout;
use video_pipeline::modules::jobs::model::JobStatus;
use video_pipeline::modules::jobs::service::{JobService, ReprocessError};
use video_pipeline::modules::jobs::{InMemoryJobStore, JobStore};
use video_pipeline::workers::sweep::sweep_pending;
use video_pipeline::workers::{ProcessOutcome, TranscodeOrchestrator};

#[tokio::test]
async fn test_upload_is_transcoded_to_ready() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        storage.clone(),
        50.0,
        FakeTranscoder::new(50.0),
    );
    let requester = owner();

    let job = IntakeService::submit_upload(
        &state,
        &requester,
        "Fractions, part 1".to_string(),
        "curricular".to_string(),
        spooled(&dirs, "fractions.mp4", b"\x00\x00\x00\x18ftypmp42"),
    )
    .await
    .expect("upload accepted");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.owner_id, requester.user_id);

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready, "failure: {:?}", done.failure_reason);
    let run_id = done.run_id.expect("ready job records its run");
    assert_eq!(done.playlist_key.as_deref(), Some(layout::playlist_key(job.id, run_id).as_str()));
    assert_eq!(done.thumbnail_key.as_deref(), Some(layout::thumbnail_key(job.id, run_id).as_str()));
    assert!(done.holds_invariants());

    for index in 0..13 {
        let key = published_key(&done, &format!("segment_{:03}.ts", index));
        assert!(storage.exists(&key).await.unwrap(), "{} missing", key);
    }
    assert!(!storage.exists(&published_key(&done, "segment_013.ts")).await.unwrap());
    let published = storage.get(done.playlist_key.as_deref().unwrap()).await.unwrap();
    let playlist = MediaPlaylist::parse(std::str::from_utf8(&published).unwrap()).unwrap();
    assert_eq!(playlist.segments.len(), 13);
    assert!((playlist.total_duration() - 50.0).abs() < 1e-6);
    assert!(storage.exists(&job.source_key).await.unwrap(), "source is kept");

    assert!(!layout::job_work_root(&dirs.work(), job.id).exists());
    workers.shutdown().await;
}

#[tokio::test]
async fn test_over_long_upload_is_rejected_before_anything_is_stored() {
    let dirs = Dirs::new();
    let counting = CountingStorage::new(Arc::new(dirs.local_storage().await));
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        counting.clone(),
        70.0,
        FakeTranscoder::new(70.0),
    );

    let err = IntakeService::submit_upload(
        &state,
        &owner(),
        "Too long".to_string(),
        "curricular".to_string(),
        spooled(&dirs, "long.mp4", b"long video"),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(err, IntakeError::Validation(ValidationError::DurationExceeded(70, 60))),
        "unexpected error: {:?}",
        err
    );
    assert_eq!(counting.puts(), 0);
    assert!(jobs.list_pending(OffsetDateTime::now_utc(), 10).await.unwrap().is_empty());
    workers.shutdown().await;
}

#[tokio::test]
async fn test_enrichment_allows_longer_videos() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        storage,
        70.0,
        FakeTranscoder::new(70.0),
    );

    let job = IntakeService::submit_upload(
        &state,
        &owner(),
        "Field trip".to_string(),
        "إثرائي".to_string(),
        spooled(&dirs, "trip.mov", b"trip"),
    )
    .await
    .expect("enrichment limit is 240s");

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_missing_encoder_fails_job_and_cleans_staged_source() {
    let dirs = Dirs::new();
    let remote = Arc::new(RemoteOnlyStorage {
        inner: dirs.local_storage().await,
        downloads: Mutex::new(Vec::new()),
    });
    let jobs = Arc::new(InMemoryJobStore::new());
    let job = seed_job(remote.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;

    let orchestrator = TranscodeOrchestrator::new(
        jobs.clone(),
        remote.clone(),
        Arc::new(FfmpegTranscoder::new("/nonexistent/bin/ffmpeg", 4, "fast")),
        dirs.work(),
    );

    let outcome = orchestrator.process(job.id, &job.source_key).await;
    assert!(matches!(outcome, ProcessOutcome::Failed(_)), "{:?}", outcome);

    let failed = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.failure_reason.as_deref().is_some_and(|r| !r.is_empty()));
    assert!(failed.holds_invariants());

    assert_eq!(remote.downloads.lock().await.len(), 1);
    assert!(dirs.staged_leftovers().is_empty(), "{:?}", dirs.staged_leftovers());
    assert!(dirs.published_runs(job.id).is_empty());
    assert!(!layout::job_work_root(&dirs.work(), job.id).exists());
}

#[tokio::test]
async fn test_remote_source_is_staged_for_the_encoder_and_removed() {
    let dirs = Dirs::new();
    let remote = Arc::new(RemoteOnlyStorage {
        inner: dirs.local_storage().await,
        downloads: Mutex::new(Vec::new()),
    });
    let jobs = Arc::new(InMemoryJobStore::new());
    let job = seed_job(remote.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    let transcoder = FakeTranscoder::new(9.0);

    let orchestrator =
        TranscodeOrchestrator::new(jobs.clone(), remote.clone(), transcoder.clone(), dirs.work());

    let outcome = orchestrator.process(job.id, &job.source_key).await;
    let ProcessOutcome::Ready(ready) = outcome else {
        panic!("expected ready, got {:?}", outcome);
    };
    assert_eq!(ready.status, JobStatus::Ready);

    let inputs = transcoder.inputs().await;
    assert_eq!(inputs.len(), 1);
    let (staged_path, existed) = &inputs[0];
    assert!(*existed, "encoder must see a real file");
    assert!(staged_path.starts_with(dirs.staging()));
    assert!(!staged_path.exists());
    assert!(dirs.staged_leftovers().is_empty());

    assert!(remote.exists(&published_key(&ready, "segment_002.ts")).await.unwrap());
}

#[tokio::test]
async fn test_encoder_failure_removes_staged_copy() {
    let dirs = Dirs::new();
    let remote = Arc::new(RemoteOnlyStorage {
        inner: dirs.local_storage().await,
        downloads: Mutex::new(Vec::new()),
    });
    let jobs = Arc::new(InMemoryJobStore::new());
    let job = seed_job(remote.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    let transcoder = FakeTranscoder::failing();

    let orchestrator =
        TranscodeOrchestrator::new(jobs.clone(), remote.clone(), transcoder.clone(), dirs.work());

    let outcome = orchestrator.process(job.id, &job.source_key).await;
    let ProcessOutcome::Failed(reason) = outcome else {
        panic!("expected failure, got {:?}", outcome);
    };
    assert!(reason.contains("Invalid data"), "{}", reason);
    assert!(transcoder.inputs().await[0].1);
    assert!(dirs.staged_leftovers().is_empty());
}

#[tokio::test]
async fn test_second_run_of_a_claimed_job_is_skipped() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let jobs = Arc::new(InMemoryJobStore::new());
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    jobs.claim(job.id, uuid::Uuid::new_v4()).await.unwrap();

    let transcoder = FakeTranscoder::new(8.0);
    let orchestrator =
        TranscodeOrchestrator::new(jobs.clone(), storage, transcoder.clone(), dirs.work());

    let outcome = orchestrator.process(job.id, &job.source_key).await;
    assert!(matches!(outcome, ProcessOutcome::Skipped));
    assert!(transcoder.inputs().await.is_empty());
    assert_eq!(jobs.find(job.id).await.unwrap().unwrap().status, JobStatus::Processing);
}

#[tokio::test]
async fn test_concurrent_reprocess_accepts_exactly_one() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        storage.clone(),
        8.0,
        FakeTranscoder::new(8.0),
    );
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    let run = uuid::Uuid::new_v4();
    jobs.claim(job.id, run).await.unwrap();
    jobs.mark_failed(job.id, run, "encoder crashed").await.unwrap();

    let (first, second) = tokio::join!(
        JobService::reprocess(&state, job.id),
        JobService::reprocess(&state, job.id)
    );
    let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "first: {:?}, second: {:?}", first, second);

    let rejected = if first.is_err() { first } else { second };
    assert!(matches!(
        rejected,
        Err(ReprocessError::NotReprocessable { .. }) | Err(ReprocessError::AlreadyProcessing(_))
    ));

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready);
    assert_eq!(done.failure_reason, None);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_fresh_processing_job_cannot_be_reprocessed() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        storage.clone(),
        8.0,
        FakeTranscoder::new(8.0),
    );
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    jobs.claim(job.id, uuid::Uuid::new_v4()).await.unwrap();

    let err = JobService::reprocess(&state, job.id).await.unwrap_err();
    assert!(matches!(err, ReprocessError::AlreadyProcessing(id) if id == job.id));
    assert_eq!(jobs.find(job.id).await.unwrap().unwrap().status, JobStatus::Processing);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_stale_processing_job_is_reprocessed() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let mut config = test_config(&dirs);
    config.transcode.stale_after = Duration::ZERO;
    let (state, jobs, workers) = build_state(config, storage.clone(), 8.0, FakeTranscoder::new(8.0));

    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    let abandoned = uuid::Uuid::new_v4();
    jobs.claim(job.id, abandoned).await.unwrap();
    // Partial output of the abandoned run.
    let stale_key = layout::run_key(job.id, abandoned, "segment_000.ts");
    storage
        .put(&stale_key, bytes::Bytes::from_static(b"stale"), "video/mp2t")
        .await
        .unwrap();

    let reset = JobService::reprocess(&state, job.id).await.expect("stale run is reprocessable");
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.run_id, None);

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready);
    assert_ne!(done.run_id, Some(abandoned));
    assert!(!storage.exists(&stale_key).await.unwrap());
    let segment = storage.get(&published_key(&done, "segment_000.ts")).await.unwrap();
    assert_ne!(segment.as_ref(), b"stale");
    assert_eq!(dirs.published_runs(job.id).len(), 1);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_reprocess_of_stale_run_accepts_exactly_one() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let mut config = test_config(&dirs);
    config.transcode.stale_after = Duration::ZERO;
    let (state, jobs, workers) = build_state(config, storage.clone(), 8.0, FakeTranscoder::new(8.0));

    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;
    jobs.claim(job.id, uuid::Uuid::new_v4()).await.unwrap();

    let (first, second) = tokio::join!(
        JobService::reprocess(&state, job.id),
        JobService::reprocess(&state, job.id)
    );
    let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "first: {:?}, second: {:?}", first, second);

    let rejected = if first.is_err() { first } else { second };
    assert!(matches!(
        rejected,
        Err(ReprocessError::NotReprocessable { .. }) | Err(ReprocessError::AlreadyProcessing(_))
    ));

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready);
    workers.shutdown().await;
}

#[tokio::test]
async fn test_superseded_run_leaves_the_new_rendition_alone() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let mut config = test_config(&dirs);
    config.transcode.stale_after = Duration::ZERO;
    let (state, jobs, workers) = build_state(config, storage.clone(), 8.0, FakeTranscoder::new(8.0));
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;

    // The old run claims the job and then hangs inside the encoder.
    let (gated, gate) = GatedTranscoder::new(8.0);
    let old = Arc::new(TranscodeOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        gated,
        dirs.work(),
    ));
    let old_run = {
        let old = old.clone();
        let (id, key) = (job.id, job.source_key.clone());
        tokio::spawn(async move { old.process(id, &key).await })
    };
    let claimed = wait_for_status(jobs.as_ref(), job.id, JobStatus::Processing).await;

    JobService::reprocess(&state, job.id).await.expect("stale run is reprocessable");
    let ready = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(ready.status, JobStatus::Ready);
    assert_ne!(ready.run_id, claimed.run_id);

    // The old run wakes up, finishes encoding, and loses.
    gate.add_permits(1);
    let outcome = old_run.await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Superseded), "{:?}", outcome);

    let after = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(after, ready);
    assert!(storage.exists(after.playlist_key.as_deref().unwrap()).await.unwrap());
    assert!(storage.exists(after.thumbnail_key.as_deref().unwrap()).await.unwrap());
    for index in 0..2 {
        let key = published_key(&after, &format!("segment_{:03}.ts", index));
        assert!(storage.exists(&key).await.unwrap(), "{} missing", key);
    }
    assert_eq!(dirs.published_runs(job.id).len(), 1, "old run's outputs are discarded");
    assert!(!layout::job_work_root(&dirs.work(), job.id).exists());
    workers.shutdown().await;
}

#[tokio::test]
async fn test_superseded_run_failure_keeps_job_state() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let jobs = Arc::new(InMemoryJobStore::new());
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;

    let orchestrator = TranscodeOrchestrator::new(
        jobs.clone(),
        storage.clone(),
        FakeTranscoder::new(8.0),
        dirs.work(),
    );
    let stale = orchestrator.claim(job.id).await.expect("job is pending");
    jobs.reset_for_reprocess(job.id, OffsetDateTime::now_utc()).await.unwrap();
    let current = orchestrator.claim(job.id).await.expect("job is pending again");

    // A late failure of the stale run must not fail the current one.
    let outcome = orchestrator.fail(stale, "encoder crashed").await;
    assert!(matches!(outcome, ProcessOutcome::Superseded), "{:?}", outcome);
    let still = jobs.find(job.id).await.unwrap().unwrap();
    assert_eq!(still.status, JobStatus::Processing);
    assert_eq!(still.run_id, Some(current.run_id));

    let outcome = orchestrator.execute(current, &job.source_key).await;
    assert!(matches!(outcome, ProcessOutcome::Ready(_)), "{:?}", outcome);
}

#[tokio::test]
async fn test_sweep_requeues_pending_jobs() {
    let dirs = Dirs::new();
    let storage: Arc<dyn Storage> = Arc::new(dirs.local_storage().await);
    let (state, jobs, workers) = build_state(
        test_config(&dirs),
        storage.clone(),
        5.0,
        FakeTranscoder::new(5.0),
    );
    let job = seed_job(storage.as_ref(), jobs.as_ref(), uuid::Uuid::new_v4()).await;

    let before_creation = job.updated_at - time::Duration::seconds(1);
    assert_eq!(sweep_pending(jobs.as_ref(), &state.queue, before_creation).await, 0);

    let submitted = sweep_pending(jobs.as_ref(), &state.queue, OffsetDateTime::now_utc()).await;
    assert_eq!(submitted, 1);

    let done = wait_for_terminal(jobs.as_ref(), job.id).await;
    assert_eq!(done.status, JobStatus::Ready);
    workers.shutdown().await;
}
