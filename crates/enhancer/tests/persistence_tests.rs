//! Behaviour when job snapshots cannot be written.
//!
//! Writes are blocked by occupying `jobs/<id>.json.tmp` with a directory.

mod common;

use common::{
    events_until_terminal, wait_for_gate, wait_for_terminal, wait_until, Gate, ScriptedProcessor,
    TestHarness, WAIT,
};
use enhancer::error::JobError;
use enhancer::job::FileState;
use enhancer::{EnhancerError, JobEvent, JobStatus, JobStore};

fn is_persistence(err: &EnhancerError) -> bool {
    matches!(err, EnhancerError::Job(JobError::Persistence { .. }))
}

#[tokio::test]
async fn test_submit_rejected_when_snapshot_cannot_be_written() {
    let harness = TestHarness::new();
    let orchestrator = harness.start(ScriptedProcessor::new().arc()).await;
    let handle = orchestrator.handle();

    harness.block_snapshot_writes("job-unsaved");
    let err = handle
        .submit(harness.stage_job("job-unsaved", &["a.wav"]))
        .await
        .unwrap_err();
    assert!(is_persistence(&err), "{:?}", err);

    assert!(matches!(
        handle.get("job-unsaved").await,
        Err(EnhancerError::Job(JobError::NotFound(_)))
    ));
    assert!(handle.list().await.unwrap().is_empty());

    // The id was never accepted, so it can be submitted once writes work.
    harness.allow_snapshot_writes("job-unsaved");
    handle
        .submit(harness.stage_job("job-unsaved", &["a.wav"]))
        .await
        .unwrap();
    let snapshot = wait_for_terminal(&handle, "job-unsaved").await;
    assert_eq!(snapshot.status, JobStatus::Completed);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_start_write_failure_fails_job() {
    let harness = TestHarness::with_config(|config| config.max_workers = 1);
    let gate = Gate::new();
    let orchestrator = harness
        .start(ScriptedProcessor::new().gated(gate.clone()).arc())
        .await;
    let handle = orchestrator.handle();

    handle.submit(harness.stage_job("job-ahead", &["a.wav"])).await.unwrap();
    handle.submit(harness.stage_job("job-blocked", &["a.wav"])).await.unwrap();
    wait_until(&handle, "job-ahead", |s| s.status == JobStatus::Running).await;

    harness.block_snapshot_writes("job-blocked");
    let subscription = handle.subscribe("job-blocked").await.unwrap();
    assert!(subscription.is_live());
    gate.open();

    let events = common::harness::collect(subscription).await;
    assert!(!events.iter().any(|e| matches!(e.event, JobEvent::JobStarted)));
    match &events.last().unwrap().event {
        JobEvent::JobFailed { summary, .. } => {
            let error = summary.error.as_deref().unwrap();
            assert!(error.contains("Failed to persist job snapshot"), "{}", error);
        }
        other => panic!("unexpected terminal event {:?}", other),
    }

    let snapshot = handle.get("job-blocked").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.processed_files, 0);
    assert!(!snapshot.paths.output_dir.join("a_enhanced.wav").exists());

    let ahead = wait_for_terminal(&handle, "job-ahead").await;
    assert_eq!(ahead.status, JobStatus::Completed);

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_debounced_write_failure_fails_running_job() {
    let harness = TestHarness::with_config(|config| config.flush_delay_ms = 300);
    let gate = Gate::new();
    let orchestrator = harness
        .start(ScriptedProcessor::new().gated(gate.clone()).arc())
        .await;
    let handle = orchestrator.handle();

    handle
        .submit(harness.stage_job("job-flaky", &["a.wav", "b.wav"]))
        .await
        .unwrap();

    // The start was persisted; the save scheduled with it has not run yet.
    wait_for_gate(&gate).await;
    harness.block_snapshot_writes("job-flaky");

    let events = events_until_terminal(&handle, "job-flaky").await;
    match &events.last().unwrap().event {
        JobEvent::JobFailed { status, summary } => {
            assert_eq!(*status, JobStatus::Failed);
            let error = summary.error.as_deref().unwrap();
            assert!(error.contains("Failed to persist job snapshot"), "{}", error);
        }
        other => panic!("unexpected terminal event {:?}", other),
    }

    // The processor saw the cancel flag and stopped; its late result is ignored.
    let snapshot = handle.get("job-flaky").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.results.success.is_empty());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_final_write_failure_marks_job_failed() {
    let harness = TestHarness::with_config(|config| config.flush_delay_ms = 300);
    let gate = Gate::new();
    let orchestrator = harness
        .start(ScriptedProcessor::new().gated(gate.clone()).arc())
        .await;
    let handle = orchestrator.handle();
    let store = JobStore::new(harness.config.jobs_dir());

    handle.submit(harness.stage_job("job-last", &["a.wav"])).await.unwrap();
    wait_for_gate(&gate).await;

    // Let the pending save land first so only the final write is affected.
    tokio::time::timeout(WAIT, async {
        loop {
            let snapshot = store.load("job-last").await.unwrap();
            if snapshot.files[0].status == FileState::Processing {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("running state was never persisted");

    harness.block_snapshot_writes("job-last");
    gate.open();

    let snapshot = wait_for_terminal(&handle, "job-last").await;
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.results.success, vec!["a.wav"]);
    let error = snapshot.error.as_deref().unwrap();
    assert!(error.contains("Failed to persist job snapshot"), "{}", error);
    assert!(matches!(
        snapshot.events.last().map(|e| &e.event),
        Some(JobEvent::JobFailed { .. })
    ));

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_unpersisted_cancel_leaves_job_queued() {
    let harness = TestHarness::with_config(|config| config.max_workers = 1);
    let gate = Gate::new();
    let orchestrator = harness
        .start(ScriptedProcessor::new().gated(gate.clone()).arc())
        .await;
    let handle = orchestrator.handle();
    let store = JobStore::new(harness.config.jobs_dir());

    handle.submit(harness.stage_job("job-running", &["a.wav"])).await.unwrap();
    handle.submit(harness.stage_job("job-waiting", &["a.wav"])).await.unwrap();
    wait_until(&handle, "job-running", |s| s.status == JobStatus::Running).await;

    harness.block_snapshot_writes("job-waiting");
    let err = handle.cancel("job-waiting").await.unwrap_err();
    assert!(is_persistence(&err), "{:?}", err);

    // Memory and disk agree: nothing was cancelled.
    let resident = handle.get("job-waiting").await.unwrap();
    assert_eq!(resident.status, JobStatus::Queued);
    assert!(resident.events.is_empty());
    assert_eq!(
        store.load("job-waiting").await.unwrap().status,
        JobStatus::Queued
    );

    harness.allow_snapshot_writes("job-waiting");
    assert_eq!(
        handle.cancel("job-waiting").await.unwrap(),
        JobStatus::Cancelled
    );
    assert_eq!(
        store.load("job-waiting").await.unwrap().status,
        JobStatus::Cancelled
    );

    gate.open();
    wait_for_terminal(&handle, "job-running").await;
    orchestrator.stop().await;

    // A cancelled job never comes back after a restart.
    let orchestrator = harness.start(ScriptedProcessor::new().arc()).await;
    let handle = orchestrator.handle();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let snapshot = handle.get("job-waiting").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Cancelled);
    assert_eq!(snapshot.processed_files, 0);
    assert!(snapshot.started_at.is_none());

    orchestrator.stop().await;
}

#[tokio::test]
async fn test_bundle_failure_reported_in_summary() {
    let harness = TestHarness::new();
    let orchestrator = harness.start(ScriptedProcessor::new().arc()).await;
    let handle = orchestrator.handle();

    let job = harness.stage_job("job-nozip", &["a.wav"]);
    // Occupy the archive's temporary path so the bundle cannot be written.
    let partial = job
        .paths
        .output_zip
        .with_file_name("enhanced-audios.zip.partial");
    std::fs::create_dir_all(&partial).unwrap();
    let zip_path = job.paths.output_zip.clone();

    handle.submit(job).await.unwrap();
    let events = events_until_terminal(&handle, "job-nozip").await;

    match &events.last().unwrap().event {
        JobEvent::JobCompleted { summary, .. } => {
            let error = summary.error.as_deref().unwrap();
            assert!(error.contains("Failed to build output archive"), "{}", error);
            assert_eq!(summary.success, 1);
        }
        other => panic!("unexpected terminal event {:?}", other),
    }
    assert!(!zip_path.exists());

    let snapshot = handle.get("job-nozip").await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(snapshot.error.is_some());

    orchestrator.stop().await;
}
