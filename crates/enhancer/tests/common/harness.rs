//! Isolated orchestrator environments for integration tests.
//!
//! Every harness owns a temporary base directory, so jobs, uploads and
//! outputs of one test never leak into another.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;

use enhancer::job::{JobPaths, NewJob};
use enhancer::{
    BatchProcessor, EventEnvelope, JobOptions, JobSnapshot, Orchestrator, OrchestratorHandle,
    ServiceConfig,
};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(10);

pub struct TestHarness {
    temp_dir: TempDir,
    pub config: Arc<ServiceConfig>,
}

impl TestHarness {
    /// Two workers, fast debounced saves, no eviction.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = ServiceConfig::with_base_dir(temp_dir.path());
        config.max_workers = 2;
        config.flush_delay_ms = 20;
        config.evict_after_secs = None;
        adjust(&mut config);

        Self {
            temp_dir,
            config: Arc::new(config),
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn start(&self, processor: Arc<dyn BatchProcessor>) -> Orchestrator {
        Orchestrator::start(Arc::clone(&self.config), processor)
            .await
            .expect("Failed to start orchestrator")
    }

    /// Location for a client upload outside of the managed directories.
    pub fn upload_path(&self, name: &str) -> PathBuf {
        let dir = self.temp_dir.path().join("incoming");
        std::fs::create_dir_all(&dir).expect("Failed to create upload dir");
        dir.join(name)
    }

    /// Lays out a job by hand, input files included, ready for `submit`.
    pub fn stage_job(&self, job_id: &str, files: &[&str]) -> NewJob {
        let paths = JobPaths::for_job(self.base_dir(), job_id);
        for file in files {
            let path = paths.original_dir.join(file);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).expect("Failed to create input dir");
            }
            std::fs::write(&path, b"RIFF").expect("Failed to write input");
        }
        std::fs::create_dir_all(&paths.output_dir).expect("Failed to create output dir");
        std::fs::create_dir_all(&paths.temp_dir).expect("Failed to create temp dir");

        NewJob {
            job_id: job_id.to_string(),
            options: JobOptions::default(),
            paths,
            files: files.iter().map(|f| f.to_string()).collect(),
            archive_name: Some("album".to_string()),
        }
    }

    /// Makes every snapshot write for `job_id` fail by occupying the
    /// temporary file's path with a directory. Works regardless of the
    /// user's permissions.
    pub fn block_snapshot_writes(&self, job_id: &str) {
        let tmp = self.config.jobs_dir().join(format!("{}.json.tmp", job_id));
        std::fs::create_dir_all(&tmp).expect("Failed to block snapshot writes");
    }

    pub fn allow_snapshot_writes(&self, job_id: &str) {
        let tmp = self.config.jobs_dir().join(format!("{}.json.tmp", job_id));
        std::fs::remove_dir_all(&tmp).expect("Failed to unblock snapshot writes");
    }

    /// Number of entries directly under `base_dir/<sub>`.
    pub fn count_entries(&self, sub: &str) -> usize {
        std::fs::read_dir(self.base_dir().join(sub))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Follows a job's events until its terminal event, returning all of them.
pub async fn events_until_terminal(handle: &OrchestratorHandle, job_id: &str) -> Vec<EventEnvelope> {
    let subscription = handle.subscribe(job_id).await.expect("subscribe failed");
    collect(subscription).await
}

/// Waits for the job to finish and returns its final state.
pub async fn wait_for_terminal(handle: &OrchestratorHandle, job_id: &str) -> JobSnapshot {
    events_until_terminal(handle, job_id).await;
    handle.get(job_id).await.expect("get failed")
}

/// Polls until `check` holds for the job or the wait times out.
pub async fn wait_until(
    handle: &OrchestratorHandle,
    job_id: &str,
    check: impl Fn(&JobSnapshot) -> bool,
) -> JobSnapshot {
    let poll = async {
        loop {
            let snapshot = handle.get(job_id).await.expect("get failed");
            if check(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT, poll)
        .await
        .expect("Timed out waiting for job state")
}

/// Drains a subscription until its terminal event.
pub async fn collect(subscription: enhancer::Subscription) -> Vec<EventEnvelope> {
    let collect = async move {
        let mut stream = Box::pin(subscription.into_stream());
        let mut events = Vec::new();
        while let Some(envelope) = stream.next().await {
            let terminal = envelope.event.is_terminal();
            events.push(envelope);
            if terminal {
                break;
            }
        }
        events
    };
    tokio::time::timeout(WAIT, collect)
        .await
        .expect("Timed out waiting for the job to finish")
}

/// Waits until a gated processor is holding its first file.
pub async fn wait_for_gate(gate: &super::processors::Gate) {
    tokio::time::timeout(WAIT, async {
        while !gate.is_entered() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Processor never reached the gate");
}
