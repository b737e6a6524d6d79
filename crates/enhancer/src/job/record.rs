//! In-memory job entity owned by the coordinator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::broadcast::event::{EventEnvelope, JobSummary};
use crate::config::JobOptions;
use crate::error::JobError;
use crate::job::snapshot::JobSnapshot;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Allowed forward transitions. Terminal states have none.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Cancelling)
                | (Running, Completed)
                | (Running, Failed)
                | (Cancelling, Cancelled)
                | (Cancelling, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-file processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Completed | FileState::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStatus {
    pub input: String,
    pub output: Option<String>,
    pub status: FileState,
    pub percent: f64,
    pub stage: Option<String>,
    pub message: Option<String>,
}

impl FileStatus {
    pub fn pending(input: &str) -> Self {
        Self {
            input: input.to_string(),
            output: None,
            status: FileState::Pending,
            percent: 0.0,
            stage: Some("queued".to_string()),
            message: None,
        }
    }
}

/// A failed input with its reason; persisted as a `[name, reason]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct FailedFile {
    pub name: String,
    pub reason: String,
}

impl FailedFile {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

impl From<(String, String)> for FailedFile {
    fn from((name, reason): (String, String)) -> Self {
        Self { name, reason }
    }
}

impl From<FailedFile> for (String, String) {
    fn from(file: FailedFile) -> Self {
        (file.name, file.reason)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResults {
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub failed: Vec<FailedFile>,
}

impl JobResults {
    /// Partial success counts as completion; callers needing all-or-nothing
    /// semantics inspect `failed` themselves.
    pub fn classify(&self) -> JobStatus {
        if self.success.is_empty() && !self.failed.is_empty() {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }
}

/// Filesystem layout of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPaths {
    pub original_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_zip: PathBuf,
    pub uploads_dir: PathBuf,
}

impl JobPaths {
    /// Standard layout under `base_dir`:
    /// `uploads/<id>/{original-audios,tmp}` and `outputs/<id>/enhanced-audios[.zip]`.
    pub fn for_job(base_dir: &Path, job_id: &str) -> Self {
        let uploads_dir = base_dir.join("uploads").join(job_id);
        let outputs_root = base_dir.join("outputs").join(job_id);
        Self {
            original_dir: uploads_dir.join("original-audios"),
            temp_dir: uploads_dir.join("tmp"),
            output_dir: outputs_root.join("enhanced-audios"),
            output_zip: outputs_root.join("enhanced-audios.zip"),
            uploads_dir,
        }
    }

    /// Directory holding the outputs and the bundled zip.
    pub fn outputs_root(&self) -> Option<&Path> {
        self.output_dir.parent()
    }
}

/// Everything needed to register a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub options: JobOptions,
    pub paths: JobPaths,
    pub files: Vec<String>,
    pub archive_name: Option<String>,
}

/// One batch job. Mutated only by the coordinator.
#[derive(Debug)]
pub struct JobRecord {
    pub job_id: String,
    status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub options: JobOptions,
    total_files: usize,
    processed_files: usize,
    pub results: JobResults,
    files: Vec<FileStatus>,
    file_index: HashMap<String, usize>,
    events: Vec<EventEnvelope>,
    /// Live fan-out channel; dropped once the job is terminal.
    pub(crate) listeners: Option<broadcast::Sender<EventEnvelope>>,
    pub archive_name: String,
    pub paths: JobPaths,
    cancel_flag: Arc<AtomicBool>,
}

impl JobRecord {
    pub fn new(job: NewJob) -> Self {
        let files: Vec<FileStatus> = job.files.iter().map(|f| FileStatus::pending(f)).collect();
        let file_index = index_files(&files);
        let archive_name = job
            .archive_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| job.job_id.clone());

        Self {
            total_files: files.len(),
            processed_files: 0,
            job_id: job.job_id,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            options: job.options,
            results: JobResults::default(),
            files,
            file_index,
            events: Vec::new(),
            listeners: None,
            archive_name,
            paths: job.paths,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Rebuilds a record from its persisted snapshot.
    pub(crate) fn from_snapshot(snapshot: JobSnapshot) -> Self {
        let files: Vec<FileStatus> = snapshot.files;
        let file_index = index_files(&files);
        let total_files = snapshot.total_files;
        Self {
            job_id: snapshot.job_id,
            status: snapshot.status,
            created_at: snapshot.created_at,
            started_at: snapshot.started_at,
            completed_at: snapshot.completed_at,
            error: snapshot.error,
            options: snapshot.options,
            total_files,
            processed_files: snapshot.processed_files.min(total_files),
            results: snapshot.results,
            files,
            file_index,
            events: snapshot.events,
            listeners: None,
            archive_name: snapshot.archive_name,
            paths: snapshot.paths,
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    pub fn processed_files(&self) -> usize {
        self.processed_files
    }

    pub fn files(&self) -> &[FileStatus] {
        &self.files
    }

    pub fn file(&self, input: &str) -> Option<&FileStatus> {
        self.file_index.get(input).map(|&i| &self.files[i])
    }

    pub(crate) fn file_mut(&mut self, input: &str) -> Option<&mut FileStatus> {
        match self.file_index.get(input) {
            Some(&i) => Some(&mut self.files[i]),
            None => None,
        }
    }

    pub fn events(&self) -> &[EventEnvelope] {
        &self.events
    }

    pub(crate) fn append_event(&mut self, envelope: EventEnvelope) {
        self.events.push(envelope);
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of live subscribers currently attached.
    pub fn listener_count(&self) -> usize {
        self.listeners
            .as_ref()
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(next) {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records that `input` reached a terminal state. Counts each known file
    /// at most once; returns whether the counter moved.
    pub(crate) fn mark_file_processed(&mut self, input: &str) -> bool {
        let Some(&index) = self.file_index.get(input) else {
            return false;
        };
        if self.files[index].status.is_terminal() {
            return false;
        }
        self.processed_files = (self.processed_files + 1).min(self.total_files);
        true
    }

    /// Overall progress in percent; an empty job counts as done.
    pub fn percent(&self) -> f64 {
        if self.total_files == 0 {
            100.0
        } else {
            self.processed_files as f64 / self.total_files as f64 * 100.0
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            processed: self.processed_files,
            total: self.total_files,
            success: self.results.success.len(),
            failed: self.results.failed.len(),
            error: self.error.clone(),
        }
    }

    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub(crate) fn request_cancel(&self) {
        self.cancel_flag.store(true, Ordering::Release);
    }
}

fn index_files(files: &[FileStatus]) -> HashMap<String, usize> {
    files
        .iter()
        .enumerate()
        .map(|(i, f)| (f.input.clone(), i))
        .collect()
}
