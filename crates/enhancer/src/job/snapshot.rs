//! Durable JSON form of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::event::EventEnvelope;
use crate::config::JobOptions;
use crate::job::record::{FileStatus, JobPaths, JobRecord, JobResults, JobStatus};

/// Complete snapshot of a job as written to `jobs/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub options: JobOptions,
    pub total_files: usize,
    pub processed_files: usize,
    pub results: JobResults,
    pub files: Vec<FileStatus>,
    pub paths: JobPaths,
    #[serde(default)]
    pub events: Vec<EventEnvelope>,
    pub archive_name: String,
}

impl From<&JobRecord> for JobSnapshot {
    fn from(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: record.status(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
            error: record.error.clone(),
            options: record.options.clone(),
            total_files: record.total_files(),
            processed_files: record.processed_files(),
            results: record.results.clone(),
            files: record.files().to_vec(),
            paths: record.paths.clone(),
            events: record.events().to_vec(),
            archive_name: record.archive_name.clone(),
        }
    }
}

impl JobSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Condensed view used when listing jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub job_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub total_files: usize,
    pub processed_files: usize,
    pub archive_name: String,
    pub download_url: String,
    pub output_dir: String,
}

impl From<&JobSnapshot> for JobListing {
    fn from(snapshot: &JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id.clone(),
            status: snapshot.status,
            created_at: snapshot.created_at,
            completed_at: snapshot.completed_at,
            error: snapshot.error.clone(),
            total_files: snapshot.total_files,
            processed_files: snapshot.processed_files,
            archive_name: snapshot.archive_name.clone(),
            download_url: format!("/api/jobs/{}/download", snapshot.job_id),
            output_dir: snapshot.paths.output_dir.to_string_lossy().to_string(),
        }
    }
}

/// Per-file view of a job: statuses and the final results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFiles {
    pub job_id: String,
    pub status: JobStatus,
    pub files: Vec<FileStatus>,
    pub results: JobResults,
}

impl From<JobSnapshot> for JobFiles {
    fn from(snapshot: JobSnapshot) -> Self {
        Self {
            job_id: snapshot.job_id,
            status: snapshot.status,
            files: snapshot.files,
            results: snapshot.results,
        }
    }
}
