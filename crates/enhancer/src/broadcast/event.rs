//! Progress events published for a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobStatus;

/// Counts reported with a terminal event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub processed: usize,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub error: Option<String>,
}

/// A closed set of progress notifications, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    JobStarted,
    JobProgress {
        percent: f64,
        completed: usize,
        total: usize,
    },
    JobCompleted {
        status: JobStatus,
        summary: JobSummary,
    },
    JobFailed {
        status: JobStatus,
        summary: JobSummary,
    },
    JobCancelled {
        status: JobStatus,
        summary: JobSummary,
    },
    CancelRequested {
        reason: String,
    },
    FileStarted {
        filename: String,
    },
    FileProgress {
        filename: String,
        percent: f64,
        stage: String,
    },
    FileCompleted {
        filename: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl JobEvent {
    /// Terminal event matching a finished job's status.
    pub fn terminal(status: JobStatus, summary: JobSummary) -> Self {
        match status {
            JobStatus::Completed => JobEvent::JobCompleted { status, summary },
            JobStatus::Cancelled => JobEvent::JobCancelled { status, summary },
            _ => JobEvent::JobFailed { status, summary },
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::JobCompleted { .. } | JobEvent::JobFailed { .. } | JobEvent::JobCancelled { .. }
        )
    }

    /// The file this event concerns, if it is a per-file event.
    pub fn filename(&self) -> Option<&str> {
        match self {
            JobEvent::FileStarted { filename }
            | JobEvent::FileProgress { filename, .. }
            | JobEvent::FileCompleted { filename, .. } => Some(filename),
            _ => None,
        }
    }
}

/// An event as it is logged and delivered: stamped with its job and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JobEvent,
}

impl EventEnvelope {
    pub fn new(job_id: &str, event: JobEvent) -> Self {
        Self {
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            event,
        }
    }
}
