//! Messages accepted by the coordinator task.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::broadcast::Subscription;
use crate::error::JobError;
use crate::job::{JobResults, JobSnapshot, JobStatus, NewJob};
use crate::processor::{BatchRequest, FileEvent};

pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Everything a worker needs once the coordinator has marked a job running.
#[derive(Debug)]
pub(crate) struct StartTicket {
    pub request: BatchRequest,
    pub output_zip: PathBuf,
    pub cancel: Arc<AtomicBool>,
}

/// Result of a processor run as seen by the coordinator.
pub(crate) type Outcome = Result<JobResults, String>;

#[derive(Debug)]
pub(crate) enum Command {
    Submit {
        job: NewJob,
        reply: Reply<Result<JobSnapshot, JobError>>,
    },
    /// `None` when the job is not resident.
    Get {
        job_id: String,
        reply: Reply<Option<JobSnapshot>>,
    },
    /// `None` when the job is not resident.
    Subscribe {
        job_id: String,
        reply: Reply<Option<Subscription>>,
    },
    /// Replies with the status after the request, `None` when not resident.
    /// A queued job stays queued if its cancellation cannot be persisted.
    Cancel {
        job_id: String,
        reason: String,
        reply: Option<Reply<Result<Option<JobStatus>, JobError>>>,
    },
    /// Sent by a worker before it runs a job; `None` means skip it.
    Start {
        job_id: String,
        reply: Reply<Result<Option<StartTicket>, JobError>>,
    },
    Progress {
        job_id: String,
        event: FileEvent,
    },
    Finish {
        job_id: String,
        outcome: Outcome,
        /// Set when outputs exist but could not be zipped.
        bundle_error: Option<String>,
    },
    Flush {
        job_id: String,
    },
    Evict {
        job_id: String,
    },
    Shutdown {
        reply: Reply<()>,
    },
}
