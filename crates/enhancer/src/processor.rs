//! Boundary to the external batch processing routine.

use std::path::PathBuf;

use crate::config::JobOptions;
use crate::error::ProcessorError;
use crate::job::JobResults;

/// Everything a processor needs to run one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub job_id: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Input paths relative to `input_dir`.
    pub files: Vec<String>,
    pub options: JobOptions,
}

/// Per-file notifications a processor emits while it works.
#[derive(Debug, Clone, PartialEq)]
pub enum FileEvent {
    Started {
        filename: String,
    },
    Progress {
        filename: String,
        percent: f64,
        stage: String,
    },
    Completed {
        filename: String,
        success: bool,
        output: Option<String>,
        reason: Option<String>,
    },
}

impl FileEvent {
    pub fn filename(&self) -> &str {
        match self {
            FileEvent::Started { filename }
            | FileEvent::Progress { filename, .. }
            | FileEvent::Completed { filename, .. } => filename,
        }
    }

    pub fn succeeded(filename: impl Into<String>, output: impl Into<String>) -> Self {
        FileEvent::Completed {
            filename: filename.into(),
            success: true,
            output: Some(output.into()),
            reason: None,
        }
    }

    pub fn failed(filename: impl Into<String>, reason: impl Into<String>) -> Self {
        FileEvent::Completed {
            filename: filename.into(),
            success: false,
            output: None,
            reason: Some(reason.into()),
        }
    }
}

/// Callback surface handed to a processor. Calls may come from any thread.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: FileEvent);

    /// Cooperative cancellation; processors should check between files.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Discards everything. Useful when running a processor outside a job.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: FileEvent) {}
}

/// The opaque processing routine. Runs on a worker thread and may block.
///
/// Per-file failures belong in the returned [`JobResults`]; an `Err` (or a
/// panic) fails the whole job.
pub trait BatchProcessor: Send + Sync + 'static {
    fn process_all(
        &self,
        request: &BatchRequest,
        progress: &dyn ProgressSink,
    ) -> Result<JobResults, ProcessorError>;
}
