pub mod broadcast;
pub mod config;
pub mod error;
pub mod ingest;
pub mod job;
pub mod logging;
pub mod orchestrator;
pub mod processor;
pub mod sanitize;
pub mod worker;

pub use broadcast::{EventEnvelope, JobEvent, JobSummary, ProgressBus, Subscription};
pub use config::{load_config, JobOptions, LogConfig, ServiceConfig};
pub use error::{
    ConfigError, EnhancerError, IngestError, JobError, ProcessorError, Result, WorkerError,
};
pub use job::{JobFiles, JobListing, JobSnapshot, JobStatus, JobStore, NewJob};
pub use logging::init_logging;
pub use orchestrator::{Orchestrator, OrchestratorHandle, SubmissionReceipt};
pub use processor::{BatchProcessor, BatchRequest, FileEvent, NoopProgress, ProgressSink};
