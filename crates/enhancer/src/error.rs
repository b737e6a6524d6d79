use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum EnhancerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Unsupported model '{0}'")]
    UnsupportedModel(String),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

/// Reasons an uploaded archive is refused before any job exists.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("The uploaded archive is empty")]
    Empty,

    #[error("Unsafe filename in archive: {name}")]
    UnsafeEntry { name: String },

    #[error("Symlinks are not allowed in the uploaded archive: {name}")]
    SymlinkEntry { name: String },

    #[error("Invalid archive: {0}")]
    BadFormat(String),

    #[error("Unsafe extraction path for {name}")]
    EscapesDestination { name: String },

    #[error("No supported input files found in archive")]
    NoInputs,

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid job id '{0}'")]
    InvalidId(String),

    #[error("Failed to persist job snapshot '{path}': {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read job snapshot '{path}': {source}")]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed job snapshot '{path}': {source}")]
    MalformedSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize job snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("No processed outputs available for job {0}")]
    NoOutputs(String),

    #[error("Failed to build output archive '{path}': {reason}")]
    Bundle { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Orchestrator channel closed unexpectedly")]
    ChannelClosed,

    #[error("Worker count must be greater than zero")]
    NoWorkers,
}

/// Failure of the external processing routine as a whole.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Processing failed: {0}")]
    Failed(String),

    #[error("Processor I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EnhancerError>;
