//! Turning an uploaded archive into a queued job.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::config::JobOptions;
use crate::error::{IngestError, Result};
use crate::ingest::{extract, find_inputs_with_fallback, read_archive_info};
use crate::job::{JobPaths, JobStatus, NewJob};
use crate::orchestrator::handle::OrchestratorHandle;
use crate::sanitize::redact_path;

/// What a client needs to follow a freshly submitted job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub job_id: String,
    pub status: JobStatus,
    /// Path of the live progress endpoint; the transport supplies scheme and host.
    pub progress_path: String,
    pub status_url: String,
    pub files_url: String,
    pub download_url: String,
}

impl SubmissionReceipt {
    pub fn new(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            progress_path: format!("/ws/{}", job_id),
            status_url: format!("/api/jobs/{}/status", job_id),
            files_url: format!("/api/jobs/{}/files", job_id),
            download_url: format!("/api/jobs/{}/download", job_id),
        }
    }
}

struct PreparedInputs {
    files: Vec<String>,
    root_name: String,
    recursive: bool,
}

impl OrchestratorHandle {
    /// Extracts `archive` into a fresh job layout, discovers its inputs and
    /// queues the job. On any rejection the job's directories are removed
    /// and no job is recorded. `filename` is the client's name for the
    /// upload and only names the job when the archive yields none.
    pub async fn submit_archive(
        &self,
        archive: &Path,
        filename: Option<&str>,
        options: JobOptions,
    ) -> Result<SubmissionReceipt> {
        self.config.validate_options(&options)?;

        let job_id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("submit_archive", job_id = %job_id, archive = %redact_path(archive));

        self.enqueue_archive(job_id, archive, filename, options)
            .instrument(span)
            .await
    }

    async fn enqueue_archive(
        &self,
        job_id: String,
        archive: &Path,
        filename: Option<&str>,
        options: JobOptions,
    ) -> Result<SubmissionReceipt> {
        let paths = JobPaths::for_job(&self.config.base_dir, &job_id);

        let prepared = match prepare_inputs(archive, &paths, &options, &self.config.supported_extensions).await {
            Ok(prepared) => prepared,
            Err(e) => {
                log::warn!("Rejected upload {}: {}", redact_path(archive), e);
                remove_layout(&paths).await;
                return Err(e.into());
            }
        };

        let archive_name = Some(prepared.root_name)
            .filter(|name| !name.is_empty())
            .or_else(|| filename.map(|f| f.to_string()).filter(|f| !f.is_empty()));

        let mut options = options;
        options.recursive = prepared.recursive;

        let job = NewJob {
            job_id: job_id.clone(),
            options,
            paths: paths.clone(),
            files: prepared.files,
            archive_name,
        };

        match self.submit(job).await {
            Ok(snapshot) => Ok(SubmissionReceipt::new(&snapshot.job_id, snapshot.status)),
            Err(e) => {
                remove_layout(&paths).await;
                Err(e)
            }
        }
    }
}

async fn prepare_inputs(
    archive: &Path,
    paths: &JobPaths,
    options: &JobOptions,
    extensions: &[String],
) -> std::result::Result<PreparedInputs, IngestError> {
    for dir in [&paths.original_dir, &paths.temp_dir, &paths.output_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| IngestError::Io {
                path: dir.clone(),
                source,
            })?;
    }

    let archive = archive.to_path_buf();
    let original_dir = paths.original_dir.clone();
    let recursive = options.recursive;
    let extensions = extensions.to_vec();

    let joined = tokio::task::spawn_blocking(move || {
        let extracted = extract(&archive, &original_dir)?;
        let (files, recursive) = find_inputs_with_fallback(&original_dir, recursive, &extensions)?;
        if files.is_empty() {
            return Err(IngestError::NoInputs);
        }
        Ok(PreparedInputs {
            files,
            root_name: recorded_root_name(&original_dir, extracted.root_name),
            recursive,
        })
    })
    .await;

    joined.map_err(|e| IngestError::Io {
        path: paths.original_dir.clone(),
        source: std::io::Error::other(e.to_string()),
    })?
}

/// Root name as recorded next to the extracted files, or `fallback` when the
/// side-file is missing or unreadable.
fn recorded_root_name(original_dir: &Path, fallback: String) -> String {
    match read_archive_info(original_dir) {
        Ok(Some(info)) if !info.root_name.is_empty() => info.root_name,
        Ok(_) => fallback,
        Err(e) => {
            log::warn!("Could not read archive info: {}", e);
            fallback
        }
    }
}

async fn remove_layout(paths: &JobPaths) {
    let mut dirs = vec![paths.uploads_dir.clone()];
    if let Some(root) = paths.outputs_root() {
        dirs.push(root.to_path_buf());
    }
    for dir in dirs {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Could not clean up {}: {}", redact_path(&dir), e);
            }
        }
    }
}
