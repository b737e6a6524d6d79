use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broadcast::Subscription;
use crate::config::ServiceConfig;
use crate::error::{JobError, Result, WorkerError};
use crate::job::{JobFiles, JobListing, JobSnapshot, JobStatus, JobStore, NewJob};
use crate::orchestrator::command::{Command, Reply};
use crate::sanitize;
use crate::worker::{create_output_archive, has_outputs};

/// Cloneable entry point for transports. Every call is a message to the
/// coordinator; lookups of jobs no longer in memory fall back to the
/// snapshot on disk.
#[derive(Clone)]
pub struct OrchestratorHandle {
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) store: JobStore,
    pub(crate) config: Arc<ServiceConfig>,
}

impl OrchestratorHandle {
    pub(crate) async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| WorkerError::ChannelClosed)?;
        Ok(response.await.map_err(|_| WorkerError::ChannelClosed)?)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Registers a job whose inputs are already in place. The snapshot is
    /// durable before the job is queued.
    pub async fn submit(&self, job: NewJob) -> Result<JobSnapshot> {
        let snapshot = self
            .request(|reply| Command::Submit { job, reply })
            .await??;
        Ok(snapshot)
    }

    pub async fn get(&self, job_id: &str) -> Result<JobSnapshot> {
        let job_id = job_id.to_string();
        let resident = self
            .request(|reply| Command::Get {
                job_id: job_id.clone(),
                reply,
            })
            .await?;

        match resident {
            Some(snapshot) => Ok(snapshot),
            None => Ok(self.store.load(&job_id).await?),
        }
    }

    /// Past events plus, while the job is active, a live tail.
    pub async fn subscribe(&self, job_id: &str) -> Result<Subscription> {
        let job_id = job_id.to_string();
        let resident = self
            .request(|reply| Command::Subscribe {
                job_id: job_id.clone(),
                reply,
            })
            .await?;

        match resident {
            Some(subscription) => Ok(subscription),
            None => Ok(Subscription::replay(self.store.load(&job_id).await?)),
        }
    }

    pub fn unsubscribe(&self, subscription: &mut Subscription) {
        subscription.unsubscribe();
    }

    /// Requests cancellation. Queued jobs are cancelled at once, running jobs
    /// once the processor notices. Finished jobs are left as they are.
    ///
    /// Fails with [`JobError::Persistence`] when a queued job's cancellation
    /// cannot be written; the job then stays queued.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        let job_id = job_id.to_string();
        let resident = self
            .request(|reply| Command::Cancel {
                job_id: job_id.clone(),
                reason: "cancelled by request".to_string(),
                reply: Some(reply),
            })
            .await??;

        match resident {
            Some(status) => Ok(status),
            None => Ok(self.store.load(&job_id).await?.status),
        }
    }

    /// All persisted jobs, newest first.
    pub async fn list(&self) -> Result<Vec<JobListing>> {
        Ok(self.store.list().await?)
    }

    pub async fn files(&self, job_id: &str) -> Result<JobFiles> {
        Ok(JobFiles::from(self.get(job_id).await?))
    }

    /// Path of the job's output zip, building it if outputs exist but the
    /// archive does not.
    pub async fn ensure_output_archive(&self, job_id: &str) -> Result<PathBuf> {
        let snapshot = self.get(job_id).await?;
        let zip_path = snapshot.paths.output_zip.clone();
        if tokio::fs::try_exists(&zip_path).await.unwrap_or(false) {
            return Ok(zip_path);
        }

        let output_dir = snapshot.paths.output_dir.clone();
        let target = zip_path.clone();
        let built = tokio::task::spawn_blocking(move || {
            if !has_outputs(&output_dir) {
                return Err(JobError::NoOutputs(snapshot.job_id));
            }
            create_output_archive(&output_dir, &target)
        })
        .await
        .map_err(|e| JobError::Bundle {
            path: zip_path.clone(),
            reason: e.to_string(),
        })??;

        log::info!("Built output archive with {} file(s) on demand", built);
        Ok(zip_path)
    }

    /// Suggested client-side file name for the job's output zip.
    pub fn download_name(&self, snapshot: &JobSnapshot) -> String {
        sanitize::download_name(&snapshot.archive_name, &snapshot.job_id)
    }
}
