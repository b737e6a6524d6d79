//! Job orchestration: the coordinator task, the worker pool and the handle
//! transports use to reach them.

pub(crate) mod command;
mod coordinator;
mod handle;
mod submission;

use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{validate_config, ServiceConfig};
use crate::error::Result;
use crate::job::JobStore;
use crate::processor::BatchProcessor;
use crate::worker::{JobQueue, WorkerPool};

use command::Command;
use coordinator::Coordinator;

pub use handle::OrchestratorHandle;
pub use submission::SubmissionReceipt;

/// A running orchestrator. Dropping it without [`Orchestrator::stop`] leaves
/// worker threads running until the process exits.
pub struct Orchestrator {
    handle: OrchestratorHandle,
    pool: WorkerPool,
    coordinator: JoinHandle<()>,
}

impl Orchestrator {
    /// Recovers persisted jobs, then starts the coordinator and the workers.
    /// Must be called from within a tokio runtime.
    pub async fn start(
        config: Arc<ServiceConfig>,
        processor: Arc<dyn BatchProcessor>,
    ) -> Result<Self> {
        validate_config(&config)?;

        let store = JobStore::new(config.jobs_dir());
        let queue = JobQueue::new();
        let (commands, inbox) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator::new(
            Arc::clone(&config),
            store.clone(),
            queue.clone(),
            commands.clone(),
        );
        let requeued = coordinator.recover().await?;
        if requeued > 0 {
            info!("Resuming {} queued job(s) from a previous run", requeued);
        }
        let coordinator = tokio::spawn(coordinator.run(inbox));

        let pool = match WorkerPool::start(config.max_workers, queue, commands.clone(), processor)
        {
            Ok(pool) => pool,
            Err(e) => {
                let (reply, done) = oneshot::channel();
                if commands.send(Command::Shutdown { reply }).is_ok() {
                    let _ = done.await;
                }
                return Err(e.into());
            }
        };

        info!(
            "Orchestrator started in {} with {} worker(s)",
            config.base_dir.display(),
            config.max_workers
        );

        Ok(Self {
            handle: OrchestratorHandle {
                commands,
                store,
                config,
            },
            pool,
            coordinator,
        })
    }

    pub fn handle(&self) -> OrchestratorHandle {
        self.handle.clone()
    }

    /// Stops taking new jobs, waits for running ones to finish, writes any
    /// pending snapshots and ends the coordinator. Jobs still queued stay
    /// queued on disk and resume on the next start.
    pub async fn stop(self) {
        let Orchestrator {
            handle,
            pool,
            coordinator,
        } = self;

        pool.shutdown();
        if let Err(e) = tokio::task::spawn_blocking(move || pool.wait()).await {
            error!("Worker pool did not shut down cleanly: {}", e);
        }

        let (reply, done) = oneshot::channel();
        if handle.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = coordinator.await {
            error!("Coordinator task failed: {}", e);
        }

        info!("Orchestrator stopped");
    }
}
