use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::error::WorkerError;
use crate::orchestrator::command::{Command, Outcome, StartTicket};
use crate::processor::{BatchProcessor, FileEvent, ProgressSink};
use crate::worker::bundle::{create_output_archive, has_outputs};
use crate::worker::queue::JobQueue;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fixed set of threads pulling job ids from a [`JobQueue`].
///
/// Workers never touch job state; they ask the coordinator to start a job,
/// stream file events to it and hand back the outcome.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub(crate) fn start(
        worker_count: usize,
        queue: JobQueue,
        commands: mpsc::UnboundedSender<Command>,
        processor: Arc<dyn BatchProcessor>,
    ) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::NoWorkers);
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let queue = queue.clone();
            let commands = commands.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let processor = Arc::clone(&processor);

            let spawned = thread::Builder::new()
                .name(format!("enhancer-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, queue, commands, shutdown_flag, processor));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    shutdown.store(true, Ordering::Relaxed);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self { workers, shutdown })
    }

    /// Stops workers from taking new jobs. Jobs already running finish.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(
    worker_id: usize,
    queue: JobQueue,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: Arc<AtomicBool>,
    processor: Arc<dyn BatchProcessor>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match queue.pop_timeout(POLL_INTERVAL) {
            Ok(job_id) => {
                let span = tracing::info_span!("worker.job", worker_id, job_id = %job_id);
                let _guard = span.enter();

                if let Err(e) = run_job(&job_id, &commands, processor.as_ref()) {
                    error!("Worker {} giving up: {}", worker_id, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job queue disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one job end to end. Errors only when the coordinator is gone.
fn run_job(
    job_id: &str,
    commands: &mpsc::UnboundedSender<Command>,
    processor: &dyn BatchProcessor,
) -> Result<(), WorkerError> {
    let (reply, response) = oneshot::channel();
    commands
        .send(Command::Start {
            job_id: job_id.to_string(),
            reply,
        })
        .map_err(|_| WorkerError::ChannelClosed)?;

    let ticket = match response.blocking_recv() {
        Ok(Ok(Some(ticket))) => ticket,
        Ok(Ok(None)) => {
            debug!("Job {} is no longer runnable, skipping", job_id);
            return Ok(());
        }
        Ok(Err(e)) => {
            warn!("Job {} could not be started: {}", job_id, e);
            return Ok(());
        }
        Err(_) => return Err(WorkerError::ChannelClosed),
    };

    info!(
        "Processing job {} ({} file(s))",
        job_id,
        ticket.request.files.len()
    );

    let sink = ChannelProgress {
        job_id: job_id.to_string(),
        commands: commands.clone(),
        cancel: Arc::clone(&ticket.cancel),
    };
    let outcome = invoke(processor, &ticket, &sink);
    let bundle_error = bundle_outputs(&ticket).err();

    commands
        .send(Command::Finish {
            job_id: job_id.to_string(),
            outcome,
            bundle_error,
        })
        .map_err(|_| WorkerError::ChannelClosed)
}

fn invoke(processor: &dyn BatchProcessor, ticket: &StartTicket, sink: &ChannelProgress) -> Outcome {
    match catch_unwind(AssertUnwindSafe(|| {
        processor.process_all(&ticket.request, sink)
    })) {
        Ok(Ok(results)) => Ok(results),
        Ok(Err(e)) => {
            error!("Job {} failed: {}", ticket.request.job_id, e);
            Err(e.to_string())
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!("Processor panicked on job {}: {}", ticket.request.job_id, message);
            Err(format!("Processor panicked: {}", message))
        }
    }
}

fn bundle_outputs(ticket: &StartTicket) -> Result<(), String> {
    let output_dir = &ticket.request.output_dir;
    if !has_outputs(output_dir) {
        return Ok(());
    }
    match create_output_archive(output_dir, &ticket.output_zip) {
        Ok(count) => {
            debug!(
                "Bundled {} output file(s) for job {}",
                count, ticket.request.job_id
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Could not bundle outputs for job {}: {}",
                ticket.request.job_id, e
            );
            Err(e.to_string())
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Forwards processor callbacks to the coordinator as messages.
struct ChannelProgress {
    job_id: String,
    commands: mpsc::UnboundedSender<Command>,
    cancel: Arc<AtomicBool>,
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: FileEvent) {
        let sent = self.commands.send(Command::Progress {
            job_id: self.job_id.clone(),
            event,
        });
        if sent.is_err() {
            debug!("Dropped progress for job {}: coordinator stopped", self.job_id);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }
}
