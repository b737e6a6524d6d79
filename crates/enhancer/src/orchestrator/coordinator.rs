//! The task that owns every resident job.
//!
//! All reads and writes of job state happen here, one command at a time.
//! Workers, handles and timers only ever send [`Command`]s.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::broadcast::{JobEvent, ProgressBus};
use crate::config::ServiceConfig;
use crate::error::JobError;
use crate::job::{
    FileState, FlushScheduler, JobRecord, JobSnapshot, JobStatus, JobStore, NewJob,
};
use crate::orchestrator::command::{Command, Outcome, StartTicket};
use crate::processor::{BatchRequest, FileEvent};
use crate::sanitize::is_valid_job_id;
use crate::worker::JobQueue;

pub(crate) const INTERRUPTED: &str = "Interrupted by service restart";
pub(crate) const DEADLINE_EXCEEDED: &str = "exceeded maximum duration";

pub(crate) struct Coordinator {
    config: Arc<ServiceConfig>,
    jobs: HashMap<String, JobRecord>,
    store: JobStore,
    bus: ProgressBus,
    flushes: FlushScheduler<String>,
    queue: JobQueue,
    commands: mpsc::UnboundedSender<Command>,
}

impl Coordinator {
    pub(crate) fn new(
        config: Arc<ServiceConfig>,
        store: JobStore,
        queue: JobQueue,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            bus: ProgressBus::new(config.listener_capacity),
            flushes: FlushScheduler::new(config.flush_delay()),
            jobs: HashMap::new(),
            config,
            store,
            queue,
            commands,
        }
    }

    /// Reconciles snapshots left by a previous run: queued jobs are resumed,
    /// jobs caught mid-run can no longer finish and are closed out.
    pub(crate) async fn recover(&mut self) -> Result<usize, JobError> {
        self.store.ensure_dir().await?;

        let mut snapshots = self.store.load_all().await?;
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let mut requeued = 0;
        for snapshot in snapshots {
            match snapshot.status {
                JobStatus::Queued => {
                    let record = JobRecord::from_snapshot(snapshot);
                    let job_id = record.job_id.clone();
                    self.jobs.insert(job_id.clone(), record);
                    if let Err(e) = self.queue.push(&job_id) {
                        error!("Could not re-queue job {}: {}", job_id, e);
                        continue;
                    }
                    requeued += 1;
                }
                JobStatus::Running | JobStatus::Cancelling => {
                    let mut record = JobRecord::from_snapshot(snapshot);
                    let next = if record.status() == JobStatus::Cancelling {
                        JobStatus::Cancelled
                    } else {
                        record.error = Some(INTERRUPTED.to_string());
                        JobStatus::Failed
                    };
                    record.completed_at = Some(Utc::now());
                    record.transition(next)?;

                    let event = JobEvent::terminal(next, record.summary());
                    self.bus.publish(&mut record, event);
                    self.store.save(&JobSnapshot::from(&record)).await?;
                    warn!(
                        "Job {} was interrupted by a restart, marked {}",
                        record.job_id, next
                    );
                }
                _ => {}
            }
        }

        Ok(requeued)
    }

    pub(crate) async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        info!(
            "Coordinator running with {} resident job(s)",
            self.jobs.len()
        );

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Submit { job, reply } => {
                    let result = self.submit(job).await;
                    let _ = reply.send(result);
                }
                Command::Get { job_id, reply } => {
                    let _ = reply.send(self.jobs.get(&job_id).map(JobSnapshot::from));
                }
                Command::Subscribe { job_id, reply } => {
                    let bus = self.bus;
                    let subscription = self
                        .jobs
                        .get_mut(&job_id)
                        .map(|record| bus.subscribe(record));
                    let _ = reply.send(subscription);
                }
                Command::Cancel {
                    job_id,
                    reason,
                    reply,
                } => {
                    let result = self.cancel(&job_id, reason).await;
                    match reply {
                        Some(reply) => {
                            let _ = reply.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                error!("Could not cancel job {}: {}", job_id, e);
                            }
                        }
                    }
                }
                Command::Start { job_id, reply } => {
                    let result = self.start(&job_id).await;
                    let _ = reply.send(result);
                }
                Command::Progress { job_id, event } => self.progress(&job_id, event),
                Command::Finish {
                    job_id,
                    outcome,
                    bundle_error,
                } => self.finish(&job_id, outcome, bundle_error).await,
                Command::Flush { job_id } => self.flush(&job_id).await,
                Command::Evict { job_id } => self.evict(&job_id),
                Command::Shutdown { reply } => {
                    self.flush_pending().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        info!("Coordinator stopped");
    }

    async fn submit(&mut self, job: NewJob) -> Result<JobSnapshot, JobError> {
        if !is_valid_job_id(&job.job_id) {
            return Err(JobError::InvalidId(job.job_id));
        }
        if self.jobs.contains_key(&job.job_id) || self.store.exists(&job.job_id).await {
            return Err(JobError::AlreadyExists(job.job_id));
        }

        let record = JobRecord::new(job);
        let snapshot = JobSnapshot::from(&record);
        self.store.save(&snapshot).await?;

        let job_id = record.job_id.clone();
        self.jobs.insert(job_id.clone(), record);
        if let Err(e) = self.queue.push(&job_id) {
            error!("Could not enqueue job {}: {}", job_id, e);
        }

        info!(
            "Job {} queued with {} file(s)",
            job_id, snapshot.total_files
        );
        Ok(snapshot)
    }

    async fn start(&mut self, job_id: &str) -> Result<Option<StartTicket>, JobError> {
        let Some(record) = self.jobs.get_mut(job_id) else {
            warn!("Worker asked to start unknown job {}", job_id);
            return Ok(None);
        };
        if record.status() != JobStatus::Queued {
            debug!("Job {} is {}, not starting it", job_id, record.status());
            return Ok(None);
        }

        record.transition(JobStatus::Running)?;
        record.started_at = Some(Utc::now());

        if let Err(e) = self.store.save(&JobSnapshot::from(&*record)).await {
            error!("Could not persist start of job {}: {}", job_id, e);
            self.fail(job_id, e.to_string()).await;
            return Err(e);
        }

        self.bus.publish(record, JobEvent::JobStarted);
        let ticket = StartTicket {
            request: BatchRequest {
                job_id: record.job_id.clone(),
                input_dir: record.paths.original_dir.clone(),
                output_dir: record.paths.output_dir.clone(),
                temp_dir: record.paths.temp_dir.clone(),
                files: record.files().iter().map(|f| f.input.clone()).collect(),
                options: record.options.clone(),
            },
            output_zip: record.paths.output_zip.clone(),
            cancel: record.cancel_flag(),
        };

        self.schedule_flush(job_id);
        if let Some(limit) = self.config.max_job_duration() {
            self.send_later(
                limit,
                Command::Cancel {
                    job_id: job_id.to_string(),
                    reason: DEADLINE_EXCEEDED.to_string(),
                    reply: None,
                },
            );
        }

        info!("Job {} started", job_id);
        Ok(Some(ticket))
    }

    fn progress(&mut self, job_id: &str, event: FileEvent) {
        let Some(record) = self.jobs.get_mut(job_id) else {
            debug!("Progress for unknown job {} dropped", job_id);
            return;
        };
        if record.is_terminal() {
            debug!("Progress for finished job {} dropped", job_id);
            return;
        }

        apply_file_event(&self.bus, record, event);
        self.schedule_flush(job_id);
    }

    async fn finish(&mut self, job_id: &str, outcome: Outcome, bundle_error: Option<String>) {
        let Some(record) = self.jobs.get_mut(job_id) else {
            warn!("Result for unknown job {} dropped", job_id);
            return;
        };
        if record.is_terminal() {
            warn!(
                "Late result for job {} ignored, already {}",
                job_id,
                record.status()
            );
            return;
        }

        let cancelling = record.status() == JobStatus::Cancelling;
        let candidate = match outcome {
            Ok(results) => {
                // Files the processor never reported on are settled from
                // its final results.
                let unsettled = |record: &JobRecord, name: &str| {
                    record.file(name).is_some_and(|f| !f.status.is_terminal())
                };
                for name in &results.success {
                    if !unsettled(record, name) {
                        continue;
                    }
                    apply_file_event(
                        &self.bus,
                        record,
                        FileEvent::Completed {
                            filename: name.clone(),
                            success: true,
                            output: None,
                            reason: None,
                        },
                    );
                }
                for failed in &results.failed {
                    if !unsettled(record, &failed.name) {
                        continue;
                    }
                    apply_file_event(
                        &self.bus,
                        record,
                        FileEvent::failed(failed.name.as_str(), failed.reason.as_str()),
                    );
                }
                record.results = results;
                if cancelling {
                    JobStatus::Cancelled
                } else {
                    record.results.classify()
                }
            }
            Err(message) => {
                record.error = Some(message);
                JobStatus::Failed
            }
        };
        if let Some(message) = bundle_error {
            record.error.get_or_insert(message);
        }
        record.completed_at = Some(Utc::now());

        let mut snapshot = JobSnapshot::from(&*record);
        snapshot.status = candidate;
        let status = match self.store.save(&snapshot).await {
            Ok(()) => candidate,
            Err(e) => {
                error!("Could not persist result of job {}: {}", job_id, e);
                record.error = Some(e.to_string());
                JobStatus::Failed
            }
        };

        if let Err(e) = record.transition(status) {
            error!("Job {} could not be finalized: {}", job_id, e);
            return;
        }

        info!(
            "Job {} {}: {} succeeded, {} failed",
            job_id,
            status,
            record.results.success.len(),
            record.results.failed.len()
        );
        self.finalize(job_id).await;
    }

    async fn cancel(
        &mut self,
        job_id: &str,
        reason: String,
    ) -> Result<Option<JobStatus>, JobError> {
        let Some(record) = self.jobs.get_mut(job_id) else {
            return Ok(None);
        };

        match record.status() {
            JobStatus::Queued => {
                // Terminal on disk first, so a restart cannot run it again.
                let mut snapshot = JobSnapshot::from(&*record);
                snapshot.status = JobStatus::Cancelled;
                snapshot.completed_at = Some(Utc::now());
                if let Err(e) = self.store.save(&snapshot).await {
                    error!("Could not persist cancellation of job {}: {}", job_id, e);
                    return Err(e);
                }

                record.request_cancel();
                self.bus
                    .publish(record, JobEvent::CancelRequested { reason });
                record.completed_at = snapshot.completed_at;
                record.transition(JobStatus::Cancelled)?;
                info!("Job {} cancelled before it started", job_id);
                self.finalize(job_id).await;
            }
            JobStatus::Running => {
                record.transition(JobStatus::Cancelling)?;
                record.request_cancel();
                info!("Cancellation requested for job {}: {}", job_id, reason);
                self.bus
                    .publish(record, JobEvent::CancelRequested { reason });
                self.schedule_flush(job_id);
            }
            status => debug!("Cancel of job {} ignored, already {}", job_id, status),
        }

        Ok(self.jobs.get(job_id).map(|record| record.status()))
    }

    /// Fails a job that can no longer be tracked reliably.
    async fn fail(&mut self, job_id: &str, message: String) {
        let Some(record) = self.jobs.get_mut(job_id) else {
            return;
        };
        if record.is_terminal() {
            return;
        }

        record.request_cancel();
        record.error = Some(message);
        record.completed_at = Some(Utc::now());
        if let Err(e) = record.transition(JobStatus::Failed) {
            error!("Job {} could not be failed: {}", job_id, e);
            return;
        }
        self.finalize(job_id).await;
    }

    /// Publishes the terminal event, ends the live channel and writes the
    /// final snapshot with the complete event log.
    async fn finalize(&mut self, job_id: &str) {
        let Some(record) = self.jobs.get_mut(job_id) else {
            return;
        };

        let event = JobEvent::terminal(record.status(), record.summary());
        self.bus.publish(record, event);
        self.bus.close(record);

        if let Err(e) = self.store.save(&JobSnapshot::from(&*record)).await {
            error!("Could not persist final state of job {}: {}", job_id, e);
        }

        if let Some(after) = self.config.evict_after() {
            self.send_later(
                after,
                Command::Evict {
                    job_id: job_id.to_string(),
                },
            );
        }
    }

    async fn flush(&mut self, job_id: &str) {
        self.flushes.complete(job_id);

        let Some(record) = self.jobs.get(job_id) else {
            return;
        };
        let snapshot = JobSnapshot::from(record);
        if let Err(e) = self.store.save(&snapshot).await {
            error!("Debounced save of job {} failed: {}", job_id, e);
            if !snapshot.is_terminal() {
                self.fail(job_id, e.to_string()).await;
            }
        }
    }

    fn evict(&mut self, job_id: &str) {
        let Some(record) = self.jobs.get(job_id) else {
            return;
        };
        if !record.is_terminal() {
            return;
        }
        if self.flushes.is_pending(job_id) {
            self.send_later(
                self.config.flush_delay() * 2,
                Command::Evict {
                    job_id: job_id.to_string(),
                },
            );
            return;
        }

        self.jobs.remove(job_id);
        debug!("Evicted job {} from memory", job_id);
    }

    async fn flush_pending(&mut self) {
        let pending: Vec<String> = self.flushes.pending().cloned().collect();
        for job_id in pending {
            self.flushes.complete(&job_id);
            if let Some(record) = self.jobs.get(&job_id) {
                if let Err(e) = self.store.save(&JobSnapshot::from(record)).await {
                    error!("Final flush of job {} failed: {}", job_id, e);
                }
            }
        }
    }

    fn schedule_flush(&mut self, job_id: &str) {
        let commands = self.commands.clone();
        let id = job_id.to_string();
        self.flushes.schedule(job_id.to_string(), move || {
            let _ = commands.send(Command::Flush { job_id: id });
        });
    }

    fn send_later(&self, delay: Duration, command: Command) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        });
    }
}

/// Applies one processor notification to the record and publishes the
/// matching events. A file's terminal state is final: repeats and unknown
/// names are published but change nothing.
fn apply_file_event(bus: &ProgressBus, record: &mut JobRecord, event: FileEvent) {
    if record.file(event.filename()).is_none() {
        warn!(
            "Job {} reported unknown file {}",
            record.job_id,
            event.filename()
        );
    }

    match event {
        FileEvent::Started { filename } => {
            if let Some(file) = record.file_mut(&filename) {
                if !file.status.is_terminal() {
                    file.status = FileState::Processing;
                    file.stage = Some("started".to_string());
                    file.message = None;
                }
            }
            bus.publish(record, JobEvent::FileStarted { filename });
        }
        FileEvent::Progress {
            filename,
            percent,
            stage,
        } => {
            let percent = clamp_percent(percent);
            if let Some(file) = record.file_mut(&filename) {
                if !file.status.is_terminal() {
                    file.status = FileState::Processing;
                    file.percent = percent;
                    file.stage = Some(stage.clone());
                }
            }
            bus.publish(
                record,
                JobEvent::FileProgress {
                    filename,
                    percent,
                    stage,
                },
            );
        }
        FileEvent::Completed {
            filename,
            success,
            output,
            reason,
        } => {
            if !record.mark_file_processed(&filename) {
                if record.file(&filename).is_some() {
                    debug!(
                        "Job {} repeated completion of {}",
                        record.job_id, filename
                    );
                    return;
                }
                bus.publish(
                    record,
                    JobEvent::FileCompleted {
                        filename,
                        success,
                        output,
                        reason,
                    },
                );
                return;
            }

            if let Some(file) = record.file_mut(&filename) {
                file.status = if success {
                    FileState::Completed
                } else {
                    FileState::Failed
                };
                if success {
                    file.percent = 100.0;
                }
                file.output = output.clone();
                file.message = reason.clone();
                file.stage = Some("completed".to_string());
            }

            bus.publish(
                record,
                JobEvent::FileCompleted {
                    filename,
                    success,
                    output,
                    reason,
                },
            );
            let progress = JobEvent::JobProgress {
                percent: record.percent(),
                completed: record.processed_files(),
                total: record.total_files(),
            };
            bus.publish(record, progress);
        }
    }
}

fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}
