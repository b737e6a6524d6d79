//! Per-job fan-out of progress events with history replay.

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::broadcast::event::{EventEnvelope, JobEvent};
use crate::job::{JobRecord, JobSnapshot};

/// Stamps, records and distributes events for the jobs it is handed.
///
/// The bus holds no per-job state itself: the event log and the live channel
/// live on the [`JobRecord`], so whoever owns the record owns its listeners.
#[derive(Debug, Clone, Copy)]
pub struct ProgressBus {
    capacity: usize,
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends the event to the job's log and forwards it to live listeners.
    /// Never blocks; slow listeners lose their oldest buffered events.
    pub fn publish(&self, record: &mut JobRecord, event: JobEvent) -> EventEnvelope {
        let envelope = EventEnvelope::new(&record.job_id, event);
        record.append_event(envelope.clone());

        if let Some(sender) = record.listeners.as_ref() {
            // Err only means nobody is listening right now.
            let _ = sender.send(envelope.clone());
        }
        envelope
    }

    /// History plus a live receiver. Both are taken while the caller holds
    /// the record exclusively, so nothing published in between can be
    /// missed or seen twice.
    pub fn subscribe(&self, record: &mut JobRecord) -> Subscription {
        let history = record.events().to_vec();
        if record.is_terminal() {
            return Subscription::history_only(&record.job_id, history);
        }

        let capacity = self.capacity;
        let sender = record
            .listeners
            .get_or_insert_with(|| broadcast::channel(capacity).0);
        let live = sender.subscribe();

        log::debug!(
            "Subscribed to job {} ({} listener(s), {} past event(s))",
            record.job_id,
            sender.receiver_count(),
            history.len()
        );

        Subscription {
            job_id: record.job_id.clone(),
            history,
            live: Some(live),
        }
    }

    /// Drops the live channel. Receivers drain what is buffered and then
    /// observe the end of the stream.
    pub fn close(&self, record: &mut JobRecord) {
        if record.listeners.take().is_some() {
            log::debug!("Closed live channel for job {}", record.job_id);
        }
    }
}

/// One observer's view of a job: past events and, for active jobs, a live tail.
#[derive(Debug)]
pub struct Subscription {
    job_id: String,
    history: Vec<EventEnvelope>,
    live: Option<broadcast::Receiver<EventEnvelope>>,
}

impl Subscription {
    fn history_only(job_id: &str, history: Vec<EventEnvelope>) -> Self {
        Self {
            job_id: job_id.to_string(),
            history,
            live: None,
        }
    }

    /// History-only subscription for a job known only from its snapshot.
    pub fn replay(snapshot: JobSnapshot) -> Self {
        Self::history_only(&snapshot.job_id, snapshot.events)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn history(&self) -> &[EventEnvelope] {
        &self.history
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    /// Next live event. `None` once the job's channel has closed, after
    /// unsubscribing, or for history-only subscriptions.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            let live = self.live.as_mut()?;
            match live.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!(
                        "Listener for job {} lagged, dropped {} event(s)",
                        self.job_id,
                        skipped
                    );
                }
                Err(RecvError::Closed) => {
                    self.live = None;
                    return None;
                }
            }
        }
    }

    /// Detaches from the live channel. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if self.live.take().is_some() {
            log::debug!("Unsubscribed from job {}", self.job_id);
        }
    }

    /// History followed by the live tail; ends when the channel closes.
    pub fn into_stream(mut self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let history = std::mem::take(&mut self.history);
        let live = stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|envelope| (envelope, sub))
        });
        stream::iter(history).chain(live)
    }
}
