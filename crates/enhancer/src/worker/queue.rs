use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};

use crate::error::WorkerError;

/// FIFO of job ids waiting for a worker. Cloning shares the same queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
    sender: Sender<String>,
    receiver: Receiver<String>,
}

impl JobQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    pub fn push(&self, job_id: &str) -> Result<(), WorkerError> {
        self.sender
            .send(job_id.to_string())
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn pop_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
