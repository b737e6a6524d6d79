//! Coalesces bursts of snapshot writes into one delayed flush per job.

use std::borrow::Borrow;
use std::collections::HashSet;
use std::hash::Hash;
use std::time::Duration;

/// Tracks which keys have a flush pending.
///
/// Scheduling spawns a timer on the current tokio runtime that calls `fire`
/// once the delay has elapsed. While a key is pending further requests are
/// absorbed; the owner calls [`FlushScheduler::complete`] when it performs
/// the flush, and the next request after that starts a new timer.
#[derive(Debug)]
pub struct FlushScheduler<K> {
    delay: Duration,
    pending: HashSet<K>,
}

impl<K> FlushScheduler<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: HashSet::new(),
        }
    }

    /// Returns false when a flush for `key` was already pending.
    pub fn schedule<F>(&mut self, key: K, fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.pending.insert(key) {
            return false;
        }

        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        true
    }

    /// Clears the pending mark; returns whether one was set.
    pub fn complete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.pending.remove(key)
    }

    pub fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.pending.contains(key)
    }

    pub fn pending(&self) -> impl Iterator<Item = &K> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
