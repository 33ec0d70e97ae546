//! Timestamp-keyed map from in-flight frames to their waiting callers

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::DriverError;
use crate::ProcessedFrame;

pub type Completion = Result<ProcessedFrame, DriverError>;

struct Entry {
    generation: u64,
    tx: oneshot::Sender<Completion>,
}

/// A reserved timestamp and the receiving end of its completion
pub struct Pending {
    /// Distinguishes this registration from later ones for the same timestamp
    pub generation: u64,
    pub receiver: oneshot::Receiver<Completion>,
}

#[derive(Default)]
pub struct Correlator {
    pending: Mutex<HashMap<u64, Entry>>,
    next_generation: AtomicU64,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `timestamp`; a timestamp already in flight is rejected
    pub fn register(&self, timestamp: u64) -> Result<Pending, DriverError> {
        let mut pending = self.lock();
        if pending.contains_key(&timestamp) {
            return Err(DriverError::DuplicateTimestamp(timestamp));
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, receiver) = oneshot::channel();
        pending.insert(timestamp, Entry { generation, tx });
        Ok(Pending {
            generation,
            receiver,
        })
    }

    /// Hand a result to its caller; false when nobody is waiting for it
    pub fn resolve(&self, frame: ProcessedFrame) -> bool {
        let Some(entry) = self.lock().remove(&frame.timestamp) else {
            return false;
        };
        entry.tx.send(Ok(frame)).is_ok()
    }

    /// Forget one registration without completing it
    ///
    /// Only removes the entry if it still belongs to `generation`.
    pub fn cancel(&self, timestamp: u64, generation: u64) -> bool {
        let mut pending = self.lock();
        match pending.get(&timestamp) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&timestamp);
                true
            }
            _ => false,
        }
    }

    /// Reject every in-flight request; returns how many were waiting
    pub fn fail_all(&self, error: impl Fn() -> DriverError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let n = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Err(error()));
        }
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Entry>> {
        // Entries stay consistent even if a holder panicked
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Removes its correlator entry when the waiting caller goes away
pub(crate) struct PendingGuard<'a> {
    correlator: &'a Correlator,
    timestamp: u64,
    generation: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(correlator: &'a Correlator, timestamp: u64, generation: u64) -> Self {
        Self {
            correlator,
            timestamp,
            generation,
            armed: true,
        }
    }

    /// The entry was consumed by a result or a bulk rejection
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.cancel(self.timestamp, self.generation);
        }
    }
}
