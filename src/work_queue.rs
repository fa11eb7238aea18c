//! Disk work queue: unbounded MPMC FIFO between the reactor and the disk
//! workers.
//!
//! Backed by a crossbeam channel. `get` parks the calling worker until a task
//! arrives; `put` wakes one parked worker. Shutdown is an in-band
//! [`DiskTask::Stop`] sentinel, one per worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, unbounded};

/// Completion flag shared between a queued load and whoever asked for it.
///
/// Set by the worker after the result is published into the cache. It never
/// refers back to a connection; a waiter that sees a completed ticket but still
/// misses the cache knows the entry was evicted and must ask again.
#[derive(Debug, Clone, Default)]
pub struct LoadTicket(Arc<AtomicBool>);

impl LoadTicket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_complete(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone)]
pub enum DiskTask {
    /// Load the file at `key` into the cache.
    Load { key: String, ticket: LoadTicket },
    /// Reserved sentinel: the receiving worker exits and does not forward it.
    Stop,
}

impl DiskTask {
    pub fn load(key: impl Into<String>) -> (Self, LoadTicket) {
        let ticket = LoadTicket::new();
        let task = DiskTask::Load {
            key: key.into(),
            ticket: ticket.clone(),
        };
        (task, ticket)
    }
}

/// Cloneable handle to both ends of the queue.
#[derive(Clone)]
pub struct WorkQueue {
    tx: Sender<DiskTask>,
    rx: Receiver<DiskTask>,
}

impl WorkQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Append `task`. Never blocks.
    pub fn put(&self, task: DiskTask) {
        // Both ends live in `self`, so the channel cannot be disconnected here.
        let _ = self.tx.send(task);
    }

    /// Block until a task is available and return it, oldest first.
    pub fn get(&self) -> DiskTask {
        // Disconnection is impossible while `self.tx` is alive; treat it as Stop.
        self.rx.recv().unwrap_or(DiskTask::Stop)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
