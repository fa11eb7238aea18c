//! Disk worker pool: blocking file loads off the reactor thread.
//!
//! Each worker pulls a key from the [`WorkQueue`], reads the whole file (or
//! records why it could not), publishes the result into the [`ContentCache`]
//! under the same key, marks the task's ticket complete, then signals the
//! reactor's [`Notifier`] exactly once. Results travel only through the cache;
//! workers never see a connection.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::cache::ContentCache;
use crate::content::{Content, LoadFailure};
use crate::error::{ServerError, ServerResult};
use crate::metrics;
use crate::notifier::Notifier;
use crate::work_queue::{DiskTask, WorkQueue};

/// Read `path` fully. Failures become cacheable values rather than errors.
pub fn load_file(path: &Path) -> Content {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return Content::Failed(LoadFailure::NotFound),
    };
    let len = match file.metadata() {
        Ok(meta) if meta.is_file() => meta.len() as usize,
        _ => return Content::Failed(LoadFailure::Metadata),
    };
    let mut buf = Vec::with_capacity(len);
    match file.read_to_end(&mut buf) {
        Ok(_) => Content::from(buf),
        Err(_) => Content::Failed(LoadFailure::Read),
    }
}

/// One worker's view of the shared state.
pub struct DiskWorker {
    pub id: usize,
    pub queue: WorkQueue,
    pub cache: Arc<ContentCache>,
    pub notifier: Arc<Notifier>,
}

impl DiskWorker {
    pub fn run(self) {
        tracing::debug!("disk-{} started", self.id);
        while self.process_one() {}
        tracing::debug!("disk-{} stopped", self.id);
    }

    /// Take one task off the queue and complete it. Returns `false` once the
    /// stop sentinel has been consumed.
    pub fn process_one(&self) -> bool {
        match self.queue.get() {
            DiskTask::Stop => false,
            DiskTask::Load { key, ticket } => {
                let content = load_file(Path::new(&key));
                if let Content::Failed(failure) = &content {
                    tracing::debug!("disk-{}: {} for {}", self.id, failure, key);
                    metrics::inc_disk_failures();
                }
                metrics::inc_disk_loads();
                self.cache.put(key, Arc::new(content));
                ticket.complete();
                self.notifier.signal();
                true
            }
        }
    }
}

/// Fixed-size set of disk worker threads.
pub struct DiskWorkerPool {
    queue: WorkQueue,
    handles: Vec<JoinHandle<()>>,
}

impl DiskWorkerPool {
    pub fn spawn(
        workers: usize,
        queue: WorkQueue,
        cache: Arc<ContentCache>,
        notifier: Arc<Notifier>,
    ) -> ServerResult<Self> {
        if workers == 0 {
            return Err(ServerError::Config("worker count must be at least 1".into()));
        }
        let mut pool = Self {
            queue: queue.clone(),
            handles: Vec::with_capacity(workers),
        };
        for id in 0..workers {
            let worker = DiskWorker {
                id,
                queue: queue.clone(),
                cache: Arc::clone(&cache),
                notifier: Arc::clone(&notifier),
            };
            let handle = thread::Builder::new()
                .name(format!("disk-{}", id))
                .spawn(move || worker.run())
                .map_err(|source| ServerError::SpawnWorker { index: id, source })?;
            pool.handles.push(handle);
        }
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Queue one stop sentinel per worker and wait for all of them to exit.
    /// Tasks queued before the call are still completed.
    pub fn shutdown(&mut self) {
        for _ in 0..self.handles.len() {
            self.queue.put(DiskTask::Stop);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("disk worker panicked");
            }
        }
    }
}

impl Drop for DiskWorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
