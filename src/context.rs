use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::ContentCache;
use crate::config::ServerConfig;
use crate::work_queue::WorkQueue;

/// State shared by the reactor and the disk workers. The cache and the queue
/// are the only synchronization points between the two sides; the rest is
/// read-only settings.
#[derive(Clone)]
pub struct ServerContext {
    pub cache: Arc<ContentCache>,
    pub queue: WorkQueue,
    /// Directory resource keys are resolved under.
    pub root: PathBuf,
    pub keep_alive: bool,
    pub tcp_cork: bool,
}

impl ServerContext {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            cache: Arc::new(ContentCache::new(config.cache_bytes)),
            queue: WorkQueue::new(),
            root: config.root.clone(),
            keep_alive: config.keep_alive,
            tcp_cork: config.tcp_cork,
        }
    }
}
