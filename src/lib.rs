//! Library crate for ferrofile: a static file server built from one epoll
//! reactor thread, a pool of disk worker threads and a shared LRU content cache.
//!
//! The reactor (`reactor`) owns every connection and never blocks on disk. A
//! cache miss queues a load on the `work_queue`; a disk worker
//! (`disk_worker`) reads the file, publishes it into the `cache` and signals
//! the `notifier`, which wakes the reactor to re-drive parked connections.
//! Everything except `reactor` and `server` is testable without sockets.

pub mod cache;
pub mod config;
pub mod connection;
pub mod constants;
pub mod content;
pub mod context;
pub mod disk_worker;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod notifier;
pub mod poller;
pub mod reactor;
pub mod request;
pub mod server;
pub mod work_queue;
