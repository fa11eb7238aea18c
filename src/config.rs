//! Server sizing and operational configuration.
//!
//! Hardcoded sizing values live here as constants. Per-run settings that the
//! CLI can override are collected in [`ServerConfig`].

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Per-connection read ring capacity (bytes).
pub const READ_BUF_SIZE: usize = 1024;

/// Longest request target accepted before the connection is rejected.
pub const MAX_TARGET_LEN: usize = 8192;

/// Default cache byte budget (1 GiB).
pub const DEFAULT_CACHE_BYTES: usize = 1 << 30;

/// Default number of disk worker threads.
pub const DEFAULT_WORKERS: usize = 4;

/// Listen backlog handed to `listen(2)`.
pub const LISTEN_BACKLOG: i32 = 511;

/// Max readiness events drained per `epoll_wait`.
pub const MAX_EVENTS: usize = 1024;

/// Initial connection slab capacity. The slab grows past this on demand.
pub const SLAB_CAPACITY: usize = 4096;

// Compile-time sanity checks
const _: () = assert!(READ_BUF_SIZE.is_power_of_two(), "read ring must be a power of two");
const _: () = assert!(
    MAX_TARGET_LEN >= READ_BUF_SIZE,
    "target cap smaller than one read ring"
);
const _: () = assert!(MAX_EVENTS > 0 && MAX_EVENTS <= i32::MAX as usize);

/// Settings for one server instance.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: IpAddr,
    pub port: u16,
    /// Directory that resource keys are resolved against.
    pub root: PathBuf,
    pub workers: usize,
    pub cache_bytes: usize,
    /// Keep the connection open after a response.
    pub keep_alive: bool,
    pub tcp_nodelay: bool,
    /// Cork the socket while a response is being sent.
    pub tcp_cork: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            root: PathBuf::from("."),
            workers: DEFAULT_WORKERS,
            cache_bytes: DEFAULT_CACHE_BYTES,
            keep_alive: true,
            tcp_nodelay: true,
            tcp_cork: false,
        }
    }
}
