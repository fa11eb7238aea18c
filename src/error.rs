use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Startup-fatal conditions. Nothing here is retried: the binary logs the
/// error and exits non-zero.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to create listening socket: {0}")]
    Socket(#[source] io::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to listen: {0}")]
    Listen(#[source] io::Error),

    #[error("failed to create eventfd: {0}")]
    EventFd(#[source] io::Error),

    #[error("epoll failure: {0}")]
    Epoll(#[source] io::Error),

    #[error("failed to spawn disk worker {index}: {source}")]
    SpawnWorker {
        index: usize,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type ServerResult<T> = Result<T, ServerError>;
