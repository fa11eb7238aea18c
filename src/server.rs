//! Server assembly: listening socket, completion signal, disk workers and the
//! reactor, wired together from one [`ServerConfig`].

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};

use crate::config::{LISTEN_BACKLOG, ServerConfig};
use crate::context::ServerContext;
use crate::disk_worker::DiskWorkerPool;
use crate::error::{ServerError, ServerResult};
use crate::notifier::Notifier;
use crate::reactor::{Reactor, ShutdownHandle};

/// Non-blocking listener with `SO_REUSEADDR`, bound and listening.
pub fn create_listener(addr: SocketAddr) -> ServerResult<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(ServerError::Socket)?;
    socket.set_reuse_address(true).map_err(ServerError::Socket)?;
    socket.set_nonblocking(true).map_err(ServerError::Socket)?;
    socket
        .bind(&addr.into())
        .map_err(|source| ServerError::Bind { addr, source })?;
    socket.listen(LISTEN_BACKLOG).map_err(ServerError::Listen)?;
    Ok(socket)
}

pub struct Server {
    reactor: Reactor,
    pool: DiskWorkerPool,
    local_addr: SocketAddr,
}

impl Server {
    /// Bind the listener and start the disk workers. Requests are not served
    /// until [`Server::run`].
    pub fn bind(config: ServerConfig) -> ServerResult<Self> {
        let listener = create_listener(config.socket_addr())?;
        let local_addr = listener
            .local_addr()
            .map_err(ServerError::Socket)?
            .as_socket()
            .unwrap_or(config.socket_addr());

        let notifier = Arc::new(Notifier::new().map_err(ServerError::EventFd)?);
        let ctx = ServerContext::new(&config);
        let pool = DiskWorkerPool::spawn(
            config.workers,
            ctx.queue.clone(),
            Arc::clone(&ctx.cache),
            Arc::clone(&notifier),
        )?;
        let reactor = Reactor::new(listener, notifier, ctx, config.tcp_nodelay)?;

        tracing::info!(
            "listening on {} (root {}, {} disk workers, cache {} bytes, keep-alive {})",
            local_addr,
            config.root.display(),
            pool.len(),
            config.cache_bytes,
            config.keep_alive,
        );
        Ok(Self {
            reactor,
            pool,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.reactor.shutdown_handle()
    }

    /// Run the reactor on the calling thread until shut down, then stop the
    /// disk workers.
    pub fn run(mut self) -> ServerResult<()> {
        let result = self.reactor.run();
        self.pool.shutdown();
        tracing::info!("server stopped");
        result
    }
}
