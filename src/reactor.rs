//! The single reactor thread: owns the listener, every connection and the
//! completion signal, and drives connections on readiness.
//!
//! All connection watches are edge-triggered one-shot, so a connection gets
//! at most one event per arm and is re-armed from the [`Step`] its drive
//! returned. Connections waiting on disk are parked with no watch at all; they
//! are re-driven each time the disk workers signal completions.

use std::io;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use slab::Slab;
use socket2::Socket;

use crate::config::{MAX_EVENTS, SLAB_CAPACITY};
use crate::connection::{Connection, Step};
use crate::context::ServerContext;
use crate::error::{ServerError, ServerResult};
use crate::metrics;
use crate::notifier::Notifier;
use crate::poller::{Event, Events, Interest, Poller};

/// Tokens above the slab key range.
const LISTENER: u64 = u64::MAX;
const NOTIFY: u64 = u64::MAX - 1;

struct Slot {
    conn: Connection<Socket>,
    /// Waiting for a disk load, with no readiness watch armed.
    parked: bool,
}

/// Stops a running reactor from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    notifier: Arc<Notifier>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        // wake the reactor out of epoll_wait
        self.notifier.signal();
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

pub struct Reactor {
    poller: Poller,
    listener: Socket,
    notifier: Arc<Notifier>,
    ctx: ServerContext,
    conns: Slab<Slot>,
    waiting: Vec<usize>,
    tcp_nodelay: bool,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Register the listener and the completion signal. `listener` must
    /// already be non-blocking and listening.
    pub fn new(
        listener: Socket,
        notifier: Arc<Notifier>,
        ctx: ServerContext,
        tcp_nodelay: bool,
    ) -> ServerResult<Self> {
        let poller = Poller::new().map_err(ServerError::Epoll)?;
        poller
            .add(listener.as_raw_fd(), LISTENER, Interest::Readable)
            .map_err(ServerError::Epoll)?;
        poller
            .add(notifier.as_raw_fd(), NOTIFY, Interest::Readable)
            .map_err(ServerError::Epoll)?;
        Ok(Self {
            poller,
            listener,
            notifier,
            ctx,
            conns: Slab::with_capacity(SLAB_CAPACITY),
            waiting: Vec::new(),
            tcp_nodelay,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            notifier: Arc::clone(&self.notifier),
        }
    }

    pub fn connections(&self) -> usize {
        self.conns.len()
    }

    /// Serve until shut down. Only a failing `epoll_wait` is an error.
    pub fn run(&mut self) -> ServerResult<()> {
        let mut events = Events::with_capacity(MAX_EVENTS);
        while !self.shutdown.load(Ordering::Acquire) {
            self.poll_once(&mut events, -1)?;
        }
        tracing::info!("reactor stopping with {} open connections", self.conns.len());
        Ok(())
    }

    /// One wait plus dispatch of everything it returned.
    pub fn poll_once(&mut self, events: &mut Events, timeout_ms: i32) -> ServerResult<()> {
        self.poller
            .wait(events, timeout_ms)
            .map_err(ServerError::Epoll)?;

        let mut completions = false;
        for event in events.iter() {
            match event.token {
                LISTENER => self.accept_all(),
                NOTIFY => completions = true,
                token => self.on_ready(token as usize, event),
            }
        }

        // Drain after the batch so a signal raised while dispatching is
        // either consumed here (and its result seen below) or left pending
        // for the next wait.
        if completions {
            self.notifier.drain();
            self.redrive_waiting();
        }
        Ok(())
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, peer)) => {
                    if let Err(e) = self.register(socket) {
                        tracing::warn!("dropping connection from {:?}: {}", peer.as_socket(), e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // EMFILE and friends: the backlog keeps the rest until the
                    // next edge.
                    tracing::warn!("accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn register(&mut self, socket: Socket) -> io::Result<()> {
        socket.set_nonblocking(true)?;
        if self.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        let entry = self.conns.vacant_entry();
        let key = entry.key();
        // Data that is already queued is reported by the initial arm.
        self.poller
            .add_oneshot(socket.as_raw_fd(), key as u64, Interest::Readable)?;
        entry.insert(Slot {
            conn: Connection::new(socket),
            parked: false,
        });
        metrics::inc_conns_accepted();
        Ok(())
    }

    fn on_ready(&mut self, key: usize, event: Event) {
        if !self.conns.contains(key) {
            return;
        }
        if event.is_error() {
            self.close(key);
            return;
        }
        let step = self.conns[key].conn.drive(&self.ctx);
        self.apply(key, step);
    }

    fn apply(&mut self, key: usize, step: Step) {
        let Some(slot) = self.conns.get_mut(key) else {
            return;
        };
        let fd = slot.conn.stream().as_raw_fd();
        let rearm = match step {
            Step::ReadAgain => self.poller.rearm(fd, key as u64, Interest::Readable),
            Step::WriteAgain => self.poller.rearm(fd, key as u64, Interest::Writable),
            Step::WaitDisk => {
                slot.parked = true;
                self.waiting.push(key);
                metrics::set_waiting(self.waiting.len());
                Ok(())
            }
            Step::Close => {
                self.close(key);
                Ok(())
            }
        };
        if let Err(e) = rearm {
            tracing::debug!("rearm of connection {} failed: {}", key, e);
            self.close(key);
        }
    }

    /// Give every parked connection another look at the cache. Those whose
    /// entry is still missing park again.
    fn redrive_waiting(&mut self) {
        let parked = std::mem::take(&mut self.waiting);
        for key in parked {
            let Some(slot) = self.conns.get_mut(key) else {
                continue;
            };
            if !slot.parked {
                continue;
            }
            slot.parked = false;
            let step = slot.conn.drive(&self.ctx);
            self.apply(key, step);
        }
        metrics::set_waiting(self.waiting.len());
    }

    fn close(&mut self, key: usize) {
        if let Some(slot) = self.conns.try_remove(key) {
            let fd = slot.conn.stream().as_raw_fd();
            if let Err(e) = self.poller.delete(fd) {
                tracing::debug!("epoll delete for connection {} failed: {}", key, e);
            }
            // dropping the socket closes it
            drop(slot);
            metrics::inc_conns_closed();
        }
    }
}
