//! Thin epoll wrapper. Every watch is edge-triggered; connection watches are
//! additionally one-shot and must be re-armed after each event.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;

use libc::{EPOLLERR, EPOLLET, EPOLLHUP, EPOLLIN, EPOLLONESHOT, EPOLLOUT, epoll_event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
}

impl Interest {
    fn bits(self) -> i32 {
        match self {
            Interest::Readable => EPOLLIN,
            Interest::Writable => EPOLLOUT,
        }
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    bits: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.bits & EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.bits & EPOLLOUT as u32 != 0
    }

    /// Error or hangup, or a wakeup carrying neither direction.
    pub fn is_error(&self) -> bool {
        self.bits & (EPOLLERR | EPOLLHUP) as u32 != 0 || (!self.is_readable() && !self.is_writable())
    }
}

/// Reusable buffer for `epoll_wait` output.
pub struct Events {
    buf: Vec<epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|ev| {
            // copy out of the packed struct before use
            let token = ev.u64;
            let bits = ev.events;
            Event { token, bits }
        })
    }
}

pub struct Poller {
    fd: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created descriptor with no other owner.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    fn ctl(&self, op: i32, fd: RawFd, token: u64, flags: i32) -> io::Result<()> {
        let mut event = epoll_event {
            events: flags as u32,
            u64: token,
        };
        let res = unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fd, &mut event) };
        if res < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Persistent edge-triggered watch (listener, completion signal).
    pub fn add(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest.bits() | EPOLLET)
    }

    /// One-shot watch: fires at most once until [`Poller::rearm`].
    pub fn add_oneshot(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_ADD,
            fd,
            token,
            interest.bits() | EPOLLET | EPOLLONESHOT,
        )
    }

    /// Re-enable a one-shot watch for `interest`. If the descriptor is already
    /// ready the kernel queues the event immediately.
    pub fn rearm(&self, fd: RawFd, token: u64, interest: Interest) -> io::Result<()> {
        self.ctl(
            libc::EPOLL_CTL_MOD,
            fd,
            token,
            interest.bits() | EPOLLET | EPOLLONESHOT,
        )
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let res = unsafe {
            libc::epoll_ctl(self.fd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, ptr::null_mut())
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ENOENT) {
                return Err(err);
            }
        }
        Ok(())
    }

    /// Block until at least one watch fires or `timeout_ms` elapses (-1 waits
    /// forever). EINTR is reported as zero events.
    pub fn wait(&self, events: &mut Events, timeout_ms: i32) -> io::Result<usize> {
        let res = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as i32,
                timeout_ms,
            )
        };
        if res < 0 {
            events.len = 0;
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        events.len = res as usize;
        Ok(events.len)
    }
}
