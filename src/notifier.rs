//! Completion signal from the disk workers to the reactor.
//!
//! A non-blocking eventfd: any number of workers add to its counter, the
//! reactor drains it. A write makes it readable (and wakes an edge-triggered
//! watch); a drain resets it to non-readable until the next write.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

pub struct Notifier {
    fd: OwnedFd,
}

impl Notifier {
    pub fn new() -> io::Result<Self> {
        let raw = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: eventfd just returned this descriptor and nothing else owns it.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };
        Ok(Self { fd })
    }

    /// Add one to the counter. Safe to call from any thread.
    pub fn signal(&self) {
        let val: u64 = 1;
        let res = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                8,
            )
        };
        if res < 0 {
            // EAGAIN only when the counter would overflow, in which case the
            // fd is already readable and the wakeup is not lost.
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                tracing::warn!("eventfd signal failed: {}", err);
            }
        }
    }

    /// Reset the counter and return how many signals it had accumulated
    /// (0 if nothing was pending).
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let res = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                8,
            )
        };
        if res == 8 { val } else { 0 }
    }
}

impl AsRawFd for Notifier {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
