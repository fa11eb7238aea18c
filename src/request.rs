//! Request intake: the per-connection read ring, the resumable target scanner,
//! and resource-key resolution.
//!
//! The wire format is deliberately minimal: the request target is every byte
//! up to the first LF, kept verbatim (a preceding CR included). A missing LF
//! only ever means "more data needed".

use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::config::{MAX_TARGET_LEN, READ_BUF_SIZE};
use crate::constants::{DEFAULT_INDEX, TARGET_TERMINATOR};

/// Fixed-capacity byte ring. `head` and `tail` only grow between resets and
/// are reduced mod capacity when indexing.
pub struct ReadRing {
    buf: Box<[u8; READ_BUF_SIZE]>,
    head: usize,
    tail: usize,
}

impl ReadRing {
    pub fn new() -> Self {
        Self {
            buf: Box::new([0u8; READ_BUF_SIZE]),
            head: 0,
            tail: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn is_full(&self) -> bool {
        self.len() == READ_BUF_SIZE
    }

    pub fn cursors(&self) -> (usize, usize) {
        (self.head, self.tail)
    }

    /// Largest contiguous free region starting at `tail`.
    fn writable(&mut self) -> &mut [u8] {
        let start = self.tail % READ_BUF_SIZE;
        let free = READ_BUF_SIZE - self.len();
        let contiguous = free.min(READ_BUF_SIZE - start);
        &mut self.buf[start..start + contiguous]
    }

    /// One `read` into the free region. `Ok(0)` means the peer closed (the
    /// ring is never full when this is called by the state machine).
    pub fn fill_from<R: Read>(&mut self, src: &mut R) -> io::Result<usize> {
        let n = src.read(self.writable())?;
        self.tail += n;
        Ok(n)
    }

    /// Copy `bytes` in as if they had been read. Returns how many fit.
    pub fn extend_from_slice(&mut self, bytes: &[u8]) -> usize {
        let mut copied = 0;
        while copied < bytes.len() && !self.is_full() {
            let dst = self.writable();
            let n = dst.len().min(bytes.len() - copied);
            dst[..n].copy_from_slice(&bytes[copied..copied + n]);
            self.tail += n;
            copied += n;
        }
        copied
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.head % READ_BUF_SIZE];
        self.head += 1;
        Some(byte)
    }

    /// Move unread bytes to the front and zero the cursors around them.
    pub fn compact(&mut self) {
        let len = self.len();
        if len == 0 {
            self.head = 0;
            self.tail = 0;
            return;
        }
        let start = self.head % READ_BUF_SIZE;
        let mut rest = [0u8; READ_BUF_SIZE];
        for (i, slot) in rest.iter_mut().enumerate().take(len) {
            *slot = self.buf[(start + i) % READ_BUF_SIZE];
        }
        self.buf[..len].copy_from_slice(&rest[..len]);
        self.head = 0;
        self.tail = len;
    }
}

impl Default for ReadRing {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    AwaitingTerminator,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    Complete,
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Target grew past [`MAX_TARGET_LEN`] without a terminator.
    TooLong,
}

/// Resumable scanner accumulating the request target across reads.
pub struct TargetParser {
    state: ScanState,
    target: Vec<u8>,
}

impl TargetParser {
    pub fn new() -> Self {
        Self {
            state: ScanState::AwaitingTerminator,
            target: Vec::new(),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Consume bytes from `ring` up to and including the terminator. Bytes
    /// after the terminator stay in the ring for the next request.
    pub fn advance(&mut self, ring: &mut ReadRing) -> Result<ParseStatus, ParseError> {
        if self.state == ScanState::Done {
            return Ok(ParseStatus::Complete);
        }
        while let Some(byte) = ring.pop() {
            if byte == TARGET_TERMINATOR {
                self.state = ScanState::Done;
                return Ok(ParseStatus::Complete);
            }
            if self.target.len() >= MAX_TARGET_LEN {
                return Err(ParseError::TooLong);
            }
            self.target.push(byte);
        }
        Ok(ParseStatus::Incomplete)
    }

    /// Raw bytes accumulated so far.
    pub fn target(&self) -> &[u8] {
        &self.target
    }

    pub fn target_lossy(&self) -> String {
        String::from_utf8_lossy(&self.target).into_owned()
    }

    pub fn reset(&mut self) {
        self.state = ScanState::AwaitingTerminator;
        self.target.clear();
    }
}

impl Default for TargetParser {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyError {
    /// No path could be found in the target line.
    NoPath,
    /// NUL byte in the path.
    InvalidByte,
    /// A `..` component would escape the serving root.
    Traversal,
}

/// Map a raw target line onto a cache/disk key under `root`.
///
/// Accepts either a bare path (`/a.txt`) or a request line
/// (`GET /a.txt HTTP/1.1`), in which case the first token beginning with `/`
/// is the path. Query and fragment are dropped, `.` segments are skipped and
/// `..` is refused outright.
pub fn resolve_key(root: &Path, target: &str) -> Result<String, KeyError> {
    let line = target.trim_end_matches('\r').trim();
    let path = if line.contains(char::is_whitespace) {
        line.split_whitespace()
            .find(|tok| tok.starts_with('/'))
            .ok_or(KeyError::NoPath)?
    } else {
        line
    };
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.contains('\0') {
        return Err(KeyError::InvalidByte);
    }

    let mut resolved = PathBuf::from(root);
    let mut pushed = false;
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                pushed = true;
            }
            Component::CurDir => {}
            Component::ParentDir => return Err(KeyError::Traversal),
            Component::RootDir | Component::Prefix(_) => return Err(KeyError::Traversal),
        }
    }
    if !pushed || path.ends_with('/') {
        resolved.push(DEFAULT_INDEX);
    }
    Ok(resolved.to_string_lossy().into_owned())
}
