//! Per-connection request state machine.
//!
//! A [`Connection`] is driven by the reactor each time its socket becomes
//! ready (or a disk load completes while it is parked). [`Connection::drive`]
//! runs transitions until the connection must wait for something and reports
//! what that is as a [`Step`]:
//!
//! ```text
//! Reading ──target parsed──▶ Resolving ──cache hit──▶ Sending ──done──▶ Finishing
//!    ▲  │                       │                        │                │
//!    │  └─would block: ReadAgain └─miss: WaitDisk         └─would block:   ├─keep-alive─▶ Reading
//!    │                                                      WriteAgain     └─otherwise──▶ Closed
//! ```
//!
//! Read/write errors and peer close go straight to `Closed`.

use std::io::{self, IoSlice, Read, Write};
use std::mem;
use std::sync::Arc;

use socket2::Socket;

use crate::content::Content;
use crate::context::ServerContext;
use crate::http;
use crate::metrics;
use crate::request::{ParseError, ParseStatus, ReadRing, TargetParser, resolve_key};
use crate::work_queue::{DiskTask, LoadTicket};

/// Byte stream a connection runs over. The socket options default to no-ops
/// so in-memory transports only need `Read + Write`.
pub trait Transport: Read + Write {
    fn set_cork(&self, _on: bool) -> io::Result<()> {
        Ok(())
    }

    fn set_nodelay(&self, _on: bool) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for Socket {
    fn set_cork(&self, on: bool) -> io::Result<()> {
        Socket::set_cork(self, on)
    }

    fn set_nodelay(&self, on: bool) -> io::Result<()> {
        Socket::set_nodelay(self, on)
    }
}

/// What the connection is waiting for after a [`Connection::drive`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Re-arm for read readiness.
    ReadAgain,
    /// Re-arm for write readiness.
    WriteAgain,
    /// Park until a disk load completes.
    WaitDisk,
    /// Tear the connection down.
    Close,
}

/// Observable state, without the per-state payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    ResolvingContent,
    Sending,
    Finishing,
    Closed,
}

enum Body {
    /// Shared with the cache and any other connection serving the same key.
    Cached(Arc<Content>),
    Owned(Vec<u8>),
}

impl Body {
    fn bytes(&self) -> &[u8] {
        match self {
            Body::Cached(content) => content.bytes(),
            Body::Owned(bytes) => bytes,
        }
    }
}

/// A response being written: header block then body, one write cursor across
/// both.
struct Outgoing {
    head: Vec<u8>,
    body: Body,
    written: usize,
    keep_alive: bool,
}

impl Outgoing {
    fn file(key: &str, content: Arc<Content>, keep_alive: bool) -> Self {
        match &*content {
            Content::File(bytes) => Self {
                head: http::response_head(200, http::content_type(key), bytes.len(), keep_alive),
                body: Body::Cached(content),
                written: 0,
                keep_alive,
            },
            Content::Failed(failure) => Self::error(failure.status(), keep_alive),
        }
    }

    fn error(status: u16, keep_alive: bool) -> Self {
        let page = http::error_page(status);
        Self {
            head: http::response_head(status, "text/html", page.len(), keep_alive),
            body: Body::Owned(page),
            written: 0,
            keep_alive,
        }
    }

    fn total(&self) -> usize {
        self.head.len() + self.body.bytes().len()
    }

    fn remaining(&self) -> usize {
        self.total() - self.written
    }

    fn write_to<W: Write>(&mut self, dst: &mut W) -> io::Result<usize> {
        let body = self.body.bytes();
        let n = if self.written < self.head.len() {
            let bufs = [IoSlice::new(&self.head[self.written..]), IoSlice::new(body)];
            dst.write_vectored(&bufs)?
        } else {
            dst.write(&body[self.written - self.head.len()..])?
        };
        self.written += n;
        Ok(n)
    }
}

enum Phase {
    Reading,
    Resolving {
        key: String,
        ticket: Option<LoadTicket>,
    },
    Sending(Outgoing),
    Finishing {
        keep_alive: bool,
    },
    Closed,
}

/// Result of running one phase: the phase to continue in, and whether to stop
/// and hand control back to the reactor.
type Transition = (Phase, Option<Step>);

pub struct Connection<S> {
    stream: S,
    ring: ReadRing,
    parser: TargetParser,
    phase: Phase,
    requests_served: u64,
}

impl<S: Transport> Connection<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            ring: ReadRing::new(),
            parser: TargetParser::new(),
            phase: Phase::Reading,
            requests_served: 0,
        }
    }

    pub fn state(&self) -> ConnState {
        match self.phase {
            Phase::Reading => ConnState::Reading,
            Phase::Resolving { .. } => ConnState::ResolvingContent,
            Phase::Sending(_) => ConnState::Sending,
            Phase::Finishing { .. } => ConnState::Finishing,
            Phase::Closed => ConnState::Closed,
        }
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// `(head, tail)` of the read ring.
    pub fn read_cursors(&self) -> (usize, usize) {
        self.ring.cursors()
    }

    /// Bytes of the current response still to be written, if sending.
    pub fn pending_write(&self) -> Option<usize> {
        match &self.phase {
            Phase::Sending(out) => Some(out.remaining()),
            _ => None,
        }
    }

    pub fn requests_served(&self) -> u64 {
        self.requests_served
    }

    /// Run the state machine until it has to wait.
    pub fn drive(&mut self, ctx: &ServerContext) -> Step {
        loop {
            let phase = mem::replace(&mut self.phase, Phase::Closed);
            let (next, step) = match phase {
                Phase::Reading => self.on_reading(ctx),
                Phase::Resolving { key, ticket } => self.on_resolving(ctx, key, ticket),
                Phase::Sending(out) => self.on_sending(out),
                Phase::Finishing { keep_alive } => self.on_finishing(ctx, keep_alive),
                Phase::Closed => (Phase::Closed, Some(Step::Close)),
            };
            self.phase = next;
            if let Some(step) = step {
                return step;
            }
        }
    }

    fn on_reading(&mut self, ctx: &ServerContext) -> Transition {
        loop {
            match self.parser.advance(&mut self.ring) {
                Ok(ParseStatus::Complete) => {
                    let target = self.parser.target_lossy();
                    return (self.begin_request(ctx, &target), None);
                }
                Ok(ParseStatus::Incomplete) => {}
                Err(ParseError::TooLong) => {
                    tracing::debug!("request target too long, rejecting");
                    return (self.start_sending(ctx, Outgoing::error(414, false)), None);
                }
            }

            // The parser drained the ring, so there is always room here.
            match self.ring.fill_from(&mut self.stream) {
                Ok(0) => return (Phase::Closed, Some(Step::Close)),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (Phase::Reading, Some(Step::ReadAgain));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!("read failed: {}", e);
                    return (Phase::Closed, Some(Step::Close));
                }
            }
        }
    }

    fn begin_request(&mut self, ctx: &ServerContext, target: &str) -> Phase {
        match resolve_key(&ctx.root, target) {
            Ok(key) => Phase::Resolving { key, ticket: None },
            Err(e) => {
                tracing::debug!("rejecting target {:?}: {:?}", target, e);
                self.start_sending(ctx, Outgoing::error(400, false))
            }
        }
    }

    fn on_resolving(
        &mut self,
        ctx: &ServerContext,
        key: String,
        ticket: Option<LoadTicket>,
    ) -> Transition {
        if let Some(content) = ctx.cache.get(&key) {
            metrics::inc_cache_hits();
            let out = Outgoing::file(&key, content, ctx.keep_alive);
            return (self.start_sending(ctx, out), None);
        }

        let ticket = match ticket {
            // our load is still in flight
            Some(ticket) if !ticket.is_complete() => ticket,
            // first miss, or loaded and already evicted
            _ => {
                metrics::inc_cache_misses();
                let (task, ticket) = DiskTask::load(key.clone());
                ctx.queue.put(task);
                ticket
            }
        };
        (
            Phase::Resolving {
                key,
                ticket: Some(ticket),
            },
            Some(Step::WaitDisk),
        )
    }

    fn start_sending(&mut self, ctx: &ServerContext, out: Outgoing) -> Phase {
        if ctx.tcp_cork {
            if let Err(e) = self.stream.set_cork(true) {
                tracing::debug!("cork on failed: {}", e);
            }
        }
        Phase::Sending(out)
    }

    fn on_sending(&mut self, mut out: Outgoing) -> Transition {
        while out.remaining() > 0 {
            match out.write_to(&mut self.stream) {
                Ok(0) => {
                    tracing::debug!("write returned zero with {} bytes left", out.remaining());
                    return (Phase::Closed, Some(Step::Close));
                }
                Ok(n) => metrics::add_bytes_sent(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return (Phase::Sending(out), Some(Step::WriteAgain));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    // peer may hold a partial response, framing is lost
                    tracing::debug!("write failed mid-response: {}", e);
                    return (Phase::Closed, Some(Step::Close));
                }
            }
        }
        (
            Phase::Finishing {
                keep_alive: out.keep_alive,
            },
            None,
        )
    }

    fn on_finishing(&mut self, ctx: &ServerContext, keep_alive: bool) -> Transition {
        self.requests_served += 1;
        metrics::inc_requests_served();
        if ctx.tcp_cork {
            if let Err(e) = self.stream.set_cork(false) {
                tracing::debug!("cork off failed: {}", e);
            }
        }
        if !keep_alive {
            return (Phase::Closed, Some(Step::Close));
        }
        self.parser.reset();
        self.ring.compact();
        (Phase::Reading, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Scripted in-memory transport.
    ///
    /// Reads hand out queued chunks one per call and then report would-block.
    /// Writes accept at most `write_chunk` bytes per call and only
    /// `writes_per_cycle` calls before reporting would-block; `next_cycle`
    /// simulates a new write-readiness event.
    struct ScriptedStream {
        incoming: VecDeque<Vec<u8>>,
        peer_closed: bool,
        written: Vec<u8>,
        write_chunk: usize,
        writes_per_cycle: usize,
        writes_left: usize,
        write_error: Option<io::ErrorKind>,
    }

    impl ScriptedStream {
        fn new() -> Self {
            Self {
                incoming: VecDeque::new(),
                peer_closed: false,
                written: Vec::new(),
                write_chunk: usize::MAX,
                writes_per_cycle: usize::MAX,
                writes_left: usize::MAX,
                write_error: None,
            }
        }

        fn push(&mut self, bytes: &[u8]) {
            self.incoming.push_back(bytes.to_vec());
        }

        fn throttle(&mut self, chunk: usize, calls_per_cycle: usize) {
            self.write_chunk = chunk;
            self.writes_per_cycle = calls_per_cycle;
            self.writes_left = calls_per_cycle;
        }

        fn next_cycle(&mut self) {
            self.writes_left = self.writes_per_cycle;
        }

        fn output(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.pop_front() {
                Some(mut chunk) => {
                    let n = chunk.len().min(buf.len());
                    buf[..n].copy_from_slice(&chunk[..n]);
                    if n < chunk.len() {
                        self.incoming.push_front(chunk.split_off(n));
                    }
                    Ok(n)
                }
                None if self.peer_closed => Ok(0),
                None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if let Some(kind) = self.write_error {
                return Err(kind.into());
            }
            if self.writes_left == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            self.writes_left -= 1;
            let n = buf.len().min(self.write_chunk);
            self.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Transport for ScriptedStream {}

    fn context(keep_alive: bool) -> ServerContext {
        let config = ServerConfig {
            root: PathBuf::from("/srv"),
            cache_bytes: 1 << 20,
            keep_alive,
            ..ServerConfig::default()
        };
        ServerContext::new(&config)
    }

    fn cache_file(ctx: &ServerContext, key: &str, bytes: &[u8]) {
        ctx.cache.put(key, Arc::new(Content::from(bytes.to_vec())));
    }

    /// Stand in for a disk worker: complete every queued load from `files`.
    fn run_disk(ctx: &ServerContext, files: &[(&str, &[u8])]) {
        while !ctx.queue.is_empty() {
            if let DiskTask::Load { key, ticket } = ctx.queue.get() {
                let content = match files.iter().find(|(k, _)| *k == key) {
                    Some((_, bytes)) => Content::from(bytes.to_vec()),
                    None => Content::Failed(crate::content::LoadFailure::NotFound),
                };
                ctx.cache.put(key, Arc::new(content));
                ticket.complete();
            }
        }
    }

    #[test]
    fn cache_hit_serves_in_one_drive() {
        let ctx = context(true);
        cache_file(&ctx, "/srv/a.txt", b"0123456789");
        let mut stream = ScriptedStream::new();
        stream.push(b"/a.txt\n");
        let mut conn = Connection::new(stream);

        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        let out = conn.stream().output();
        assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(out.contains("Content-Length: 10\r\n"));
        assert!(out.contains("Connection: keep-alive\r\n"));
        assert!(out.ends_with("\r\n\r\n0123456789"));
        assert_eq!(conn.requests_served(), 1);
    }

    #[test]
    fn miss_parks_then_resumes_after_load() {
        let ctx = context(true);
        let mut stream = ScriptedStream::new();
        stream.push(b"/a.txt\n");
        let mut conn = Connection::new(stream);

        assert_eq!(conn.drive(&ctx), Step::WaitDisk);
        assert_eq!(conn.state(), ConnState::ResolvingContent);
        assert_eq!(ctx.queue.len(), 1);
        assert!(conn.stream().written.is_empty());

        run_disk(&ctx, &[("/srv/a.txt", b"ten bytes!")]);

        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        let out = conn.stream().output();
        assert!(out.contains("Content-Length: 10\r\n"));
        assert!(out.ends_with("ten bytes!"));
    }

    #[test]
    fn redrive_before_completion_does_not_requeue() {
        let ctx = context(true);
        let mut stream = ScriptedStream::new();
        stream.push(b"/slow.bin\n");
        let mut conn = Connection::new(stream);

        assert_eq!(conn.drive(&ctx), Step::WaitDisk);
        // woken by some other key's completion
        assert_eq!(conn.drive(&ctx), Step::WaitDisk);
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn evicted_before_redrive_requeues() {
        let ctx = context(true);
        let mut stream = ScriptedStream::new();
        stream.push(b"/big\n");
        let mut conn = Connection::new(stream);
        assert_eq!(conn.drive(&ctx), Step::WaitDisk);

        // complete the ticket without leaving anything in the cache
        if let DiskTask::Load { ticket, .. } = ctx.queue.get() {
            ticket.complete();
        }
        assert_eq!(conn.drive(&ctx), Step::WaitDisk);
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn missing_file_is_served_as_404_and_connection_continues() {
        let ctx = context(true);
        let mut stream = ScriptedStream::new();
        stream.push(b"/nope.html\n");
        let mut conn = Connection::new(stream);

        assert_eq!(conn.drive(&ctx), Step::WaitDisk);
        run_disk(&ctx, &[]);
        assert_eq!(conn.drive(&ctx), Step::ReadAgain);

        let out = conn.stream().output();
        assert!(out.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(out.contains("Content-Type: text/html\r\n"));
        assert!(!out.contains("file not found"));
        assert_eq!(conn.state(), ConnState::Reading);
    }

    #[test]
    fn split_target_across_reads() {
        let ctx = context(true);
        cache_file(&ctx, "/srv/index.html", b"<p>");
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/index.html");

        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        assert_eq!(conn.state(), ConnState::Reading);
        assert!(conn.stream().written.is_empty());

        conn.stream_mut().push(b"\n");
        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        assert!(conn.stream().output().ends_with("<p>"));
    }

    #[test]
    fn partial_writes_finish_after_three_cycles() {
        let ctx = context(true);
        let mut conn = Connection::new(ScriptedStream::new());
        conn.phase = Phase::Sending(Outgoing {
            head: Vec::new(),
            body: Body::Owned(b"hello".to_vec()),
            written: 0,
            keep_alive: true,
        });
        conn.stream_mut().throttle(2, 1);

        assert_eq!(conn.drive(&ctx), Step::WriteAgain);
        assert_eq!(conn.pending_write(), Some(3));
        conn.stream_mut().next_cycle();
        assert_eq!(conn.drive(&ctx), Step::WriteAgain);
        assert_eq!(conn.pending_write(), Some(1));
        assert_eq!(conn.requests_served(), 0);
        conn.stream_mut().next_cycle();
        // last byte goes out, Finishing resets to Reading, then the read would block
        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        assert_eq!(conn.requests_served(), 1);
        assert_eq!(conn.stream().written, b"hello");
    }

    #[test]
    fn keep_alive_resets_in_place_and_serves_next_request() {
        let ctx = context(true);
        cache_file(&ctx, "/srv/a", b"A");
        cache_file(&ctx, "/srv/b", b"BB");
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/a\n");

        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        assert_eq!(conn.state(), ConnState::Reading);
        assert_eq!(conn.read_cursors(), (0, 0));
        assert!(conn.parser.target().is_empty());

        conn.stream_mut().push(b"/b\n");
        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        let out = conn.stream().output();
        assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
        assert!(out.ends_with("BB"));
        assert_eq!(conn.requests_served(), 2);
    }

    #[test]
    fn pipelined_requests_in_one_read_are_both_served() {
        let ctx = context(true);
        cache_file(&ctx, "/srv/a", b"A");
        cache_file(&ctx, "/srv/b", b"B");
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/a\n/b\n");

        assert_eq!(conn.drive(&ctx), Step::ReadAgain);
        assert_eq!(conn.requests_served(), 2);
    }

    #[test]
    fn without_keep_alive_connection_closes_after_response() {
        let ctx = context(false);
        cache_file(&ctx, "/srv/a", b"A");
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/a\n");

        assert_eq!(conn.drive(&ctx), Step::Close);
        assert_eq!(conn.state(), ConnState::Closed);
        assert!(conn.stream().output().contains("Connection: close\r\n"));
    }

    #[test]
    fn peer_close_closes() {
        let ctx = context(true);
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/half");
        conn.stream_mut().peer_closed = true;
        assert_eq!(conn.drive(&ctx), Step::Close);
    }

    #[test]
    fn write_error_closes() {
        let ctx = context(true);
        cache_file(&ctx, "/srv/a", b"A");
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/a\n");
        conn.stream_mut().write_error = Some(io::ErrorKind::BrokenPipe);
        assert_eq!(conn.drive(&ctx), Step::Close);
    }

    #[test]
    fn traversal_gets_400_and_close() {
        let ctx = context(true);
        let mut conn = Connection::new(ScriptedStream::new());
        conn.stream_mut().push(b"/../etc/passwd\n");
        assert_eq!(conn.drive(&ctx), Step::Close);
        let out = conn.stream().output();
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(ctx.queue.is_empty());
    }

    #[test]
    fn overlong_target_gets_414_and_close() {
        let ctx = context(true);
        let mut conn = Connection::new(ScriptedStream::new());
        let long = vec![b'x'; crate::config::MAX_TARGET_LEN + 1];
        conn.stream_mut().push(&long);
        assert_eq!(conn.drive(&ctx), Step::Close);
        assert!(conn.stream().output().starts_with("HTTP/1.1 414 URI Too Long\r\n"));
    }
}
