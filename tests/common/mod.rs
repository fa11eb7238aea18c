#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use tempfile::TempDir;

use ferrofile::config::ServerConfig;
use ferrofile::error::ServerResult;
use ferrofile::reactor::ShutdownHandle;
use ferrofile::server::Server;

/// Temporary serving root holding `files` (relative path, contents).
pub fn site(files: &[(&str, &[u8])]) -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(&path, contents).expect("write fixture");
    }
    dir
}

pub fn config(root: &Path) -> ServerConfig {
    ServerConfig {
        addr: "127.0.0.1".parse().unwrap(),
        port: 0,
        root: root.to_path_buf(),
        workers: 2,
        cache_bytes: 1 << 20,
        ..ServerConfig::default()
    }
}

/// A server running on its own thread, stopped on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<ServerResult<()>>>,
}

impl TestServer {
    pub fn start(config: ServerConfig) -> Self {
        ferrofile::logging::init("warn");
        let server = Server::bind(config).expect("bind");
        let addr = server.local_addr();
        let handle = server.shutdown_handle();
        let thread = std::thread::Builder::new()
            .name("test-reactor".into())
            .spawn(move || server.run())
            .expect("spawn reactor");
        Self {
            addr,
            handle,
            thread: Some(thread),
        }
    }

    pub fn connect(&self) -> Client {
        let stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        Client {
            writer: stream.try_clone().expect("clone"),
            reader: BufReader::new(stream),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            let result = thread.join().expect("reactor panicked");
            if !std::thread::panicking() {
                result.expect("server run");
            }
        }
    }
}

pub struct Response {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }
}

pub struct Client {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Client {
    pub fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).expect("write");
    }

    pub fn get(&mut self, target: &str) -> Response {
        self.send(format!("{}\n", target).as_bytes());
        self.read_response()
    }

    pub fn read_response(&mut self) -> Response {
        let mut head = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).expect("read header");
            assert!(n > 0, "connection closed mid-header: {:?}", head);
            head.push_str(&line);
            if line == "\r\n" {
                break;
            }
        }
        let status = head
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .expect("status line");
        let mut resp = Response {
            status,
            head,
            body: Vec::new(),
        };
        let len: usize = resp
            .header("Content-Length")
            .and_then(|v| v.parse().ok())
            .expect("Content-Length");
        resp.body = vec![0u8; len];
        self.reader.read_exact(&mut resp.body).expect("read body");
        resp
    }

    /// True once the server has closed its side.
    pub fn at_eof(&mut self) -> bool {
        let mut byte = [0u8; 1];
        matches!(self.reader.read(&mut byte), Ok(0))
    }
}
