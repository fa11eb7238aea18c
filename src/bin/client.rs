use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Instant;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Test client for the ferrofile server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1")]
    addr: String,

    /// Server port
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Target to request
    #[arg(short, long, default_value = "/index.html")]
    target: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Request the target once and print the response head (default)
    Smoke,
    /// Request the target repeatedly over one kept-alive connection
    Keepalive {
        #[arg(short, long, default_value_t = 100)]
        requests: usize,
    },
    /// Throughput with concurrent pipelined connections
    Bench {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// Requests per connection
        #[arg(short, long, default_value_t = 10_000)]
        requests: usize,
        /// Requests in flight per connection
        #[arg(short, long, default_value_t = 32)]
        window: usize,
    },
}

struct Response {
    status: u16,
    head: String,
    body: Vec<u8>,
    keep_alive: bool,
}

/// Read one response: header lines up to the blank line, then exactly
/// Content-Length body bytes.
fn read_response<R: BufRead>(reader: &mut R) -> Response {
    let mut head = String::new();
    let mut content_length = 0usize;
    let mut keep_alive = false;
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("failed to read header");
        assert!(n > 0, "connection closed mid-header");
        head.push_str(&line);
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().expect("bad Content-Length");
            } else if name.eq_ignore_ascii_case("connection") {
                keep_alive = value.eq_ignore_ascii_case("keep-alive");
            }
        }
    }
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("bad status line");

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("failed to read body");
    Response {
        status,
        head,
        body,
        keep_alive,
    }
}

fn request_line(target: &str) -> Vec<u8> {
    format!("{}\n", target).into_bytes()
}

fn main() {
    let args = Args::parse();
    let addr = format!("{}:{}", args.addr, args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr, &args.target),
        Command::Keepalive { requests } => keepalive_test(&addr, &args.target, requests),
        Command::Bench {
            connections,
            requests,
            window,
        } => bench_test(&addr, &args.target, connections, requests, window),
    }
}

fn smoke_test(addr: &str, target: &str) {
    eprintln!("smoke test: {} from {}", target, addr);
    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.write_all(&request_line(target)).expect("failed to write");
    let mut reader = BufReader::new(stream);
    let resp = read_response(&mut reader);
    eprint!("{}", resp.head);
    eprintln!("  body: {} bytes", resp.body.len());
    if resp.status == 200 {
        eprintln!("smoke test: PASSED");
    } else {
        eprintln!("smoke test: got status {}", resp.status);
        std::process::exit(1);
    }
}

fn keepalive_test(addr: &str, target: &str, requests: usize) {
    eprintln!(
        "keep-alive test: {} sequential requests for {} on one connection",
        requests, target
    );
    let stream = TcpStream::connect(addr).expect("failed to connect");
    let mut writer = stream.try_clone().expect("clone failed");
    let mut reader = BufReader::new(stream);
    let req = request_line(target);

    let mut first_len = None;
    for i in 0..requests {
        writer.write_all(&req).expect("failed to write");
        let resp = read_response(&mut reader);
        let expected = *first_len.get_or_insert(resp.body.len());
        assert_eq!(resp.body.len(), expected, "request {}: body length changed", i);
        if !resp.keep_alive {
            eprintln!("server does not keep connections alive; stopped after {}", i + 1);
            return;
        }
    }
    eprintln!("keep-alive test: PASSED ({} requests)", requests);
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    let i = ((p / 100.0) * sorted.len() as f64) as usize;
    sorted[i.min(sorted.len() - 1)] as f64 / 1_000.0
}

fn bench_test(addr: &str, target: &str, connections: usize, requests: usize, window: usize) {
    eprintln!(
        "bench: {} connections x {} requests (window {}) for {} at {}",
        connections, requests, window, target, addr
    );
    let req = request_line(target);
    let start = Instant::now();

    let handles: Vec<_> = (0..connections)
        .map(|_| {
            let addr = addr.to_string();
            let req = req.clone();
            std::thread::spawn(move || {
                let stream = TcpStream::connect(&addr).expect("failed to connect");
                stream.set_nodelay(true).unwrap();
                let mut writer = stream.try_clone().expect("clone failed");
                let mut reader = BufReader::new(stream);

                let mut latencies = Vec::with_capacity(requests);
                let mut sent_at = std::collections::VecDeque::with_capacity(window);
                let mut sent = 0;
                while latencies.len() < requests {
                    while sent < requests && sent_at.len() < window.max(1) {
                        writer.write_all(&req).expect("write failed");
                        sent_at.push_back(Instant::now());
                        sent += 1;
                    }
                    let resp = read_response(&mut reader);
                    assert!(resp.keep_alive, "server closed the connection mid-bench");
                    let t0 = sent_at.pop_front().expect("response without request");
                    latencies.push(t0.elapsed().as_nanos() as u64);
                }
                latencies
            })
        })
        .collect();

    let mut all: Vec<u64> = Vec::with_capacity(connections * requests);
    for h in handles {
        all.extend(h.join().expect("connection thread panicked"));
    }
    let elapsed = start.elapsed();
    if all.is_empty() {
        eprintln!("no samples collected");
        return;
    }
    all.sort_unstable();
    eprintln!(
        "bench: {} requests in {:.2}s = {:.0} req/s",
        all.len(),
        elapsed.as_secs_f64(),
        all.len() as f64 / elapsed.as_secs_f64()
    );
    eprintln!("  p50     {:.1}µs", percentile(&all, 50.0));
    eprintln!("  p99     {:.1}µs", percentile(&all, 99.0));
    eprintln!("  max     {:.1}µs", all[all.len() - 1] as f64 / 1_000.0);
}
