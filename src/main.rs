use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ferrofile::config::{DEFAULT_CACHE_BYTES, DEFAULT_WORKERS, ServerConfig};
use ferrofile::server::Server;
use ferrofile::{logging, metrics};

#[derive(Parser)]
#[command(about = "Static file server: one epoll reactor, a disk worker pool, an LRU cache")]
struct Args {
    /// Address to listen on
    addr: IpAddr,

    /// Port to listen on
    port: u16,

    /// Directory to serve files from
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Number of disk worker threads
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Cache byte budget
    #[arg(long, default_value_t = DEFAULT_CACHE_BYTES)]
    cache_bytes: usize,

    /// Close each connection after its first response
    #[arg(long)]
    no_keep_alive: bool,

    /// Cork sockets while a response is written
    #[arg(long)]
    cork: bool,

    /// Leave Nagle's algorithm enabled on accepted sockets
    #[arg(long)]
    no_nodelay: bool,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            addr: self.addr,
            port: self.port,
            root: self.root,
            workers: self.workers,
            cache_bytes: self.cache_bytes,
            keep_alive: !self.no_keep_alive,
            tcp_nodelay: !self.no_nodelay,
            tcp_cork: self.cork,
        }
    }
}

fn main() -> ExitCode {
    logging::init("info");
    let config = Args::parse().into_config();

    let server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let handle = server.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("shutdown requested");
        handle.shutdown();
    }) {
        tracing::warn!("signal handler not installed: {}", e);
    }
    metrics::spawn_reporter();

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
