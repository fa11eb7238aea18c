//! Tracing subscriber setup.
//!
//! The level comes from `RUST_LOG` when set (e.g. `RUST_LOG=ferrofile=debug`),
//! otherwise `default_level`. Log lines go to stderr so they never mix with
//! anything a caller pipes from stdout.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. Later calls are no-ops, which lets tests
/// and the binary share it.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
