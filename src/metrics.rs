#[cfg(feature = "metrics")]
mod imp {
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    // Connections (cumulative)
    static CONNS_ACCEPTED: AtomicU64 = AtomicU64::new(0);
    static CONNS_CLOSED: AtomicU64 = AtomicU64::new(0);
    // Requests and bytes (cumulative)
    static REQUESTS_SERVED: AtomicU64 = AtomicU64::new(0);
    static BYTES_SENT: AtomicU64 = AtomicU64::new(0);
    // Cache lookups on the reactor thread
    static CACHE_HITS: AtomicU64 = AtomicU64::new(0);
    static CACHE_MISSES: AtomicU64 = AtomicU64::new(0);
    // Disk workers
    static DISK_LOADS: AtomicU64 = AtomicU64::new(0);
    static DISK_FAILURES: AtomicU64 = AtomicU64::new(0);
    // Gauges
    static WAITING: AtomicUsize = AtomicUsize::new(0);
    static WAITING_MAX: AtomicUsize = AtomicUsize::new(0);

    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub conns_accepted: u64,
        pub conns_closed: u64,
        pub requests_served: u64,
        pub bytes_sent: u64,
        pub cache_hits: u64,
        pub cache_misses: u64,
        pub disk_loads: u64,
        pub disk_failures: u64,
        pub waiting: usize,
        pub waiting_max: usize,
    }

    pub fn inc_conns_accepted() {
        CONNS_ACCEPTED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_conns_closed() {
        CONNS_CLOSED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_served() {
        REQUESTS_SERVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_sent(n: usize) {
        BYTES_SENT.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn inc_cache_hits() {
        CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses() {
        CACHE_MISSES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disk_loads() {
        DISK_LOADS.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_disk_failures() {
        DISK_FAILURES.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_waiting(value: usize) {
        WAITING.store(value, Ordering::Relaxed);
        let mut prev = WAITING_MAX.load(Ordering::Relaxed);
        while value > prev {
            match WAITING_MAX.compare_exchange_weak(prev, value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(next) => prev = next,
            }
        }
    }

    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            conns_accepted: CONNS_ACCEPTED.load(Ordering::Relaxed),
            conns_closed: CONNS_CLOSED.load(Ordering::Relaxed),
            requests_served: REQUESTS_SERVED.load(Ordering::Relaxed),
            bytes_sent: BYTES_SENT.load(Ordering::Relaxed),
            cache_hits: CACHE_HITS.load(Ordering::Relaxed),
            cache_misses: CACHE_MISSES.load(Ordering::Relaxed),
            disk_loads: DISK_LOADS.load(Ordering::Relaxed),
            disk_failures: DISK_FAILURES.load(Ordering::Relaxed),
            waiting: WAITING.load(Ordering::Relaxed),
            waiting_max: WAITING_MAX.load(Ordering::Relaxed),
        }
    }

    pub fn spawn_reporter() {
        const INTERVAL_SECS: u64 = 10;
        let spawned = std::thread::Builder::new()
            .name("metrics".into())
            .spawn(|| {
                let mut last = snapshot();
                loop {
                    std::thread::sleep(Duration::from_secs(INTERVAL_SECS));
                    let snap = snapshot();
                    let lookups = (snap.cache_hits - last.cache_hits)
                        + (snap.cache_misses - last.cache_misses);
                    let hit_pct = if lookups > 0 {
                        100.0 * ((snap.cache_hits - last.cache_hits) as f64 / lookups as f64)
                    } else {
                        0.0
                    };
                    tracing::info!(
                        "metrics delta {}s: accepted={} closed={} served={} bytes={} | cache: hits={} misses={} hit_pct={:.1}% | disk: loads={} failures={} | gauges: waiting={} waiting_max={}",
                        INTERVAL_SECS,
                        snap.conns_accepted - last.conns_accepted,
                        snap.conns_closed - last.conns_closed,
                        snap.requests_served - last.requests_served,
                        snap.bytes_sent - last.bytes_sent,
                        snap.cache_hits - last.cache_hits,
                        snap.cache_misses - last.cache_misses,
                        hit_pct,
                        snap.disk_loads - last.disk_loads,
                        snap.disk_failures - last.disk_failures,
                        snap.waiting,
                        snap.waiting_max,
                    );
                    last = snap;
                }
            });
        if let Err(e) = spawned {
            tracing::warn!("metrics reporter not started: {}", e);
        }
    }
}

#[cfg(not(feature = "metrics"))]
#[allow(dead_code)]
mod imp {
    #[derive(Clone, Copy)]
    pub struct MetricsSnapshot {
        pub conns_accepted: u64,
        pub conns_closed: u64,
        pub requests_served: u64,
        pub bytes_sent: u64,
        pub cache_hits: u64,
        pub cache_misses: u64,
        pub disk_loads: u64,
        pub disk_failures: u64,
        pub waiting: usize,
        pub waiting_max: usize,
    }

    pub fn inc_conns_accepted() {}
    pub fn inc_conns_closed() {}
    pub fn inc_requests_served() {}
    pub fn add_bytes_sent(_: usize) {}
    pub fn inc_cache_hits() {}
    pub fn inc_cache_misses() {}
    pub fn inc_disk_loads() {}
    pub fn inc_disk_failures() {}
    pub fn set_waiting(_: usize) {}
    pub fn snapshot() -> MetricsSnapshot {
        MetricsSnapshot {
            conns_accepted: 0,
            conns_closed: 0,
            requests_served: 0,
            bytes_sent: 0,
            cache_hits: 0,
            cache_misses: 0,
            disk_loads: 0,
            disk_failures: 0,
            waiting: 0,
            waiting_max: 0,
        }
    }
    pub fn spawn_reporter() {}
}

pub use imp::*;
