//! Benchmark: content cache hit path and eviction churn, single-threaded and
//! with contending threads.

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ferrofile::cache::ContentCache;
use ferrofile::content::Content;

const TARGET_DURATION: Duration = Duration::from_secs(2);
const KEYS: usize = 1024;
const ENTRY_SIZE: usize = 4096;

fn keys() -> Vec<String> {
    (0..KEYS).map(|i| format!("/srv/www/file-{:04}.html", i)).collect()
}

fn entry() -> Arc<Content> {
    Arc::new(Content::from(vec![b'x'; ENTRY_SIZE]))
}

fn report(name: &str, ops: u64, elapsed: Duration) {
    eprintln!(
        "{}: {} ops in {:?} = {:.0} ops/s ({:.1} ns/op)",
        name,
        ops,
        elapsed,
        ops as f64 / elapsed.as_secs_f64(),
        elapsed.as_nanos() as f64 / ops as f64
    );
}

fn bench_hits() {
    let cache = ContentCache::new(KEYS * ENTRY_SIZE);
    let keys = keys();
    let value = entry();
    for k in &keys {
        cache.put(k.as_str(), Arc::clone(&value));
    }

    let start = Instant::now();
    let mut ops: u64 = 0;
    while start.elapsed() < TARGET_DURATION {
        for k in &keys {
            black_box(cache.get(k));
        }
        ops += KEYS as u64;
    }
    report("get (all hits)", ops, start.elapsed());
}

fn bench_churn() {
    // half the working set fits, so every other put evicts
    let cache = ContentCache::new(KEYS / 2 * ENTRY_SIZE);
    let keys = keys();
    let value = entry();

    let start = Instant::now();
    let mut ops: u64 = 0;
    while start.elapsed() < TARGET_DURATION {
        for k in &keys {
            if cache.get(k).is_none() {
                cache.put(k.as_str(), Arc::clone(&value));
            }
        }
        ops += KEYS as u64;
    }
    report("get+put (evicting)", ops, start.elapsed());
}

fn bench_contended(threads: usize) {
    let cache = Arc::new(ContentCache::new(KEYS * ENTRY_SIZE));
    let keys = Arc::new(keys());
    let value = entry();
    for k in keys.iter() {
        cache.put(k.as_str(), Arc::clone(&value));
    }

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let cache = Arc::clone(&cache);
            let keys = Arc::clone(&keys);
            std::thread::spawn(move || {
                let mut ops: u64 = 0;
                let mut i = t * 97;
                while start.elapsed() < TARGET_DURATION {
                    for _ in 0..256 {
                        black_box(cache.get(&keys[i % KEYS]));
                        i += 1;
                    }
                    ops += 256;
                }
                ops
            })
        })
        .collect();
    let ops: u64 = handles
        .into_iter()
        .map(|h| h.join().expect("bench thread panicked"))
        .sum();
    report(&format!("get ({} threads)", threads), ops, start.elapsed());
}

fn main() {
    bench_hits();
    bench_churn();
    bench_contended(4);
}
