//! Thread and lock example
//!
//! Spawns named threads, hammers a shared counter under a Mutex, and
//! shows readers and a writer sharing an RwMutex.
//!
//! # Environment Variables
//!
//! - `COFIBER_LOG_LEVEL=debug` - Set log level (off, fatal, error, warn, info, debug, trace)
//! - `THREAD_DEMO_INCREMENTS=<n>` - Increments per counter thread (default 100000)

use cofiber::{env_get, kinfo, Mutex, RwMutex, Semaphore, Thread};
use std::sync::Arc;
use std::time::Instant;

const THREADS: usize = 5;
const INCREMENTS: u64 = 100_000;

fn main() {
    println!("=== cofiber Thread Example ===\n");

    cofiber::init();

    // Identity is final as soon as new() returns
    let mut t = Thread::new(
        || kinfo!("hello from {}", Thread::current_name()),
        "worker-1",
    );
    println!("spawned '{}' with tid {}", t.name(), t.id());
    t.join().expect("join");

    // Lost-update check
    let increments: u64 = env_get("THREAD_DEMO_INCREMENTS", INCREMENTS);
    let counter = Arc::new(Mutex::new(0u64));
    let start = Instant::now();
    let mut threads: Vec<Thread> = (0..THREADS)
        .map(|i| {
            let counter = Arc::clone(&counter);
            Thread::new(
                move || {
                    for _ in 0..increments {
                        *counter.lock() += 1;
                    }
                },
                &format!("counter-{}", i),
            )
        })
        .collect();
    for t in &mut threads {
        t.join().expect("join");
    }
    let total = *counter.lock();
    println!(
        "counter = {} (expected {}) in {:?}",
        total,
        THREADS as u64 * increments,
        start.elapsed()
    );

    // Readers wait on a semaphore until the writer has published
    let table = Arc::new(RwMutex::new(Vec::<String>::new()));
    let published = Arc::new(Semaphore::new(0));
    let mut readers: Vec<Thread> = (0..3)
        .map(|i| {
            let table = Arc::clone(&table);
            let published = Arc::clone(&published);
            Thread::new(
                move || {
                    published.wait();
                    let rows = table.read();
                    kinfo!("reader {} sees {} rows", i, rows.len());
                },
                &format!("reader-{}", i),
            )
        })
        .collect();

    {
        let mut rows = table.write();
        rows.extend(["alpha", "beta"].iter().map(|s| s.to_string()));
    }
    for _ in 0..readers.len() {
        published.notify();
    }
    for t in &mut readers {
        t.join().expect("join");
    }

    println!("\n=== Example Complete ===");
}
