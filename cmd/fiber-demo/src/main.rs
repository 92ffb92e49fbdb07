//! Fiber example
//!
//! Runs the hold/resume scenario, a fiber that panics, and a small
//! round-robin loop over READY fibers on two worker threads.
//!
//! # Environment Variables
//!
//! - `COFIBER_FLUSH_EPRINT=1` - Flush log output immediately (useful for crash debugging)
//! - `COFIBER_LOG_LEVEL=debug` - Set log level (off, fatal, error, warn, info, debug, trace)
//! - `COFIBER_FIBER_STACK_SIZE=262144` - Default fiber stack size

use cofiber::{Fiber, FiberState, Thread};
use cofiber::{kinfo, kdebug, kwarn};
use std::collections::VecDeque;
use std::rc::Rc;
// COFIBER_LOG_LEVEL=debug COFIBER_FLUSH_EPRINT=1 cargo run -p cofiber-fiber-demo
fn main() {
    println!("=== cofiber Fiber Example ===\n");

    cofiber::init();

    hold_and_resume();
    contained_panic();

    // Round-robin on two threads, each with its own main fiber
    let mut workers: Vec<Thread> = (1..=2)
        .map(|w| {
            Thread::new(move || round_robin(w, 3), &format!("worker-{}", w))
        })
        .collect();
    for t in &mut workers {
        println!("Started {} (tid {})", t.name(), t.id());
    }
    for t in &mut workers {
        t.join().expect("join worker");
    }

    println!("\nLive fibers at exit: {}", Fiber::total_fibers());
    println!("\n=== Example Complete ===");
}

fn hold_and_resume() {
    let fiber = Fiber::new(
        || {
            kinfo!("start");
            Fiber::yield_to_hold();
            kinfo!("end");
        },
        0,
    )
    .expect("create fiber");

    fiber.swap_in();
    println!("after first swap_in:  fiber {} is {}", fiber.id(), fiber.state());
    fiber.swap_in();
    println!("after second swap_in: fiber {} is {}", fiber.id(), fiber.state());

    // Same stack, new job
    let base = fiber.stack_base();
    fiber.reset(|| kinfo!("reused stack"));
    fiber.swap_in();
    println!(
        "after reset+swap_in:  fiber {} is {} (stack reused: {})\n",
        fiber.id(),
        fiber.state(),
        fiber.stack_base() == base
    );
}

fn contained_panic() {
    let fiber = Fiber::new(|| panic!("demo fault"), 0).expect("create fiber");
    fiber.swap_in();
    kwarn!(
        "fiber {} ended {} with fault {:?}",
        fiber.id(),
        fiber.state(),
        fiber.fault()
    );
    println!("main fiber still running: {}\n", Fiber::current().state());
}

fn round_robin(worker: usize, jobs: usize) {
    let mut ready: VecDeque<Rc<Fiber>> = (0..jobs)
        .map(|j| {
            Fiber::new(
                move || {
                    for step in 0..3 {
                        kdebug!("job {} step {}", j, step);
                        Fiber::yield_to_ready();
                    }
                },
                64 * 1024,
            )
            .expect("create fiber")
        })
        .collect();

    let mut switches = 0;
    while let Some(fiber) = ready.pop_front() {
        fiber.swap_in();
        switches += 1;
        if fiber.state() == FiberState::Ready {
            ready.push_back(fiber);
        }
    }
    kinfo!("worker {} done: {} jobs, {} switches", worker, jobs, switches);
}
