//! Live-fiber accounting
//!
//! Kept in its own test binary with a single test so no concurrently
//! running test creates or drops fibers while counts are compared.

use cofiber_runtime::{Fiber, Thread};
use cofiber_core::FiberState;

#[test]
fn total_fibers_tracks_creation_and_destruction() {
    let base = Fiber::total_fibers();

    // First touch creates this thread's main fiber
    let main = Fiber::current();
    assert!(main.is_main());
    assert_eq!(Fiber::total_fibers(), base + 1);

    let a = Fiber::new(|| {}, 64 * 1024).unwrap();
    assert_eq!(Fiber::total_fibers(), base + 2);
    let b = Fiber::new(|| panic!("counted anyway"), 64 * 1024).unwrap();
    assert_eq!(Fiber::total_fibers(), base + 3);

    // A faulted fiber is still alive
    b.swap_in();
    assert_eq!(b.state(), FiberState::Except);
    assert_eq!(Fiber::total_fibers(), base + 3);

    // Finishing does not destroy; dropping the last handle does
    a.swap_in();
    assert_eq!(a.state(), FiberState::Term);
    assert_eq!(Fiber::total_fibers(), base + 3);
    drop(a);
    assert_eq!(Fiber::total_fibers(), base + 2);
    drop(b);
    assert_eq!(Fiber::total_fibers(), base + 1);

    // Handles held elsewhere keep a fiber alive
    let c = Fiber::new(|| {}, 64 * 1024).unwrap();
    let c2 = c.clone();
    drop(c);
    assert_eq!(Fiber::total_fibers(), base + 2);
    drop(c2);
    assert_eq!(Fiber::total_fibers(), base + 1);

    // A suspended fiber is owned by its handles alone
    let d = Fiber::new(Fiber::yield_to_hold, 64 * 1024).unwrap();
    d.swap_in();
    assert_eq!(d.state(), FiberState::Hold);
    assert_eq!(std::rc::Rc::strong_count(&d), 1);
    assert_eq!(Fiber::total_fibers(), base + 2);
    d.swap_in();
    drop(d);
    assert_eq!(Fiber::total_fibers(), base + 1);

    // Fibers on other threads, main fibers included, are counted and
    // released when those threads exit
    let mut threads: Vec<Thread> = (0..4)
        .map(|i| {
            Thread::new(
                || {
                    for _ in 0..50 {
                        let f = Fiber::new(Fiber::yield_to_ready, 64 * 1024).unwrap();
                        f.swap_in();
                        f.swap_in();
                        assert_eq!(f.state(), FiberState::Term);
                    }
                },
                &format!("count-{}", i),
            )
        })
        .collect();
    for t in &mut threads {
        t.join().unwrap();
    }
    assert_eq!(Fiber::total_fibers(), base + 1);

    drop(main);
    // Still retained by the thread-local slots
    assert_eq!(Fiber::total_fibers(), base + 1);
}
