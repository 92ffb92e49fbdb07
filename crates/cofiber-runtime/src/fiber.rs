//! Stackful cooperative fibers
//!
//! Every OS thread that touches the fiber API gets a *main fiber*: a
//! stackless anchor representing the thread's own control flow. Sub-fibers
//! own a stack and a callback, and are switched in from the main fiber and
//! back out to it:
//!
//! ```text
//!   main ──swap_in(f)──► f runs ──yield_to_hold()──► main
//!   main ──swap_in(f)──► f resumes ──callback returns──► main (f is TERM)
//! ```
//!
//! Switching is two-level only: `swap_in` must be called from the main
//! fiber and `swap_out` always returns to it. A scheduler sits on top of
//! this by deciding which sub-fiber the main fiber swaps in next.
//!
//! Fibers are `!Send`: a fiber created on a thread is only ever switched on
//! that thread.

use crate::arch::{init_context, switch_context, Context};
use crate::config;
use crate::stack::{default_allocator, Stack, StackAllocator};
use crate::thread::current_thread_id;
use crate::tls;
use cofiber_core::constants::MIN_STACK_SIZE;
use cofiber_core::error::{FiberResult, MemoryError};
use cofiber_core::id::FiberId;
use cofiber_core::kprint::SYSTEM_LOGGER;
use cofiber_core::state::FiberState;
use cofiber_core::{fatal, fiber_assert, kdebug, kerror, kprint};
use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Live fibers across all threads, main fibers included
static TOTAL_FIBERS: AtomicU64 = AtomicU64::new(0);

type Callback = Box<dyn FnOnce() + 'static>;

/// A cooperative coroutine
pub struct Fiber {
    id: FiberId,
    state: Cell<FiberState>,
    ctx: UnsafeCell<Context>,
    /// `None` for a main fiber
    stack: Option<Stack>,
    cb: RefCell<Option<Callback>>,
    /// Panic message of the last run, if it panicked
    fault: RefCell<Option<String>>,
}

impl Fiber {
    /// Create a sub-fiber running `cb` on a fresh stack
    ///
    /// A `stack_size` of 0 takes the size from the `fiber.stack_size`
    /// configuration variable; any other size is used exactly. Sizes below
    /// `MIN_STACK_SIZE` (16 KiB) fail with `MemoryError::InvalidSize`: the
    /// trampoline's fault path (panic machinery, backtrace capture, logging)
    /// needs that much even when the callback itself uses almost none.
    pub fn new<F>(cb: F, stack_size: usize) -> FiberResult<Rc<Fiber>>
    where
        F: FnOnce() + 'static,
    {
        Self::with_allocator(cb, stack_size, default_allocator())
    }

    /// Like `new`, with the stack taken from `allocator`
    pub fn with_allocator<F>(
        cb: F,
        stack_size: usize,
        allocator: Arc<dyn StackAllocator>,
    ) -> FiberResult<Rc<Fiber>>
    where
        F: FnOnce() + 'static,
    {
        let size = if stack_size == 0 {
            config::default_stack_size()
        } else {
            stack_size
        };
        if size < MIN_STACK_SIZE {
            return Err(MemoryError::InvalidSize(size).into());
        }

        let stack = Stack::new(size, allocator)?;
        let fiber = Rc::new(Fiber {
            id: FiberId::next(),
            state: Cell::new(FiberState::Init),
            ctx: UnsafeCell::new(Context::default()),
            stack: Some(stack),
            cb: RefCell::new(Some(Box::new(cb))),
            fault: RefCell::new(None),
        });
        fiber.init_context();
        TOTAL_FIBERS.fetch_add(1, Ordering::Relaxed);

        kdebug!(
            target: SYSTEM_LOGGER,
            "fiber {} created, stack {} bytes",
            fiber.id,
            size
        );
        Ok(fiber)
    }

    /// Bootstrap the calling thread's main fiber
    fn new_main() -> Rc<Fiber> {
        kprint::set_tid_provider(current_thread_id);
        let fiber = Rc::new(Fiber {
            id: FiberId::MAIN,
            state: Cell::new(FiberState::Exec),
            ctx: UnsafeCell::new(Context::default()),
            stack: None,
            cb: RefCell::new(None),
            fault: RefCell::new(None),
        });
        TOTAL_FIBERS.fetch_add(1, Ordering::Relaxed);
        fiber
    }

    /// Point the saved context at the entry trampoline on our own stack
    fn init_context(&self) {
        let Some(stack) = self.stack.as_ref() else {
            return;
        };
        // Safety: the stack is live and owned by this fiber, and the fiber
        // is not running, so nothing else reads the context
        unsafe {
            init_context(
                self.ctx.get(),
                stack.top(),
                fiber_main,
                self as *const Fiber as usize,
            );
        }
        let sp = unsafe { (*self.ctx.get()).stack_pointer() };
        fiber_assert!(
            stack.contains(sp),
            "fiber {} context sp {:#x} outside its stack",
            self.id,
            sp
        );
    }

    /// The fiber executing on the calling thread
    ///
    /// Creates the thread's main fiber on first use.
    pub fn current() -> Rc<Fiber> {
        if let Some(cur) = tls::current() {
            return cur;
        }
        let main = Self::new_main();
        tls::set_main_fiber(main.clone());
        tls::set_current(Some(main.clone()));
        kprint::set_fiber_id(main.id.as_u64());
        main
    }

    /// Id of the executing fiber, `None` if the thread has none yet
    pub fn current_id() -> Option<FiberId> {
        tls::current().map(|f| f.id)
    }

    /// Live fibers in the process
    pub fn total_fibers() -> u64 {
        TOTAL_FIBERS.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.state.get()
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.stack.is_none()
    }

    /// Usable stack bytes (0 for a main fiber)
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    /// Lowest stack address (null for a main fiber)
    pub fn stack_base(&self) -> *const u8 {
        self.stack
            .as_ref()
            .map_or(std::ptr::null(), |s| s.base() as *const u8)
    }

    /// Panic message of the last run, if the callback panicked
    pub fn fault(&self) -> Option<String> {
        self.fault.borrow().clone()
    }

    /// Switch from the main fiber into this fiber
    ///
    /// Returns when the fiber yields, finishes or panics.
    pub fn swap_in(self: &Rc<Self>) {
        let main = Self::current();
        fiber_assert!(main.is_main(), "swap_in called from sub-fiber {}", main.id);
        fiber_assert!(!self.is_main(), "cannot swap into a main fiber");
        fiber_assert!(
            self.state().is_resumable(),
            "fiber {} cannot be swapped in from state {}",
            self.id,
            self.state()
        );

        // The main fiber's reference stays in MAIN_FIBER
        drop(tls::set_current(Some(self.clone())));
        main.state.set(FiberState::Hold);
        self.state.set(FiberState::Exec);
        kprint::set_fiber_id(self.id.as_u64());
        #[cfg(feature = "debug-logging")]
        kdebug!(target: SYSTEM_LOGGER, "swap_in fiber {}", self.id);

        // Safety: both contexts stay alive across the switch; `main` is held
        // here and in MAIN_FIBER, `self` by the caller's borrow
        unsafe { switch_context(main.ctx.get(), self.ctx.get()) };

        #[cfg(feature = "debug-logging")]
        kdebug!(
            target: SYSTEM_LOGGER,
            "back on main fiber, fiber {} is {}",
            self.id,
            self.state()
        );
    }

    /// Switch from this fiber back to the thread's main fiber
    ///
    /// Must be called by the fiber itself. A fiber still marked EXEC is
    /// parked as HOLD.
    pub fn swap_out(&self) {
        fiber_assert!(!self.is_main(), "swap_out called on a main fiber");
        let Some(main) = tls::main_fiber() else {
            fatal!("fiber {} has no main fiber to return to", self.id);
        };
        fiber_assert!(
            tls::current().is_some_and(|cur| std::ptr::eq(Rc::as_ptr(&cur), self)),
            "swap_out called on fiber {} which is not running",
            self.id
        );

        if self.state() == FiberState::Exec {
            self.state.set(FiberState::Hold);
        }
        // Drop our own strong ref: swap_in's caller still holds one
        drop(tls::set_current(Some(main.clone())));
        main.state.set(FiberState::Exec);
        kprint::set_fiber_id(main.id.as_u64());

        let main_ctx = main.ctx.get();
        drop(main);
        // Safety: the main fiber lives in MAIN_FIBER for the thread's
        // lifetime; our context outlives the switch
        unsafe { switch_context(self.ctx.get(), main_ctx) };
    }

    /// Mark the running sub-fiber READY and return to the main fiber
    pub fn yield_to_ready() {
        Self::yield_with(FiberState::Ready);
    }

    /// Mark the running sub-fiber HOLD and return to the main fiber
    pub fn yield_to_hold() {
        Self::yield_with(FiberState::Hold);
    }

    fn yield_with(state: FiberState) {
        let cur = Self::current();
        fiber_assert!(!cur.is_main(), "cannot yield from the main fiber");
        fiber_assert!(cur.state() == FiberState::Exec);
        cur.state.set(state);

        // Don't hold a reference while suspended; swap_in's caller owns us
        let raw = Rc::as_ptr(&cur);
        drop(cur);
        unsafe { (*raw).swap_out() };
    }

    /// Reuse this fiber's stack for a new callback
    ///
    /// Allowed only on a sub-fiber that is INIT, TERM or EXCEPT. The saved
    /// context is rebuilt from the owned stack and re-checked against its
    /// bounds; the stack itself is not reallocated.
    pub fn reset<F>(&self, cb: F)
    where
        F: FnOnce() + 'static,
    {
        fiber_assert!(self.stack.is_some(), "reset on a main fiber");
        fiber_assert!(
            self.state().is_reusable(),
            "reset of fiber {} in state {}",
            self.id,
            self.state()
        );

        *self.cb.borrow_mut() = Some(Box::new(cb));
        *self.fault.borrow_mut() = None;
        self.init_context();
        self.state.set(FiberState::Init);
    }
}

/// Run the current fiber's callback; returns the fiber to switch out of
///
/// No strong reference to the fiber is held here. While the callback runs
/// it is kept alive by CURRENT and by `swap_in`'s caller; while it is
/// suspended only by its owners, so dropping a suspended fiber reaches
/// `Drop`.
fn run_current(arg: usize) -> *const Fiber {
    let raw = Rc::as_ptr(&Fiber::current());
    fiber_assert!(raw as usize == arg, "trampoline entered for the wrong fiber");
    // Safety: see above; every use below happens while the fiber is running
    let fiber = unsafe { &*raw };

    let cb = fiber.cb.borrow_mut().take();
    if let Some(cb) = cb {
        match panic::catch_unwind(AssertUnwindSafe(cb)) {
            Ok(()) => fiber.state.set(FiberState::Term),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                kerror!(
                    target: SYSTEM_LOGGER,
                    "fiber {} panicked: {}\nbacktrace:\n{}",
                    fiber.id,
                    msg,
                    std::backtrace::Backtrace::force_capture()
                );
                *fiber.fault.borrow_mut() = Some(msg);
                fiber.state.set(FiberState::Except);
            }
        }
    } else {
        fiber.state.set(FiberState::Term);
    }

    raw
}

/// Entry point of every sub-fiber stack
extern "C" fn fiber_main(arg: usize) -> ! {
    let fiber = run_current(arg);
    // Safety: swap_in's caller holds a reference until we switch away
    unsafe { (*fiber).swap_out() };

    // swap_in refuses TERM/EXCEPT fibers and reset rebuilds the context, so
    // this frame is never resumed
    fatal!("terminated fiber resumed")
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        TOTAL_FIBERS.fetch_sub(1, Ordering::Relaxed);

        let state = self.state.get();
        if self.stack.is_some() {
            if std::thread::panicking() && !state.is_reusable() {
                // Asserting would abort; the stack is released regardless
                kerror!(
                    target: SYSTEM_LOGGER,
                    "fiber {} dropped in state {} during a panic",
                    self.id,
                    state
                );
                return;
            }
            fiber_assert!(
                state.is_reusable(),
                "fiber {} dropped in state {}",
                self.id,
                state
            );
        } else {
            fiber_assert!(self.cb.get_mut().is_none(), "main fiber has a callback");
            fiber_assert!(
                state == FiberState::Exec,
                "main fiber dropped in state {}",
                state
            );
            // CURRENT held a strong reference, so it no longer points here
            kprint::clear_fiber_id();
        }
        kdebug!(target: SYSTEM_LOGGER, "fiber {} destroyed", self.id);
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::expect_abort;
    use std::cell::RefCell;
    use std::thread;

    const STACK: usize = 128 * 1024;

    /// Fiber tests run on their own OS thread so each gets a clean main fiber
    fn on_fresh_thread<F: FnOnce() + Send + 'static>(f: F) {
        thread::spawn(f).join().unwrap();
    }

    #[test]
    fn test_current_creates_main() {
        on_fresh_thread(|| {
            assert_eq!(Fiber::current_id(), None);
            let main = Fiber::current();
            assert!(main.is_main());
            assert_eq!(main.id(), FiberId::MAIN);
            assert_eq!(main.state(), FiberState::Exec);
            assert_eq!(Fiber::current_id(), Some(FiberId::MAIN));
            assert!(Rc::ptr_eq(&main, &Fiber::current()));
            assert!(main.stack_base().is_null());
        });
    }

    #[test]
    fn test_hold_then_finish() {
        on_fresh_thread(|| {
            let log = Rc::new(RefCell::new(Vec::new()));
            let main = Fiber::current();

            let l = log.clone();
            let fiber = Fiber::new(
                move || {
                    l.borrow_mut().push("start");
                    Fiber::yield_to_hold();
                    l.borrow_mut().push("end");
                },
                STACK,
            )
            .unwrap();
            assert_eq!(fiber.state(), FiberState::Init);

            fiber.swap_in();
            assert_eq!(*log.borrow(), vec!["start"]);
            assert_eq!(fiber.state(), FiberState::Hold);
            assert_eq!(main.state(), FiberState::Exec);
            assert!(Rc::ptr_eq(&Fiber::current(), &main));

            fiber.swap_in();
            assert_eq!(*log.borrow(), vec!["start", "end"]);
            assert_eq!(fiber.state(), FiberState::Term);
            assert!(Rc::ptr_eq(&Fiber::current(), &main));
        });
    }

    #[test]
    fn test_exactly_one_exec() {
        on_fresh_thread(|| {
            let main = Fiber::current();
            let seen = Rc::new(Cell::new(false));
            let main_in = main.clone();
            let seen_in = seen.clone();

            let fiber = Fiber::new(
                move || {
                    let me = Fiber::current();
                    assert!(!me.is_main());
                    assert_eq!(me.state(), FiberState::Exec);
                    assert_eq!(main_in.state(), FiberState::Hold);
                    seen_in.set(true);
                    drop(me);
                    Fiber::yield_to_ready();
                    assert_eq!(main_in.state(), FiberState::Hold);
                },
                STACK,
            )
            .unwrap();

            fiber.swap_in();
            assert!(seen.get());
            assert_eq!(fiber.state(), FiberState::Ready);
            assert_eq!(main.state(), FiberState::Exec);

            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Term);
            assert_eq!(main.state(), FiberState::Exec);
        });
    }

    #[test]
    fn test_stack_size_selection() {
        on_fresh_thread(|| {
            let explicit = Fiber::new(|| {}, 200 * 1024).unwrap();
            assert_eq!(explicit.stack_size(), 200 * 1024);

            let defaulted = Fiber::new(|| {}, 0).unwrap();
            assert_eq!(defaulted.stack_size(), config::default_stack_size());

            let err = Fiber::new(|| {}, 1024).unwrap_err();
            assert_eq!(err, MemoryError::InvalidSize(1024).into());
        });
    }

    #[test]
    fn test_reset_reuses_stack() {
        on_fresh_thread(|| {
            let hits = Rc::new(Cell::new(0));
            let h = hits.clone();
            let fiber = Fiber::new(move || h.set(h.get() + 1), STACK).unwrap();
            let base = fiber.stack_base();

            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Term);

            for _ in 0..3 {
                let h = hits.clone();
                fiber.reset(move || h.set(h.get() + 10));
                assert_eq!(fiber.state(), FiberState::Init);
                assert_eq!(fiber.stack_base(), base);
                fiber.swap_in();
                assert_eq!(fiber.state(), FiberState::Term);
            }
            assert_eq!(hits.get(), 31);
        });
    }

    #[test]
    fn test_reset_while_executing_aborts() {
        expect_abort(
            "fiber::tests::test_reset_while_executing_aborts",
            "in state EXEC",
            || {
                on_fresh_thread(|| {
                    let fiber = Fiber::new(|| Fiber::current().reset(|| {}), STACK).unwrap();
                    fiber.swap_in();
                });
            },
        );
    }

    #[test]
    fn test_suspended_fiber_is_owned_by_caller_only() {
        on_fresh_thread(|| {
            let fiber = Fiber::new(Fiber::yield_to_hold, STACK).unwrap();
            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Hold);
            assert_eq!(Rc::strong_count(&fiber), 1);

            // Running: the caller plus the CURRENT slot
            let seen = Rc::new(Cell::new(0));
            let s = seen.clone();
            let running =
                Fiber::new(move || s.set(Rc::strong_count(&Fiber::current())), STACK).unwrap();
            running.swap_in();
            // plus the clone `Fiber::current()` handed to the callback
            assert_eq!(seen.get(), 3);
            assert_eq!(Rc::strong_count(&running), 1);

            let weak = Rc::downgrade(&fiber);
            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Term);
            drop(fiber);
            assert!(weak.upgrade().is_none());
        });
    }

    #[test]
    fn test_drop_suspended_fiber_aborts() {
        expect_abort(
            "fiber::tests::test_drop_suspended_fiber_aborts",
            "dropped in state HOLD",
            || {
                on_fresh_thread(|| {
                    let fiber = Fiber::new(Fiber::yield_to_hold, STACK).unwrap();
                    fiber.swap_in();
                    drop(fiber);
                });
            },
        );
    }

    #[test]
    fn test_panic_is_contained() {
        on_fresh_thread(|| {
            let main = Fiber::current();
            let fiber = Fiber::new(|| panic!("callback failed"), STACK).unwrap();

            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Except);
            assert_eq!(fiber.fault().as_deref(), Some("callback failed"));
            assert!(Rc::ptr_eq(&Fiber::current(), &main));
            assert_eq!(main.state(), FiberState::Exec);

            // An EXCEPT fiber can be reused, and the fault is cleared
            fiber.reset(|| {});
            assert_eq!(fiber.fault(), None);
            fiber.swap_in();
            assert_eq!(fiber.state(), FiberState::Term);
        });
    }

    #[test]
    fn test_many_switches() {
        on_fresh_thread(|| {
            let count = Rc::new(Cell::new(0u32));
            let c = count.clone();
            let fiber = Fiber::new(
                move || {
                    for _ in 0..1000 {
                        c.set(c.get() + 1);
                        Fiber::yield_to_ready();
                    }
                },
                STACK,
            )
            .unwrap();

            let mut switches = 0;
            while fiber.state() != FiberState::Term {
                fiber.swap_in();
                switches += 1;
            }
            assert_eq!(count.get(), 1000);
            assert_eq!(switches, 1001);
        });
    }

    #[test]
    fn test_interleaved_fibers() {
        on_fresh_thread(|| {
            let trace = Rc::new(RefCell::new(String::new()));
            let make = |tag: char| {
                let t = trace.clone();
                Fiber::new(
                    move || {
                        for _ in 0..3 {
                            t.borrow_mut().push(tag);
                            Fiber::yield_to_ready();
                        }
                    },
                    STACK,
                )
                .unwrap()
            };
            let a = make('a');
            let b = make('b');

            while !(a.state().is_terminated() && b.state().is_terminated()) {
                if !a.state().is_terminated() {
                    a.swap_in();
                }
                if !b.state().is_terminated() {
                    b.swap_in();
                }
            }
            assert_eq!(*trace.borrow(), "ababab");
        });
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        on_fresh_thread(|| {
            let a = Fiber::new(|| {}, STACK).unwrap();
            let b = Fiber::new(|| {}, STACK).unwrap();
            assert!(a.id().as_u64() >= 1);
            assert!(b.id() > a.id());
        });
    }

    #[test]
    fn test_mmap_allocator() {
        on_fresh_thread(|| {
            let ran = Rc::new(Cell::new(false));
            let r = ran.clone();
            let fiber = Fiber::with_allocator(
                move || {
                    // Touch a fair amount of stack
                    let buf = [7u8; 16 * 1024];
                    r.set(buf.iter().map(|&b| b as u32).sum::<u32>() == 7 * 16 * 1024);
                },
                STACK,
                Arc::new(crate::stack::MmapStackAllocator),
            )
            .unwrap();
            fiber.swap_in();
            assert!(ran.get());
            assert_eq!(fiber.state(), FiberState::Term);
        });
    }

    #[test]
    fn test_yield_from_main_aborts() {
        expect_abort(
            "fiber::tests::test_yield_from_main_aborts",
            "cannot yield from the main fiber",
            || on_fresh_thread(Fiber::yield_to_hold),
        );
    }

    #[test]
    fn test_swap_in_from_sub_fiber_aborts() {
        expect_abort(
            "fiber::tests::test_swap_in_from_sub_fiber_aborts",
            "swap_in called from sub-fiber",
            || {
                on_fresh_thread(|| {
                    let inner = Fiber::new(|| {}, STACK).unwrap();
                    let outer = Fiber::new(move || inner.swap_in(), STACK).unwrap();
                    outer.swap_in();
                });
            },
        );
    }

    #[test]
    fn test_log_context_has_os_tid() {
        on_fresh_thread(|| {
            let _main = Fiber::current();
            assert_eq!(kprint::thread_tid(), current_thread_id());
            assert!(kprint::thread_tid() > 0);
        });
    }

    #[test]
    fn test_small_explicit_size_rejected() {
        on_fresh_thread(|| {
            let err = Fiber::new(|| {}, MIN_STACK_SIZE - 1).unwrap_err();
            assert_eq!(err, MemoryError::InvalidSize(MIN_STACK_SIZE - 1).into());
            let exact = Fiber::new(|| {}, MIN_STACK_SIZE).unwrap();
            assert_eq!(exact.stack_size(), MIN_STACK_SIZE);
        });
    }
}
