//! Thread-local fiber slots
//!
//! Each OS thread owns two slots:
//!
//! - `CURRENT` - the fiber executing on this thread right now
//! - `MAIN_FIBER` - the thread's main fiber, kept alive for the thread's
//!   lifetime so sub-fibers always have an anchor to switch back to
//!
//! Both hold strong references. Only code running on the owning thread
//! reads or writes them; fibers are `!Send`, so nothing else can. Every
//! accessor tolerates being called during thread-local destruction and
//! then behaves as if the slot were empty.

use crate::fiber::Fiber;
use std::cell::RefCell;
use std::rc::Rc;

thread_local! {
    /// Fiber currently executing on this OS thread
    static CURRENT: RefCell<Option<Rc<Fiber>>> = const { RefCell::new(None) };

    /// This thread's main fiber
    static MAIN_FIBER: RefCell<Option<Rc<Fiber>>> = const { RefCell::new(None) };
}

/// Get the executing fiber, if the thread has one
#[inline]
pub fn current() -> Option<Rc<Fiber>> {
    CURRENT
        .try_with(|slot| slot.try_borrow().ok().and_then(|f| f.clone()))
        .ok()
        .flatten()
}

/// Make `fiber` the executing fiber; returns the previous occupant
///
/// The previous occupant is handed back rather than dropped in place so the
/// caller controls when its refcount falls.
#[inline]
pub fn set_current(fiber: Option<Rc<Fiber>>) -> Option<Rc<Fiber>> {
    CURRENT
        .try_with(|slot| slot.replace(fiber))
        .ok()
        .flatten()
}

/// Get this thread's main fiber, if one was created
#[inline]
pub fn main_fiber() -> Option<Rc<Fiber>> {
    MAIN_FIBER
        .try_with(|slot| slot.try_borrow().ok().and_then(|f| f.clone()))
        .ok()
        .flatten()
}

/// Record this thread's main fiber
///
/// Aborts if the thread already has a main fiber.
pub fn set_main_fiber(fiber: Rc<Fiber>) {
    MAIN_FIBER.with(|slot| {
        let mut slot = slot.borrow_mut();
        cofiber_core::fiber_assert!(slot.is_none(), "thread already has a main fiber");
        *slot = Some(fiber);
    });
}
