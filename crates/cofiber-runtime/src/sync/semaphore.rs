//! Counting semaphore

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use cofiber_core::fatal;
        use nix::errno::Errno;
        use std::cell::UnsafeCell;

        /// Counting semaphore over an unnamed POSIX `sem_t`
        pub struct Semaphore {
            inner: Box<UnsafeCell<libc::sem_t>>,
        }

        // Safety: sem_t is a process-shared kernel-backed primitive
        unsafe impl Send for Semaphore {}
        unsafe impl Sync for Semaphore {}

        impl Semaphore {
            /// Create a semaphore holding `count` permits
            pub fn new(count: u32) -> Self {
                // Safety: sem_init fully initializes the zeroed storage
                let inner: Box<UnsafeCell<libc::sem_t>> =
                    Box::new(UnsafeCell::new(unsafe { std::mem::zeroed() }));
                if unsafe { libc::sem_init(inner.get(), 0, count as libc::c_uint) } != 0 {
                    fatal!("sem_init failed: {}", Errno::last());
                }
                Self { inner }
            }

            /// Block until a permit is available, then take it
            pub fn wait(&self) {
                loop {
                    if unsafe { libc::sem_wait(self.inner.get()) } == 0 {
                        return;
                    }
                    match Errno::last() {
                        Errno::EINTR => continue,
                        err => fatal!("sem_wait failed: {}", err),
                    }
                }
            }

            /// Take a permit only if one is available
            pub fn try_wait(&self) -> bool {
                loop {
                    if unsafe { libc::sem_trywait(self.inner.get()) } == 0 {
                        return true;
                    }
                    match Errno::last() {
                        Errno::EAGAIN => return false,
                        Errno::EINTR => continue,
                        err => fatal!("sem_trywait failed: {}", err),
                    }
                }
            }

            /// Release a permit, waking one waiter
            pub fn notify(&self) {
                if unsafe { libc::sem_post(self.inner.get()) } != 0 {
                    fatal!("sem_post failed: {}", Errno::last());
                }
            }
        }

        impl Drop for Semaphore {
            fn drop(&mut self) {
                unsafe { libc::sem_destroy(self.inner.get()) };
            }
        }
    } else {
        use std::sync::{Condvar, Mutex};

        /// Counting semaphore over a Mutex + Condvar
        ///
        /// Used where unnamed POSIX semaphores are unavailable (macOS).
        pub struct Semaphore {
            count: Mutex<u32>,
            condvar: Condvar,
        }

        impl Semaphore {
            pub fn new(count: u32) -> Self {
                Self {
                    count: Mutex::new(count),
                    condvar: Condvar::new(),
                }
            }

            pub fn wait(&self) {
                let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
                while *count == 0 {
                    count = self.condvar.wait(count).unwrap_or_else(|e| e.into_inner());
                }
                *count -= 1;
            }

            pub fn try_wait(&self) -> bool {
                let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
                if *count == 0 {
                    return false;
                }
                *count -= 1;
                true
            }

            pub fn notify(&self) {
                let mut count = self.count.lock().unwrap_or_else(|e| e.into_inner());
                *count += 1;
                self.condvar.notify_one();
            }
        }
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_initial_count() {
        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        assert!(!sem.try_wait());
        sem.notify();
        assert!(sem.try_wait());
    }

    #[test]
    fn test_wait_blocks_until_notify() {
        let sem = Arc::new(Semaphore::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let handle = {
            let sem = Arc::clone(&sem);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                sem.wait();
                done.store(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert_eq!(done.load(Ordering::SeqCst), 0);

        sem.notify();
        handle.join().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_many_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.wait())
            })
            .collect();

        for _ in 0..4 {
            sem.notify();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(!sem.try_wait());
    }
}
