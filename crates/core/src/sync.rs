//! Counting semaphore for cross-thread frame pacing.
//!
//! The standard library does not ship a counting semaphore, and the only
//! place the renderer needs one is the logic-thread / render-thread frame
//! handoff, so a small Mutex + Condvar implementation is kept here.

use std::sync::{Condvar, Mutex};

/// A counting semaphore.
///
/// `release` increments the counter and wakes one waiter; `acquire` blocks
/// until the counter is positive, then decrements it.
pub struct Semaphore {
    count: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with the given initial count.
    pub fn new(initial: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Blocks until a permit is available, then takes it.
    pub fn acquire(&self) {
        let mut count = self.count.lock().unwrap();
        while *count == 0 {
            count = self.available.wait(count).unwrap();
        }
        *count -= 1;
    }

    /// Takes a permit if one is available without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut count = self.count.lock().unwrap();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Returns a permit, waking one blocked `acquire`.
    pub fn release(&self) {
        let mut count = self.count.lock().unwrap();
        *count += 1;
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_initial_permits() {
        let sem = Semaphore::new(2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }

    #[test]
    fn test_release_wakes_acquire() {
        let sem = Arc::new(Semaphore::new(0));
        let worker = {
            let sem = sem.clone();
            std::thread::spawn(move || {
                sem.acquire();
            })
        };
        sem.release();
        worker.join().unwrap();
        assert!(!sem.try_acquire());
    }

    #[test]
    fn test_ping_pong() {
        // Two threads alternating through a pair of semaphores, the same
        // shape the frame handoff uses.
        let a = Arc::new(Semaphore::new(1));
        let b = Arc::new(Semaphore::new(0));
        let iterations = 100;

        let worker = {
            let a = a.clone();
            let b = b.clone();
            std::thread::spawn(move || {
                for _ in 0..iterations {
                    a.acquire();
                    b.release();
                }
            })
        };

        for _ in 0..iterations {
            b.acquire();
            a.release();
        }
        worker.join().unwrap();
    }

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }
}
