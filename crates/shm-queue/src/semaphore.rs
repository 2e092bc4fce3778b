//! The wakeup primitive a queue blocks on.
//!
//! The queue only relies on the [`BinarySemaphore`] contract. Two
//! implementations ship with the crate:
//!
//! - [`CondvarSemaphore`]: `parking_lot` mutex + condvar, for queues shared
//!   between threads of one process.
//! - [`FutexSemaphore`](crate::FutexSemaphore) (Linux): a futex word inside the
//!   ring header, for queues shared between processes. It implements
//!   [`SharedSemaphore`], which is what attaching to a queue requires.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::region::Region;

/// Result of a bounded wait on a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeResult {
    /// The semaphore was given.
    Signaled,
    /// The timeout elapsed first.
    TimedOut,
    /// The semaphore was destroyed.
    Destroyed,
}

/// A binary semaphore with an explicit destroyed state.
pub trait BinarySemaphore: Send + Sync {
    /// Release one waiter, or every current waiter if `broadcast`.
    ///
    /// With no waiters the signal is latched for the next `take`. Giving an
    /// already-given or destroyed semaphore is a no-op.
    fn give(&self, broadcast: bool);

    /// Block until given or destroyed. Returns false once destroyed.
    fn take(&self) -> bool;

    /// Like [`take`](Self::take), but gives up after `timeout`.
    fn take_timeout(&self, timeout: Duration) -> TakeResult;

    /// Wake every pending `take` with `false`, and make all future ones fail.
    fn destroy(&self);
}

/// A semaphore whose whole state is a word inside the queue's region.
///
/// Every handle that maps the region and builds its semaphore over the same
/// word signals and waits on the same primitive. Only queues woken this way
/// can be attached to from another handle.
pub trait SharedSemaphore: BinarySemaphore {
    /// Use the `u32` at `offset` in `region` as the semaphore word.
    ///
    /// # Safety
    ///
    /// `offset` must be 4-byte aligned and in bounds by the time the semaphore
    /// is first used, the word must only be touched through semaphores of
    /// this type, and the region must outlive the semaphore.
    unsafe fn from_region(region: Region, offset: usize) -> Self;
}

#[derive(Debug, Default)]
struct SemState {
    given: bool,
    /// Bumped by broadcast gives so every waiter that saw the old value wakes.
    epoch: u64,
    destroyed: bool,
    waiters: usize,
}

/// In-process binary semaphore built on `parking_lot`.
#[derive(Debug, Default)]
pub struct CondvarSemaphore {
    state: Mutex<SemState>,
    cond: Condvar,
}

impl CondvarSemaphore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Number of threads currently blocked in `take`.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    fn wait_until(&self, deadline: Option<Instant>) -> TakeResult {
        let mut state = self.state.lock();
        state.waiters += 1;
        let result = self.wait_locked(&mut state, deadline);
        state.waiters -= 1;
        result
    }

    fn wait_locked(
        &self,
        state: &mut parking_lot::MutexGuard<'_, SemState>,
        deadline: Option<Instant>,
    ) -> TakeResult {
        let epoch = state.epoch;
        loop {
            if state.destroyed {
                return TakeResult::Destroyed;
            }
            if state.given {
                state.given = false;
                return TakeResult::Signaled;
            }
            if state.epoch != epoch {
                return TakeResult::Signaled;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(state, deadline).timed_out() {
                        // One last look: a give may have raced the timeout.
                        return if state.destroyed {
                            TakeResult::Destroyed
                        } else if state.given {
                            state.given = false;
                            TakeResult::Signaled
                        } else if state.epoch != epoch {
                            TakeResult::Signaled
                        } else {
                            TakeResult::TimedOut
                        };
                    }
                }
                None => self.cond.wait(state),
            }
        }
    }
}

impl BinarySemaphore for CondvarSemaphore {
    fn give(&self, broadcast: bool) {
        let mut state = self.state.lock();
        if state.destroyed {
            return;
        }
        if broadcast {
            state.epoch = state.epoch.wrapping_add(1);
            drop(state);
            self.cond.notify_all();
        } else {
            state.given = true;
            drop(state);
            self.cond.notify_one();
        }
    }

    fn take(&self) -> bool {
        self.wait_until(None) == TakeResult::Signaled
    }

    fn take_timeout(&self, timeout: Duration) -> TakeResult {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(Some(deadline)),
            None => self.wait_until(None),
        }
    }

    fn destroy(&self) {
        self.state.lock().destroyed = true;
        self.cond.notify_all();
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn give_without_waiters_is_latched_once() {
        let sem = CondvarSemaphore::new();
        sem.give(false);
        sem.give(false);
        assert!(sem.take());
        assert_eq!(
            sem.take_timeout(Duration::from_millis(10)),
            TakeResult::TimedOut
        );
    }

    #[test]
    fn take_blocks_until_given() {
        let sem = Arc::new(CondvarSemaphore::new());
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.take())
        };
        thread::sleep(Duration::from_millis(20));
        sem.give(false);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn destroy_wakes_waiters_with_false() {
        let sem = Arc::new(CondvarSemaphore::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.take())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        sem.destroy();
        for waiter in waiters {
            assert!(!waiter.join().unwrap());
        }
        assert!(!sem.take());
        assert_eq!(sem.take_timeout(Duration::ZERO), TakeResult::Destroyed);
        assert!(sem.is_destroyed());
    }

    #[test]
    fn broadcast_releases_every_waiter() {
        let sem = Arc::new(CondvarSemaphore::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sem = sem.clone();
                thread::spawn(move || sem.take_timeout(Duration::from_secs(5)))
            })
            .collect();
        while sem.waiters() < 3 {
            thread::yield_now();
        }
        sem.give(true);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), TakeResult::Signaled);
        }
    }
}
