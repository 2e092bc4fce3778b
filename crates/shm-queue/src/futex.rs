//! Futex-backed binary semaphore for cross-process wakeup.
//!
//! The semaphore state is a single `u32` living in the ring header, so every
//! process that maps the region shares it. Uses Linux futex syscalls without
//! `FUTEX_PRIVATE_FLAG`, since waiters and wakers may be different processes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use crate::region::Region;
use crate::semaphore::{BinarySemaphore, SharedSemaphore, TakeResult};

const EMPTY: u32 = 0;
const GIVEN: u32 = 1;
const DESTROYED: u32 = 2;

/// Futex wait operation.
///
/// Blocks the calling thread if `*futex == expected`, until woken by
/// [`futex_wake`] or the timeout expires.
///
/// Returns:
/// - `Ok(true)` if woken by `futex_wake`
/// - `Ok(false)` if the value changed, the wait timed out, or was interrupted
/// - `Err` on syscall error
pub fn futex_wait(
    futex: &AtomicU32,
    expected: u32,
    timeout: Option<Duration>,
) -> std::io::Result<bool> {
    use std::ptr;

    let futex_ptr = futex as *const AtomicU32 as *const u32;

    let timespec = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });

    let timespec_ptr = match &timespec {
        Some(ts) => ts as *const libc::timespec,
        None => ptr::null(),
    };

    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            futex_ptr,
            libc::FUTEX_WAIT,
            expected,
            timespec_ptr,
            ptr::null::<u32>(),
            0u32,
        )
    };

    if result == 0 {
        Ok(true)
    } else {
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EAGAIN) => Ok(false),
            Some(libc::ETIMEDOUT) => Ok(false),
            Some(libc::EINTR) => Ok(false),
            _ => Err(err),
        }
    }
}

/// Futex wake operation.
///
/// Wakes up to `count` threads waiting on the futex. Returns the number woken.
pub fn futex_wake(futex: &AtomicU32, count: u32) -> std::io::Result<u32> {
    let futex_ptr = futex as *const AtomicU32 as *const u32;

    let result = unsafe {
        libc::syscall(
            libc::SYS_futex,
            futex_ptr,
            libc::FUTEX_WAKE,
            count,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0u32,
        )
    };

    if result >= 0 {
        Ok(result as u32)
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Binary semaphore over a futex word in shared memory.
///
/// `broadcast` gives wake every sleeper; the single latched signal goes to
/// whichever consumes it first and the others go back to sleep.
pub struct FutexSemaphore {
    region: Region,
    offset: usize,
}

impl SharedSemaphore for FutexSemaphore {
    unsafe fn from_region(region: Region, offset: usize) -> Self {
        debug_assert!(offset.is_multiple_of(align_of::<AtomicU32>()));
        Self { region, offset }
    }
}

impl FutexSemaphore {
    #[inline]
    fn word(&self) -> &AtomicU32 {
        unsafe { self.region.get::<AtomicU32>(self.offset) }
    }

    pub fn is_destroyed(&self) -> bool {
        self.word().load(Ordering::Acquire) == DESTROYED
    }

    /// Consume a latched signal if there is one.
    fn try_consume(&self) -> Option<bool> {
        let word = self.word();
        loop {
            match word.load(Ordering::Acquire) {
                DESTROYED => return Some(false),
                GIVEN => {
                    if word
                        .compare_exchange(GIVEN, EMPTY, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return Some(true);
                    }
                }
                _ => return None,
            }
        }
    }

    fn wait_empty(&self, timeout: Option<Duration>) {
        if let Err(err) = futex_wait(self.word(), EMPTY, timeout) {
            tracing::warn!(error = %err, "futex wait failed");
            std::thread::yield_now();
        }
    }
}

impl BinarySemaphore for FutexSemaphore {
    fn give(&self, broadcast: bool) {
        let word = self.word();
        if word
            .compare_exchange(EMPTY, GIVEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let count = if broadcast { u32::MAX } else { 1 };
            if let Err(err) = futex_wake(word, count) {
                tracing::warn!(error = %err, "futex wake failed");
            }
        }
    }

    fn take(&self) -> bool {
        loop {
            if let Some(given) = self.try_consume() {
                return given;
            }
            self.wait_empty(None);
        }
    }

    fn take_timeout(&self, timeout: Duration) -> TakeResult {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            match self.try_consume() {
                Some(true) => return TakeResult::Signaled,
                Some(false) => return TakeResult::Destroyed,
                None => {}
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return TakeResult::TimedOut;
                    }
                    Some(remaining)
                }
                None => None,
            };
            self.wait_empty(remaining);
        }
    }

    fn destroy(&self) {
        let word = self.word();
        word.store(DESTROYED, Ordering::Release);
        if let Err(err) = futex_wake(word, u32::MAX) {
            tracing::warn!(error = %err, "futex wake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;
    use std::sync::Arc;
    use std::thread;

    fn semaphore(owner: &HeapRegion) -> FutexSemaphore {
        unsafe { FutexSemaphore::from_region(owner.region(), 0) }
    }

    #[test]
    fn test_futex_wake_without_waiters() {
        let futex = AtomicU32::new(0);
        let woken = futex_wake(&futex, 1).unwrap();
        assert_eq!(woken, 0);
    }

    #[test]
    fn test_futex_wait_value_mismatch() {
        let futex = AtomicU32::new(42);
        let result = futex_wait(&futex, 0, Some(Duration::from_millis(10))).unwrap();
        assert!(!result);
    }

    #[test]
    fn give_is_latched() {
        let owner = HeapRegion::new_zeroed(64);
        let sem = semaphore(&owner);
        sem.give(false);
        sem.give(false);
        assert!(sem.take());
        assert_eq!(
            sem.take_timeout(Duration::from_millis(10)),
            TakeResult::TimedOut
        );
    }

    #[test]
    fn wakes_across_threads_and_destroys() {
        let owner = Arc::new(HeapRegion::new_zeroed(64));
        let sem = Arc::new(semaphore(&owner));

        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.take())
        };
        thread::sleep(Duration::from_millis(20));
        sem.give(false);
        assert!(waiter.join().unwrap());

        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.take())
        };
        thread::sleep(Duration::from_millis(20));
        sem.destroy();
        assert!(!waiter.join().unwrap());
        assert!(sem.is_destroyed());
        assert_eq!(sem.take_timeout(Duration::ZERO), TakeResult::Destroyed);
    }
}
