#[cfg(not(feature = "loom"))]
pub use core::hint::spin_loop;
#[cfg(feature = "loom")]
pub use loom::hint::spin_loop;

#[cfg(not(feature = "loom"))]
pub use core::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
#[cfg(feature = "loom")]
pub use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};

#[cfg(feature = "loom")]
pub use loom::thread;
#[cfg(not(feature = "loom"))]
pub use std::thread;

/// Back off while another party finishes its side of a handoff.
///
/// Spins briefly, then yields to the scheduler.
#[inline]
pub fn backoff(step: &mut u32) {
    if *step < 64 {
        *step += 1;
        spin_loop();
    } else {
        thread::yield_now();
    }
}
