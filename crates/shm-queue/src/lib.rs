//! Bounded byte-message queue over a fixed-slot ring, for shared memory IPC.
//!
//! A queue is a ring of `capacity_slots` slots of `slot_size` bytes living in
//! a contiguous [`Region`]. Each slot holds one message framed as a 4-byte
//! little-endian length followed by the payload.
//!
//! - Producers never block: when the ring is full, [`ShmQueue::push`] drops the
//!   message, bumps a drop counter, and returns [`QueueError::WouldBlockWrite`].
//! - The consumer can poll ([`ShmQueue::pop_nonblocking`]) or block
//!   ([`ShmQueue::pop_blocking`]) on a [`BinarySemaphore`] that producers give
//!   only when the ring goes from empty to non-empty.
//! - [`ShmQueue::destroy`] wakes a blocked consumer with
//!   [`QueueError::EndOfStream`].
//!
//! # Components
//!
//! - [`frame`]: slot framing (length prefix + payload).
//! - [`SlotRing`]: position counters, slot addressing, full/empty detection.
//! - [`BackpressureGate`]: drop-on-full admission.
//! - [`WakeupBridge`]: empty→non-empty signaling and the blocking wait.
//! - [`ShmQueue`]: the facade tying them together.
//!
//! # Loom Testing
//!
//! Enable the `loom` feature to model-check the ring under all interleavings.
//!
//! ```text
//! cargo test -p shm-queue --features loom --release --lib loom
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod gate;
pub mod queue;
pub mod region;
pub mod ring;
pub mod semaphore;
pub mod sync;
pub mod wakeup;

#[cfg(all(target_os = "linux", not(feature = "loom")))]
pub mod futex;

pub use config::{DEFAULT_CAPACITY_SLOTS, DEFAULT_SLOT_SIZE, QueueConfig};
pub use error::{LayoutError, QueueError};
pub use frame::{Decoded, LEN_PREFIX};
#[cfg(all(target_os = "linux", not(feature = "loom")))]
pub use futex::FutexSemaphore;
pub use gate::{Admission, BackpressureGate};
pub use queue::ShmQueue;
pub use region::{HeapRegion, REGION_ALIGN, Region};
pub use ring::{RingStatus, SlotRing, SlotRingHeader};
pub use semaphore::{BinarySemaphore, CondvarSemaphore, SharedSemaphore, TakeResult};
pub use wakeup::WakeupBridge;

#[cfg(all(test, feature = "loom"))]
mod loom_tests;
