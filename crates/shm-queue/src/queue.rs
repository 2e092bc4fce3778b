use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::QueueConfig;
use crate::error::{LayoutError, QueueError};
use crate::frame::{self, Decoded};
use crate::gate::{Admission, BackpressureGate};
use crate::region::{HeapRegion, Region};
use crate::ring::{RingStatus, SIGNAL_OFFSET, SlotRing};
use crate::semaphore::{BinarySemaphore, CondvarSemaphore, SharedSemaphore};
use crate::wakeup::WakeupBridge;

/// A bounded queue of byte messages over a fixed-slot ring.
///
/// Any number of threads may [`push`](Self::push) concurrently. Pops are
/// serialized: a blocking pop holds the consumer side while it waits, and a
/// non-blocking pop that finds it held reports `WouldBlockRead`.
///
/// ```
/// use shm_queue::{QueueError, ShmQueue};
///
/// let queue = ShmQueue::open(16, 4)?;
/// queue.push(b"hello")?;
///
/// let mut buf = [0u8; 12];
/// let popped = queue.pop_nonblocking(&mut buf)?;
/// assert_eq!(&buf[..popped.len], b"hello");
/// assert_eq!(queue.pop_nonblocking(&mut buf), Err(QueueError::WouldBlockRead));
/// # Ok::<(), QueueError>(())
/// ```
pub struct ShmQueue<S: BinarySemaphore = CondvarSemaphore> {
    ring: SlotRing,
    gate: BackpressureGate,
    wakeup: WakeupBridge<S>,
    consumer: Mutex<()>,
    destroyed: AtomicBool,
    /// Whether dropping this handle destroys the queue.
    owner: bool,
    /// Keeps the heap storage alive for queues we allocated.
    _backing: Option<HeapRegion>,
}

impl ShmQueue<CondvarSemaphore> {
    /// Open an in-process queue of `capacity_slots` slots of `slot_size` bytes.
    pub fn open(slot_size: u64, capacity_slots: u64) -> Result<Self, QueueError> {
        Self::with_config(
            QueueConfig::new(slot_size, capacity_slots),
            CondvarSemaphore::new(),
        )
    }
}

impl<S: SharedSemaphore> ShmQueue<S> {
    /// Initialize a queue in a shared region, waking consumers through the
    /// signal word in the ring header.
    ///
    /// Other handles (usually in other processes) join it with
    /// [`attach`](Self::attach).
    ///
    /// # Safety
    ///
    /// Same as [`ShmQueue::init_in`].
    pub unsafe fn create_shared(region: Region, config: QueueConfig) -> Result<Self, QueueError> {
        let semaphore = unsafe { S::from_region(region, SIGNAL_OFFSET) };
        let queue = unsafe { Self::init_in(region, config, semaphore)? };
        queue.ring.mark_shared();
        Ok(queue)
    }

    /// Attach to a queue created with [`create_shared`](Self::create_shared).
    ///
    /// The configuration is read from the ring header, and the semaphore is
    /// built over the header's signal word, so pushes from either handle wake
    /// the other's blocking pops and `destroy` ends them. Dropping an
    /// attached handle does not destroy the queue.
    ///
    /// Fails with [`LayoutError::NotShared`] if the queue was initialized
    /// with a process-local semaphore.
    ///
    /// # Safety
    ///
    /// The region must hold a queue created by `create_shared` and must
    /// outlive the returned handle.
    pub unsafe fn attach(region: Region) -> Result<Self, QueueError> {
        let ring = unsafe { SlotRing::attach(region)? };
        if !ring.is_shared() {
            return Err(QueueError::Layout(LayoutError::NotShared));
        }
        let semaphore = unsafe { S::from_region(region, SIGNAL_OFFSET) };
        Ok(Self::assemble(ring, semaphore, false, None))
    }
}

impl<S: BinarySemaphore> ShmQueue<S> {
    /// Open a queue on freshly allocated heap storage.
    pub fn with_config(config: QueueConfig, semaphore: S) -> Result<Self, QueueError> {
        config.validate().map_err(QueueError::InvalidConfig)?;
        let size = config
            .required_region_size()
            .map_err(QueueError::InvalidConfig)?;
        let backing =
            HeapRegion::try_new_zeroed(size).ok_or(QueueError::InvalidConfig("allocation failed"))?;
        // SAFETY: the allocation is fresh, exclusively ours, and kept alive in `_backing`.
        let ring = unsafe { SlotRing::init(backing.region(), &config)? };
        Ok(Self::assemble(ring, semaphore, true, Some(backing)))
    }

    /// Initialize a queue inside a caller-provided region.
    ///
    /// The queue wakes its consumer through `semaphore` only, so no other
    /// handle can attach to it; use [`create_shared`](Self::create_shared)
    /// for that.
    ///
    /// # Safety
    ///
    /// The region must be writable, 64-byte aligned, exclusively owned during
    /// initialization, and must outlive the queue.
    pub unsafe fn init_in(
        region: Region,
        config: QueueConfig,
        semaphore: S,
    ) -> Result<Self, QueueError> {
        let ring = unsafe { SlotRing::init(region, &config)? };
        Ok(Self::assemble(ring, semaphore, true, None))
    }

    fn assemble(ring: SlotRing, semaphore: S, owner: bool, backing: Option<HeapRegion>) -> Self {
        tracing::debug!(
            slot_size = ring.slot_size(),
            capacity = ring.capacity(),
            owner,
            "queue opened"
        );
        Self {
            ring,
            gate: BackpressureGate::new(),
            wakeup: WakeupBridge::new(semaphore),
            consumer: Mutex::new(()),
            destroyed: AtomicBool::new(false),
            owner,
            _backing: backing,
        }
    }

    /// Enqueue a message, dropping it if the ring is full.
    ///
    /// Payloads longer than [`payload_capacity`](Self::payload_capacity) are
    /// silently cut to fit. Never blocks on the consumer.
    pub fn push(&self, payload: &[u8]) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let pos = match self.gate.admit(&self.ring) {
            Admission::Admitted(pos) => pos,
            Admission::Rejected => return Err(QueueError::WouldBlockWrite),
        };
        // SAFETY: `pos` was just reserved for us and is not yet published.
        unsafe {
            frame::encode(self.ring.slot_mut(pos), payload);
        }
        let was_empty = self.ring.publish(pos);
        self.wakeup.notify(was_empty);
        Ok(())
    }

    /// Dequeue the next message into `buf`, waiting while the queue is empty.
    ///
    /// Returns `EndOfStream` once the queue is destroyed.
    pub fn pop_blocking(&self, buf: &mut [u8]) -> Result<Decoded, QueueError> {
        if self.is_closed() {
            return Err(QueueError::EndOfStream);
        }
        let _consumer = self.consumer.lock();
        self.wakeup.wait_readable(&self.ring)?;
        Ok(self.consume(buf))
    }

    /// Dequeue the next message into `buf`, waiting at most `timeout`.
    ///
    /// Running out of time yields `WouldBlockRead`.
    pub fn pop_timeout(&self, buf: &mut [u8], timeout: Duration) -> Result<Decoded, QueueError> {
        if self.is_closed() {
            return Err(QueueError::EndOfStream);
        }
        let started = Instant::now();
        let Some(_consumer) = self.consumer.try_lock_for(timeout) else {
            return Err(QueueError::WouldBlockRead);
        };
        let remaining = timeout.saturating_sub(started.elapsed());
        self.wakeup.wait_readable_timeout(&self.ring, remaining)?;
        Ok(self.consume(buf))
    }

    /// Dequeue the next message into `buf` if one is ready.
    pub fn pop_nonblocking(&self, buf: &mut [u8]) -> Result<Decoded, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let Some(_consumer) = self.consumer.try_lock() else {
            return Err(QueueError::WouldBlockRead);
        };
        if !self.ring.has_readable() {
            return Err(QueueError::WouldBlockRead);
        }
        Ok(self.consume(buf))
    }

    /// Copy out the slot at the read position and release it.
    ///
    /// Caller holds the consumer lock and has seen `has_readable()`.
    fn consume(&self, buf: &mut [u8]) -> Decoded {
        let pos = self.ring.read_pos();
        // SAFETY: pos is in [read_pos, write_pos) and we are the only consumer.
        let decoded = frame::decode(unsafe { self.ring.slot(pos) }, buf);
        self.ring.advance_read();
        if decoded.truncated {
            tracing::trace!(delivered = decoded.len, "message truncated on pop");
        }
        decoded
    }

    /// Close the queue and wake any blocked consumer with `EndOfStream`.
    ///
    /// A second call returns `Closed`.
    pub fn destroy(&self) -> Result<(), QueueError> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Err(QueueError::Closed);
        }
        self.ring.mark_closed();
        self.wakeup.close();
        tracing::debug!(status = %self.ring.status(), "queue destroyed");
        Ok(())
    }

    /// Returns true once this handle or any peer has destroyed the queue.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire) || self.ring.is_closed()
    }

    /// Messages currently waiting to be popped (approximate).
    #[inline]
    pub fn len(&self) -> u64 {
        self.ring.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.ring.capacity()
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.ring.slot_size()
    }

    /// Largest message that is stored without truncation.
    #[inline]
    pub fn payload_capacity(&self) -> usize {
        frame::payload_capacity(self.ring.slot_size())
    }

    /// Lifetime count of messages dropped on a full ring.
    #[inline]
    pub fn drop_count(&self) -> u64 {
        self.ring.drop_count()
    }

    pub fn status(&self) -> RingStatus {
        self.ring.status()
    }

    /// The wakeup primitive this queue signals.
    pub fn semaphore(&self) -> &S {
        self.wakeup.semaphore()
    }
}

impl<S: BinarySemaphore> Drop for ShmQueue<S> {
    fn drop(&mut self) {
        if self.owner && !self.destroyed.load(Ordering::Acquire) {
            let _ = self.destroy();
        }
    }
}

impl<S: BinarySemaphore> std::fmt::Debug for ShmQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmQueue")
            .field("slot_size", &self.ring.slot_size())
            .field("status", &self.ring.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}
