//! Slot ring: position counters and slot addressing.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  Ring Header (320 bytes, one cache line per hot counter)             │
//! │    - magic, version, closed flag, slot_size, capacity_slots, shared  │
//! │    - reserve_pos   (claimed by producers)                            │
//! │    - write_pos     (published by producers) + signal word            │
//! │    - read_pos      (advanced by the consumer)                        │
//! │    - drop_count    (pushes rejected on a full ring)                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  Slot Storage (capacity_slots × slot_size bytes)                     │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Positions are ever-increasing `u64`s; a position maps to the physical slot
//! `(pos % capacity_slots) * slot_size`. Because counters never reset, an
//! empty ring (`write_pos == read_pos`) and a full ring
//! (`reserve_pos - read_pos == capacity_slots`) can never be confused.
//!
//! Producers claim positions with a CAS on `reserve_pos`, write their slot,
//! then publish in reservation order by moving `write_pos` forward. The
//! consumer only ever reads slots in `[read_pos, write_pos)`.

use core::ptr;

use crate::config::QueueConfig;
use crate::error::LayoutError;
use crate::region::{REGION_ALIGN, Region};
use crate::sync::{AtomicU32, AtomicU64, Ordering, backoff, fence};

/// Magic bytes identifying a queue region.
pub const MAGIC: [u8; 8] = *b"SHMQUEUE";

/// Current layout version (major.minor packed into u32).
/// Major = high 16 bits, minor = low 16 bits.
pub const LAYOUT_VERSION: u32 = 1 << 16; // v1.0

/// Ring header at the start of the region (320 bytes).
#[repr(C)]
pub struct SlotRingHeader {
    /// Magic bytes: "SHMQUEUE".
    pub magic: [u8; 8],
    /// Layout version (major.minor packed).
    pub version: u32,
    /// Non-zero once the queue has been destroyed.
    pub closed: AtomicU32,
    /// Bytes per slot, including the length prefix (immutable after init).
    pub slot_size: u64,
    /// Number of slots (immutable after init).
    pub capacity_slots: u64,
    /// Non-zero if consumers are woken through `signal`, so peers may attach.
    pub shared: AtomicU32,
    _pad0: [u8; 28],

    /// Next position to hand to a producer.
    pub reserve_pos: AtomicU64,
    _pad1: [u8; 56],

    /// Positions below this are fully written and visible to the consumer.
    pub write_pos: AtomicU64,
    /// Futex word for a cross-process wakeup primitive.
    pub signal: AtomicU32,
    _pad2: [u8; 52],

    /// Consumer position.
    pub read_pos: AtomicU64,
    _pad3: [u8; 56],

    /// Lifetime count of pushes rejected on a full ring.
    pub drop_count: AtomicU64,
    _pad4: [u8; 56],
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<SlotRingHeader>() == 320);
#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::offset_of!(SlotRingHeader, signal) == 136);

/// Offset of the futex word within the header.
pub const SIGNAL_OFFSET: usize = core::mem::offset_of!(SlotRingHeader, signal);

impl SlotRingHeader {
    fn new(config: &QueueConfig) -> Self {
        Self {
            magic: MAGIC,
            version: LAYOUT_VERSION,
            closed: AtomicU32::new(0),
            slot_size: config.slot_size,
            capacity_slots: config.capacity_slots,
            shared: AtomicU32::new(0),
            _pad0: [0; 28],
            reserve_pos: AtomicU64::new(0),
            _pad1: [0; 56],
            write_pos: AtomicU64::new(0),
            signal: AtomicU32::new(0),
            _pad2: [0; 52],
            read_pos: AtomicU64::new(0),
            _pad3: [0; 56],
            drop_count: AtomicU64::new(0),
            _pad4: [0; 56],
        }
    }

    /// Validate the header and return the embedded configuration.
    pub fn validate(&self) -> Result<QueueConfig, LayoutError> {
        if self.magic != MAGIC {
            return Err(LayoutError::InvalidMagic);
        }
        let major = self.version >> 16;
        let our_major = LAYOUT_VERSION >> 16;
        if major != our_major {
            return Err(LayoutError::IncompatibleVersion {
                expected: LAYOUT_VERSION,
                found: self.version,
            });
        }
        let config = QueueConfig::new(self.slot_size, self.capacity_slots);
        config.validate().map_err(LayoutError::InvalidConfig)?;
        Ok(config)
    }
}

/// A view of a slot ring living in a [`Region`].
///
/// The header sits at offset 0; slot storage follows it directly.
pub struct SlotRing {
    region: Region,
    slot_size: usize,
    capacity: u64,
}

impl SlotRing {
    /// Initialize a new ring in the region.
    ///
    /// # Safety
    ///
    /// The region must be writable and exclusively owned during initialization,
    /// and must outlive the returned ring.
    pub unsafe fn init(region: Region, config: &QueueConfig) -> Result<Self, LayoutError> {
        if !region.is_aligned_to(REGION_ALIGN) {
            return Err(LayoutError::Misaligned);
        }
        config.validate().map_err(LayoutError::InvalidConfig)?;
        let required = config
            .required_region_size()
            .map_err(LayoutError::InvalidConfig)?;
        if required > region.len() {
            return Err(LayoutError::RegionTooSmall {
                required,
                found: region.len(),
            });
        }

        // SAFETY: region is aligned and large enough for the header.
        unsafe {
            ptr::write(
                region.as_ptr() as *mut SlotRingHeader,
                SlotRingHeader::new(config),
            );
        }

        Ok(Self {
            region,
            slot_size: config.slot_size as usize,
            capacity: config.capacity_slots,
        })
    }

    /// Attach to an existing ring in the region.
    ///
    /// # Safety
    ///
    /// The region must contain a ring initialized by [`SlotRing::init`] (possibly
    /// in another process) and must outlive the returned ring.
    pub unsafe fn attach(region: Region) -> Result<Self, LayoutError> {
        if !region.is_aligned_to(REGION_ALIGN) {
            return Err(LayoutError::Misaligned);
        }
        let header_size = size_of::<SlotRingHeader>();
        if region.len() < header_size {
            return Err(LayoutError::RegionTooSmall {
                required: header_size,
                found: region.len(),
            });
        }

        let header = unsafe { region.get::<SlotRingHeader>(0) };
        let config = header.validate()?;
        let required = config
            .required_region_size()
            .map_err(LayoutError::InvalidConfig)?;
        if required > region.len() {
            return Err(LayoutError::RegionTooSmall {
                required,
                found: region.len(),
            });
        }

        Ok(Self {
            region,
            slot_size: config.slot_size as usize,
            capacity: config.capacity_slots,
        })
    }

    #[inline]
    pub fn header(&self) -> &SlotRingHeader {
        unsafe { self.region.get::<SlotRingHeader>(0) }
    }

    /// The region this ring lives in.
    #[inline]
    pub fn region(&self) -> Region {
        self.region
    }

    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Claim the next write position, or `None` if the ring is full.
    ///
    /// The claimed slot is not visible to the consumer until [`publish`] is
    /// called with the returned position. Safe to call from several producers
    /// at once: each successful call returns a distinct position.
    ///
    /// [`publish`]: SlotRing::publish
    pub fn try_reserve_write(&self) -> Option<u64> {
        let header = self.header();
        loop {
            let read = header.read_pos.load(Ordering::Acquire);
            let reserved = header.reserve_pos.load(Ordering::Acquire);

            if reserved.wrapping_sub(read) >= self.capacity {
                // Only report full if read_pos did not move while we looked:
                // then occupancy was exactly capacity when reserve_pos was read.
                if header.read_pos.load(Ordering::Acquire) == read {
                    return None;
                }
                continue;
            }

            if header
                .reserve_pos
                .compare_exchange_weak(
                    reserved,
                    reserved.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                return Some(reserved);
            }
        }
    }

    /// Make the slot at `pos` visible to the consumer.
    ///
    /// Publication happens in reservation order, so this waits for any
    /// producer holding an earlier position to publish first. Returns true if
    /// the ring was empty right before this publication.
    pub fn publish(&self, pos: u64) -> bool {
        let header = self.header();
        let mut step = 0;
        while header.write_pos.load(Ordering::Acquire) != pos {
            backoff(&mut step);
        }
        header
            .write_pos
            .store(pos.wrapping_add(1), Ordering::Release);
        // Pairs with the fence in `has_readable`: either the consumer sees
        // this publication, or we see its last `advance_read` and signal.
        fence(Ordering::SeqCst);
        header.read_pos.load(Ordering::Acquire) == pos
    }

    /// Returns true if at least one published slot is waiting to be read.
    #[inline]
    pub fn has_readable(&self) -> bool {
        let header = self.header();
        let read = header.read_pos.load(Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let written = header.write_pos.load(Ordering::Acquire);
        written.wrapping_sub(read) > 0
    }

    /// Current consumer position.
    #[inline]
    pub fn read_pos(&self) -> u64 {
        self.header().read_pos.load(Ordering::Acquire)
    }

    /// Release the slot at the current read position back to producers.
    ///
    /// Consumer only, after the slot's contents have been copied out.
    #[inline]
    pub fn advance_read(&self) {
        self.header().read_pos.fetch_add(1, Ordering::Release);
    }

    /// Count one rejected push, returning the new total.
    #[inline]
    pub fn record_drop(&self) -> u64 {
        self.header().drop_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn drop_count(&self) -> u64 {
        self.header().drop_count.load(Ordering::Relaxed)
    }

    /// Number of published, unread slots (approximate under concurrency).
    #[inline]
    pub fn len(&self) -> u64 {
        let header = self.header();
        let read = header.read_pos.load(Ordering::Acquire);
        let written = header.write_pos.load(Ordering::Acquire);
        written.saturating_sub(read)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.has_readable()
    }

    /// Flag the ring as closed. Returns true if this call closed it.
    #[inline]
    pub fn mark_closed(&self) -> bool {
        self.header().closed.swap(1, Ordering::AcqRel) == 0
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.header().closed.load(Ordering::Acquire) != 0
    }

    /// Record that consumers are woken through the header's signal word.
    ///
    /// Called once by the creator, before any peer attaches.
    #[inline]
    pub fn mark_shared(&self) {
        self.header().shared.store(1, Ordering::Release);
    }

    /// Returns true if peers may attach to this ring.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.header().shared.load(Ordering::Acquire) != 0
    }

    #[inline]
    fn slot_ptr(&self, pos: u64) -> *mut u8 {
        let index = (pos % self.capacity) as usize;
        // SAFETY: index < capacity, so the slot lies inside the storage area
        // that init/attach checked against the region length.
        unsafe {
            self.region
                .offset(size_of::<SlotRingHeader>() + index * self.slot_size)
        }
    }

    /// Bytes of the slot at `pos`, for the consumer.
    ///
    /// # Safety
    ///
    /// `pos` must lie in `[read_pos, write_pos)` and the caller must be the
    /// only consumer for the lifetime of the returned slice.
    #[inline]
    pub unsafe fn slot(&self, pos: u64) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.slot_ptr(pos), self.slot_size) }
    }

    /// Bytes of the slot at `pos`, for the producer that reserved it.
    ///
    /// # Safety
    ///
    /// `pos` must have been returned by [`try_reserve_write`] and not yet
    /// published, so no one else touches the slot.
    ///
    /// [`try_reserve_write`]: SlotRing::try_reserve_write
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slot_mut(&self, pos: u64) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.slot_ptr(pos), self.slot_size) }
    }

    /// Returns a status snapshot of the counters.
    pub fn status(&self) -> RingStatus {
        let header = self.header();
        let read = header.read_pos.load(Ordering::Acquire);
        let written = header.write_pos.load(Ordering::Acquire);
        let reserved = header.reserve_pos.load(Ordering::Acquire);
        RingStatus {
            reserved,
            written,
            read,
            capacity: self.capacity,
            len: written.saturating_sub(read),
            dropped: header.drop_count.load(Ordering::Relaxed),
        }
    }
}

/// Status snapshot of a slot ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    /// Positions handed out to producers.
    pub reserved: u64,
    /// Positions published to the consumer.
    pub written: u64,
    /// Positions consumed.
    pub read: u64,
    /// Ring capacity in slots.
    pub capacity: u64,
    /// Current length (written - read).
    pub len: u64,
    /// Pushes rejected because the ring was full.
    pub dropped: u64,
}

impl std::fmt::Display for RingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "head={} tail={} len={}/{} ({}%) dropped={}",
            self.written,
            self.read,
            self.len,
            self.capacity,
            if self.capacity > 0 {
                self.len * 100 / self.capacity
            } else {
                0
            },
            self.dropped
        )?;
        if self.reserved != self.written {
            write!(f, " in_flight={}", self.reserved - self.written)?;
        }
        Ok(())
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    fn ring(slot_size: u64, capacity: u64) -> (HeapRegion, SlotRing) {
        let config = QueueConfig::new(slot_size, capacity);
        let owner = HeapRegion::new_zeroed(config.required_region_size().unwrap());
        let ring = unsafe { SlotRing::init(owner.region(), &config) }.unwrap();
        (owner, ring)
    }

    #[test]
    fn test_header_size() {
        assert_eq!(core::mem::size_of::<SlotRingHeader>(), 320);
    }

    #[test]
    fn reserve_until_full() {
        let (_owner, ring) = ring(16, 4);
        for expected in 0..4 {
            assert_eq!(ring.try_reserve_write(), Some(expected));
        }
        assert_eq!(ring.try_reserve_write(), None);
        assert_eq!(ring.status().reserved, 4);
    }

    #[test]
    fn publish_reports_empty_edge() {
        let (_owner, ring) = ring(16, 4);
        let first = ring.try_reserve_write().unwrap();
        let second = ring.try_reserve_write().unwrap();
        assert!(!ring.has_readable());
        assert!(ring.publish(first));
        assert!(!ring.publish(second));
        assert!(ring.has_readable());
        assert_eq!(ring.len(), 2);

        ring.advance_read();
        ring.advance_read();
        assert!(!ring.has_readable());

        let third = ring.try_reserve_write().unwrap();
        assert!(ring.publish(third));
    }

    #[test]
    fn physical_offset_scales_with_slot_size_and_wraps() {
        let (_owner, ring) = ring(16, 4);
        let base = ring.slot_ptr(0) as usize;
        assert_eq!(ring.slot_ptr(1) as usize - base, 16);
        assert_eq!(ring.slot_ptr(3) as usize - base, 48);
        assert_eq!(ring.slot_ptr(4) as usize, base);
        assert_eq!(ring.slot_ptr(9) as usize - base, 16);
        assert_eq!(
            base - ring.region().as_ptr() as usize,
            size_of::<SlotRingHeader>()
        );
    }

    #[test]
    fn consumer_frees_space() {
        let (_owner, ring) = ring(8, 2);
        for _ in 0..2 {
            let pos = ring.try_reserve_write().unwrap();
            ring.publish(pos);
        }
        assert_eq!(ring.try_reserve_write(), None);
        ring.advance_read();
        assert_eq!(ring.try_reserve_write(), Some(2));
    }

    #[test]
    fn init_rejects_small_or_misaligned_regions() {
        let config = QueueConfig::new(16, 4);
        let owner = HeapRegion::new_zeroed(128);
        let err = unsafe { SlotRing::init(owner.region(), &config) }.err();
        assert_eq!(
            err,
            Some(LayoutError::RegionTooSmall {
                required: config.required_region_size().unwrap(),
                found: 128
            })
        );

        let owner = HeapRegion::new_zeroed(1024);
        let shifted = unsafe { Region::from_raw(owner.region().as_ptr().add(8), 1016) };
        let err = unsafe { SlotRing::init(shifted, &config) }.err();
        assert_eq!(err, Some(LayoutError::Misaligned));
    }

    #[test]
    fn attach_discovers_config() {
        let (owner, ring) = ring(32, 8);
        let pos = ring.try_reserve_write().unwrap();
        ring.publish(pos);

        let peer = unsafe { SlotRing::attach(owner.region()) }.unwrap();
        assert_eq!(peer.capacity(), 8);
        assert_eq!(peer.slot_size(), 32);
        assert!(peer.has_readable());
    }

    #[test]
    fn shared_flag_is_seen_by_peers() {
        let (owner, ring) = ring(16, 2);
        assert!(!ring.is_shared());
        ring.mark_shared();
        let peer = unsafe { SlotRing::attach(owner.region()) }.unwrap();
        assert!(peer.is_shared());
    }

    #[test]
    fn attach_rejects_bad_magic() {
        let owner = HeapRegion::new_zeroed(1024);
        let err = unsafe { SlotRing::attach(owner.region()) }.err();
        assert_eq!(err, Some(LayoutError::InvalidMagic));
    }

    #[test]
    fn status_display() {
        let (_owner, ring) = ring(16, 4);
        let pos = ring.try_reserve_write().unwrap();
        ring.publish(pos);
        ring.record_drop();
        assert_eq!(ring.status().to_string(), "head=1 tail=0 len=1/4 (25%) dropped=1");
        let _ = ring.try_reserve_write();
        assert_eq!(
            ring.status().to_string(),
            "head=1 tail=0 len=1/4 (25%) dropped=1 in_flight=1"
        );
    }
}
