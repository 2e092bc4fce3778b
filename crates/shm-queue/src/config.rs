use crate::frame::LEN_PREFIX;
use crate::region::REGION_ALIGN;
use crate::ring::SlotRingHeader;

/// Default slot size in bytes (4KB, including the length prefix).
pub const DEFAULT_SLOT_SIZE: u64 = 4096;

/// Default number of slots.
pub const DEFAULT_CAPACITY_SLOTS: u64 = 64;

/// Geometry of a queue: how many slots, and how large each one is.
///
/// Fixed at construction. An attaching peer discovers it from the ring header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Bytes per slot, including the 4-byte length prefix.
    pub slot_size: u64,
    /// Number of slots in the ring.
    pub capacity_slots: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            slot_size: DEFAULT_SLOT_SIZE,
            capacity_slots: DEFAULT_CAPACITY_SLOTS,
        }
    }
}

impl QueueConfig {
    pub fn new(slot_size: u64, capacity_slots: u64) -> Self {
        Self {
            slot_size,
            capacity_slots,
        }
    }

    /// Check that this geometry can back a queue.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.slot_size == 0 {
            return Err("slot_size must be > 0");
        }
        if self.capacity_slots == 0 {
            return Err("capacity_slots must be > 0");
        }
        if self.slot_size < LEN_PREFIX as u64 {
            return Err("slot_size must hold the 4-byte length prefix");
        }
        if self.payload_capacity() > u32::MAX as u64 {
            return Err("slot payload capacity exceeds the u32 length prefix");
        }
        self.required_region_size()?;
        Ok(())
    }

    /// Largest payload a single slot can carry.
    #[inline]
    pub fn payload_capacity(&self) -> u64 {
        self.slot_size.saturating_sub(LEN_PREFIX as u64)
    }

    /// Bytes of slot storage (`capacity_slots * slot_size`).
    pub fn storage_size(&self) -> Result<usize, &'static str> {
        let slot_size = usize::try_from(self.slot_size).map_err(|_| "slot_size overflows usize")?;
        let capacity =
            usize::try_from(self.capacity_slots).map_err(|_| "capacity_slots overflows usize")?;
        slot_size
            .checked_mul(capacity)
            .ok_or("storage size overflow")
    }

    /// Total bytes a region must provide: ring header followed by slot storage.
    pub fn required_region_size(&self) -> Result<usize, &'static str> {
        let total = size_of::<SlotRingHeader>()
            .checked_add(self.storage_size()?)
            .ok_or("region size overflow")?;
        if total > isize::MAX as usize - REGION_ALIGN {
            return Err("region size overflow");
        }
        Ok(total)
    }
}
