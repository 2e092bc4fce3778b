use core::ptr::NonNull;
use std::alloc::{self, Layout};

/// Alignment of every region handed to a queue (one cache line).
pub const REGION_ALIGN: usize = 64;

/// A borrowed view of a contiguous byte region, typically a shared memory mapping.
///
/// `Region` is a plain pointer + length pair. It does not own the memory;
/// whoever created it is responsible for keeping the mapping alive for as long
/// as any view into it is in use.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    base: *mut u8,
    len: usize,
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region from a raw pointer and length.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for the whole
    /// time this region (or any copy of it) is used.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Returns true if the start of the region is aligned to `align`.
    #[inline]
    pub fn is_aligned_to(&self, align: usize) -> bool {
        (self.base as usize).is_multiple_of(align)
    }

    /// Pointer to `offset` bytes into the region.
    ///
    /// # Safety
    ///
    /// `offset` must be `<= len`.
    #[inline]
    pub unsafe fn offset(&self, offset: usize) -> *mut u8 {
        debug_assert!(offset <= self.len);
        unsafe { self.base.add(offset) }
    }

    /// Shared reference to a `T` at `offset`.
    ///
    /// # Safety
    ///
    /// A valid, initialized `T` must live at `offset`, properly aligned and
    /// entirely within the region.
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        debug_assert!(offset + size_of::<T>() <= self.len);
        unsafe { &*(self.base.add(offset) as *const T) }
    }
}

/// A heap allocation that backs a [`Region`], for in-process queues and tests.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Allocate `len` zeroed bytes aligned to [`REGION_ALIGN`].
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    pub fn new_zeroed(len: usize) -> Self {
        assert!(len > 0, "region length must be > 0");
        match Self::try_new_zeroed(len) {
            Some(region) => region,
            None => panic!("failed to allocate a {len}-byte region"),
        }
    }

    /// Like [`new_zeroed`](Self::new_zeroed), but returns `None` for a zero
    /// length, an impossible layout, or an allocator failure.
    pub fn try_new_zeroed(len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, REGION_ALIGN).ok()?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)?;
        Some(Self { ptr, layout })
    }

    /// A view of the allocation. Valid for as long as `self` lives.
    pub fn region(&self) -> Region {
        // SAFETY: the allocation is `layout.size()` bytes and lives as long as self.
        unsafe { Region::from_raw(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `new_zeroed` with this exact layout.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_region_is_zeroed_and_aligned() {
        let owner = HeapRegion::new_zeroed(256);
        let region = owner.region();
        assert_eq!(region.len(), 256);
        assert!(region.is_aligned_to(REGION_ALIGN));
        let bytes = unsafe { core::slice::from_raw_parts(region.as_ptr(), region.len()) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[test]
    fn try_new_zeroed_reports_failure() {
        assert!(HeapRegion::try_new_zeroed(0).is_none());
        assert!(HeapRegion::try_new_zeroed(usize::MAX).is_none());
        assert_eq!(HeapRegion::try_new_zeroed(64).map(|r| r.len()), Some(64));
    }

    #[test]
    #[should_panic(expected = "region length must be > 0")]
    fn heap_region_rejects_zero_length() {
        let _ = HeapRegion::new_zeroed(0);
    }
}
