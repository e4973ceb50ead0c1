//! Bitmap physical frame allocator.
//!
//! One bit per 4 KiB frame; a set bit means "used". The bitmap and its
//! bookkeeping live in statically-reserved, explicitly initialized storage
//! -- pre-set to all-used -- because the x86-64 boot path cannot be trusted
//! to zero BSS. Init then clears the bits covering Available BootInfo
//! regions and force-marks the null frame, the sub-1MiB area (x86-64), and
//! the kernel image.
//!
//! Bit 0 of the bitmap covers `base`, the first frame of the lowest
//! Available region (RAM starts at 1 GiB on the QEMU virt machine, so the
//! bitmap cannot anchor at physical zero). Frames outside the managed span
//! read as "used" and are never handed out.

use spin::Mutex;

use super::{PhysicalAddress, PAGE_SIZE};
use crate::{config::MAX_FRAMES, error::KernelError};

const BITMAP_WORDS: usize = MAX_FRAMES / 64;

/// Marker for "no region added yet".
const BASE_UNSET: u64 = u64::MAX;

/// Physical frame number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(num: u64) -> Self {
        Self(num)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_addr(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE as u64)
    }
}

/// Allocator-local error type; flattened into [`KernelError`] at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// No run of the requested size and alignment exists.
    OutOfMemory,
    /// free() of a frame that is already free, or was never allocated.
    InvalidFree,
    /// Request beyond the bitmap-managed pool.
    OutOfRange,
    /// Zero-page or zero-alignment request.
    InvalidRequest,
}

impl From<FrameError> for KernelError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::OutOfMemory => KernelError::OutOfMemory,
            FrameError::InvalidFree => KernelError::BadState {
                what: "double free of a page frame",
            },
            FrameError::OutOfRange => KernelError::InvalidArgument {
                what: "frame beyond managed pool",
            },
            FrameError::InvalidRequest => KernelError::InvalidArgument {
                what: "zero-sized frame request",
            },
        }
    }
}

/// Allocator statistics, surfaced by the shell's `free` builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub total_frames: usize,
    pub free_frames: usize,
}

/// The allocator proper. Separate from the global so tests drive private
/// instances.
#[derive(Clone)]
pub struct BitmapFrameAllocator {
    /// Bit i set = frame `base + i` used. Pre-set to all-used.
    bitmap: [u64; BITMAP_WORDS],
    /// First frame covered by the bitmap; anchored by the first region.
    base: u64,
    /// One past the highest managed frame (absolute frame number).
    limit: u64,
    free_frames: usize,
    total_frames: usize,
}

impl BitmapFrameAllocator {
    pub const fn new() -> Self {
        Self {
            bitmap: [u64::MAX; BITMAP_WORDS],
            base: BASE_UNSET,
            limit: 0,
            free_frames: 0,
            total_frames: 0,
        }
    }

    /// Bitmap index of an absolute frame number, if inside the managed
    /// span.
    fn idx(&self, frame: u64) -> Option<usize> {
        if self.base == BASE_UNSET {
            return None;
        }
        if frame < self.base || frame >= self.base + MAX_FRAMES as u64 {
            return None;
        }
        Some((frame - self.base) as usize)
    }

    fn bit_is_set(&self, frame: u64) -> bool {
        match self.idx(frame) {
            Some(i) => self.bitmap[i / 64] & (1 << (i % 64)) != 0,
            // Outside the pool is permanently "used".
            None => true,
        }
    }

    fn set_bit(&mut self, frame: u64) {
        if let Some(i) = self.idx(frame) {
            self.bitmap[i / 64] |= 1 << (i % 64);
        }
    }

    fn clear_bit(&mut self, frame: u64) {
        if let Some(i) = self.idx(frame) {
            self.bitmap[i / 64] &= !(1 << (i % 64));
        }
    }

    /// Make an Available region allocatable. Partial pages at either edge
    /// are trimmed inward. The first region anchors the bitmap base.
    pub fn add_region(&mut self, phys_base: u64, length: u64) {
        let first = phys_base.div_ceil(PAGE_SIZE as u64);
        let last = (phys_base + length) / PAGE_SIZE as u64; // exclusive
        if first >= last {
            return;
        }
        if self.base == BASE_UNSET {
            // Word-align the anchor so index arithmetic stays simple.
            self.base = first & !63;
        }
        for frame in first..last {
            if self.idx(frame).is_none() {
                log::warn!("memory beyond the managed pool span ignored");
                break;
            }
            if self.bit_is_set(frame) {
                self.clear_bit(frame);
                self.free_frames += 1;
                self.total_frames += 1;
            }
        }
        self.limit = self
            .limit
            .max(last.min(self.base + MAX_FRAMES as u64));
    }

    /// Force-mark a physical range used (kernel image, legacy areas).
    /// Partial pages at either edge are covered, not trimmed.
    pub fn reserve_range(&mut self, start: u64, end: u64) {
        let first = start / PAGE_SIZE as u64;
        let last = end.div_ceil(PAGE_SIZE as u64);
        for frame in first..last {
            if !self.bit_is_set(frame) {
                self.set_bit(frame);
                self.free_frames -= 1;
            }
        }
    }

    /// Allocate `pages` contiguous frames aligned to `align_pages`.
    /// First fit, lowest address wins. Content is undefined; use
    /// [`alloc_zeroed`] when zeroing matters.
    pub fn alloc(&mut self, pages: usize, align_pages: usize) -> Result<FrameNumber, FrameError> {
        if pages == 0 || align_pages == 0 || !align_pages.is_power_of_two() {
            return Err(FrameError::InvalidRequest);
        }
        if pages > self.free_frames || self.base == BASE_UNSET {
            return Err(FrameError::OutOfMemory);
        }

        let align = align_pages as u64;
        // Frame zero is the null-frame guard; never scanned even when a
        // region covers it.
        let start = self.base.max(1);
        let mut candidate = start.div_ceil(align) * align;
        while candidate + pages as u64 <= self.limit {
            match self.first_used_in(candidate, pages as u64) {
                None => {
                    for frame in candidate..candidate + pages as u64 {
                        self.set_bit(frame);
                    }
                    self.free_frames -= pages;
                    return Ok(FrameNumber::new(candidate));
                }
                Some(used) => {
                    // Skip past the blocker, keeping alignment.
                    candidate = (used + 1).div_ceil(align) * align;
                }
            }
        }
        Err(FrameError::OutOfMemory)
    }

    fn first_used_in(&self, start: u64, count: u64) -> Option<u64> {
        (start..start + count).find(|&frame| self.bit_is_set(frame))
    }

    /// Return a run to the pool. Freeing an unallocated frame is a caller
    /// bug and fails without changing any state.
    pub fn free(&mut self, frame: FrameNumber, pages: usize) -> Result<(), FrameError> {
        let start = frame.as_u64();
        if pages == 0 {
            return Err(FrameError::InvalidRequest);
        }
        if start == 0 || start + pages as u64 > self.limit || self.idx(start).is_none() {
            return Err(FrameError::OutOfRange);
        }
        // Validate the whole run before mutating anything.
        for f in start..start + pages as u64 {
            if !self.bit_is_set(f) {
                return Err(FrameError::InvalidFree);
            }
        }
        for f in start..start + pages as u64 {
            self.clear_bit(f);
        }
        self.free_frames += pages;
        Ok(())
    }

    pub fn is_used(&self, frame: FrameNumber) -> bool {
        self.bit_is_set(frame.as_u64())
    }

    pub fn stats(&self) -> FrameStats {
        FrameStats {
            total_frames: self.total_frames,
            free_frames: self.free_frames,
        }
    }

    #[cfg(test)]
    fn bitmap_words(&self) -> &[u64] {
        &self.bitmap
    }
}

impl Default for BitmapFrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// The global instance. `Mutex::new(BitmapFrameAllocator::new())` is a const
// initializer, so the 16 KiB bitmap sits in .data pre-set to all-used.
static FRAME_ALLOCATOR: Mutex<BitmapFrameAllocator> = Mutex::new(BitmapFrameAllocator::new());

/// Populate the global allocator from the boot memory map and reserve the
/// ranges the kernel must never hand out.
pub fn init_from_bootinfo(boot_info: &crate::bootinfo::BootInfo) {
    let mut alloc = FRAME_ALLOCATOR.lock();
    for region in boot_info.memory_map() {
        if region.is_available() {
            alloc.add_region(region.phys_base, region.length);
        }
    }

    // Null-frame guard.
    alloc.reserve_range(0, PAGE_SIZE as u64);

    // Legacy area: firmware structures, the EBDA, and real-mode vectors.
    #[cfg(target_arch = "x86_64")]
    alloc.reserve_range(0, 0x10_0000);

    let (kernel_start, kernel_end) = crate::arch::kernel_image_range();
    if kernel_end > kernel_start {
        alloc.reserve_range(kernel_start, kernel_end);
    }
}

/// Allocate frames from the global pool.
pub fn alloc(pages: usize, align_pages: usize) -> Result<FrameNumber, FrameError> {
    FRAME_ALLOCATOR.lock().alloc(pages, align_pages)
}

/// Allocate and zero-fill frames.
pub fn alloc_zeroed(pages: usize, align_pages: usize) -> Result<FrameNumber, FrameError> {
    let frame = alloc(pages, align_pages)?;
    #[cfg(target_os = "none")]
    {
        let virt = super::phys_to_virt(frame.as_addr());
        // SAFETY: the run was just allocated, so the kernel owns it; the
        // identity mapping makes it addressable.
        unsafe {
            core::ptr::write_bytes(virt.as_usize() as *mut u8, 0, pages * PAGE_SIZE);
        }
    }
    Ok(frame)
}

/// Free frames back to the global pool.
pub fn free(frame: FrameNumber, pages: usize) -> Result<(), FrameError> {
    FRAME_ALLOCATOR.lock().free(frame, pages)
}

pub fn stats() -> FrameStats {
    FRAME_ALLOCATOR.lock().stats()
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    /// Allocator covering scenario 1's memory map: 128 MiB at 1 GiB.
    fn test_allocator() -> Box<BitmapFrameAllocator> {
        let mut alloc = Box::new(BitmapFrameAllocator::new());
        alloc.add_region(0x4000_0000, 128 * 1024 * 1024);
        alloc
    }

    #[test]
    fn fresh_allocator_is_all_used() {
        let alloc = BitmapFrameAllocator::new();
        assert_eq!(alloc.stats().free_frames, 0);
        assert!(alloc.is_used(FrameNumber::new(0)));
        assert!(alloc.is_used(FrameNumber::new(12345)));
    }

    #[test]
    fn one_gib_region_is_fully_managed() {
        let alloc = test_allocator();
        let stats = alloc.stats();
        assert_eq!(stats.free_frames, 128 * 1024 * 1024 / PAGE_SIZE);
        assert!(!alloc.is_used(FrameNumber::new(0x4000_0000 / PAGE_SIZE as u64)));
    }

    #[test]
    fn add_region_frees_whole_pages_only() {
        let mut alloc = Box::new(BitmapFrameAllocator::new());
        // 0x1800 bytes starting mid-page: only the one fully covered page.
        alloc.add_region(0x800, 0x1800);
        assert_eq!(alloc.stats().free_frames, 1);
        assert!(!alloc.is_used(FrameNumber::new(1)));
    }

    #[test]
    fn alloc_marks_used_and_free_restores() {
        let mut alloc = test_allocator();
        let before: alloc::vec::Vec<u64> = alloc.bitmap_words().into();
        let free_before = alloc.stats().free_frames;

        let frame = alloc.alloc(4, 1).unwrap();
        for i in 0..4 {
            assert!(alloc.is_used(FrameNumber::new(frame.as_u64() + i)));
        }
        assert_eq!(alloc.stats().free_frames, free_before - 4);

        alloc.free(frame, 4).unwrap();
        // Round trip restores the exact pre-state.
        assert_eq!(alloc.bitmap_words(), &before[..]);
        assert_eq!(alloc.stats().free_frames, free_before);
    }

    #[test]
    fn lowest_address_wins() {
        let mut alloc = test_allocator();
        let a = alloc.alloc(1, 1).unwrap();
        let b = alloc.alloc(1, 1).unwrap();
        assert!(a < b);
        // Freeing the lower one makes it the next candidate again.
        alloc.free(a, 1).unwrap();
        let c = alloc.alloc(1, 1).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn alignment_is_honored() {
        let mut alloc = test_allocator();
        // Occupy the first frame so an aligned request has to skip ahead.
        let first = alloc.alloc(1, 1).unwrap();
        let aligned = alloc.alloc(2, 16).unwrap();
        assert_eq!(aligned.as_u64() % 16, 0);
        assert!(aligned > first);
    }

    #[test]
    fn double_free_fails_without_state_change() {
        let mut alloc = test_allocator();
        let frame = alloc.alloc(2, 1).unwrap();
        alloc.free(frame, 2).unwrap();
        let stats = alloc.stats();
        assert_eq!(alloc.free(frame, 2), Err(FrameError::InvalidFree));
        assert_eq!(alloc.stats(), stats);
    }

    #[test]
    fn frame_zero_never_allocated() {
        let mut alloc = Box::new(BitmapFrameAllocator::new());
        // Region starting at physical zero: frame 0 still must not be
        // handed out.
        alloc.add_region(0, 1024 * 1024);
        let frame = alloc.alloc(1, 1).unwrap();
        assert!(frame.as_u64() > 0);
    }

    #[test]
    fn requests_beyond_pool_fail() {
        let mut alloc = test_allocator();
        let total = alloc.stats().free_frames;
        assert_eq!(alloc.alloc(total + 1, 1), Err(FrameError::OutOfMemory));
        // A frame far past the managed span cannot be freed.
        assert_eq!(
            alloc.free(FrameNumber::new(0x9000_0000 / PAGE_SIZE as u64), 1),
            Err(FrameError::OutOfRange)
        );
    }

    #[test]
    fn reserved_ranges_stay_used() {
        let mut alloc = Box::new(BitmapFrameAllocator::new());
        alloc.add_region(0, 16 * 1024 * 1024);
        alloc.reserve_range(0, 0x10_0000);
        // 256 frames below 1 MiB are pinned.
        for frame in 0..256 {
            assert!(alloc.is_used(FrameNumber::new(frame)));
        }
        let frame = alloc.alloc(1, 1).unwrap();
        assert!(frame.as_u64() >= 256);
    }

    #[test]
    fn zero_page_request_rejected() {
        let mut alloc = test_allocator();
        assert_eq!(alloc.alloc(0, 1), Err(FrameError::InvalidRequest));
        assert_eq!(alloc.alloc(1, 0), Err(FrameError::InvalidRequest));
    }
}
