//! Memory management: physical frames, the kernel address space, and the
//! kernel heap.
//!
//! Init order is rigid: frame allocator first (it only needs BootInfo and
//! its statically-reserved bitmap), then the heap (backed by frames), then
//! the kernel address space (its page tables come from the frame
//! allocator).

pub mod frame_allocator;
pub mod heap;
pub mod page_table;

pub use frame_allocator::{FrameNumber, FrameStats};

/// Size of a physical frame and a virtual page.
pub const PAGE_SIZE: usize = 4096;

/// Physical memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 / PAGE_SIZE as u64)
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }
}

/// Virtual memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub const fn is_page_aligned(&self) -> bool {
        self.0 % PAGE_SIZE as u64 == 0
    }
}

/// Translate a physical address to a kernel-accessible pointer. This kernel
/// runs identity-mapped, so the translation is the identity; the function
/// exists so a higher-half port changes one place.
pub fn phys_to_virt(phys: PhysicalAddress) -> VirtualAddress {
    VirtualAddress::new(phys.as_u64())
}

/// Bring up physical allocation, the kernel address space, and the heap.
#[cfg(target_os = "none")]
pub fn init(boot_info: &crate::bootinfo::BootInfo) {
    frame_allocator::init_from_bootinfo(boot_info);
    let stats = frame_allocator::stats();
    log::info!(
        "frame allocator: {} frames managed, {} free",
        stats.total_frames,
        stats.free_frames
    );

    page_table::init_kernel_space(boot_info);

    heap::init();
    log::info!("kernel heap: {} KiB", crate::config::HEAP_SIZE / 1024);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_frame_conversions() {
        let phys = PhysicalAddress::new(0x4000_3000);
        assert_eq!(phys.as_frame().as_u64(), 0x4000_3);
        assert!(phys.is_page_aligned());
        assert!(!PhysicalAddress::new(0x4000_3001).is_page_aligned());
        assert_eq!(phys.as_frame().as_addr().as_u64(), 0x4000_3000);
    }
}
