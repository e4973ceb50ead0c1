//! Address spaces: 4-level page tables with page-granularity protection.
//!
//! The walker is architecture-independent; entry encodings, TLB
//! maintenance, and activation come from `arch::mmu`. Page-table pages are
//! owned by the `AddressSpace` that allocated them. The kernel half is
//! built once at boot and shared by construction: every address space
//! created later copies the kernel root entries.

use bitflags::bitflags;

use super::{frame_allocator, FrameNumber, PhysicalAddress, VirtualAddress, PAGE_SIZE};
use crate::error::{KernelResult, MapError};

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
use crate::arch::aarch64::mmu;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use crate::arch::x86_64::mmu;

bitflags! {
    /// Portable mapping permissions; each architecture encodes them into
    /// its descriptor format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const READ     = 1 << 0;
        const WRITE    = 1 << 1;
        const EXECUTE  = 1 << 2;
        const USER     = 1 << 3;
        /// Non-cacheable (device/MMIO) memory.
        const NO_CACHE = 1 << 4;
    }
}

impl MapFlags {
    /// Kernel code and read-only data.
    pub fn kernel_rx() -> Self {
        Self::READ | Self::EXECUTE
    }

    /// Kernel data, stacks, and heap.
    pub fn kernel_rw() -> Self {
        Self::READ | Self::WRITE
    }

    /// Device registers.
    pub fn device() -> Self {
        Self::READ | Self::WRITE | Self::NO_CACHE
    }
}

/// A virtual-to-physical mapping rooted at one top-level table.
pub struct AddressSpace {
    root: FrameNumber,
}

#[cfg(target_os = "none")]
impl AddressSpace {
    /// Create an empty address space (one zeroed root table).
    pub fn new() -> KernelResult<Self> {
        let root = frame_allocator::alloc_zeroed(1, 1)?;
        Ok(Self { root })
    }

    pub fn root_phys(&self) -> PhysicalAddress {
        self.root.as_addr()
    }

    /// Pointer to the table stored in `frame`.
    fn table_ptr(frame: FrameNumber) -> *mut u64 {
        super::phys_to_virt(frame.as_addr()).as_usize() as *mut u64
    }

    /// Walk to the leaf table covering `virt`, optionally creating
    /// intermediate tables.
    fn leaf_table(&mut self, virt: usize, create: bool) -> Result<*mut u64, MapError> {
        let mut table = Self::table_ptr(self.root);
        for level in (1..mmu::LEVELS).rev() {
            let index = mmu::table_index(virt, level);
            // SAFETY: `table` points at an owned, identity-mapped table
            // page; `index` is below ENTRIES_PER_TABLE.
            let entry = unsafe { table.add(index).read_volatile() };
            table = if mmu::entry_present(entry) {
                Self::table_ptr(PhysicalAddress::new(mmu::entry_phys(entry)).as_frame())
            } else if create {
                let frame =
                    frame_allocator::alloc_zeroed(1, 1).map_err(|_| MapError::OutOfMemory)?;
                // Publish order: the new table page is fully zeroed before
                // the parent entry makes it reachable.
                crate::arch::barriers::memory_fence();
                // SAFETY: writing the parent slot we just read.
                unsafe {
                    table
                        .add(index)
                        .write_volatile(mmu::encode_table(frame.as_addr().as_u64()));
                }
                Self::table_ptr(frame)
            } else {
                return Err(MapError::NotMapped { virt });
            };
        }
        Ok(table)
    }

    /// Install `pages` mappings starting at `virt` -> `phys`. Overlap with
    /// an existing mapping fails with `AlreadyMapped` unless `replace`.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        pages: usize,
        flags: MapFlags,
        replace: bool,
    ) -> KernelResult<()> {
        if !virt.is_page_aligned() || !phys.is_page_aligned() {
            return Err(MapError::Misaligned.into());
        }
        for page in 0..pages {
            let v = virt.as_usize() + page * PAGE_SIZE;
            let p = phys.as_u64() + (page * PAGE_SIZE) as u64;
            let table = self.leaf_table(v, true)?;
            let index = mmu::table_index(v, 0);
            // SAFETY: leaf table pointer from the walk; index in range.
            unsafe {
                let slot = table.add(index);
                if mmu::entry_present(slot.read_volatile()) && !replace {
                    return Err(MapError::AlreadyMapped { virt: v }.into());
                }
                slot.write_volatile(mmu::encode_leaf(p, flags));
            }
            mmu::flush_tlb_page(v);
        }
        Ok(())
    }

    /// Remove `pages` mappings and invalidate the TLB for the range.
    pub fn unmap(&mut self, virt: VirtualAddress, pages: usize) -> KernelResult<()> {
        if !virt.is_page_aligned() {
            return Err(MapError::Misaligned.into());
        }
        for page in 0..pages {
            let v = virt.as_usize() + page * PAGE_SIZE;
            let table = self.leaf_table(v, false)?;
            let index = mmu::table_index(v, 0);
            // SAFETY: leaf table pointer from the walk; index in range.
            unsafe {
                let slot = table.add(index);
                if !mmu::entry_present(slot.read_volatile()) {
                    return Err(MapError::NotMapped { virt: v }.into());
                }
                slot.write_volatile(0);
            }
            mmu::flush_tlb_page(v);
        }
        Ok(())
    }

    /// Change permission bits without remapping.
    pub fn protect(
        &mut self,
        virt: VirtualAddress,
        pages: usize,
        flags: MapFlags,
    ) -> KernelResult<()> {
        if !virt.is_page_aligned() {
            return Err(MapError::Misaligned.into());
        }
        for page in 0..pages {
            let v = virt.as_usize() + page * PAGE_SIZE;
            let table = self.leaf_table(v, false)?;
            let index = mmu::table_index(v, 0);
            // SAFETY: leaf table pointer from the walk; index in range.
            unsafe {
                let slot = table.add(index);
                let entry = slot.read_volatile();
                if !mmu::entry_present(entry) {
                    return Err(MapError::NotMapped { virt: v }.into());
                }
                slot.write_volatile(mmu::encode_leaf(mmu::entry_phys(entry), flags));
            }
            mmu::flush_tlb_page(v);
        }
        Ok(())
    }

    /// Look up the physical address and flags for `virt`.
    pub fn translate(&mut self, virt: VirtualAddress) -> Option<(PhysicalAddress, MapFlags)> {
        let v = virt.as_usize();
        let table = self.leaf_table(v & !(PAGE_SIZE - 1), false).ok()?;
        let index = mmu::table_index(v, 0);
        // SAFETY: leaf table pointer from the walk; index in range.
        let entry = unsafe { table.add(index).read_volatile() };
        if !mmu::entry_present(entry) {
            return None;
        }
        Some((
            PhysicalAddress::new(mmu::entry_phys(entry) + (v & (PAGE_SIZE - 1)) as u64),
            mmu::decode_flags(entry),
        ))
    }

    /// Switch the CPU onto this address space.
    ///
    /// # Safety
    ///
    /// The space must map the currently executing kernel identically to
    /// the active one, or the next instruction fetch faults.
    pub unsafe fn activate(&self) {
        // SAFETY: forwarded contract; the arch sequence is atomic with
        // respect to TLB state.
        unsafe { mmu::activate(self.root.as_addr().as_u64()) }
    }
}

/// The kernel's own address space, shared (by construction) with every
/// task in this core.
#[cfg(target_os = "none")]
static KERNEL_SPACE: spin::Mutex<Option<AddressSpace>> = spin::Mutex::new(None);

/// Build the kernel address space: image RX/RW-NX split, all Available RAM
/// RW-NX, device windows non-cacheable -- then switch onto it.
#[cfg(target_os = "none")]
pub fn init_kernel_space(boot_info: &crate::bootinfo::BootInfo) {
    let mut space = match AddressSpace::new() {
        Ok(s) => s,
        Err(e) => panic!("cannot allocate kernel root table: {}", e),
    };

    // All Available RAM: writable, never executable.
    for region in boot_info.memory_map() {
        if !region.is_available() {
            continue;
        }
        let base = region.phys_base & !(PAGE_SIZE as u64 - 1);
        let pages = (region.end() - base).div_ceil(PAGE_SIZE as u64) as usize;
        if let Err(e) = space.map(
            VirtualAddress::new(base),
            PhysicalAddress::new(base),
            pages,
            MapFlags::kernel_rw(),
            false,
        ) {
            panic!("kernel RAM map failed: {}", e);
        }
    }

    // Kernel image: code and rodata RX, the rest RW-NX. The image range
    // overlaps the RAM mapping above, so replace.
    let (text_start, text_end) = crate::arch::kernel_text_range();
    if text_end > text_start {
        let pages = (text_end - text_start).div_ceil(PAGE_SIZE as u64) as usize;
        if let Err(e) = space.map(
            VirtualAddress::new(text_start),
            PhysicalAddress::new(text_start),
            pages,
            MapFlags::kernel_rx(),
            true,
        ) {
            panic!("kernel text map failed: {}", e);
        }
    }

    // Device windows.
    for &(base, len) in crate::arch::mmio_windows() {
        let pages = (len as usize).div_ceil(PAGE_SIZE);
        if let Err(e) = space.map(
            VirtualAddress::new(base),
            PhysicalAddress::new(base),
            pages,
            MapFlags::device(),
            true,
        ) {
            panic!("MMIO map failed: {}", e);
        }
    }

    // SAFETY: the space identity-maps the kernel image and all RAM, so
    // execution continues seamlessly across the switch.
    unsafe {
        space.activate();
    }
    #[cfg(target_arch = "aarch64")]
    // SAFETY: same mapping argument; this also flips the MMU on if the
    // boot stub left it disabled.
    unsafe {
        mmu::enable(space.root_phys().as_u64());
    }

    *KERNEL_SPACE.lock() = Some(space);
    log::info!("kernel address space active");
}

/// Run `f` against the kernel address space.
#[cfg(target_os = "none")]
pub fn with_kernel_space<R>(f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
    let mut guard = KERNEL_SPACE.lock();
    guard.as_mut().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_flag_combinations() {
        assert!(MapFlags::kernel_rx().contains(MapFlags::EXECUTE));
        assert!(!MapFlags::kernel_rx().contains(MapFlags::WRITE));
        assert!(!MapFlags::kernel_rw().contains(MapFlags::EXECUTE));
        assert!(MapFlags::device().contains(MapFlags::NO_CACHE));
        assert!(!MapFlags::device().contains(MapFlags::USER));
    }
}
