//! x86_64 page-table entry encoding (4-level, 4 KiB pages).
//!
//! The portable walker in `mm::page_table` drives these primitives. The
//! encode/decode pair is pure so the permission-bit translation is unit
//! tested on the host.

use crate::mm::page_table::MapFlags;

pub const ENTRIES_PER_TABLE: usize = 512;
pub const LEVELS: usize = 4;

const PRESENT: u64 = 1 << 0;
const WRITABLE: u64 = 1 << 1;
const USER: u64 = 1 << 2;
const WRITE_THROUGH: u64 = 1 << 3;
const NO_CACHE: u64 = 1 << 4;
const NX: u64 = 1 << 63;

const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

/// Table index of `virt` at `level` (3 = PML4 down to 0 = PT).
pub fn table_index(virt: usize, level: usize) -> usize {
    (virt >> (12 + 9 * level)) & (ENTRIES_PER_TABLE - 1)
}

/// Leaf (4 KiB page) entry.
pub fn encode_leaf(phys: u64, flags: MapFlags) -> u64 {
    let mut entry = PRESENT | (phys & ADDR_MASK);
    if flags.contains(MapFlags::WRITE) {
        entry |= WRITABLE;
    }
    if flags.contains(MapFlags::USER) {
        entry |= USER;
    }
    if flags.contains(MapFlags::NO_CACHE) {
        entry |= NO_CACHE | WRITE_THROUGH;
    }
    if !flags.contains(MapFlags::EXECUTE) {
        entry |= NX;
    }
    entry
}

/// Intermediate table entry. Kept permissive; leaves enforce permissions.
pub fn encode_table(phys: u64) -> u64 {
    PRESENT | WRITABLE | USER | (phys & ADDR_MASK)
}

pub fn entry_present(entry: u64) -> bool {
    entry & PRESENT != 0
}

pub fn entry_phys(entry: u64) -> u64 {
    entry & ADDR_MASK
}

/// Decode a leaf back to portable flags.
pub fn decode_flags(entry: u64) -> MapFlags {
    let mut flags = MapFlags::READ;
    if entry & WRITABLE != 0 {
        flags |= MapFlags::WRITE;
    }
    if entry & USER != 0 {
        flags |= MapFlags::USER;
    }
    if entry & NO_CACHE != 0 {
        flags |= MapFlags::NO_CACHE;
    }
    if entry & NX == 0 {
        flags |= MapFlags::EXECUTE;
    }
    flags
}

/// Load CR3 with the new root. Atomic with respect to TLB state: the CR3
/// write flushes all non-global entries.
///
/// # Safety
///
/// `root_phys` must be the physical address of a valid PML4 whose kernel
/// half covers the currently executing code.
#[cfg(target_os = "none")]
pub unsafe fn activate(root_phys: u64) {
    use x86_64::{
        registers::control::{Cr3, Cr3Flags},
        structures::paging::PhysFrame,
        PhysAddr,
    };
    // SAFETY: forwarded caller contract.
    unsafe {
        Cr3::write(
            PhysFrame::containing_address(PhysAddr::new(root_phys)),
            Cr3Flags::empty(),
        );
    }
}

#[cfg(target_os = "none")]
pub fn flush_tlb_page(virt: usize) {
    x86_64::instructions::tlb::flush(x86_64::VirtAddr::new(virt as u64));
}

#[cfg(target_os = "none")]
pub fn flush_tlb_all() {
    x86_64::instructions::tlb::flush_all();
}

#[cfg(not(target_os = "none"))]
pub fn flush_tlb_page(_virt: usize) {}

#[cfg(not(target_os = "none"))]
pub fn flush_tlb_all() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_cover_the_address() {
        let virt = 0o777_776_775_774_0000usize; // distinct index per level
        assert_eq!(table_index(virt, 3), 0o777);
        assert_eq!(table_index(virt, 2), 0o776);
        assert_eq!(table_index(virt, 1), 0o775);
        assert_eq!(table_index(virt, 0), 0o774);
    }

    #[test]
    fn leaf_roundtrips_flags() {
        let phys = 0x1234_5000;
        for flags in [
            MapFlags::READ,
            MapFlags::READ | MapFlags::WRITE,
            MapFlags::READ | MapFlags::EXECUTE,
            MapFlags::READ | MapFlags::WRITE | MapFlags::USER,
            MapFlags::READ | MapFlags::WRITE | MapFlags::NO_CACHE,
        ] {
            let entry = encode_leaf(phys, flags);
            assert!(entry_present(entry));
            assert_eq!(entry_phys(entry), phys);
            assert_eq!(decode_flags(entry), flags);
        }
    }

    #[test]
    fn kernel_data_is_never_executable() {
        let entry = encode_leaf(0x1000, MapFlags::READ | MapFlags::WRITE);
        assert_eq!(entry & NX, NX);
    }
}
