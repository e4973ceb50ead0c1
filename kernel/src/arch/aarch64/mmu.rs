//! AArch64 stage-1 translation table encoding (4-level, 4 KiB granule).
//!
//! MAIR layout: attribute index 0 = normal write-back cacheable, index 1 =
//! device nGnRE. Portable code asks for NO_CACHE and gets device memory --
//! that is what MMIO mappings want.

use crate::mm::page_table::MapFlags;

pub const ENTRIES_PER_TABLE: usize = 512;
pub const LEVELS: usize = 4;

const VALID: u64 = 1 << 0;
/// Bit 1: table pointer at levels 3..1, page descriptor at level 0.
const TABLE_OR_PAGE: u64 = 1 << 1;
const ATTR_NORMAL: u64 = 0 << 2;
const ATTR_DEVICE: u64 = 1 << 2;
/// Access permission: EL0 accessible.
const AP_EL0: u64 = 1 << 6;
/// Access permission: read-only.
const AP_RO: u64 = 1 << 7;
/// Inner shareable.
const SH_INNER: u64 = 3 << 8;
/// Access flag; without it the first touch faults.
const AF: u64 = 1 << 10;
/// Privileged execute-never.
const PXN: u64 = 1 << 53;
/// Unprivileged execute-never.
const UXN: u64 = 1 << 54;

const ADDR_MASK: u64 = 0x0000_FFFF_FFFF_F000;

/// Table index of `virt` at `level` (3 = L0 root down to 0 = L3 leaves).
pub fn table_index(virt: usize, level: usize) -> usize {
    (virt >> (12 + 9 * level)) & (ENTRIES_PER_TABLE - 1)
}

/// Leaf (4 KiB page) descriptor.
pub fn encode_leaf(phys: u64, flags: MapFlags) -> u64 {
    let mut entry = VALID | TABLE_OR_PAGE | AF | (phys & ADDR_MASK);

    if flags.contains(MapFlags::NO_CACHE) {
        entry |= ATTR_DEVICE;
    } else {
        entry |= ATTR_NORMAL | SH_INNER;
    }
    if !flags.contains(MapFlags::WRITE) {
        entry |= AP_RO;
    }
    if flags.contains(MapFlags::USER) {
        entry |= AP_EL0;
    }
    // Execute permission is per-EL: a page is executable for exactly the
    // privilege level that owns it.
    if flags.contains(MapFlags::EXECUTE) {
        if flags.contains(MapFlags::USER) {
            entry |= PXN;
        } else {
            entry |= UXN;
        }
    } else {
        entry |= PXN | UXN;
    }
    entry
}

/// Intermediate table descriptor.
pub fn encode_table(phys: u64) -> u64 {
    VALID | TABLE_OR_PAGE | (phys & ADDR_MASK)
}

pub fn entry_present(entry: u64) -> bool {
    entry & VALID != 0
}

pub fn entry_phys(entry: u64) -> u64 {
    entry & ADDR_MASK
}

/// Decode a leaf descriptor back to portable flags.
pub fn decode_flags(entry: u64) -> MapFlags {
    let mut flags = MapFlags::READ;
    if entry & AP_RO == 0 {
        flags |= MapFlags::WRITE;
    }
    if entry & AP_EL0 != 0 {
        flags |= MapFlags::USER;
    }
    if entry & 0x1C == ATTR_DEVICE {
        flags |= MapFlags::NO_CACHE;
    }
    let xn = if entry & AP_EL0 != 0 { UXN } else { PXN };
    if entry & xn == 0 {
        flags |= MapFlags::EXECUTE;
    }
    flags
}

/// Switch TTBR0_EL1 to a new root table. The TLBI/DSB/ISB sequence makes
/// the switch atomic with respect to TLB state.
///
/// # Safety
///
/// `root_phys` must point at a valid L0 table that maps the currently
/// executing kernel.
#[cfg(target_os = "none")]
pub unsafe fn activate(root_phys: u64) {
    // SAFETY: architectural sequence for a translation-table switch.
    unsafe {
        core::arch::asm!(
            "dsb sy",
            "msr ttbr0_el1, {root}",
            "tlbi vmalle1",
            "dsb sy",
            "isb",
            root = in(reg) root_phys,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(target_os = "none")]
pub fn flush_tlb_page(virt: usize) {
    // SAFETY: TLB maintenance by VA; page-number operand per the manual.
    unsafe {
        core::arch::asm!(
            "dsb sy",
            "tlbi vaae1, {page}",
            "dsb sy",
            "isb",
            page = in(reg) (virt >> 12) as u64,
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(target_os = "none")]
pub fn flush_tlb_all() {
    // SAFETY: full EL1 TLB invalidation.
    unsafe {
        core::arch::asm!(
            "dsb sy",
            "tlbi vmalle1",
            "dsb sy",
            "isb",
            options(nostack, preserves_flags)
        );
    }
}

#[cfg(not(target_os = "none"))]
pub fn flush_tlb_page(_virt: usize) {}

#[cfg(not(target_os = "none"))]
pub fn flush_tlb_all() {}

/// One-time MMU bring-up: memory attributes, translation control, then the
/// enable bit. Runs with the identity-mapped root built during mm init.
///
/// # Safety
///
/// `root_phys` must identity-map the kernel image and the UART, or the
/// instruction after the enable faults unrecoverably.
#[cfg(target_os = "none")]
pub unsafe fn enable(root_phys: u64) {
    use aarch64_cpu::registers::{MAIR_EL1, SCTLR_EL1, TCR_EL1, TTBR0_EL1};
    use tock_registers::interfaces::{ReadWriteable, Writeable};

    MAIR_EL1.write(
        // Index 0: normal memory, write-back non-transient.
        MAIR_EL1::Attr0_Normal_Outer::WriteBack_NonTransient_ReadWriteAlloc
            + MAIR_EL1::Attr0_Normal_Inner::WriteBack_NonTransient_ReadWriteAlloc
            // Index 1: device nGnRE.
            + MAIR_EL1::Attr1_Device::nonGathering_nonReordering_EarlyWriteAck,
    );

    TCR_EL1.write(
        TCR_EL1::TG0::KiB_4
            + TCR_EL1::T0SZ.val(16) // 48-bit VA space through TTBR0
            + TCR_EL1::SH0::Inner
            + TCR_EL1::ORGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::IRGN0::WriteBack_ReadAlloc_WriteAlloc_Cacheable
            + TCR_EL1::EPD1::DisableTTBR1Walks
            + TCR_EL1::IPS::Bits_40,
    );

    TTBR0_EL1.set_baddr(root_phys);

    crate::arch::barriers::data_sync_barrier();

    SCTLR_EL1.modify(SCTLR_EL1::M::Enable + SCTLR_EL1::C::Cacheable + SCTLR_EL1::I::Cacheable);

    crate::arch::barriers::data_sync_barrier();
}
