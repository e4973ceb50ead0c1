//! x86_64 architecture support: GDT/IDT, legacy PIC, PIT timer, page-table
//! encoding, and context switching.

pub mod context;
pub mod frame;
pub mod mmu;
pub mod timer;

#[cfg(target_os = "none")]
pub mod gdt;
#[cfg(target_os = "none")]
pub mod idt;
#[cfg(target_os = "none")]
pub mod pic;

/// Pre-heap setup: segmentation, trap vectors, and the PIC remapped with
/// every line masked. Interrupts stay disabled until the scheduler starts.
#[cfg(target_os = "none")]
pub fn init_early() {
    gdt::init();
    idt::init();
    pic::init();
}
