//! AArch64 architecture support: exception vectors, GICv2, the generic
//! timer, page-table encoding, and context switching.

pub mod context;
pub mod frame;
pub mod gic;
pub mod mmu;
pub mod timer;

#[cfg(target_os = "none")]
pub mod vectors;

/// Pre-heap setup: vector table installed, GIC initialized with every
/// interrupt masked. Interrupts stay disabled until the scheduler starts.
#[cfg(target_os = "none")]
pub fn init_early() {
    vectors::install();
    gic::init();
}
