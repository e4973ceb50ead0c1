//! Memory barrier abstractions.
//!
//! Centralizes fence operations so portable code carries no scattered
//! `#[cfg(target_arch)]` assembly. Device-register access pairs every MMIO
//! write with [`memory_fence`]; list-publish sites rely on lock ordering but
//! the fences are available where a lock is not in play.

/// Full memory fence: all reads and writes before the barrier are globally
/// visible before any after it.
///
/// * x86_64: `fence(SeqCst)` (MFENCE semantics).
/// * AArch64: `dsb sy`.
#[inline(always)]
pub fn memory_fence() {
    #[cfg(target_arch = "x86_64")]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy` only orders memory accesses.
        unsafe {
            core::arch::asm!("dsb sy", options(nostack, nomem, preserves_flags));
        }
    }
}

/// Data barrier plus instruction synchronization. Used after writes that
/// affect subsequent instruction fetch or system-register state (page table
/// switches, vector-base updates).
#[inline(always)]
pub fn data_sync_barrier() {
    #[cfg(target_arch = "x86_64")]
    {
        core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `dsb sy; isb` is the standard settle-then-resynchronize
        // pair; no memory side effects.
        unsafe {
            core::arch::asm!("dsb sy", "isb", options(nostack, nomem, preserves_flags));
        }
    }
}

/// Instruction synchronization barrier. No-op on x86_64 (strongly ordered,
/// unified fetch); `isb` on AArch64.
#[inline(always)]
pub fn instruction_sync_barrier() {
    #[cfg(target_arch = "aarch64")]
    {
        // SAFETY: `isb` flushes the pipeline only.
        unsafe {
            core::arch::asm!("isb", options(nostack, nomem, preserves_flags));
        }
    }
}
