//! EL1 exception vector table.
//!
//! Each used vector saves the complete register file into a [`TrapFrame`]
//! on the current stack, calls into Rust, then restores the (possibly
//! modified) frame and `eret`s. Restoring through the stub resumes the
//! interrupted context bit-exactly; a context switch performed inside the
//! handler simply returns here later on the same kernel stack.

use super::frame::{esr_class, esr_ec, TrapFrame};
use crate::trap::{self, TrapCause, TrapDisposition};

/// Point VBAR_EL1 at the table.
pub fn install() {
    extern "C" {
        static exception_vector_table: u8;
    }
    // SAFETY: the symbol is the 2 KiB-aligned table defined below; writing
    // VBAR_EL1 followed by an ISB is the architectural install sequence.
    unsafe {
        let base = core::ptr::addr_of!(exception_vector_table) as u64;
        core::arch::asm!(
            "msr vbar_el1, {base}",
            "isb",
            base = in(reg) base,
            options(nostack, preserves_flags)
        );
    }
}

/// Rust side of the vector stubs. `kind` 0 = synchronous, 1 = IRQ,
/// 2 = anything this kernel does not service (FIQ, SError, bad state).
#[no_mangle]
extern "C" fn aarch64_trap_handler(frame: &mut TrapFrame, kind: u64) {
    let cause = match kind {
        0 => decode_sync(frame),
        1 => TrapCause::Irq,
        _ => TrapCause::Other(frame.esr),
    };

    match trap::handle(frame, cause) {
        TrapDisposition::FaultHandled => {}
        TrapDisposition::Terminate(reason) => crate::sched::kill_current(reason),
        TrapDisposition::Reschedule => crate::sched::preempt(),
    }
}

fn decode_sync(frame: &TrapFrame) -> TrapCause {
    match esr_class(frame.esr) {
        esr_ec::SVC64 => TrapCause::Syscall,
        esr_ec::INSTR_ABORT_LOWER | esr_ec::INSTR_ABORT_SAME => TrapCause::PageFault {
            addr: frame.far as usize,
            write: false,
        },
        esr_ec::DATA_ABORT_LOWER | esr_ec::DATA_ABORT_SAME => TrapCause::PageFault {
            addr: frame.far as usize,
            // WnR bit of the ISS field.
            write: frame.esr & (1 << 6) != 0,
        },
        esr_ec::PC_ALIGNMENT | esr_ec::SP_ALIGNMENT => TrapCause::Alignment,
        esr_ec::BRK64 => TrapCause::Breakpoint,
        0x00 | 0x0E => TrapCause::InvalidInstruction,
        _ => TrapCause::Other(frame.esr),
    }
}

// The table: 16 slots of 0x80 bytes. Only current-EL-with-SPx sync and IRQ
// are serviced; everything else funnels into the kind=2 path and panics in
// Rust with a register dump.
core::arch::global_asm!(
    // Build a TrapFrame (0x120 bytes, layout in frame.rs) and call the Rust
    // handler with the frame pointer in x0 and the vector kind in x1.
    ".macro TRAP_ENTRY kind",
    "    sub sp, sp, #0x120",
    "    stp x0, x1,   [sp, #0x00]",
    "    stp x2, x3,   [sp, #0x10]",
    "    stp x4, x5,   [sp, #0x20]",
    "    stp x6, x7,   [sp, #0x30]",
    "    stp x8, x9,   [sp, #0x40]",
    "    stp x10, x11, [sp, #0x50]",
    "    stp x12, x13, [sp, #0x60]",
    "    stp x14, x15, [sp, #0x70]",
    "    stp x16, x17, [sp, #0x80]",
    "    stp x18, x19, [sp, #0x90]",
    "    stp x20, x21, [sp, #0xA0]",
    "    stp x22, x23, [sp, #0xB0]",
    "    stp x24, x25, [sp, #0xC0]",
    "    stp x26, x27, [sp, #0xD0]",
    "    stp x28, x29, [sp, #0xE0]",
    "    str x30,      [sp, #0xF0]",
    "    add x9, sp, #0x120",
    "    str x9,       [sp, #0xF8]",
    "    mrs x9, elr_el1",
    "    str x9,       [sp, #0x100]",
    "    mrs x9, spsr_el1",
    "    str x9,       [sp, #0x108]",
    "    mrs x9, esr_el1",
    "    str x9,       [sp, #0x110]",
    "    mrs x9, far_el1",
    "    str x9,       [sp, #0x118]",
    "    mov x0, sp",
    "    mov x1, #\\kind",
    "    bl aarch64_trap_handler",
    "    ldr x9,       [sp, #0x100]",
    "    msr elr_el1, x9",
    "    ldr x9,       [sp, #0x108]",
    "    msr spsr_el1, x9",
    "    ldp x0, x1,   [sp, #0x00]",
    "    ldp x2, x3,   [sp, #0x10]",
    "    ldp x4, x5,   [sp, #0x20]",
    "    ldp x6, x7,   [sp, #0x30]",
    "    ldp x8, x9,   [sp, #0x40]",
    "    ldp x10, x11, [sp, #0x50]",
    "    ldp x12, x13, [sp, #0x60]",
    "    ldp x14, x15, [sp, #0x70]",
    "    ldp x16, x17, [sp, #0x80]",
    "    ldp x18, x19, [sp, #0x90]",
    "    ldp x20, x21, [sp, #0xA0]",
    "    ldp x22, x23, [sp, #0xB0]",
    "    ldp x24, x25, [sp, #0xC0]",
    "    ldp x26, x27, [sp, #0xD0]",
    "    ldp x28, x29, [sp, #0xE0]",
    "    ldr x30,      [sp, #0xF0]",
    "    add sp, sp, #0x120",
    "    eret",
    ".endm",
    "",
    "vector_sync_el1:",
    "    TRAP_ENTRY 0",
    "vector_irq_el1:",
    "    TRAP_ENTRY 1",
    "vector_unhandled:",
    "    TRAP_ENTRY 2",
    "",
    ".balign 0x800",
    ".global exception_vector_table",
    "exception_vector_table:",
    // Current EL with SP0
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    // Current EL with SPx
    ".balign 0x80",
    "    b vector_sync_el1",
    ".balign 0x80",
    "    b vector_irq_el1",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    // Lower EL, AArch64
    ".balign 0x80",
    "    b vector_sync_el1",
    ".balign 0x80",
    "    b vector_irq_el1",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    // Lower EL, AArch32
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
    ".balign 0x80",
    "    b vector_unhandled",
);
