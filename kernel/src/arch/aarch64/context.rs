//! AArch64 context switching.

/// Saved register set for a suspended task.
///
/// AAPCS64 callee-saved registers (x19-x28), frame pointer, the resume
/// program counter, and the stack pointer. `x0` carries the argument into a
/// fresh task's entry; `lr` gives the entry function somewhere to return to.
/// Field order is the asm contract below -- do not reorder.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub sp: u64,  // 0x00
    pub pc: u64,  // 0x08
    pub fp: u64,  // 0x10  (x29)
    pub x19: u64, // 0x18
    pub x20: u64, // 0x20
    pub x21: u64, // 0x28
    pub x22: u64, // 0x30
    pub x23: u64, // 0x38
    pub x24: u64, // 0x40
    pub x25: u64, // 0x48
    pub x26: u64, // 0x50
    pub x27: u64, // 0x58
    pub x28: u64, // 0x60
    pub x0: u64,  // 0x68
    pub lr: u64,  // 0x70  (x30)
    pub daif: u64, // 0x78
}

impl Context {
    /// Context for a task that has never run: resume at `entry` with `arg`
    /// in x0; if the entry function returns, the link register sends it to
    /// `exit_landing`.
    pub fn new(entry: usize, stack_top: usize, arg: usize, exit_landing: usize) -> Self {
        Self {
            // SP must stay 16-byte aligned at all times on AArch64.
            sp: (stack_top & !0xF) as u64,
            pc: entry as u64,
            fp: 0,
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x0: arg as u64,
            lr: exit_landing as u64,
            // All interrupt masks clear: a fresh task starts with IRQs
            // enabled.
            daif: 0,
        }
    }

    /// Zeroed context, overwritten by the first switch away from the
    /// bootstrap task.
    pub const fn empty() -> Self {
        Self {
            sp: 0,
            pc: 0,
            fp: 0,
            x19: 0,
            x20: 0,
            x21: 0,
            x22: 0,
            x23: 0,
            x24: 0,
            x25: 0,
            x26: 0,
            x27: 0,
            x28: 0,
            x0: 0,
            lr: 0,
            daif: 0x3C0,
        }
    }

    pub fn instruction_pointer(&self) -> usize {
        self.pc as usize
    }

    pub fn stack_pointer(&self) -> usize {
        self.sp as usize
    }

    pub fn argument(&self) -> usize {
        self.x0 as usize
    }
}

// context_switch(prev: *mut Context [x0], next: *const Context [x1])
//
// The caller's x30 is both the resume pc and the restored link register; a
// fresh task instead gets pc = entry and lr = exit landing from
// Context::new. DAIF travels with the context so a fresh task starts with
// interrupts enabled. The jump goes through x9 (caller-saved scratch).
#[cfg(target_os = "none")]
core::arch::global_asm!(
    ".global context_switch",
    "context_switch:",
    "    mov x9, sp",
    "    str x9,  [x0, #0x00]",
    "    str x30, [x0, #0x08]",
    "    str x29, [x0, #0x10]",
    "    stp x19, x20, [x0, #0x18]",
    "    stp x21, x22, [x0, #0x28]",
    "    stp x23, x24, [x0, #0x38]",
    "    stp x25, x26, [x0, #0x48]",
    "    stp x27, x28, [x0, #0x58]",
    "    str x30, [x0, #0x70]",
    "    mrs x9, daif",
    "    str x9,  [x0, #0x78]",
    "    ldr x9,  [x1, #0x00]",
    "    mov sp, x9",
    "    ldr x29, [x1, #0x10]",
    "    ldp x19, x20, [x1, #0x18]",
    "    ldp x21, x22, [x1, #0x28]",
    "    ldp x23, x24, [x1, #0x38]",
    "    ldp x25, x26, [x1, #0x48]",
    "    ldp x27, x28, [x1, #0x58]",
    "    ldr x30, [x1, #0x70]",
    "    ldr x9,  [x1, #0x78]",
    "    msr daif, x9",
    "    ldr x9,  [x1, #0x08]",
    "    ldr x0,  [x1, #0x68]",
    "    br x9",
);

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn field_offsets_match_asm() {
        assert_eq!(mem::offset_of!(Context, sp), 0x00);
        assert_eq!(mem::offset_of!(Context, pc), 0x08);
        assert_eq!(mem::offset_of!(Context, fp), 0x10);
        assert_eq!(mem::offset_of!(Context, x19), 0x18);
        assert_eq!(mem::offset_of!(Context, x28), 0x60);
        assert_eq!(mem::offset_of!(Context, x0), 0x68);
        assert_eq!(mem::offset_of!(Context, lr), 0x70);
        assert_eq!(mem::offset_of!(Context, daif), 0x78);
    }

    #[test]
    fn fresh_context_unmasks_interrupts() {
        let ctx = Context::new(0x1000, 0x8000, 0, 0);
        assert_eq!(ctx.daif, 0);
    }

    #[test]
    fn fresh_context_carries_entry_stack_and_arg() {
        let ctx = Context::new(0x4008_0000, 0x4010_0008, 7, 0xBEEF);
        assert_eq!(ctx.instruction_pointer(), 0x4008_0000);
        assert_eq!(ctx.argument(), 7);
        assert_eq!(ctx.stack_pointer() % 16, 0);
        assert_eq!(ctx.lr, 0xBEEF);
    }
}
