//! x86_64 context switching.

/// Saved register set for a suspended task.
///
/// Only the System-V callee-saved set plus `rsp`/`rip` needs to survive a
/// cooperative switch; caller-saved registers are dead at the call site by
/// ABI. `rdi` is included so a fresh task receives its argument in the
/// first-argument register. Field order is the asm contract below -- do not
/// reorder.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Context {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbp: u64, // 0x10
    pub rbx: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
    pub rdi: u64, // 0x40
    pub rflags: u64, // 0x48
}

impl Context {
    /// Context for a task that has never run: resume at `entry` with `arg`
    /// in rdi and an empty stack whose fake return address lands in
    /// `exit_landing` if the entry function ever returns.
    pub fn new(entry: usize, stack_top: usize, arg: usize, exit_landing: usize) -> Self {
        // The ABI wants rsp == 8 mod 16 at function entry, as after a
        // call. Align the top down, then push the fake return address.
        let top = stack_top & !0xF;
        let rsp = top - 8;
        #[cfg(target_os = "none")]
        // SAFETY: `rsp` lies within the task's freshly allocated stack.
        unsafe {
            core::ptr::write(rsp as *mut u64, exit_landing as u64);
        }
        #[cfg(not(target_os = "none"))]
        let _ = exit_landing;

        Self {
            rsp: rsp as u64,
            rip: entry as u64,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rdi: arg as u64,
            // IF set: a fresh task starts with interrupts enabled.
            rflags: 0x202,
        }
    }

    /// Zeroed context, overwritten by the first switch away from the
    /// bootstrap task.
    pub const fn empty() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rdi: 0,
            rflags: 0x2,
        }
    }

    pub fn instruction_pointer(&self) -> usize {
        self.rip as usize
    }

    pub fn stack_pointer(&self) -> usize {
        self.rsp as usize
    }

    pub fn argument(&self) -> usize {
        self.rdi as usize
    }
}

// context_switch(prev: *mut Context [rdi], next: *const Context [rsi])
//
// Saves rsp as-if-returned (rsp+8) and the return address as the resume
// rip, so a later switch back lands on the instruction after the call with
// the callee-saved set and RFLAGS restored bit-exactly. The popfq sits
// right before the jmp: once it may set IF, only one instruction runs
// before the new task's frame is live.
#[cfg(target_os = "none")]
core::arch::global_asm!(
    ".global context_switch",
    "context_switch:",
    "    lea rax, [rsp + 8]",
    "    mov [rdi + 0x00], rax",
    "    mov rax, [rsp]",
    "    mov [rdi + 0x08], rax",
    "    mov [rdi + 0x10], rbp",
    "    mov [rdi + 0x18], rbx",
    "    mov [rdi + 0x20], r12",
    "    mov [rdi + 0x28], r13",
    "    mov [rdi + 0x30], r14",
    "    mov [rdi + 0x38], r15",
    "    pushfq",
    "    pop rax",
    "    mov [rdi + 0x48], rax",
    "    mov rsp, [rsi + 0x00]",
    "    mov rbp, [rsi + 0x10]",
    "    mov rbx, [rsi + 0x18]",
    "    mov r12, [rsi + 0x20]",
    "    mov r13, [rsi + 0x28]",
    "    mov r14, [rsi + 0x30]",
    "    mov r15, [rsi + 0x38]",
    "    mov rdi, [rsi + 0x40]",
    "    mov rax, [rsi + 0x08]",
    "    push qword ptr [rsi + 0x48]",
    "    popfq",
    "    jmp rax",
);

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn field_offsets_match_asm() {
        assert_eq!(mem::offset_of!(Context, rsp), 0x00);
        assert_eq!(mem::offset_of!(Context, rip), 0x08);
        assert_eq!(mem::offset_of!(Context, rbp), 0x10);
        assert_eq!(mem::offset_of!(Context, rbx), 0x18);
        assert_eq!(mem::offset_of!(Context, r12), 0x20);
        assert_eq!(mem::offset_of!(Context, r13), 0x28);
        assert_eq!(mem::offset_of!(Context, r14), 0x30);
        assert_eq!(mem::offset_of!(Context, r15), 0x38);
        assert_eq!(mem::offset_of!(Context, rdi), 0x40);
        assert_eq!(mem::offset_of!(Context, rflags), 0x48);
    }

    #[test]
    fn fresh_context_enables_interrupts() {
        let ctx = Context::new(0x1000, 0x8000, 0, 0);
        assert_eq!(ctx.rflags & 0x200, 0x200);
    }

    #[test]
    fn fresh_context_carries_entry_stack_and_arg() {
        let ctx = Context::new(0x1234_5678, 0x8000_0000, 42, 0xDEAD);
        assert_eq!(ctx.instruction_pointer(), 0x1234_5678);
        assert_eq!(ctx.argument(), 42);
        // Stack pointer is below the top, call-aligned.
        assert!(ctx.stack_pointer() < 0x8000_0000);
        assert_eq!(ctx.stack_pointer() % 16, 8);
    }
}
