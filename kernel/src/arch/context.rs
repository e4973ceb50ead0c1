//! Architecture-independent view of the task context.
//!
//! A [`Context`] is the register set saved across a context switch: every
//! callee-saved register, the stack pointer, the frame pointer, and the
//! resume program counter. The switch itself is assembly
//! (`context_switch`), so the compiler cannot cache values across it; the
//! asm declares full memory clobber by being an extern call.

#[cfg(target_arch = "aarch64")]
pub use super::aarch64::context::Context;
#[cfg(target_arch = "x86_64")]
pub use super::x86_64::context::Context;

/// Switch from `prev` to `next`, saving the current register state into
/// `prev` and loading `next`. Returns when something later switches back to
/// `prev`.
///
/// # Safety
///
/// Must be called with interrupts disabled; both contexts must be valid and
/// `next`'s stack must be live. `prev` and `next` must not alias.
#[cfg(target_os = "none")]
pub unsafe fn switch_context(prev: *mut Context, next: *const Context) {
    extern "C" {
        fn context_switch(prev: *mut Context, next: *const Context);
    }
    // SAFETY: contract forwarded to the asm implementation.
    unsafe { context_switch(prev, next) }
}

/// Host builds never switch contexts; scheduler unit tests stop at the
/// queue layer.
///
/// # Safety
///
/// Never actually runs; same signature as the bare-metal version.
#[cfg(not(target_os = "none"))]
pub unsafe fn switch_context(_prev: *mut Context, _next: *const Context) {
    unreachable!("context switch on the host");
}
