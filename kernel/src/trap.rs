//! Architecture-independent trap handling.
//!
//! The per-architecture entry stubs save a [`TrapFrame`] and forward to
//! [`handle`] with a decoded [`TrapCause`]. Handlers return a
//! [`TrapDisposition`] -- there is no unwinding through exception handlers.
//! A `Reschedule` disposition makes the stub run the scheduler before it
//! restores a frame, so the restored frame may belong to a different task.

use crate::error::KernelError;

/// Why the CPU trapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    /// Translation or permission fault at `addr`.
    PageFault { addr: usize, write: bool },
    /// Undefined or illegal instruction.
    InvalidInstruction,
    /// Misaligned access (SP/PC alignment on ARM64, #AC on x86-64).
    Alignment,
    /// Debug breakpoint.
    Breakpoint,
    /// System-call vector (SVC / software interrupt).
    Syscall,
    /// Asynchronous interrupt; delegated to the interrupt controller.
    Irq,
    /// Anything this kernel has no specific handling for.
    Other(u64),
}

/// What the stub should do after the handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapDisposition {
    /// Resume the interrupted context unchanged.
    FaultHandled,
    /// Kill the offending task; the scheduler picks another.
    Terminate(&'static str),
    /// Run the scheduler before restoring a frame.
    Reschedule,
}

/// The per-architecture frame must expose this much to portable code.
pub trait TrapFrameOps {
    /// Syscall number and the six argument registers.
    fn syscall_args(&self) -> (usize, [usize; 6]);

    /// Place a syscall return value in the convention's result register.
    fn set_syscall_result(&mut self, value: i64);

    /// Whether the trap came from user mode.
    fn from_user(&self) -> bool;

    /// Faulting/return program counter.
    fn instruction_pointer(&self) -> usize;

    /// Register dump over the console, for panics and task kills.
    fn dump(&self);
}

/// Central trap dispatch. Kernel-mode faults are fatal; user-mode faults
/// terminate the task; IRQs go to the interrupt controller layer.
pub fn handle<F: TrapFrameOps>(frame: &mut F, cause: TrapCause) -> TrapDisposition {
    match cause {
        TrapCause::Breakpoint => {
            log::debug!("breakpoint at {:#x}", frame.instruction_pointer());
            TrapDisposition::FaultHandled
        }

        TrapCause::Syscall => {
            let (nr, args) = frame.syscall_args();
            let result = crate::syscall::dispatch(nr, args);
            frame.set_syscall_result(result);
            if crate::sched::need_resched() {
                TrapDisposition::Reschedule
            } else {
                TrapDisposition::FaultHandled
            }
        }

        TrapCause::Irq => {
            crate::irq::handle_interrupt();
            if crate::sched::need_resched() {
                TrapDisposition::Reschedule
            } else {
                TrapDisposition::FaultHandled
            }
        }

        TrapCause::PageFault { addr, write } => {
            fatal_or_terminate(
                frame,
                "page fault",
                KernelError::BadState {
                    what: "unhandled page fault",
                },
                Some((addr, write)),
            )
        }

        TrapCause::InvalidInstruction => fatal_or_terminate(
            frame,
            "invalid instruction",
            KernelError::BadState {
                what: "invalid instruction",
            },
            None,
        ),

        TrapCause::Alignment => fatal_or_terminate(
            frame,
            "alignment fault",
            KernelError::BadState {
                what: "alignment fault",
            },
            None,
        ),

        TrapCause::Other(code) => {
            if frame.from_user() {
                log::error!("task hit unhandled trap {:#x}", code);
                TrapDisposition::Terminate("unhandled trap")
            } else {
                frame.dump();
                panic!("unhandled kernel trap {:#x}", code);
            }
        }
    }
}

fn fatal_or_terminate<F: TrapFrameOps>(
    frame: &mut F,
    what: &'static str,
    _err: KernelError,
    fault: Option<(usize, bool)>,
) -> TrapDisposition {
    if let Some((addr, write)) = fault {
        log::error!(
            "{} at {:#x} ({}) pc={:#x}",
            what,
            addr,
            if write { "write" } else { "read" },
            frame.instruction_pointer()
        );
    } else {
        log::error!("{} pc={:#x}", what, frame.instruction_pointer());
    }

    if frame.from_user() {
        frame.dump();
        TrapDisposition::Terminate(what)
    } else {
        // A fault on the kernel half is a kernel bug; dump and die loudly so
        // the UART log shows the full register state.
        frame.dump();
        panic!("kernel-mode {}", what);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal frame standing in for hardware state.
    struct FakeFrame {
        nr: usize,
        args: [usize; 6],
        result: i64,
        user: bool,
        pc: usize,
    }

    impl TrapFrameOps for FakeFrame {
        fn syscall_args(&self) -> (usize, [usize; 6]) {
            (self.nr, self.args)
        }
        fn set_syscall_result(&mut self, value: i64) {
            self.result = value;
        }
        fn from_user(&self) -> bool {
            self.user
        }
        fn instruction_pointer(&self) -> usize {
            self.pc
        }
        fn dump(&self) {}
    }

    #[test]
    fn breakpoint_is_handled() {
        let mut frame = FakeFrame {
            nr: 0,
            args: [0; 6],
            result: 0,
            user: false,
            pc: 0x1000,
        };
        assert_eq!(
            handle(&mut frame, TrapCause::Breakpoint),
            TrapDisposition::FaultHandled
        );
    }

    #[test]
    fn user_page_fault_terminates() {
        let mut frame = FakeFrame {
            nr: 0,
            args: [0; 6],
            result: 0,
            user: true,
            pc: 0x4000,
        };
        let d = handle(
            &mut frame,
            TrapCause::PageFault {
                addr: 0x10,
                write: true,
            },
        );
        assert!(matches!(d, TrapDisposition::Terminate(_)));
    }

    #[test]
    fn unknown_syscall_writes_enosys_result() {
        let mut frame = FakeFrame {
            nr: 999,
            args: [0; 6],
            result: 0,
            user: false,
            pc: 0,
        };
        let d = handle(&mut frame, TrapCause::Syscall);
        // 999 is never registered; the dispatch result lands in the frame.
        assert_eq!(frame.result, -crate::error::ENOSYS);
        assert!(matches!(
            d,
            TrapDisposition::FaultHandled | TrapDisposition::Reschedule
        ));
    }
}
