//! AArch64 trap frame.

use crate::trap::TrapFrameOps;

/// Full register snapshot built by the vector stubs. Field order is the
/// asm contract in `vectors.rs` -- do not reorder.
#[repr(C)]
#[derive(Debug, Clone)]
pub struct TrapFrame {
    /// General-purpose registers x0-x30.
    pub x: [u64; 31], // 0x000..0x0F8
    /// Stack pointer at the point of the trap.
    pub sp: u64, // 0x0F8
    /// Exception link register (resume pc).
    pub elr: u64, // 0x100
    /// Saved program status.
    pub spsr: u64, // 0x108
    /// Exception syndrome.
    pub esr: u64, // 0x110
    /// Fault address (valid for aborts).
    pub far: u64, // 0x118
}

/// Exception-class field of ESR_EL1 (bits 31:26).
pub fn esr_class(esr: u64) -> u64 {
    (esr >> 26) & 0x3F
}

pub mod esr_ec {
    pub const SVC64: u64 = 0x15;
    pub const INSTR_ABORT_LOWER: u64 = 0x20;
    pub const INSTR_ABORT_SAME: u64 = 0x21;
    pub const PC_ALIGNMENT: u64 = 0x22;
    pub const DATA_ABORT_LOWER: u64 = 0x24;
    pub const DATA_ABORT_SAME: u64 = 0x25;
    pub const SP_ALIGNMENT: u64 = 0x26;
    pub const BRK64: u64 = 0x3C;
}

impl TrapFrameOps for TrapFrame {
    fn syscall_args(&self) -> (usize, [usize; 6]) {
        (
            self.x[8] as usize,
            [
                self.x[0] as usize,
                self.x[1] as usize,
                self.x[2] as usize,
                self.x[3] as usize,
                self.x[4] as usize,
                self.x[5] as usize,
            ],
        )
    }

    fn set_syscall_result(&mut self, value: i64) {
        self.x[0] = value as u64;
    }

    fn from_user(&self) -> bool {
        // SPSR_EL1.M[3:0] == 0 means the exception came from EL0t.
        self.spsr & 0xF == 0
    }

    fn instruction_pointer(&self) -> usize {
        self.elr as usize
    }

    fn dump(&self) {
        crate::println!("---- trap frame ----");
        for pair in (0..30).step_by(2) {
            crate::println!(
                "x{:<2}={:#018x} x{:<2}={:#018x}",
                pair,
                self.x[pair],
                pair + 1,
                self.x[pair + 1]
            );
        }
        crate::println!("x30={:#018x} SP ={:#018x}", self.x[30], self.sp);
        crate::println!("ELR={:#018x} SPSR={:#010x}", self.elr, self.spsr);
        crate::println!("ESR={:#010x} FAR={:#018x}", self.esr, self.far);
    }
}

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;

    #[test]
    fn frame_layout_matches_vector_stub() {
        assert_eq!(mem::offset_of!(TrapFrame, x), 0x000);
        assert_eq!(mem::offset_of!(TrapFrame, sp), 0x0F8);
        assert_eq!(mem::offset_of!(TrapFrame, elr), 0x100);
        assert_eq!(mem::offset_of!(TrapFrame, spsr), 0x108);
        assert_eq!(mem::offset_of!(TrapFrame, esr), 0x110);
        assert_eq!(mem::offset_of!(TrapFrame, far), 0x118);
        assert_eq!(mem::size_of::<TrapFrame>(), 0x120);
    }

    #[test]
    fn syscall_convention_uses_x8_and_x0() {
        let mut frame = TrapFrame {
            x: [0; 31],
            sp: 0,
            elr: 0,
            spsr: 0x5, // EL1h
            esr: 0,
            far: 0,
        };
        frame.x[8] = 4; // getpid
        frame.x[0] = 11;
        frame.x[1] = 22;
        let (nr, args) = frame.syscall_args();
        assert_eq!(nr, 4);
        assert_eq!(args[0], 11);
        assert_eq!(args[1], 22);
        frame.set_syscall_result(-2);
        assert_eq!(frame.x[0] as i64, -2);
        assert!(!frame.from_user());
    }
}
