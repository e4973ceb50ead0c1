// Legacy 8259 PIC pair, remapped above the CPU exception range.

use pic8259::ChainedPics;
use spin::Mutex;

use super::idt::PIC_VECTOR_BASE;
use crate::error::{KernelError, KernelResult};

static PICS: Mutex<ChainedPics> =
    // SAFETY: 32/40 are free vector ranges above the CPU exceptions.
    Mutex::new(unsafe { ChainedPics::new(PIC_VECTOR_BASE, PIC_VECTOR_BASE + 8) });

/// Remap the controllers and mask every line; drivers unmask what they own.
pub fn init() {
    let mut pics = PICS.lock();
    // SAFETY: standard 8259 initialization sequence on the ISA ports.
    unsafe {
        pics.initialize();
        pics.write_masks(0xFF, 0xFF);
    }
}

pub fn enable_irq(irq: u32) -> KernelResult<()> {
    if irq >= 16 {
        return Err(KernelError::InvalidArgument {
            what: "PIC line out of range",
        });
    }
    let mut pics = PICS.lock();
    // SAFETY: mask register read-modify-write on the initialized PICs.
    unsafe {
        let (mut master, mut slave) = {
            let masks = pics.read_masks();
            (masks[0], masks[1])
        };
        if irq < 8 {
            master &= !(1 << irq);
            // A slave line needs the cascade (IRQ2) open as well.
        } else {
            slave &= !(1 << (irq - 8));
            master &= !(1 << 2);
        }
        pics.write_masks(master, slave);
    }
    Ok(())
}

pub fn disable_irq(irq: u32) -> KernelResult<()> {
    if irq >= 16 {
        return Err(KernelError::InvalidArgument {
            what: "PIC line out of range",
        });
    }
    let mut pics = PICS.lock();
    // SAFETY: mask register read-modify-write on the initialized PICs.
    unsafe {
        let (mut master, mut slave) = {
            let masks = pics.read_masks();
            (masks[0], masks[1])
        };
        if irq < 8 {
            master |= 1 << irq;
        } else {
            slave |= 1 << (irq - 8);
        }
        pics.write_masks(master, slave);
    }
    Ok(())
}

/// The 8259 has no per-line priority registers; priority is fixed by line
/// number.
pub fn set_priority(_irq: u32, _priority: u8) -> KernelResult<()> {
    Ok(())
}

pub fn end_of_interrupt(irq: u32) {
    let mut pics = PICS.lock();
    // SAFETY: EOI for a vector we received; required to unblock the line.
    unsafe {
        pics.notify_end_of_interrupt(PIC_VECTOR_BASE + irq as u8);
    }
}
