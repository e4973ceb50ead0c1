//! GICv2 interrupt controller (QEMU virt machine).
//!
//! Two halves: the distributor (GICD) routes and masks interrupt lines, the
//! per-CPU interface (GICC) hands out and retires interrupt IDs. INTID
//! ranges: 0-15 SGIs, 16-31 PPIs (30 = physical timer), 32+ SPIs.

use core::ptr;

use spin::Mutex;

use crate::{
    error::{KernelError, KernelResult},
    sync::GlobalState,
};

/// GIC distributor base on the QEMU virt machine.
const GICD_BASE: usize = 0x0800_0000;
/// GIC CPU interface base on the QEMU virt machine.
const GICC_BASE: usize = 0x0801_0000;

// Distributor registers.
const GICD_CTLR: usize = 0x000;
const GICD_TYPER: usize = 0x004;
const GICD_ISENABLER: usize = 0x100;
const GICD_ICENABLER: usize = 0x180;
const GICD_IPRIORITYR: usize = 0x400;
const GICD_ITARGETSR: usize = 0x800;

// CPU interface registers.
const GICC_CTLR: usize = 0x000;
const GICC_PMR: usize = 0x004;
const GICC_IAR: usize = 0x00C;
const GICC_EOIR: usize = 0x010;

/// IAR value meaning "nothing pending".
pub const SPURIOUS_IRQ: u32 = 1023;

/// Default priority (lower value = higher priority).
const DEFAULT_PRIORITY: u8 = 0xA0;

struct Gic {
    gicd_base: usize,
    gicc_base: usize,
    num_irqs: u32,
}

// Uses GlobalState rather than a heap cell: GIC init runs before the
// allocator is up.
static GIC: GlobalState<Mutex<Gic>> = GlobalState::new();

impl Gic {
    const fn new(gicd_base: usize, gicc_base: usize) -> Self {
        Self {
            gicd_base,
            gicc_base,
            num_irqs: 0,
        }
    }

    fn gicd_read(&self, offset: usize) -> u32 {
        // SAFETY: MMIO read within the distributor register block; volatile
        // so the access cannot be elided or reordered by the compiler.
        unsafe { ptr::read_volatile((self.gicd_base + offset) as *const u32) }
    }

    fn gicd_write(&self, offset: usize, value: u32) {
        // SAFETY: MMIO write within the distributor register block.
        unsafe { ptr::write_volatile((self.gicd_base + offset) as *mut u32, value) }
        crate::arch::barriers::memory_fence();
    }

    fn gicd_write8(&self, offset: usize, value: u8) {
        // SAFETY: byte-granular MMIO write (priority/target registers).
        unsafe { ptr::write_volatile((self.gicd_base + offset) as *mut u8, value) }
        crate::arch::barriers::memory_fence();
    }

    fn gicc_read(&self, offset: usize) -> u32 {
        // SAFETY: MMIO read within the CPU interface register block.
        unsafe { ptr::read_volatile((self.gicc_base + offset) as *const u32) }
    }

    fn gicc_write(&self, offset: usize, value: u32) {
        // SAFETY: MMIO write within the CPU interface register block.
        unsafe { ptr::write_volatile((self.gicc_base + offset) as *mut u32, value) }
        crate::arch::barriers::memory_fence();
    }

    fn init(&mut self) {
        // ITLinesNumber field: 32*(N+1) interrupt lines.
        self.num_irqs = 32 * ((self.gicd_read(GICD_TYPER) & 0x1F) + 1);

        // Disable while configuring.
        self.gicd_write(GICD_CTLR, 0);

        // Mask everything, default priorities, route SPIs to CPU0.
        for irq in (32..self.num_irqs).step_by(32) {
            self.gicd_write(GICD_ICENABLER + (irq as usize / 32) * 4, 0xFFFF_FFFF);
        }
        for irq in 0..self.num_irqs {
            self.gicd_write8(GICD_IPRIORITYR + irq as usize, DEFAULT_PRIORITY);
            if irq >= 32 {
                self.gicd_write8(GICD_ITARGETSR + irq as usize, 0x01);
            }
        }

        // Enable distributor and CPU interface; accept all priorities.
        self.gicd_write(GICD_CTLR, 1);
        self.gicc_write(GICC_PMR, 0xFF);
        self.gicc_write(GICC_CTLR, 1);
    }

    fn check_irq(&self, irq: u32) -> KernelResult<()> {
        if irq >= self.num_irqs {
            Err(KernelError::InvalidArgument {
                what: "IRQ beyond GIC lines",
            })
        } else {
            Ok(())
        }
    }

    fn enable(&self, irq: u32) -> KernelResult<()> {
        self.check_irq(irq)?;
        self.gicd_write(
            GICD_ISENABLER + (irq as usize / 32) * 4,
            1 << (irq % 32),
        );
        Ok(())
    }

    fn disable(&self, irq: u32) -> KernelResult<()> {
        self.check_irq(irq)?;
        self.gicd_write(
            GICD_ICENABLER + (irq as usize / 32) * 4,
            1 << (irq % 32),
        );
        Ok(())
    }

    fn set_priority(&self, irq: u32, priority: u8) -> KernelResult<()> {
        self.check_irq(irq)?;
        self.gicd_write8(GICD_IPRIORITYR + irq as usize, priority);
        Ok(())
    }

    fn acknowledge(&self) -> u32 {
        self.gicc_read(GICC_IAR) & 0x3FF
    }

    fn end_of_interrupt(&self, irq: u32) {
        self.gicc_write(GICC_EOIR, irq);
    }
}

/// Bring the GIC up with every line masked.
pub fn init() {
    #[cfg_attr(not(target_os = "none"), allow(unused_mut))]
    let mut gic = Gic::new(GICD_BASE, GICC_BASE);
    #[cfg(target_os = "none")]
    gic.init();
    if GIC.init(Mutex::new(gic)).is_err() {
        log::warn!("GIC already initialized");
    }
}

fn with_gic<R>(f: impl FnOnce(&Gic) -> R) -> KernelResult<R> {
    GIC.with(|mtx| f(&mtx.lock())).ok_or(KernelError::BadState {
        what: "GIC not initialized",
    })
}

pub fn enable_irq(irq: u32) -> KernelResult<()> {
    with_gic(|gic| gic.enable(irq))?
}

pub fn disable_irq(irq: u32) -> KernelResult<()> {
    with_gic(|gic| gic.disable(irq))?
}

pub fn set_priority(irq: u32, priority: u8) -> KernelResult<()> {
    with_gic(|gic| gic.set_priority(irq, priority))?
}

/// Read and acknowledge the highest-priority pending interrupt.
/// Returns [`SPURIOUS_IRQ`] when nothing is pending.
pub fn acknowledge() -> u32 {
    with_gic(|gic| gic.acknowledge()).unwrap_or(SPURIOUS_IRQ)
}

pub fn end_of_interrupt(irq: u32) {
    let _ = with_gic(|gic| gic.end_of_interrupt(irq));
}
