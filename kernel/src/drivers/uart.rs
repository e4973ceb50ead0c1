//! Serial console driver: byte-oriented I/O with an IRQ-fed receive ring.
//!
//! Before the driver binds (early boot, before interrupts) reads fall back
//! to polling the hardware, so the console works the whole way up.

use spin::Mutex;

use crate::{
    config::UART_RX_RING,
    devices::{Device, DeviceType, Driver},
    error::KernelResult,
    irq::{self, IrqNumber},
    serial,
};

/// Fixed-size byte ring. Overflow drops the newest byte -- on a human-paced
/// console that beats blocking the interrupt handler.
pub struct RxRing {
    buf: [u8; UART_RX_RING],
    head: usize,
    tail: usize,
}

impl RxRing {
    pub const fn new() -> Self {
        Self {
            buf: [0; UART_RX_RING],
            head: 0,
            tail: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail) % (2 * UART_RX_RING)
    }

    /// Push a byte; returns false (byte dropped) when full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len() == UART_RX_RING {
            return false;
        }
        self.buf[self.head % UART_RX_RING] = byte;
        self.head = (self.head + 1) % (2 * UART_RX_RING);
        true
    }

    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buf[self.tail % UART_RX_RING];
        self.tail = (self.tail + 1) % (2 * UART_RX_RING);
        Some(byte)
    }
}

impl Default for RxRing {
    fn default() -> Self {
        Self::new()
    }
}

static RX_RING: Mutex<RxRing> = Mutex::new(RxRing::new());

/// Write one byte to the console.
pub fn putc(byte: u8) {
    serial::write_byte(byte);
}

/// Non-blocking read: the IRQ-fed ring first, then a hardware poll (the
/// polled path is all there is before interrupts are live). The ring lock
/// is taken with interrupts masked -- the RX handler takes the same lock,
/// and on one CPU an interrupt inside the critical section would spin
/// forever.
pub fn getc() -> Option<u8> {
    let ring_byte = crate::arch::without_interrupts(|| RX_RING.lock().pop());
    if ring_byte.is_some() {
        return ring_byte;
    }
    crate::arch::without_interrupts(|| serial::try_read_byte())
}

/// Blocking read; yields to the scheduler between polls.
pub fn read_byte_blocking() -> u8 {
    loop {
        if let Some(byte) = getc() {
            return byte;
        }
        crate::sched::yield_now();
    }
}

fn uart_irq(_irq: IrqNumber) {
    // Drain the receiver FIFO into the ring; handlers stay short.
    let mut ring = RX_RING.lock();
    while let Some(byte) = serial::try_read_byte() {
        if !ring.push(byte) {
            break;
        }
    }
}

/// Console UART driver (PL011 on ARM64, NS16550 on x86-64).
pub struct UartDriver;

pub static UART_DRIVER: UartDriver = UartDriver;

impl Driver for UartDriver {
    fn name(&self) -> &'static str {
        "serial-console"
    }

    fn supported_ids(&self) -> &'static [(&'static str, DeviceType)] {
        &[
            ("pl011", DeviceType::Uart),
            ("ns16550", DeviceType::Uart),
        ]
    }

    fn init(&self, device: &Device) -> KernelResult<()> {
        enable_rx_interrupt(device);
        if let Some(line) = device.irq() {
            irq::register_handler(IrqNumber::new(line), uart_irq)?;
            irq::enable(IrqNumber::new(line))?;
        }
        log::info!("console: {} ready", device.name());
        Ok(())
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
fn enable_rx_interrupt(device: &Device) {
    use x86_64::instructions::port::Port;
    let base = device.base_addr().unwrap_or(0x3F8) as u16;
    // SAFETY: IER is base+1 on a 16550; bit 0 enables the received-data
    // interrupt.
    unsafe {
        let mut ier: Port<u8> = Port::new(base + 1);
        ier.write(0x01);
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn enable_rx_interrupt(device: &Device) {
    const IMSC: usize = 0x038;
    const RXIM: u32 = 1 << 4;
    let base = device.base_addr().unwrap_or(crate::config::UART_BASE);
    // SAFETY: PL011 interrupt-mask register; setting RXIM unmasks the
    // receive interrupt at the device.
    unsafe {
        let reg = (base + IMSC) as *mut u32;
        let cur = core::ptr::read_volatile(reg);
        core::ptr::write_volatile(reg, cur | RXIM);
    }
    crate::arch::barriers::memory_fence();
}

#[cfg(not(target_os = "none"))]
fn enable_rx_interrupt(_device: &Device) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_preserves_fifo_order() {
        let mut ring = RxRing::new();
        for b in b"hello" {
            assert!(ring.push(*b));
        }
        let mut out = alloc::vec::Vec::new();
        while let Some(b) = ring.pop() {
            out.push(b);
        }
        assert_eq!(out, b"hello");
        assert!(ring.is_empty());
    }

    #[test]
    fn ring_wraps_around() {
        let mut ring = RxRing::new();
        // Pump several capacities through one byte at a time.
        for i in 0..(3 * UART_RX_RING) {
            assert!(ring.push(i as u8));
            assert_eq!(ring.pop(), Some(i as u8));
        }
    }

    #[test]
    fn full_ring_drops_new_bytes() {
        let mut ring = RxRing::new();
        for i in 0..UART_RX_RING {
            assert!(ring.push(i as u8));
        }
        assert!(!ring.push(0xFF));
        assert_eq!(ring.len(), UART_RX_RING);
        // Oldest byte is still first out.
        assert_eq!(ring.pop(), Some(0));
    }
}
