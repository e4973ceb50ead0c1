//! Early serial console.
//!
//! This is the polled path used before interrupts are live and by panic
//! output. The interrupt-driven console (RX ring buffer, line discipline
//! feeding) lives in [`crate::drivers::uart`]; both talk to the same
//! hardware, so this module keeps no state beyond the port handle.

use core::fmt;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
use spin::Mutex;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
static COM1: Mutex<Option<uart_16550::SerialPort>> = Mutex::new(None);

/// Initialize the early console. Safe to call before anything else; the
/// memory allocator is not required.
pub fn init() {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        // SAFETY: COM1 at the standard ISA port; probing it is harmless on
        // QEMU and real PCs alike.
        let mut port = unsafe { uart_16550::SerialPort::new(crate::config::UART_PORT) };
        port.init();
        *COM1.lock() = Some(port);
    }
    // The PL011 on QEMU virt needs no setup for polled TX; firmware leaves
    // it enabled at 8-N-1.
}

/// Write one byte to the console, polling until the transmitter is ready.
pub fn write_byte(byte: u8) {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        if let Some(port) = COM1.lock().as_mut() {
            port.send(byte);
        }
    }

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        pl011_write(byte);
    }

    #[cfg(not(target_os = "none"))]
    {
        let _ = byte;
    }
}

/// Non-blocking read of one byte, if the receiver holds one.
pub fn try_read_byte() -> Option<u8> {
    #[cfg(all(target_arch = "x86_64", target_os = "none"))]
    {
        use x86_64::instructions::port::Port;
        const LSR_DATA_READY: u8 = 1 << 0;
        // SAFETY: LSR/RBR are the standard 16550 registers at COM1; reading
        // them has no side effect beyond consuming the received byte.
        unsafe {
            let mut lsr: Port<u8> = Port::new(crate::config::UART_PORT + 5);
            if lsr.read() & LSR_DATA_READY != 0 {
                let mut rbr: Port<u8> = Port::new(crate::config::UART_PORT);
                return Some(rbr.read());
            }
        }
        None
    }

    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    {
        pl011_read()
    }

    #[cfg(not(target_os = "none"))]
    {
        None
    }
}

// PL011 register offsets (QEMU virt).
#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod pl011 {
    pub const DR: usize = 0x000;
    pub const FR: usize = 0x018;
    pub const FR_TXFF: u32 = 1 << 5;
    pub const FR_RXFE: u32 = 1 << 4;
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn pl011_write(byte: u8) {
    let base = crate::config::UART_BASE;
    // SAFETY: PL011 MMIO on the QEMU virt machine; volatile accesses with a
    // flag-register poll, per the device programming model.
    unsafe {
        while core::ptr::read_volatile((base + pl011::FR) as *const u32) & pl011::FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        core::ptr::write_volatile((base + pl011::DR) as *mut u32, byte as u32);
    }
}

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
fn pl011_read() -> Option<u8> {
    let base = crate::config::UART_BASE;
    // SAFETY: see pl011_write; reading DR consumes one received byte.
    unsafe {
        if core::ptr::read_volatile((base + pl011::FR) as *const u32) & pl011::FR_RXFE == 0 {
            Some(core::ptr::read_volatile((base + pl011::DR) as *const u32) as u8)
        } else {
            None
        }
    }
}

struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            // CR/LF normalization on output: the console expects \r\n.
            if byte == b'\n' {
                write_byte(b'\r');
            }
            write_byte(byte);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    #[cfg(target_os = "none")]
    {
        use fmt::Write;
        crate::arch::without_interrupts(|| {
            let _ = Writer.write_fmt(args);
        });
    }

    #[cfg(not(target_os = "none"))]
    {
        // Host test builds print through std so failures are readable.
        use fmt::Write;
        std::print!("{}", args);
        let _ = Writer.write_str("");
    }
}
