//! Programmable Interval Timer (channel 0) as the tick source.

/// PIT input clock in Hz.
const PIT_HZ: u64 = 1_193_182;

/// Program channel 0 for a periodic interrupt at `hz`.
#[cfg(target_os = "none")]
pub fn program(hz: u64) {
    use x86_64::instructions::port::Port;

    let divisor = (PIT_HZ / hz).clamp(1, 65_535) as u16;
    // SAFETY: standard PIT programming sequence: mode/command then the
    // divisor low/high bytes on channel 0's data port.
    unsafe {
        let mut command: Port<u8> = Port::new(0x43);
        let mut data: Port<u8> = Port::new(0x40);
        command.write(0x36); // channel 0, lobyte/hibyte, square wave
        data.write((divisor & 0xFF) as u8);
        data.write((divisor >> 8) as u8);
    }
}

#[cfg(not(target_os = "none"))]
pub fn program(_hz: u64) {}
