//! ARM generic timer (CNTP, the EL1 physical timer).

#[cfg(target_os = "none")]
use aarch64_cpu::registers::{CNTFRQ_EL0, CNTPCT_EL0, CNTP_CTL_EL0, CNTP_TVAL_EL0};
#[cfg(target_os = "none")]
use tock_registers::interfaces::{Readable, Writeable};

#[cfg(target_os = "none")]
fn counter_hz() -> u64 {
    CNTFRQ_EL0.get()
}

/// Arm the timer for the first tick and enable it. The tick interrupt
/// itself stays masked at the GIC until the driver unmasks PPI 30.
#[cfg(target_os = "none")]
pub fn program(hz: u64) {
    CNTP_TVAL_EL0.set(counter_hz() / hz);
    CNTP_CTL_EL0.write(CNTP_CTL_EL0::ENABLE::SET + CNTP_CTL_EL0::IMASK::CLEAR);
}

/// Re-arm for the next tick; called from the tick interrupt handler.
#[cfg(target_os = "none")]
pub fn rearm(hz: u64) {
    CNTP_TVAL_EL0.set(counter_hz() / hz);
}

/// Free-running counter in microseconds. Finer-grained than the tick, so
/// `now_us` interpolates between ticks on this architecture.
#[cfg(target_os = "none")]
pub fn counter_us() -> Option<u64> {
    let hz = counter_hz();
    if hz == 0 {
        return None;
    }
    Some(CNTPCT_EL0.get().wrapping_mul(1_000_000) / hz)
}

#[cfg(not(target_os = "none"))]
pub fn program(_hz: u64) {}

#[cfg(not(target_os = "none"))]
pub fn rearm(_hz: u64) {}

#[cfg(not(target_os = "none"))]
pub fn counter_us() -> Option<u64> {
    None
}
