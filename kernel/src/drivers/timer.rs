//! System timer: periodic tick, monotonic time, and sleeping.
//!
//! The tick interrupt debits the running task's time slice (posting a
//! reschedule when it hits zero) and advances the tick counter behind
//! `now_us`. On ARM64 the free-running generic-timer counter gives
//! microsecond resolution between ticks; the PIT port only counts ticks.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::{
    config,
    devices::{Device, DeviceType, Driver},
    error::KernelResult,
    irq::{self, IrqNumber},
};

static TICKS: AtomicU64 = AtomicU64::new(0);
static TICK_HZ: AtomicU64 = AtomicU64::new(config::TICK_HZ);

/// Ticks since the timer driver came up.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Effective tick frequency (config default or `tick_hz=` override).
pub fn tick_hz() -> u64 {
    TICK_HZ.load(Ordering::Relaxed)
}

/// Override the tick frequency before the driver binds (boot cmdline).
pub fn set_tick_hz(hz: u64) {
    if hz > 0 && hz <= 10_000 {
        TICK_HZ.store(hz, Ordering::Relaxed);
    }
}

/// Monotonic microseconds since boot.
pub fn now_us() -> u64 {
    #[cfg(target_arch = "aarch64")]
    if let Some(us) = crate::arch::aarch64::timer::counter_us() {
        return us;
    }
    ticks().wrapping_mul(1_000_000 / tick_hz())
}

/// Seconds since boot, for `date`/`uptime`.
pub fn uptime_secs() -> u64 {
    ticks() / tick_hz()
}

/// Block the calling task until `deadline_us`. The wait yields, so other
/// tasks run; granularity is the timer tick.
pub fn sleep_until(deadline_us: u64) {
    while now_us() < deadline_us {
        crate::sched::yield_now();
    }
}

/// Block the calling task for `us` microseconds.
pub fn sleep_us(us: u64) {
    sleep_until(now_us().saturating_add(us));
}

/// Tick path, called from the timer interrupt handler.
pub fn handle_tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);

    #[cfg(target_arch = "aarch64")]
    crate::arch::aarch64::timer::rearm(tick_hz());

    crate::sched::timer_tick();
}

fn timer_irq(_irq: IrqNumber) {
    handle_tick();
}

/// The periodic-timer driver. One driver covers the platform timers this
/// kernel knows; the device name selects the hardware.
pub struct TimerDriver;

pub static TIMER_DRIVER: TimerDriver = TimerDriver;

impl Driver for TimerDriver {
    fn name(&self) -> &'static str {
        "sys-timer"
    }

    fn supported_ids(&self) -> &'static [(&'static str, DeviceType)] {
        &[
            ("arm,generic-timer", DeviceType::Timer),
            ("pit", DeviceType::Timer),
            ("apic-timer", DeviceType::Timer),
        ]
    }

    fn init(&self, device: &Device) -> KernelResult<()> {
        let hz = tick_hz();

        #[cfg(target_arch = "x86_64")]
        crate::arch::x86_64::timer::program(hz);

        #[cfg(all(target_arch = "aarch64", target_os = "none"))]
        crate::arch::aarch64::timer::program(hz);

        if let Some(line) = device.irq() {
            irq::register_handler(IrqNumber::new(line), timer_irq)?;
            irq::enable(IrqNumber::new(line))?;
        }
        log::info!("timer: {} Hz tick on {}", hz, device.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks_advance_time() {
        let t0 = now_us();
        handle_tick();
        handle_tick();
        let t1 = now_us();
        // Two ticks at the default 100 Hz are 20 ms.
        assert!(t1 >= t0 + 2 * (1_000_000 / config::TICK_HZ));
    }

    #[test]
    fn tick_hz_override_rejects_nonsense() {
        let orig = tick_hz();
        set_tick_hz(0);
        assert_eq!(tick_hz(), orig);
        set_tick_hz(1_000_000);
        assert_eq!(tick_hz(), orig);
    }
}
