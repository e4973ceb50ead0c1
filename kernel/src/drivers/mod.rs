//! Device drivers and the platform device table.
//!
//! `init` registers the platform's devices (hardcoded table -- this kernel
//! targets QEMU machines with known addresses) and then the drivers; the
//! registry performs matching and calls each bound driver's init exactly
//! once.

pub mod ramdisk;
pub mod timer;
pub mod uart;

use crate::devices::{self, Device, DeviceType};

/// Platform device table for the compiled architecture.
fn platform_devices() -> &'static [(&'static str, DeviceType, Option<usize>, Option<u32>)] {
    #[cfg(target_arch = "aarch64")]
    {
        &[
            (
                "pl011",
                DeviceType::Uart,
                Some(0x0900_0000),
                Some(crate::config::UART_IRQ),
            ),
            (
                "arm,generic-timer",
                DeviceType::Timer,
                None,
                Some(crate::config::TIMER_IRQ),
            ),
            ("ramdisk", DeviceType::Block, None, None),
        ]
    }

    #[cfg(target_arch = "x86_64")]
    {
        &[
            (
                "ns16550",
                DeviceType::Uart,
                Some(0x3F8),
                Some(crate::config::UART_IRQ),
            ),
            (
                "pit",
                DeviceType::Timer,
                None,
                Some(crate::config::TIMER_IRQ),
            ),
            ("ramdisk", DeviceType::Block, None, None),
        ]
    }
}

/// Discover platform devices and bring up their drivers.
pub fn init() {
    for &(name, device_type, base, irq) in platform_devices() {
        if let Err(e) = devices::register_device(Device::new(name, device_type, base, irq)) {
            log::error!("device {}: registration failed: {}", name, e);
        }
    }

    for driver in [
        &timer::TIMER_DRIVER as &'static dyn devices::Driver,
        &uart::UART_DRIVER,
        &ramdisk::RAMDISK_DRIVER,
    ] {
        if let Err(e) = devices::register_driver(driver) {
            log::error!("driver {}: registration failed: {}", driver.name(), e);
        }
    }
}
