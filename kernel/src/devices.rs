//! Device and driver registry.
//!
//! Devices are discovered from the platform table and registered by name;
//! drivers advertise `(name, type)` id pairs and bind to at most one device
//! at a time. A bound driver is initialized exactly once; a failed init
//! marks the device `Failed` and releases the driver. Registration happens
//! during single-threaded init -- the registry is effectively read-only once
//! the scheduler starts. A new entry is fully built before the registry
//! lock is released, so readers never observe a half-initialized device
//! (the Rust rendition of the list-publish barrier).

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Coarse device classification; part of the driver-matching key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceType {
    Timer,
    Uart,
    InterruptController,
    Block,
    Other,
}

/// Binding lifecycle of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Registered, no driver yet.
    Discovered,
    /// Matched to a driver, init pending.
    Bound,
    /// Driver init succeeded.
    Initialized,
    /// Driver init failed; the driver was released.
    Failed,
}

/// A named hardware endpoint.
pub struct Device {
    name: &'static str,
    device_type: DeviceType,
    base_addr: Option<usize>,
    irq: Option<u32>,
    state: Mutex<DeviceState>,
    driver_name: Mutex<Option<&'static str>>,
}

impl Device {
    pub fn new(
        name: &'static str,
        device_type: DeviceType,
        base_addr: Option<usize>,
        irq: Option<u32>,
    ) -> Self {
        Self {
            name,
            device_type,
            base_addr,
            irq,
            state: Mutex::new(DeviceState::Discovered),
            driver_name: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn base_addr(&self) -> Option<usize> {
        self.base_addr
    }

    pub fn irq(&self) -> Option<u32> {
        self.irq
    }

    pub fn state(&self) -> DeviceState {
        *self.state.lock()
    }

    pub fn driver_name(&self) -> Option<&'static str> {
        *self.driver_name.lock()
    }
}

/// Code that manages a class of devices. Implementations are `'static`
/// singletons with interior state.
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    fn version(&self) -> &'static str {
        "1.0"
    }

    /// `(device name, device type)` pairs this driver binds to.
    fn supported_ids(&self) -> &'static [(&'static str, DeviceType)];

    /// Bring the bound device up. Called exactly once per binding.
    fn init(&self, device: &Device) -> KernelResult<()>;
}

struct DriverSlot {
    driver: &'static dyn Driver,
    /// Name of the device this driver is bound to, if any.
    bound_to: Option<&'static str>,
}

/// The registry proper; tests drive private instances.
pub struct Registry {
    devices: Vec<Arc<Device>>,
    drivers: Vec<DriverSlot>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            devices: Vec::new(),
            drivers: Vec::new(),
        }
    }

    /// Add a device and try to bind it to an already-registered driver.
    pub fn register_device(&mut self, device: Device) -> KernelResult<Arc<Device>> {
        if self.devices.iter().any(|d| d.name == device.name) {
            return Err(KernelError::AlreadyExists {
                what: "device name",
            });
        }
        let device = Arc::new(device);
        self.devices.push(device.clone());

        let idx = self.devices.len() - 1;
        self.try_bind_device(idx);
        Ok(device)
    }

    /// Add a driver, then re-scan for devices it can claim.
    pub fn register_driver(&mut self, driver: &'static dyn Driver) -> KernelResult<()> {
        if self.drivers.iter().any(|s| s.driver.name() == driver.name()) {
            return Err(KernelError::AlreadyExists {
                what: "driver name",
            });
        }
        self.drivers.push(DriverSlot {
            driver,
            bound_to: None,
        });
        for idx in 0..self.devices.len() {
            self.try_bind_device(idx);
        }
        Ok(())
    }

    fn try_bind_device(&mut self, device_idx: usize) {
        let device = self.devices[device_idx].clone();
        if device.state() != DeviceState::Discovered {
            return;
        }
        let key = (device.name, device.device_type);

        let slot_idx = self.drivers.iter().position(|slot| {
            slot.bound_to.is_none() && slot.driver.supported_ids().contains(&key)
        });
        let Some(slot_idx) = slot_idx else { return };

        let driver = self.drivers[slot_idx].driver;
        *device.state.lock() = DeviceState::Bound;
        *device.driver_name.lock() = Some(driver.name());
        self.drivers[slot_idx].bound_to = Some(device.name);

        match driver.init(&device) {
            Ok(()) => {
                *device.state.lock() = DeviceState::Initialized;
                log::info!(
                    "{}: bound to {} v{}",
                    device.name,
                    driver.name(),
                    driver.version()
                );
            }
            Err(e) => {
                // Init failure leaves the driver free for other devices.
                *device.state.lock() = DeviceState::Failed;
                *device.driver_name.lock() = None;
                self.drivers[slot_idx].bound_to = None;
                log::error!("{}: driver init failed: {}", device.name, e);
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.iter().find(|d| d.name == name).cloned()
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.clone()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

/// Register a device with the global registry.
pub fn register_device(device: Device) -> KernelResult<Arc<Device>> {
    REGISTRY.lock().register_device(device)
}

/// Register a driver with the global registry.
pub fn register_driver(driver: &'static dyn Driver) -> KernelResult<()> {
    REGISTRY.lock().register_driver(driver)
}

/// Look up a device by name.
pub fn find(name: &str) -> Option<Arc<Device>> {
    REGISTRY.lock().find(name)
}

/// Snapshot of all registered devices, for shell diagnostics.
pub fn all_devices() -> Vec<Arc<Device>> {
    REGISTRY.lock().devices()
}
