//! RAM-disk driver: instantiates the memory-backed block device behind the
//! `ramdisk` platform entry and publishes it for filesystem mounts.

use alloc::sync::Arc;

use crate::{
    config,
    devices::{Device, DeviceType, Driver},
    error::KernelResult,
    fs::blockdev::{BlockDevice, RamDisk},
    sync::OnceCell,
};

static RAMDISK: OnceCell<Arc<RamDisk>> = OnceCell::new();

/// The system RAM disk, once its driver has initialized.
pub fn device() -> Option<Arc<dyn BlockDevice>> {
    RAMDISK
        .get()
        .map(|d| d.clone() as Arc<dyn BlockDevice>)
}

pub struct RamDiskDriver;

pub static RAMDISK_DRIVER: RamDiskDriver = RamDiskDriver;

impl Driver for RamDiskDriver {
    fn name(&self) -> &'static str {
        "ramdisk"
    }

    fn supported_ids(&self) -> &'static [(&'static str, DeviceType)] {
        &[("ramdisk", DeviceType::Block)]
    }

    fn init(&self, _device: &Device) -> KernelResult<()> {
        let disk = Arc::new(RamDisk::new(
            config::RAMDISK_BLOCK_SIZE,
            config::RAMDISK_BLOCKS as u64,
        ));
        let _ = RAMDISK.set(disk);
        log::info!(
            "ramdisk: {} blocks of {} bytes",
            config::RAMDISK_BLOCKS,
            config::RAMDISK_BLOCK_SIZE
        );
        Ok(())
    }
}
