//! Block device interface and the RAM-disk implementation.

use alloc::{vec, vec::Vec};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};

/// Uniform block I/O. Buffers must be exactly one block long.
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> usize;

    fn block_count(&self) -> u64;

    fn read_block(&self, block: u64, buf: &mut [u8]) -> KernelResult<()>;

    fn write_block(&self, block: u64, buf: &[u8]) -> KernelResult<()>;

    /// Flush caches to media. The RAM disk has no media; this is a no-op
    /// ordering point.
    fn sync(&self) -> KernelResult<()>;
}

/// Memory-backed block device standing in when no storage hardware exists.
pub struct RamDisk {
    block_size: usize,
    blocks: u64,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub fn new(block_size: usize, blocks: u64) -> Self {
        Self {
            block_size,
            blocks,
            data: Mutex::new(vec![0u8; block_size * blocks as usize]),
        }
    }

    fn check(&self, block: u64, len: usize) -> KernelResult<usize> {
        if len != self.block_size {
            return Err(KernelError::InvalidArgument {
                what: "buffer is not one block",
            });
        }
        if block >= self.blocks {
            return Err(KernelError::IoError);
        }
        Ok(block as usize * self.block_size)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.blocks
    }

    fn read_block(&self, block: u64, buf: &mut [u8]) -> KernelResult<()> {
        let offset = self.check(block, buf.len())?;
        let data = self.data.lock();
        buf.copy_from_slice(&data[offset..offset + self.block_size]);
        Ok(())
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> KernelResult<()> {
        let offset = self.check(block, buf.len())?;
        let mut data = self.data.lock();
        data[offset..offset + self.block_size].copy_from_slice(buf);
        Ok(())
    }

    fn sync(&self) -> KernelResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_round_trip() {
        let disk = RamDisk::new(512, 8);
        let mut block = vec![0u8; 512];
        block[0] = 0xAB;
        block[511] = 0xCD;
        disk.write_block(3, &block).unwrap();

        let mut readback = vec![0u8; 512];
        disk.read_block(3, &mut readback).unwrap();
        assert_eq!(readback, block);

        // Neighbors untouched.
        disk.read_block(2, &mut readback).unwrap();
        assert!(readback.iter().all(|&b| b == 0));
    }

    #[test]
    fn out_of_range_block_is_io_error() {
        let disk = RamDisk::new(512, 4);
        let mut buf = vec![0u8; 512];
        assert_eq!(
            disk.read_block(4, &mut buf).unwrap_err(),
            KernelError::IoError
        );
    }

    #[test]
    fn wrong_buffer_size_rejected() {
        let disk = RamDisk::new(512, 4);
        let mut buf = vec![0u8; 256];
        assert!(disk.read_block(0, &mut buf).is_err());
    }
}
