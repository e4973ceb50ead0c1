//! Compile-time kernel tunables.
//!
//! Everything a port or a test might want to turn lives here, in one place.
//! Boot-time overrides (`loglevel=`, `tick_hz=`) are parsed from the BootInfo
//! command line by [`crate::bootinfo`].

/// Timer tick frequency in Hz.
pub const TICK_HZ: u64 = 100;

/// Microseconds per timer tick at the default frequency.
pub const TICK_US: u64 = 1_000_000 / TICK_HZ;

/// Default time slice in milliseconds (Normal priority).
pub const TIME_SLICE_MS: u64 = 10;

/// Per-priority time slices in timer ticks, indexed by
/// [`crate::sched::Priority`] (High, Normal, Low, Idle).
pub const TIME_SLICE_TICKS: [u32; 4] = [2, 1, 1, 1];

/// Kernel heap size in bytes.
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Kernel stack size per task in bytes.
pub const KERNEL_STACK_SIZE: usize = 32 * 1024;

/// Unmapped guard region below each kernel stack.
pub const STACK_GUARD_SIZE: usize = 4096;

/// Maximum number of live tasks.
pub const MAX_TASKS: usize = 64;

/// Maximum open files per task.
pub const MAX_OPEN_FILES: usize = 64;

/// Shell history depth (lines).
pub const SHELL_HISTORY: usize = 16;

/// Maximum shell input line length in bytes.
pub const SHELL_LINE_MAX: usize = 512;

/// UART receive ring buffer size; must be a power of two.
pub const UART_RX_RING: usize = 256;

/// RAM-disk geometry: 512-byte blocks, 4 MiB total.
pub const RAMDISK_BLOCK_SIZE: usize = 512;
pub const RAMDISK_BLOCKS: usize = 8192;

/// Physical frames managed by the bitmap allocator (512 MiB of 4 KiB pages).
pub const MAX_FRAMES: usize = 131_072;

// Per-architecture console and interrupt wiring.

/// PL011 UART MMIO base on the QEMU virt machine.
#[cfg(target_arch = "aarch64")]
pub const UART_BASE: usize = 0x0900_0000;

/// PL011 interrupt (SPI 1 = INTID 33) on the QEMU virt machine.
#[cfg(target_arch = "aarch64")]
pub const UART_IRQ: u32 = 33;

/// Generic timer PPI (INTID 30).
#[cfg(target_arch = "aarch64")]
pub const TIMER_IRQ: u32 = 30;

/// COM1 base port.
#[cfg(target_arch = "x86_64")]
pub const UART_PORT: u16 = 0x3F8;

/// COM1 IRQ line on the legacy PIC.
#[cfg(target_arch = "x86_64")]
pub const UART_IRQ: u32 = 4;

/// PIT channel 0 IRQ line.
#[cfg(target_arch = "x86_64")]
pub const TIMER_IRQ: u32 = 0;
