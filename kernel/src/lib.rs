//! MiniOS kernel library.
//!
//! A small teaching kernel for x86_64 (Multiboot2/GRUB) and ARM64
//! (UEFI/QEMU virt): bitmap page allocation, 4-level paging, trap-driven
//! interrupts and syscalls, a cooperative-preemptive scheduler, a device
//! registry, a VFS with RAMFS (and SFS over the block layer), and a serial
//! shell on top.
//!
//! The crate also compiles for the host target, where the unit-test suite
//! runs under the standard harness; `target_os = "none"` gates everything
//! that needs bare metal.

#![no_std]
#![cfg_attr(
    all(target_os = "none", target_arch = "x86_64"),
    feature(abi_x86_interrupt)
)]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// Host builds (tests) use std's allocator and panic machinery.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod bootinfo;
pub mod config;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod irq;
pub mod klog;
pub mod mm;
pub mod sched;
pub mod serial;
pub mod shell;
pub mod sync;
pub mod syscall;
pub mod trap;

/// Heap exhaustion in a no_std kernel is unrecoverable.
#[cfg(target_os = "none")]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap exhausted allocating {:?}", layout);
}

/// Bring the whole system up and become the idle task. The boot stub has
/// already validated nothing -- `boot_info` comes straight from
/// [`bootinfo::BootInfo::from_ptr`].
#[cfg(target_os = "none")]
pub fn kernel_main(boot_info: &bootinfo::BootInfo) -> ! {
    serial::init();
    println!("MiniOS v{} booting", env!("CARGO_PKG_VERSION"));

    let opts = bootinfo::parse_cmdline(boot_info.command_line());
    klog::init(opts.loglevel.unwrap_or(log::LevelFilter::Info));
    if let Some(hz) = opts.tick_hz {
        drivers::timer::set_tick_hz(hz);
    }
    log::info!(
        "boot: {} MiB available",
        boot_info.available_bytes() / (1024 * 1024)
    );

    // Order matters: frames, then paging, then the heap the rest rides on.
    mm::init(boot_info);

    // Trap vectors and the masked interrupt controller.
    arch::init_early();

    // Devices bind drivers; the timer starts ticking (lines unmasked, CPU
    // still masked).
    drivers::init();

    // Tasking, filesystems, and the first task.
    sched::init();
    fs::init();
    log::info!("syscalls: {} registered", {
        (0..32).filter(|&nr| syscall::name_of(nr).is_some()).count()
    });

    match sched::spawn(shell::shell_task, 0, "shell", sched::Priority::Normal) {
        Ok(id) => log::info!("shell task {}", id),
        Err(e) => panic!("cannot start the shell: {}", e),
    }

    arch::enable_interrupts();
    // The boot context is the idle task from here on.
    sched::run()
}
