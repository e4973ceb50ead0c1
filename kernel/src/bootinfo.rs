//! Boot handoff: validation and decoding of the BootInfo record.
//!
//! The platform stub (Multiboot2 shim on x86_64, UEFI loader on ARM64) hands
//! the kernel a single pointer to an architecture-agnostic BootInfo record.
//! The kernel treats it as read-only. Validation is strict: a bad magic,
//! version, or memory map is a boot-stub bug and panics the kernel.

use core::{mem, ptr, slice, str};

use crate::error::{KernelError, KernelResult};

/// "MiniOS\0\0" as a little-endian u64 tag.
pub const BOOT_MAGIC: u64 = 0x53_4F_69_6E_69_4D_00_00;

/// BootInfo layout version this kernel understands.
pub const BOOT_VERSION: u16 = 1;

/// Flag bit: the framebuffer descriptor is valid.
pub const BOOT_FLAG_FRAMEBUFFER: u16 = 1 << 0;

/// Classification of a physical memory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Free RAM the kernel may allocate from.
    Available,
    /// Firmware- or hardware-reserved; never touch.
    Reserved,
    /// ACPI tables; reclaimable after parsing (treated as reserved here).
    AcpiReclaim,
    /// Boot stub code and data; reserved until handoff completes.
    BootloaderCode,
    /// Framebuffer aperture.
    Framebuffer,
    /// Kind word this kernel does not know; treated as reserved.
    Unknown(u32),
}

impl RegionKind {
    fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Available,
            1 => Self::Reserved,
            2 => Self::AcpiReclaim,
            3 => Self::BootloaderCode,
            4 => Self::Framebuffer,
            other => Self::Unknown(other),
        }
    }
}

/// One memory-map entry as laid out by the boot stub.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawMemoryRegion {
    pub phys_base: u64,
    pub length: u64,
    pub kind: u32,
    pub attr: u32,
}

/// Decoded memory-map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub phys_base: u64,
    pub length: u64,
    pub kind: RegionKind,
    pub attr: u32,
}

impl MemoryRegion {
    pub fn end(&self) -> u64 {
        self.phys_base + self.length
    }

    pub fn is_available(&self) -> bool {
        self.kind == RegionKind::Available
    }
}

/// Framebuffer descriptor; only meaningful when [`BOOT_FLAG_FRAMEBUFFER`]
/// is set.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FramebufferInfo {
    pub addr: u64,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u32,
}

/// The raw BootInfo header. Offsets are relative to the start of this
/// structure; the memory map and command line follow in the same allocation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBootInfo {
    pub magic: u64,
    pub version: u16,
    pub flags: u16,
    pub reserved: u32,
    pub memory_map_offset: u64,
    pub memory_map_len: u32,
    pub memory_map_stride: u32,
    pub framebuffer: FramebufferInfo,
    pub command_line_offset: u64,
    pub command_line_len: u32,
    pub reserved2: u32,
}

/// Validated, read-only view of the boot record.
#[derive(Clone, Copy)]
pub struct BootInfo {
    base: *const u8,
    header: RawBootInfo,
}

// SAFETY: BootInfo is an immutable view of boot-stub memory that is never
// written after handoff; sharing the raw pointer across contexts is sound.
unsafe impl Send for BootInfo {}
unsafe impl Sync for BootInfo {}

impl BootInfo {
    /// Build a view from the pointer the boot stub handed over.
    ///
    /// Panics on a bad magic, unsupported version, or an out-of-order or
    /// overlapping memory map. A malformed BootInfo means the boot stub is
    /// broken and nothing downstream can be trusted.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a BootInfo record (header plus memory map and
    /// command line within `memory_map_offset`/`command_line_offset` reach)
    /// that stays valid and unmodified for the kernel's lifetime.
    pub unsafe fn from_ptr(ptr: *const u8) -> Self {
        // SAFETY: caller contract; the header is read once by value.
        let info = unsafe { Self::read_unchecked(ptr) };
        if let Err(e) = info.validate() {
            panic!("bad BootInfo from boot stub: {}", e);
        }
        info
    }

    /// Build the view without validating. Used by [`from_ptr`] and by tests
    /// that construct deliberately broken records.
    ///
    /// # Safety
    ///
    /// Same as [`from_ptr`], minus any guarantee about the contents.
    pub unsafe fn read_unchecked(ptr: *const u8) -> Self {
        // SAFETY: caller guarantees `ptr` points at a readable header. The
        // record may be byte-packed by the stub, so read unaligned.
        let header = unsafe { ptr::read_unaligned(ptr as *const RawBootInfo) };
        Self { base: ptr, header }
    }

    /// Check magic, version, and memory-map ordering.
    pub fn validate(&self) -> KernelResult<()> {
        if self.header.magic != BOOT_MAGIC {
            return Err(KernelError::Corrupt {
                what: "BootInfo magic",
            });
        }
        if self.header.version != BOOT_VERSION {
            return Err(KernelError::Corrupt {
                what: "BootInfo version",
            });
        }
        if (self.header.memory_map_stride as usize) < mem::size_of::<RawMemoryRegion>() {
            return Err(KernelError::Corrupt {
                what: "BootInfo memory map stride",
            });
        }
        // Regions must be sorted ascending and non-overlapping.
        let mut prev_end: u64 = 0;
        for region in self.memory_map() {
            if region.phys_base < prev_end {
                return Err(KernelError::Corrupt {
                    what: "BootInfo memory map ordering",
                });
            }
            prev_end = region.end();
        }
        Ok(())
    }

    /// Iterate over the memory map.
    pub fn memory_map(&self) -> MemoryMapIter {
        MemoryMapIter {
            cursor: unsafe { self.base.add(self.header.memory_map_offset as usize) },
            stride: self.header.memory_map_stride as usize,
            remaining: self.header.memory_map_len as usize,
        }
    }

    /// Total bytes of Available memory.
    pub fn available_bytes(&self) -> u64 {
        self.memory_map()
            .filter(|r| r.is_available())
            .map(|r| r.length)
            .sum()
    }

    /// The framebuffer descriptor, if the stub provided one.
    pub fn framebuffer(&self) -> Option<FramebufferInfo> {
        if self.header.flags & BOOT_FLAG_FRAMEBUFFER != 0 {
            Some(self.header.framebuffer)
        } else {
            None
        }
    }

    /// Command-line bytes as UTF-8; invalid bytes yield an empty string.
    pub fn command_line(&self) -> &str {
        if self.header.command_line_len == 0 {
            return "";
        }
        // SAFETY: the boot stub placed `command_line_len` bytes at
        // `command_line_offset` within the BootInfo allocation (from_ptr
        // contract); the bytes are never written after handoff.
        let bytes = unsafe {
            slice::from_raw_parts(
                self.base.add(self.header.command_line_offset as usize),
                self.header.command_line_len as usize,
            )
        };
        str::from_utf8(bytes).unwrap_or("")
    }
}

/// Iterator over the raw memory map, honoring the stride field.
pub struct MemoryMapIter {
    cursor: *const u8,
    stride: usize,
    remaining: usize,
}

impl Iterator for MemoryMapIter {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        if self.remaining == 0 {
            return None;
        }
        // SAFETY: `cursor` walks `remaining` entries of `stride` bytes inside
        // the boot-stub allocation (BootInfo::from_ptr contract). Entries may
        // be unaligned relative to the header, so read unaligned.
        let raw = unsafe { ptr::read_unaligned(self.cursor as *const RawMemoryRegion) };
        self.cursor = unsafe { self.cursor.add(self.stride) };
        self.remaining -= 1;
        Some(MemoryRegion {
            phys_base: raw.phys_base,
            length: raw.length,
            kind: RegionKind::from_raw(raw.kind),
            attr: raw.attr,
        })
    }
}

/// Boot-time overrides recognized on the command line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CmdlineOptions {
    pub loglevel: Option<log::LevelFilter>,
    pub tick_hz: Option<u64>,
}

/// Parse `key=value` words out of the command line. Unknown words are
/// ignored; the boot stub may pass firmware noise through.
pub fn parse_cmdline(cmdline: &str) -> CmdlineOptions {
    let mut opts = CmdlineOptions::default();
    for word in cmdline.split_ascii_whitespace() {
        if let Some(level) = word.strip_prefix("loglevel=") {
            opts.loglevel = match level {
                "off" => Some(log::LevelFilter::Off),
                "error" => Some(log::LevelFilter::Error),
                "warn" => Some(log::LevelFilter::Warn),
                "info" => Some(log::LevelFilter::Info),
                "debug" => Some(log::LevelFilter::Debug),
                "trace" => Some(log::LevelFilter::Trace),
                _ => None,
            };
        } else if let Some(hz) = word.strip_prefix("tick_hz=") {
            opts.tick_hz = hz.parse().ok();
        }
    }
    opts
}

#[cfg(test)]
mod tests {
    use alloc::{vec, vec::Vec};
    use core::mem;

    use super::*;

    /// Serialize a header + regions + command line into one buffer the way a
    /// boot stub would.
    fn build_record(
        magic: u64,
        version: u16,
        regions: &[RawMemoryRegion],
        cmdline: &str,
    ) -> Vec<u8> {
        let header_size = mem::size_of::<RawBootInfo>();
        let map_offset = header_size;
        let cmd_offset = map_offset + regions.len() * mem::size_of::<RawMemoryRegion>();
        let total = cmd_offset + cmdline.len();

        let mut buf = vec![0u8; total];
        let header = RawBootInfo {
            magic,
            version,
            flags: 0,
            reserved: 0,
            memory_map_offset: map_offset as u64,
            memory_map_len: regions.len() as u32,
            memory_map_stride: mem::size_of::<RawMemoryRegion>() as u32,
            framebuffer: FramebufferInfo::default(),
            command_line_offset: cmd_offset as u64,
            command_line_len: cmdline.len() as u32,
            reserved2: 0,
        };
        unsafe {
            ptr::write_unaligned(buf.as_mut_ptr() as *mut RawBootInfo, header);
            let mut cursor = buf.as_mut_ptr().add(map_offset) as *mut RawMemoryRegion;
            for r in regions {
                ptr::write_unaligned(cursor, *r);
                cursor = cursor.add(1);
            }
        }
        buf[cmd_offset..].copy_from_slice(cmdline.as_bytes());
        buf
    }

    fn region(base: u64, length: u64, kind: u32) -> RawMemoryRegion {
        RawMemoryRegion {
            phys_base: base,
            length,
            kind,
            attr: 0,
        }
    }

    #[test]
    fn valid_record_decodes() {
        // Scenario 1 memory layout: one Available region [0x4000_0000, +128 MiB).
        let buf = build_record(
            BOOT_MAGIC,
            BOOT_VERSION,
            &[region(0x4000_0000, 128 * 1024 * 1024, 0)],
            "loglevel=debug tick_hz=250",
        );
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_ok());

        let regions: Vec<_> = info.memory_map().collect();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].phys_base, 0x4000_0000);
        assert_eq!(regions[0].kind, RegionKind::Available);
        assert_eq!(info.available_bytes(), 128 * 1024 * 1024);
        assert!(info.framebuffer().is_none());

        let opts = parse_cmdline(info.command_line());
        assert_eq!(opts.loglevel, Some(log::LevelFilter::Debug));
        assert_eq!(opts.tick_hz, Some(250));
    }

    #[test]
    fn bad_magic_rejected() {
        let buf = build_record(0xDEAD_BEEF, BOOT_VERSION, &[region(0, 4096, 0)], "");
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_err());
    }

    #[test]
    fn bad_version_rejected() {
        let buf = build_record(BOOT_MAGIC, 7, &[region(0, 4096, 0)], "");
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_err());
    }

    #[test]
    fn overlapping_regions_rejected() {
        let buf = build_record(
            BOOT_MAGIC,
            BOOT_VERSION,
            &[region(0x1000, 0x2000, 0), region(0x2000, 0x1000, 1)],
            "",
        );
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_err());
    }

    #[test]
    fn unsorted_regions_rejected() {
        let buf = build_record(
            BOOT_MAGIC,
            BOOT_VERSION,
            &[region(0x8000, 0x1000, 0), region(0x1000, 0x1000, 0)],
            "",
        );
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_err());
    }

    #[test]
    fn adjacent_regions_accepted() {
        let buf = build_record(
            BOOT_MAGIC,
            BOOT_VERSION,
            &[region(0x1000, 0x1000, 0), region(0x2000, 0x1000, 1)],
            "",
        );
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        assert!(info.validate().is_ok());
    }

    #[test]
    fn unknown_kind_is_not_available() {
        let buf = build_record(BOOT_MAGIC, BOOT_VERSION, &[region(0, 4096, 42)], "");
        let info = unsafe { BootInfo::read_unchecked(buf.as_ptr()) };
        let r = info.memory_map().next().unwrap();
        assert_eq!(r.kind, RegionKind::Unknown(42));
        assert!(!r.is_available());
    }

    #[test]
    fn cmdline_ignores_unknown_words() {
        let opts = parse_cmdline("console=ttyAMA0 loglevel=warn quiet");
        assert_eq!(opts.loglevel, Some(log::LevelFilter::Warn));
        assert_eq!(opts.tick_hz, None);
    }
}
