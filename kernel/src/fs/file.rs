//! Open files and per-task file descriptor tables.
//!
//! A [`File`] is one open of a node: flags plus a shared position. Fd
//! duplication clones the `Arc`, so every descriptor pointing at the same
//! open shares the position; the File is freed when the last descriptor
//! closes (the `Arc` drop).

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use super::{NodeType, VfsNode};
use crate::{
    config::MAX_OPEN_FILES,
    error::{FsError, KernelError, KernelResult},
};

/// Standard descriptors.
pub const STDIN: usize = 0;
pub const STDOUT: usize = 1;
pub const STDERR: usize = 2;

// Open flag bits, part of the syscall ABI.
pub const O_RDONLY: u32 = 0;
pub const O_WRONLY: u32 = 1;
pub const O_RDWR: u32 = 2;
pub const O_ACCMODE: u32 = 3;
pub const O_CREAT: u32 = 0x40;
pub const O_TRUNC: u32 = 0x200;
pub const O_APPEND: u32 = 0x400;

/// Decoded open flags.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    /// Decode ABI bits. An access mode of 3 is invalid.
    pub fn from_bits(bits: u32) -> KernelResult<Self> {
        let access = bits & O_ACCMODE;
        if access == 3 {
            return Err(KernelError::InvalidArgument {
                what: "open access mode",
            });
        }
        Ok(Self {
            read: access == O_RDONLY || access == O_RDWR,
            write: access == O_WRONLY || access == O_RDWR,
            append: bits & O_APPEND != 0,
            create: bits & O_CREAT != 0,
            truncate: bits & O_TRUNC != 0,
        })
    }

    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
        }
    }

    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            append: false,
            create: false,
            truncate: false,
        }
    }

    /// `O_WRONLY | O_CREAT | O_TRUNC` -- the `>` redirection open.
    pub fn write_create_truncate() -> Self {
        Self {
            read: false,
            write: true,
            append: false,
            create: true,
            truncate: true,
        }
    }

    /// `O_WRONLY | O_CREAT | O_APPEND` -- the `>>` redirection open.
    pub fn write_create_append() -> Self {
        Self {
            read: false,
            write: true,
            append: true,
            create: true,
            truncate: false,
        }
    }
}

/// Seek origin.
#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

pub const SEEK_SET: u32 = 0;
pub const SEEK_CUR: u32 = 1;
pub const SEEK_END: u32 = 2;

/// What an open file talks to.
enum FileBackend {
    /// A filesystem node.
    Node(Arc<dyn VfsNode>),
    /// The serial console; backs the stdio descriptors in this core.
    Console,
}

/// One open file.
pub struct File {
    backend: FileBackend,
    flags: OpenFlags,
    position: Mutex<usize>,
}

impl File {
    pub fn from_node(node: Arc<dyn VfsNode>, flags: OpenFlags) -> Self {
        Self {
            backend: FileBackend::Node(node),
            flags,
            position: Mutex::new(0),
        }
    }

    pub fn console(flags: OpenFlags) -> Self {
        Self {
            backend: FileBackend::Console,
            flags,
            position: Mutex::new(0),
        }
    }

    pub fn is_console(&self) -> bool {
        matches!(self.backend, FileBackend::Console)
    }

    pub fn node(&self) -> Option<&Arc<dyn VfsNode>> {
        match &self.backend {
            FileBackend::Node(node) => Some(node),
            FileBackend::Console => None,
        }
    }

    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if !self.flags.read {
            return Err(FsError::AccessMode.into());
        }
        match &self.backend {
            FileBackend::Node(node) => {
                let mut pos = self.position.lock();
                let n = node.read(*pos, buf)?;
                *pos += n;
                Ok(n)
            }
            FileBackend::Console => {
                if buf.is_empty() {
                    return Ok(0);
                }
                // Block for the first byte, then drain what is pending.
                buf[0] = crate::drivers::uart::read_byte_blocking();
                let mut n = 1;
                while n < buf.len() {
                    match crate::drivers::uart::getc() {
                        Some(byte) => {
                            buf[n] = byte;
                            n += 1;
                        }
                        None => break,
                    }
                }
                Ok(n)
            }
        }
    }

    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        if !self.flags.write {
            return Err(FsError::AccessMode.into());
        }
        match &self.backend {
            FileBackend::Node(node) => {
                let mut pos = self.position.lock();
                if self.flags.append {
                    *pos = node.metadata()?.size;
                }
                let n = node.write(*pos, data)?;
                *pos += n;
                Ok(n)
            }
            FileBackend::Console => {
                for &byte in data {
                    if byte == b'\n' {
                        crate::drivers::uart::putc(b'\r');
                    }
                    crate::drivers::uart::putc(byte);
                }
                Ok(data.len())
            }
        }
    }

    pub fn seek(&self, from: SeekFrom) -> KernelResult<usize> {
        let node = match &self.backend {
            FileBackend::Node(node) => node,
            FileBackend::Console => return Err(FsError::NotSupported.into()),
        };
        let mut pos = self.position.lock();
        let new_pos = match from {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(delta) => apply_delta(*pos, delta)?,
            SeekFrom::End(delta) => apply_delta(node.metadata()?.size, delta)?,
        };
        *pos = new_pos;
        Ok(new_pos)
    }

    pub fn position(&self) -> usize {
        *self.position.lock()
    }

    pub fn readdir(&self) -> KernelResult<alloc::vec::Vec<super::DirEntry>> {
        match &self.backend {
            FileBackend::Node(node) if node.node_type() == NodeType::Directory => node.readdir(),
            FileBackend::Node(_) => Err(FsError::NotADirectory.into()),
            FileBackend::Console => Err(FsError::NotADirectory.into()),
        }
    }
}

fn apply_delta(base: usize, delta: isize) -> KernelResult<usize> {
    let result = if delta < 0 {
        base.checked_sub(delta.unsigned_abs())
    } else {
        base.checked_add(delta as usize)
    };
    result.ok_or(KernelError::InvalidArgument {
        what: "seek before start or past usize",
    })
}

/// Per-task descriptor table. fd 0/1/2 are the console by default.
pub struct FdTable {
    slots: Mutex<Vec<Option<Arc<File>>>>,
}

impl FdTable {
    /// Empty table (no stdio); used by tests and kernel-internal tasks
    /// that never do fd I/O.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Table with fd 0/1/2 wired to the console.
    pub fn with_stdio() -> Self {
        let table = Self::new();
        let stdin = Arc::new(File::console(OpenFlags::read_only()));
        let stdout = Arc::new(File::console(OpenFlags {
            read: false,
            write: true,
            append: false,
            create: false,
            truncate: false,
        }));
        let stderr = stdout.clone();
        let mut slots = table.slots.lock();
        slots.push(Some(stdin));
        slots.push(Some(stdout));
        slots.push(Some(stderr));
        drop(slots);
        table
    }

    /// Install a file at the smallest free descriptor.
    pub fn insert(&self, file: Arc<File>) -> KernelResult<usize> {
        let mut slots = self.slots.lock();
        if let Some(fd) = slots.iter().position(Option::is_none) {
            slots[fd] = Some(file);
            return Ok(fd);
        }
        if slots.len() >= MAX_OPEN_FILES {
            return Err(KernelError::OutOfFds);
        }
        slots.push(Some(file));
        Ok(slots.len() - 1)
    }

    pub fn get(&self, fd: usize) -> KernelResult<Arc<File>> {
        self.slots
            .lock()
            .get(fd)
            .and_then(Clone::clone)
            .ok_or(KernelError::Fs(FsError::BadFileDescriptor))
    }

    /// Release one descriptor; the File goes away with its last
    /// reference.
    pub fn close(&self, fd: usize) -> KernelResult<()> {
        let mut slots = self.slots.lock();
        match slots.get_mut(fd) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(KernelError::Fs(FsError::BadFileDescriptor)),
        }
    }

    /// Duplicate onto the smallest free descriptor.
    pub fn dup(&self, fd: usize) -> KernelResult<usize> {
        let file = self.get(fd)?;
        self.insert(file)
    }

    /// Duplicate onto a chosen descriptor, closing what was there.
    pub fn dup2(&self, old_fd: usize, new_fd: usize) -> KernelResult<usize> {
        let file = self.get(old_fd)?;
        if old_fd == new_fd {
            return Ok(new_fd);
        }
        if new_fd >= MAX_OPEN_FILES {
            return Err(KernelError::Fs(FsError::BadFileDescriptor));
        }
        let mut slots = self.slots.lock();
        while slots.len() <= new_fd {
            slots.push(None);
        }
        slots[new_fd] = Some(file);
        Ok(new_fd)
    }

    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// Drop every descriptor; called when a task exits.
    pub fn close_all(&self) {
        self.slots.lock().clear();
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::{super::ramfs, *};

    fn file_on_ramfs(flags: OpenFlags) -> (Arc<dyn super::super::Filesystem>, Arc<File>) {
        let fs = ramfs::mount(None, 0).unwrap();
        let node = fs.root().create("f", 0o644).unwrap();
        (fs, Arc::new(File::from_node(node, flags)))
    }

    #[test]
    fn flag_bits_decode() {
        let f = OpenFlags::from_bits(O_WRONLY | O_CREAT | O_TRUNC).unwrap();
        assert!(f.write && f.create && f.truncate && !f.read && !f.append);

        let f = OpenFlags::from_bits(O_RDONLY).unwrap();
        assert!(f.read && !f.write);

        let f = OpenFlags::from_bits(O_RDWR | O_APPEND).unwrap();
        assert!(f.read && f.write && f.append);

        assert!(OpenFlags::from_bits(3).is_err());
    }

    #[test]
    fn write_seek_read_round_trip() {
        let (_fs, file) = file_on_ramfs(OpenFlags::read_write());
        file.write(b"kernel bytes").unwrap();
        assert_eq!(file.position(), 12);
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = vec![0u8; 12];
        assert_eq!(file.read(&mut buf).unwrap(), 12);
        assert_eq!(&buf, b"kernel bytes");
    }

    #[test]
    fn position_advances_in_program_order() {
        let (_fs, file) = file_on_ramfs(OpenFlags::read_write());
        file.write(b"abc").unwrap();
        file.write(b"def").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = vec![0u8; 6];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"abcdef");
    }

    #[test]
    fn append_mode_writes_at_end() {
        let (fs, file) = file_on_ramfs(OpenFlags::write_create_append());
        fs.root().lookup("f").unwrap().write(0, b"base").unwrap();
        file.write(b"+tail").unwrap();
        let mut buf = vec![0u8; 16];
        let n = fs.root().lookup("f").unwrap().read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"base+tail");
    }

    #[test]
    fn seek_variants() {
        let (_fs, file) = file_on_ramfs(OpenFlags::read_write());
        file.write(b"0123456789").unwrap();
        assert_eq!(file.seek(SeekFrom::End(-4)).unwrap(), 6);
        assert_eq!(file.seek(SeekFrom::Current(2)).unwrap(), 8);
        assert!(file.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn access_mode_enforced() {
        let (_fs, file) = file_on_ramfs(OpenFlags::read_only());
        assert!(file.write(b"x").is_err());
        let (_fs, file) = file_on_ramfs(OpenFlags::write_create_truncate());
        let mut buf = [0u8; 4];
        assert!(file.read(&mut buf).is_err());
    }

    #[test]
    fn fd_table_hands_out_smallest_free() {
        let table = FdTable::with_stdio();
        let (_fs, file) = file_on_ramfs(OpenFlags::read_only());
        assert_eq!(table.insert(file.clone()).unwrap(), 3);
        assert_eq!(table.insert(file.clone()).unwrap(), 4);
        table.close(3).unwrap();
        // The freed slot is reused before the tail grows.
        assert_eq!(table.insert(file).unwrap(), 3);
    }

    #[test]
    fn close_invalid_fd_fails() {
        let table = FdTable::new();
        assert!(table.close(0).is_err());
        assert!(table.close(99).is_err());
    }

    #[test]
    fn double_close_fails() {
        let table = FdTable::new();
        let (_fs, file) = file_on_ramfs(OpenFlags::read_only());
        let fd = table.insert(file).unwrap();
        table.close(fd).unwrap();
        assert!(table.close(fd).is_err());
    }

    #[test]
    fn dup_shares_position() {
        let table = FdTable::new();
        let (_fs, file) = file_on_ramfs(OpenFlags::read_write());
        let fd = table.insert(file).unwrap();
        let dup_fd = table.dup(fd).unwrap();
        assert_ne!(fd, dup_fd);

        table.get(fd).unwrap().write(b"xyz").unwrap();
        // The duplicate sees the advanced position.
        assert_eq!(table.get(dup_fd).unwrap().position(), 3);
    }

    #[test]
    fn table_capacity_is_bounded() {
        let table = FdTable::new();
        let (_fs, file) = file_on_ramfs(OpenFlags::read_only());
        for _ in 0..MAX_OPEN_FILES {
            table.insert(file.clone()).unwrap();
        }
        assert_eq!(table.insert(file).unwrap_err(), KernelError::OutOfFds);
    }
}
