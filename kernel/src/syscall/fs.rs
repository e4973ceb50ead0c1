//! Filesystem system calls.
//!
//! Each call has a typed kernel-side function (what the shell uses) and a
//! thin `raw_*` wrapper that decodes argument registers for the dispatch
//! table.

use alloc::{string::String, sync::Arc};

use super::{buffer, buffer_mut, copy_path, errno_or, SyscallArgs};
use crate::{
    error::{FsError, KernelResult},
    fs::{
        self,
        file::{SEEK_CUR, SEEK_END, SEEK_SET},
        File, NodeType, OpenFlags, SeekFrom,
    },
    sched,
};

/// `stat` output record. Layout is ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Stat {
    pub inode: u64,
    pub mode: u32,
    pub nlink: u32,
    pub size: u64,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

/// `readdir` output record. Layout is ABI; `name` is NUL-padded.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Dirent {
    pub inode: u64,
    /// Mode type bits (S_IFREG / S_IFDIR).
    pub kind: u32,
    pub name: [u8; 52],
}

impl Default for Dirent {
    fn default() -> Self {
        Self {
            inode: 0,
            kind: 0,
            name: [0; 52],
        }
    }
}

fn absolute(path: &str) -> String {
    fs::canonicalize(&sched::current_cwd(), path)
}

// --- typed kernel API ---

/// Open `path`, returning the smallest free fd of the calling task.
pub fn open(path: &str, flag_bits: u32, mode: u32) -> KernelResult<usize> {
    let flags = OpenFlags::from_bits(flag_bits)?;
    let abs = absolute(path);
    let node = fs::vfs().read().open(&abs, flags, mode)?;
    let file = Arc::new(File::from_node(node, flags));
    sched::current_fd_table().insert(file)
}

pub fn close(fd: usize) -> KernelResult<()> {
    sched::current_fd_table().close(fd)
}

pub fn read(fd: usize, buf: &mut [u8]) -> KernelResult<usize> {
    sched::current_fd_table().get(fd)?.read(buf)
}

pub fn write(fd: usize, data: &[u8]) -> KernelResult<usize> {
    sched::current_fd_table().get(fd)?.write(data)
}

pub fn seek(fd: usize, offset: i64, whence: u32) -> KernelResult<usize> {
    let from = match whence {
        SEEK_SET => {
            if offset < 0 {
                return Err(crate::error::KernelError::InvalidArgument {
                    what: "negative absolute seek",
                });
            }
            SeekFrom::Start(offset as usize)
        }
        SEEK_CUR => SeekFrom::Current(offset as isize),
        SEEK_END => SeekFrom::End(offset as isize),
        _ => {
            return Err(crate::error::KernelError::InvalidArgument {
                what: "seek whence",
            })
        }
    };
    sched::current_fd_table().get(fd)?.seek(from)
}

pub fn mkdir(path: &str, mode: u32) -> KernelResult<()> {
    fs::vfs().read().mkdir(&absolute(path), mode)
}

pub fn rmdir(path: &str) -> KernelResult<()> {
    fs::vfs().read().rmdir(&absolute(path))
}

pub fn unlink(path: &str) -> KernelResult<()> {
    fs::vfs().read().unlink(&absolute(path))
}

pub fn stat(path: &str) -> KernelResult<Stat> {
    let meta = fs::vfs().read().stat(&absolute(path))?;
    Ok(Stat {
        inode: meta.inode,
        mode: meta.mode_bits(),
        nlink: meta.nlink,
        size: meta.size as u64,
        atime: meta.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
    })
}

pub fn chdir(path: &str) -> KernelResult<()> {
    let abs = absolute(path);
    let node = fs::vfs().read().resolve_abs(&abs)?;
    if node.node_type() != NodeType::Directory {
        return Err(FsError::NotADirectory.into());
    }
    sched::set_current_cwd(abs);
    Ok(())
}

pub fn getcwd() -> String {
    sched::current_cwd()
}

/// Read directory entries through an open fd.
pub fn readdir(fd: usize) -> KernelResult<alloc::vec::Vec<fs::DirEntry>> {
    sched::current_fd_table().get(fd)?.readdir()
}

// --- raw register decoders ---

pub(super) fn raw_open(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        Ok(open(&path, args[1] as u32, args[2] as u32)? as i64)
    })())
}

pub(super) fn raw_close(args: &SyscallArgs) -> i64 {
    errno_or(close(args[0]).map(|_| 0))
}

pub(super) fn raw_read(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let buf = buffer_mut(args[1], args[2])?;
        Ok(read(args[0], buf)? as i64)
    })())
}

pub(super) fn raw_write(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let data = buffer(args[1], args[2])?;
        Ok(write(args[0], data)? as i64)
    })())
}

pub(super) fn raw_seek(args: &SyscallArgs) -> i64 {
    errno_or(seek(args[0], args[1] as i64, args[2] as u32).map(|pos| pos as i64))
}

/// Whole-file read: `read_file(path, buf, len) -> bytes`.
pub(super) fn raw_read_file(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        let buf = buffer_mut(args[1], args[2])?;
        let data = fs::read_file(&absolute(&path))?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n as i64)
    })())
}

/// Whole-file write: `write_file(path, buf, len) -> bytes`.
pub(super) fn raw_write_file(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        let data = buffer(args[1], args[2])?;
        Ok(fs::write_file(&absolute(&path), data)? as i64)
    })())
}

pub(super) fn raw_mkdir(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        mkdir(&path, args[1] as u32)?;
        Ok(0)
    })())
}

pub(super) fn raw_rmdir(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        rmdir(&path)?;
        Ok(0)
    })())
}

pub(super) fn raw_unlink(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        unlink(&path)?;
        Ok(0)
    })())
}

pub(super) fn raw_stat(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        let out = buffer_mut(args[1], core::mem::size_of::<Stat>())?;
        let stat = stat(&path)?;
        // SAFETY: Stat is plain old data and `out` is exactly its size.
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr() as *mut Stat, stat);
        }
        Ok(0)
    })())
}

/// `readdir(fd, out, len) -> count` with `out` an array of [`Dirent`].
pub(super) fn raw_readdir(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let entries = readdir(args[0])?;
        let capacity = args[2] / core::mem::size_of::<Dirent>();
        let out = buffer_mut(args[1], capacity * core::mem::size_of::<Dirent>())?;
        let mut written = 0;
        for entry in entries.iter().take(capacity) {
            let mut dirent = Dirent {
                inode: entry.inode,
                kind: entry.node_type.type_bits(),
                ..Default::default()
            };
            let n = entry.name.len().min(dirent.name.len() - 1);
            dirent.name[..n].copy_from_slice(&entry.name.as_bytes()[..n]);
            // SAFETY: Dirent is plain old data; the slot is in bounds.
            unsafe {
                core::ptr::write_unaligned(
                    (out.as_mut_ptr() as *mut Dirent).add(written),
                    dirent,
                );
            }
            written += 1;
        }
        Ok(written as i64)
    })())
}

pub(super) fn raw_getcwd(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let out = buffer_mut(args[0], args[1])?;
        let cwd = getcwd();
        if out.len() < cwd.len() + 1 {
            return Err(crate::error::KernelError::InvalidArgument {
                what: "getcwd buffer too small",
            });
        }
        out[..cwd.len()].copy_from_slice(cwd.as_bytes());
        out[cwd.len()] = 0;
        Ok(cwd.len() as i64)
    })())
}

pub(super) fn raw_chdir(args: &SyscallArgs) -> i64 {
    errno_or((|| {
        let path = copy_path(args[0])?;
        chdir(&path)?;
        Ok(0)
    })())
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::{
        error::{EBADF, ENOENT},
        fs::file::{O_APPEND, O_CREAT, O_RDONLY, O_TRUNC, O_WRONLY},
        syscall::{dispatch, Syscall},
    };

    fn sys(call: Syscall, args: SyscallArgs) -> i64 {
        dispatch(call as usize, args)
    }

    fn cstr(s: &str) -> alloc::vec::Vec<u8> {
        let mut v = alloc::vec::Vec::from(s.as_bytes());
        v.push(0);
        v
    }

    #[test]
    fn open_write_seek_read_close_through_dispatch() {
        crate::fs::init();
        let path = cstr("/tmp/sys-rw.txt");

        let fd = sys(
            Syscall::Open,
            [
                path.as_ptr() as usize,
                (O_WRONLY | O_CREAT | O_TRUNC) as usize,
                0o644,
                0,
                0,
                0,
            ],
        );
        assert!(fd >= 0, "open failed: {}", fd);

        let payload = b"dispatch round trip";
        let written = sys(
            Syscall::Write,
            [fd as usize, payload.as_ptr() as usize, payload.len(), 0, 0, 0],
        );
        assert_eq!(written, payload.len() as i64);
        assert_eq!(sys(Syscall::Close, [fd as usize, 0, 0, 0, 0, 0]), 0);

        // Reopen for reading; open/write/seek(0)/read returns exactly W.
        let fd = sys(
            Syscall::Open,
            [path.as_ptr() as usize, O_RDONLY as usize, 0, 0, 0, 0],
        );
        assert!(fd >= 0);
        let mut buf = vec![0u8; payload.len()];
        assert_eq!(
            sys(
                Syscall::Seek,
                [fd as usize, 0, SEEK_SET as usize, 0, 0, 0]
            ),
            0
        );
        let n = sys(
            Syscall::Read,
            [fd as usize, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0],
        );
        assert_eq!(n, payload.len() as i64);
        assert_eq!(&buf, payload);
        sys(Syscall::Close, [fd as usize, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn missing_file_is_enoent() {
        crate::fs::init();
        let path = cstr("/no_such_file");
        assert_eq!(
            sys(
                Syscall::Open,
                [path.as_ptr() as usize, O_RDONLY as usize, 0, 0, 0, 0]
            ),
            -ENOENT
        );
    }

    #[test]
    fn bad_fd_is_ebadf() {
        let mut buf = [0u8; 4];
        assert_eq!(
            sys(
                Syscall::Read,
                [999, buf.as_mut_ptr() as usize, 4, 0, 0, 0]
            ),
            -EBADF
        );
        assert_eq!(sys(Syscall::Close, [999, 0, 0, 0, 0, 0]), -EBADF);
    }

    #[test]
    fn mkdir_stat_rmdir_cycle() {
        crate::fs::init();
        let path = cstr("/tmp/sys-dir");
        assert_eq!(
            sys(Syscall::Mkdir, [path.as_ptr() as usize, 0o755, 0, 0, 0, 0]),
            0
        );

        let mut stat_out = Stat::default();
        assert_eq!(
            sys(
                Syscall::Stat,
                [
                    path.as_ptr() as usize,
                    &mut stat_out as *mut Stat as usize,
                    0,
                    0,
                    0,
                    0
                ]
            ),
            0
        );
        assert_eq!(stat_out.mode & crate::fs::S_IFMT, crate::fs::S_IFDIR);

        assert_eq!(sys(Syscall::Rmdir, [path.as_ptr() as usize, 0, 0, 0, 0, 0]), 0);
        assert_eq!(
            sys(Syscall::Stat, [
                path.as_ptr() as usize,
                &mut stat_out as *mut Stat as usize,
                0, 0, 0, 0
            ]),
            -ENOENT
        );
    }

    #[test]
    fn append_flag_appends() {
        crate::fs::init();
        let path = cstr("/tmp/sys-append.txt");
        let fd = sys(
            Syscall::Open,
            [
                path.as_ptr() as usize,
                (O_WRONLY | O_CREAT | O_TRUNC) as usize,
                0o644,
                0,
                0,
                0,
            ],
        );
        sys(Syscall::Write, [fd as usize, b"one".as_ptr() as usize, 3, 0, 0, 0]);
        sys(Syscall::Close, [fd as usize, 0, 0, 0, 0, 0]);

        let fd = sys(
            Syscall::Open,
            [
                path.as_ptr() as usize,
                (O_WRONLY | O_CREAT | O_APPEND) as usize,
                0o644,
                0,
                0,
                0,
            ],
        );
        sys(Syscall::Write, [fd as usize, b"two".as_ptr() as usize, 3, 0, 0, 0]);
        sys(Syscall::Close, [fd as usize, 0, 0, 0, 0, 0]);

        assert_eq!(crate::fs::read_file("/tmp/sys-append.txt").unwrap(), b"onetwo");
    }

    #[test]
    fn readdir_returns_records() {
        crate::fs::init();
        let dir = cstr("/tmp/sys-readdir");
        sys(Syscall::Mkdir, [dir.as_ptr() as usize, 0o755, 0, 0, 0, 0]);
        let file = cstr("/tmp/sys-readdir/inner");
        let fd = sys(
            Syscall::Open,
            [
                file.as_ptr() as usize,
                (O_WRONLY | O_CREAT) as usize,
                0o644,
                0,
                0,
                0,
            ],
        );
        sys(Syscall::Close, [fd as usize, 0, 0, 0, 0, 0]);

        let dfd = sys(
            Syscall::Open,
            [dir.as_ptr() as usize, O_RDONLY as usize, 0, 0, 0, 0],
        );
        assert!(dfd >= 0);
        let mut out = [Dirent::default(); 8];
        let count = sys(
            Syscall::ReadDir,
            [
                dfd as usize,
                out.as_mut_ptr() as usize,
                core::mem::size_of_val(&out),
                0,
                0,
                0,
            ],
        );
        assert_eq!(count, 1);
        let name_end = out[0].name.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&out[0].name[..name_end], b"inner");
        assert_eq!(out[0].kind, crate::fs::S_IFREG);
        sys(Syscall::Close, [dfd as usize, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn getcwd_roundtrip() {
        crate::fs::init();
        let mut buf = [0u8; 64];
        let n = sys(
            Syscall::GetCwd,
            [buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0, 0],
        );
        assert!(n >= 1);
        assert_eq!(buf[0], b'/');
    }

    #[test]
    fn write_file_then_read_file() {
        crate::fs::init();
        let path = cstr("/tmp/sys-whole.txt");
        let data = b"whole file payload";
        assert_eq!(
            sys(
                Syscall::WriteFile,
                [path.as_ptr() as usize, data.as_ptr() as usize, data.len(), 0, 0, 0]
            ),
            data.len() as i64
        );
        let mut buf = vec![0u8; 64];
        let n = sys(
            Syscall::ReadFile,
            [path.as_ptr() as usize, buf.as_mut_ptr() as usize, buf.len(), 0, 0, 0],
        );
        assert_eq!(n, data.len() as i64);
        assert_eq!(&buf[..n as usize], data);
    }
}
