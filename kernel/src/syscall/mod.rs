//! System call dispatch.
//!
//! `dispatch(nr, args)` is the single entry point: the trap path feeds it
//! the number and argument registers from the TrapFrame, kernel tasks
//! (the shell) call the typed `sys_*` functions underneath directly. The
//! dispatch table is a `static` with a full compile-time initializer -- it
//! lives in initialized data, never BSS, and is frozen from the first
//! instruction.
//!
//! Results are non-negative values on success and negated errno codes on
//! failure.

pub mod fs;
pub mod process;

use alloc::string::String;

use crate::error::{KernelError, KernelResult, ENOSYS};

/// System call numbers. The values are ABI.
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit = 0,
    Print = 1,
    Read = 2,
    Write = 3,
    GetPid = 4,
    Sleep = 5,
    Open = 8,
    Close = 9,
    ReadFile = 10,
    WriteFile = 11,
    Seek = 12,
    Mkdir = 13,
    Rmdir = 14,
    Unlink = 15,
    GetCwd = 16,
    Chdir = 17,
    Stat = 18,
    ReadDir = 19,
    Exec = 20,
}

/// Raw argument registers a0..a5.
pub type SyscallArgs = [usize; 6];

type Handler = fn(&SyscallArgs) -> i64;

struct SyscallEntry {
    name: &'static str,
    handler: Handler,
}

const TABLE_SIZE: usize = 32;

const fn entry(name: &'static str, handler: Handler) -> Option<SyscallEntry> {
    Some(SyscallEntry { name, handler })
}

/// The dispatch table, indexed by syscall number. Populated here, at
/// compile time, and never written again.
static SYSCALL_TABLE: [Option<SyscallEntry>; TABLE_SIZE] = [
    /* 0 */ entry("exit", process::raw_exit),
    /* 1 */ entry("print", process::raw_print),
    /* 2 */ entry("read", fs::raw_read),
    /* 3 */ entry("write", fs::raw_write),
    /* 4 */ entry("getpid", process::raw_getpid),
    /* 5 */ entry("sleep", process::raw_sleep),
    /* 6 */ None,
    /* 7 */ None,
    /* 8 */ entry("open", fs::raw_open),
    /* 9 */ entry("close", fs::raw_close),
    /* 10 */ entry("read_file", fs::raw_read_file),
    /* 11 */ entry("write_file", fs::raw_write_file),
    /* 12 */ entry("seek", fs::raw_seek),
    /* 13 */ entry("mkdir", fs::raw_mkdir),
    /* 14 */ entry("rmdir", fs::raw_rmdir),
    /* 15 */ entry("unlink", fs::raw_unlink),
    /* 16 */ entry("getcwd", fs::raw_getcwd),
    /* 17 */ entry("chdir", fs::raw_chdir),
    /* 18 */ entry("stat", fs::raw_stat),
    /* 19 */ entry("readdir", fs::raw_readdir),
    /* 20 */ entry("exec", process::raw_exec),
    /* 21 */ None,
    /* 22 */ None,
    /* 23 */ None,
    /* 24 */ None,
    /* 25 */ None,
    /* 26 */ None,
    /* 27 */ None,
    /* 28 */ None,
    /* 29 */ None,
    /* 30 */ None,
    /* 31 */ None,
];

/// The single numbered entry into kernel services.
pub fn dispatch(nr: usize, args: SyscallArgs) -> i64 {
    match SYSCALL_TABLE.get(nr).and_then(Option::as_ref) {
        Some(entry) => {
            log::trace!("syscall {} ({})", nr, entry.name);
            (entry.handler)(&args)
        }
        None => -ENOSYS,
    }
}

/// Name of a registered syscall, for diagnostics.
pub fn name_of(nr: usize) -> Option<&'static str> {
    SYSCALL_TABLE
        .get(nr)
        .and_then(Option::as_ref)
        .map(|e| e.name)
}

/// Flatten a typed result into the ABI integer.
fn errno_or(result: KernelResult<i64>) -> i64 {
    match result {
        Ok(value) => value,
        Err(e) => e.errno(),
    }
}

/// Copy a NUL-terminated path out of caller memory.
///
/// There is no user/kernel address split in this core; the pointer is a
/// kernel address, validated for NULL and bounded by PATH_MAX.
fn copy_path(ptr: usize) -> KernelResult<String> {
    if ptr == 0 {
        return Err(KernelError::InvalidArgument { what: "null path" });
    }
    let mut bytes = alloc::vec::Vec::new();
    for offset in 0..crate::fs::PATH_MAX {
        // SAFETY: reads byte-by-byte until the terminator, bounded by
        // PATH_MAX; the caller passed a NUL-terminated kernel string.
        let byte = unsafe { core::ptr::read((ptr + offset) as *const u8) };
        if byte == 0 {
            return String::from_utf8(bytes).map_err(|_| KernelError::InvalidArgument {
                what: "path is not UTF-8",
            });
        }
        bytes.push(byte);
    }
    Err(KernelError::InvalidArgument {
        what: "unterminated path",
    })
}

/// View a caller buffer.
fn buffer<'a>(ptr: usize, len: usize) -> KernelResult<&'a [u8]> {
    if ptr == 0 && len != 0 {
        return Err(KernelError::InvalidArgument {
            what: "null buffer",
        });
    }
    // SAFETY: kernel-internal callers pass live buffers; len is their
    // claim of the extent.
    Ok(unsafe { core::slice::from_raw_parts(ptr as *const u8, len) })
}

/// View a mutable caller buffer.
fn buffer_mut<'a>(ptr: usize, len: usize) -> KernelResult<&'a mut [u8]> {
    if ptr == 0 && len != 0 {
        return Err(KernelError::InvalidArgument {
            what: "null buffer",
        });
    }
    // SAFETY: as `buffer`, with exclusive access per the syscall contract.
    Ok(unsafe { core::slice::from_raw_parts_mut(ptr as *mut u8, len) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_numbers_return_enosys() {
        assert_eq!(dispatch(6, [0; 6]), -ENOSYS);
        assert_eq!(dispatch(21, [0; 6]), -ENOSYS);
        assert_eq!(dispatch(31, [0; 6]), -ENOSYS);
        assert_eq!(dispatch(9999, [0; 6]), -ENOSYS);
    }

    #[test]
    fn registered_numbers_reach_their_handlers() {
        // getpid has no side effects and always succeeds.
        assert!(dispatch(Syscall::GetPid as usize, [0; 6]) >= 0);
        assert_eq!(name_of(0), Some("exit"));
        assert_eq!(name_of(8), Some("open"));
        assert_eq!(name_of(20), Some("exec"));
        assert_eq!(name_of(6), None);
    }

    #[test]
    fn null_path_is_einval() {
        use crate::error::EINVAL;
        // open(NULL, ...) must not crash the kernel.
        assert_eq!(dispatch(Syscall::Open as usize, [0; 6]), -EINVAL);
    }

    #[test]
    fn copy_path_reads_nul_terminated() {
        let bytes = b"/tmp/x\0";
        let path = copy_path(bytes.as_ptr() as usize).unwrap();
        assert_eq!(path, "/tmp/x");
    }
}
