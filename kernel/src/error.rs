//! Kernel-wide error types.
//!
//! Internal code reports typed errors; the syscall boundary flattens them to
//! negative errno values via [`KernelError::errno`]. The shell renders them
//! with [`KernelError::kind_str`] for its `error: <kind>: <context>` lines.

use core::fmt;

/// Main kernel error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Malformed argument: null buffer, bad path, zero entry point.
    InvalidArgument { what: &'static str },
    /// Named resource does not exist (device, driver, program).
    NotFound { what: &'static str },
    /// Name collision on registration (device name, fs type name).
    AlreadyExists { what: &'static str },
    /// Caller may not perform this operation.
    NotPermitted { operation: &'static str },
    /// Operation on an object in the wrong state (closed fd, unmounted fs).
    BadState { what: &'static str },
    /// Physical frames, heap bytes, or another memory pool exhausted.
    OutOfMemory,
    /// File descriptor table full.
    OutOfFds,
    /// Task table full.
    OutOfTasks,
    /// Filesystem out of blocks.
    OutOfSpace,
    /// Block device read/write failure.
    IoError,
    /// Device already claimed by another driver.
    Busy { what: &'static str },
    /// On-media or in-memory structure failed an integrity check.
    Corrupt { what: &'static str },

    /// Filesystem-layer errors
    Fs(FsError),
    /// Scheduler-layer errors
    Sched(SchedError),
    /// Memory-mapping errors
    Map(MapError),
    /// Unknown system call number
    NoSuchCall { nr: usize },
}

/// Filesystem-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Path resolves to no inode
    NotFound,
    /// Create/mkdir over an existing name
    AlreadyExists,
    /// Component of the path is not a directory
    NotADirectory,
    /// Directory where a regular file was expected
    NotAFile,
    /// rmdir of a directory that still has children
    DirectoryNotEmpty,
    /// Invalid path format (empty, embedded NUL)
    InvalidPath,
    /// No filesystem mounted at `/`
    NoRootFs,
    /// Mount over an existing mount point
    AlreadyMounted,
    /// Unknown filesystem type name
    UnknownFsType,
    /// fd does not name an open file
    BadFileDescriptor,
    /// File was not opened for this access
    AccessMode,
    /// Operation not supported by this node
    NotSupported,
}

/// Scheduler-specific errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Task id does not name a live task
    TaskNotFound { id: u64 },
    /// Run queue operation on a task in the wrong state
    WrongState,
}

/// Address-space mapping errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// Mapping overlaps an existing one and `replace` was not set
    AlreadyMapped { virt: usize },
    /// unmap/protect of a page that is not mapped
    NotMapped { virt: usize },
    /// Virtual or physical address not page-aligned
    Misaligned,
    /// Page-table frame allocation failed
    OutOfMemory,
}

/// Result type alias for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

// errno values at the syscall boundary (negated before return).
pub const EPERM: i64 = 1;
pub const ENOENT: i64 = 2;
pub const EIO: i64 = 5;
pub const EBADF: i64 = 9;
pub const ENOMEM: i64 = 12;
pub const EBUSY: i64 = 16;
pub const EEXIST: i64 = 17;
pub const ENOTDIR: i64 = 20;
pub const EISDIR: i64 = 21;
pub const EINVAL: i64 = 22;
pub const ENOSPC: i64 = 28;
pub const ENOSYS: i64 = 38;
pub const ENOTEMPTY: i64 = 39;

impl KernelError {
    /// Flatten to a negative errno for the syscall boundary.
    pub fn errno(&self) -> i64 {
        let e = match self {
            Self::InvalidArgument { .. } => EINVAL,
            Self::NotFound { .. } => ENOENT,
            Self::AlreadyExists { .. } => EEXIST,
            Self::NotPermitted { .. } => EPERM,
            Self::BadState { .. } => EINVAL,
            Self::OutOfMemory => ENOMEM,
            Self::OutOfFds => EBADF,
            Self::OutOfTasks => ENOMEM,
            Self::OutOfSpace => ENOSPC,
            Self::IoError => EIO,
            Self::Busy { .. } => EBUSY,
            Self::Corrupt { .. } => EIO,
            Self::Fs(fs) => match fs {
                FsError::NotFound => ENOENT,
                FsError::AlreadyExists => EEXIST,
                FsError::NotADirectory => ENOTDIR,
                FsError::NotAFile => EISDIR,
                FsError::DirectoryNotEmpty => ENOTEMPTY,
                FsError::InvalidPath => EINVAL,
                FsError::NoRootFs => ENOENT,
                FsError::AlreadyMounted => EBUSY,
                FsError::UnknownFsType => EINVAL,
                FsError::BadFileDescriptor => EBADF,
                FsError::AccessMode => EPERM,
                FsError::NotSupported => EINVAL,
            },
            Self::Sched(_) => EINVAL,
            Self::Map(m) => match m {
                MapError::OutOfMemory => ENOMEM,
                _ => EINVAL,
            },
            Self::NoSuchCall { .. } => ENOSYS,
        };
        -e
    }

    /// Short human-readable kind for shell diagnostics.
    pub fn kind_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "invalid argument",
            Self::NotFound { .. } | Self::Fs(FsError::NotFound) => "not found",
            Self::AlreadyExists { .. } | Self::Fs(FsError::AlreadyExists) => "already exists",
            Self::NotPermitted { .. } => "not permitted",
            Self::BadState { .. } => "bad state",
            Self::OutOfMemory => "out of memory",
            Self::OutOfFds => "out of file descriptors",
            Self::OutOfTasks => "out of tasks",
            Self::OutOfSpace => "out of space",
            Self::IoError => "i/o error",
            Self::Busy { .. } => "busy",
            Self::Corrupt { .. } => "corrupt",
            Self::Fs(FsError::NotADirectory) => "not a directory",
            Self::Fs(FsError::NotAFile) => "is a directory",
            Self::Fs(FsError::DirectoryNotEmpty) => "directory not empty",
            Self::Fs(FsError::InvalidPath) => "invalid path",
            Self::Fs(FsError::NoRootFs) => "no root filesystem",
            Self::Fs(FsError::AlreadyMounted) => "already mounted",
            Self::Fs(FsError::UnknownFsType) => "unknown filesystem type",
            Self::Fs(FsError::BadFileDescriptor) => "bad file descriptor",
            Self::Fs(FsError::AccessMode) => "access mode",
            Self::Fs(FsError::NotSupported) => "not supported",
            Self::Sched(_) => "scheduler error",
            Self::Map(_) => "mapping error",
            Self::NoSuchCall { .. } => "no such syscall",
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { what } => write!(f, "invalid argument: {}", what),
            Self::NotFound { what } => write!(f, "not found: {}", what),
            Self::AlreadyExists { what } => write!(f, "already exists: {}", what),
            Self::NotPermitted { operation } => write!(f, "not permitted: {}", operation),
            Self::BadState { what } => write!(f, "bad state: {}", what),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::OutOfFds => write!(f, "file descriptor table full"),
            Self::OutOfTasks => write!(f, "task table full"),
            Self::OutOfSpace => write!(f, "out of space"),
            Self::IoError => write!(f, "i/o error"),
            Self::Busy { what } => write!(f, "busy: {}", what),
            Self::Corrupt { what } => write!(f, "corrupt: {}", what),
            Self::Fs(e) => write!(f, "filesystem error: {:?}", e),
            Self::Sched(e) => write!(f, "scheduler error: {:?}", e),
            Self::Map(e) => write!(f, "mapping error: {:?}", e),
            Self::NoSuchCall { nr } => write!(f, "no such syscall: {}", nr),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::Fs(err)
    }
}

impl From<SchedError> for KernelError {
    fn from(err: SchedError) -> Self {
        Self::Sched(err)
    }
}

impl From<MapError> for KernelError {
    fn from(err: MapError) -> Self {
        Self::Map(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negative() {
        assert_eq!(KernelError::Fs(FsError::NotFound).errno(), -ENOENT);
        assert_eq!(KernelError::OutOfMemory.errno(), -ENOMEM);
        assert_eq!(KernelError::NoSuchCall { nr: 999 }.errno(), -ENOSYS);
        assert_eq!(
            KernelError::Fs(FsError::DirectoryNotEmpty).errno(),
            -ENOTEMPTY
        );
    }

    #[test]
    fn kind_strings_match_shell_contract() {
        // `cat /no_such_file` prints "error: not found: /no_such_file"
        assert_eq!(KernelError::Fs(FsError::NotFound).kind_str(), "not found");
        assert_eq!(KernelError::OutOfSpace.kind_str(), "out of space");
    }

    #[test]
    fn sub_error_conversion() {
        fn inner() -> KernelResult<()> {
            Err(FsError::BadFileDescriptor)?
        }
        assert_eq!(
            inner().unwrap_err(),
            KernelError::Fs(FsError::BadFileDescriptor)
        );
    }
}
