//! Virtual File System: filesystem-type registry, mount table, path
//! resolution, and operation dispatch.
//!
//! Paths are canonicalized textually (`.`/`..`, `..` at root is a no-op)
//! and dispatched to the filesystem owning the longest-prefix mount.
//! Symlinks are not followed -- the core has none.

pub mod blockdev;
pub mod file;
pub mod ramfs;
#[cfg(feature = "sfs")]
pub mod sfs;

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use spin::RwLock;

pub use file::{FdTable, File, OpenFlags, SeekFrom};

use crate::{
    error::{FsError, KernelError, KernelResult},
    sync::OnceCell,
};
use self::blockdev::BlockDevice;

/// Maximum path length accepted by the VFS.
pub const PATH_MAX: usize = 4096;

/// Maximum length of one path component.
pub const NAME_MAX: usize = 255;

// Mode bits: 0o7777 permission triad + sticky bits, 0o170000 type field.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;

/// Default permission bits for files created without an explicit mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Node kind. This core has regular files and directories only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    File,
    Directory,
}

impl NodeType {
    pub fn type_bits(self) -> u32 {
        match self {
            NodeType::File => S_IFREG,
            NodeType::Directory => S_IFDIR,
        }
    }
}

/// Inode metadata, as reported by `stat`.
#[derive(Debug, Clone, Copy)]
pub struct Metadata {
    pub inode: u64,
    pub node_type: NodeType,
    /// Permission bits (0o7777 field).
    pub perm: u32,
    pub size: usize,
    pub nlink: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
}

impl Metadata {
    /// Full mode word: type field | permission bits.
    pub fn mode_bits(&self) -> u32 {
        self.node_type.type_bits() | (self.perm & 0o7777)
    }
}

/// One directory entry from `readdir`.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub node_type: NodeType,
    pub inode: u64,
}

/// Operations every filesystem node implements. Offsets are byte offsets;
/// directory content is reached through `readdir`/`lookup`, not `read`.
pub trait VfsNode: Send + Sync + core::fmt::Debug {
    fn node_type(&self) -> NodeType;

    fn read(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize>;

    fn write(&self, offset: usize, data: &[u8]) -> KernelResult<usize>;

    fn truncate(&self, size: usize) -> KernelResult<()>;

    fn metadata(&self) -> KernelResult<Metadata>;

    fn readdir(&self) -> KernelResult<Vec<DirEntry>>;

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>>;

    fn create(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>>;

    fn mkdir(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>>;

    /// Remove a file or an empty directory from this directory.
    fn unlink(&self, name: &str) -> KernelResult<()>;
}

/// A mounted filesystem instance.
pub trait Filesystem: Send + Sync + core::fmt::Debug {
    fn root(&self) -> Arc<dyn VfsNode>;

    fn name(&self) -> &'static str;

    fn is_readonly(&self) -> bool {
        false
    }

    fn sync(&self) -> KernelResult<()>;

    /// Rename/move within this filesystem. Paths are fs-relative and
    /// canonical. Filesystems without rename report `NotSupported`;
    /// callers fall back to copy-and-unlink.
    fn rename(&self, _old: &str, _new: &str) -> KernelResult<()> {
        Err(FsError::NotSupported.into())
    }
}

/// Constructor registered per filesystem type name.
pub type MountFn = fn(Option<Arc<dyn BlockDevice>>, u32) -> KernelResult<Arc<dyn Filesystem>>;

struct Mount {
    path: String,
    fs: Arc<dyn Filesystem>,
}

/// The VFS proper. The kernel has one global instance; tests build their
/// own.
pub struct Vfs {
    fs_types: BTreeMap<&'static str, MountFn>,
    /// Mount table; `/` is entry zero once mounted.
    mounts: Vec<Mount>,
}

/// Collapse a possibly-relative path against `cwd` into a canonical
/// absolute path: no `.`/`..` components, no duplicate or trailing
/// slashes. `..` at root is a no-op. Purely textual, and idempotent.
pub fn canonicalize(cwd: &str, path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    let absolute = path.starts_with('/');

    if !absolute {
        for part in cwd.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    stack.pop();
                }
                name => stack.push(name),
            }
        }
    }
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            name => stack.push(name),
        }
    }

    if stack.is_empty() {
        return String::from("/");
    }
    let mut out = String::new();
    for part in stack {
        out.push('/');
        out.push_str(part);
    }
    out
}

/// Reject empty paths, embedded NUL, oversized paths and components.
fn validate_path(path: &str) -> KernelResult<()> {
    if path.is_empty() || path.len() > PATH_MAX || path.contains('\0') {
        return Err(FsError::InvalidPath.into());
    }
    if path.split('/').any(|c| c.len() > NAME_MAX) {
        return Err(FsError::InvalidPath.into());
    }
    Ok(())
}

impl Vfs {
    pub fn new() -> Self {
        Self {
            fs_types: BTreeMap::new(),
            mounts: Vec::new(),
        }
    }

    /// Register a filesystem type. Names are unique.
    pub fn register_fs_type(&mut self, name: &'static str, mount: MountFn) -> KernelResult<()> {
        if self.fs_types.contains_key(name) {
            return Err(KernelError::AlreadyExists {
                what: "filesystem type",
            });
        }
        self.fs_types.insert(name, mount);
        Ok(())
    }

    /// Mount a filesystem instance at a canonical absolute path.
    pub fn mount(
        &mut self,
        path: &str,
        fs_type: &str,
        device: Option<Arc<dyn BlockDevice>>,
        flags: u32,
    ) -> KernelResult<()> {
        validate_path(path)?;
        let path = canonicalize("/", path);

        let mount_fn = self
            .fs_types
            .get(fs_type)
            .copied()
            .ok_or(KernelError::Fs(FsError::UnknownFsType))?;

        if self.mounts.iter().any(|m| m.path == path) {
            return Err(FsError::AlreadyMounted.into());
        }
        if path != "/" {
            if self.mounts.is_empty() {
                return Err(FsError::NoRootFs.into());
            }
            // The mount point must be an existing directory.
            let node = self.resolve_abs(&path)?;
            if node.node_type() != NodeType::Directory {
                return Err(FsError::NotADirectory.into());
            }
        }

        let fs = mount_fn(device, flags)?;
        // The Mount is fully built before the table publishes it; the
        // mount-table lock release is the publish step.
        self.mounts.push(Mount { path, fs });
        Ok(())
    }

    /// Unmount; the root filesystem stays.
    pub fn unmount(&mut self, path: &str) -> KernelResult<()> {
        let path = canonicalize("/", path);
        if path == "/" {
            return Err(KernelError::Busy {
                what: "root filesystem",
            });
        }
        let idx = self
            .mounts
            .iter()
            .position(|m| m.path == path)
            .ok_or(KernelError::Fs(FsError::NotFound))?;
        self.mounts[idx].fs.sync()?;
        self.mounts.remove(idx);
        Ok(())
    }

    /// Longest-prefix mount for a canonical absolute path, plus the
    /// fs-relative remainder.
    fn find_mount<'a>(&self, abs: &'a str) -> KernelResult<(&Mount, &'a str)> {
        let mut best: Option<(&Mount, &'a str)> = None;
        for mount in &self.mounts {
            let rest = if mount.path == "/" {
                Some(&abs[1.min(abs.len())..])
            } else if abs == mount.path {
                Some("")
            } else {
                abs.strip_prefix(mount.path.as_str())
                    .and_then(|r| r.strip_prefix('/'))
            };
            if let Some(rest) = rest {
                if best.map_or(true, |(m, _)| mount.path.len() > m.path.len()) {
                    best = Some((mount, rest));
                }
            }
        }
        best.ok_or(KernelError::Fs(FsError::NoRootFs))
    }

    /// Resolve a canonical absolute path to a node.
    pub fn resolve_abs(&self, abs: &str) -> KernelResult<Arc<dyn VfsNode>> {
        validate_path(abs)?;
        let (mount, rest) = self.find_mount(abs)?;
        let mut node = mount.fs.root();
        for component in rest.split('/').filter(|c| !c.is_empty()) {
            node = node.lookup(component)?;
        }
        Ok(node)
    }

    /// Resolve the parent directory of a path, returning the final
    /// component.
    fn resolve_parent(&self, abs: &str) -> KernelResult<(Arc<dyn VfsNode>, String)> {
        validate_path(abs)?;
        if abs == "/" {
            return Err(FsError::InvalidPath.into());
        }
        let (parent_path, name) = match abs.rfind('/') {
            Some(0) => ("/", &abs[1..]),
            Some(pos) => (&abs[..pos], &abs[pos + 1..]),
            None => return Err(FsError::InvalidPath.into()),
        };
        let parent = self.resolve_abs(parent_path)?;
        if parent.node_type() != NodeType::Directory {
            return Err(FsError::NotADirectory.into());
        }
        Ok((parent, name.to_string()))
    }

    /// Open with full flag semantics; returns the node (position state
    /// lives in [`File`]).
    pub fn open(&self, abs: &str, flags: OpenFlags, perm: u32) -> KernelResult<Arc<dyn VfsNode>> {
        let node = match self.resolve_abs(abs) {
            Ok(node) => node,
            Err(KernelError::Fs(FsError::NotFound)) if flags.create => {
                let (parent, name) = self.resolve_parent(abs)?;
                parent.create(&name, perm & 0o7777)?
            }
            Err(e) => return Err(e),
        };
        if flags.write && node.node_type() == NodeType::Directory {
            return Err(FsError::NotAFile.into());
        }
        if flags.truncate && node.node_type() == NodeType::File {
            node.truncate(0)?;
        }
        Ok(node)
    }

    pub fn mkdir(&self, abs: &str, perm: u32) -> KernelResult<()> {
        let (parent, name) = self.resolve_parent(abs)?;
        parent.mkdir(&name, perm & 0o7777)?;
        Ok(())
    }

    /// Remove an empty directory.
    pub fn rmdir(&self, abs: &str) -> KernelResult<()> {
        let (parent, name) = self.resolve_parent(abs)?;
        let target = parent.lookup(&name)?;
        if target.node_type() != NodeType::Directory {
            return Err(FsError::NotADirectory.into());
        }
        parent.unlink(&name)
    }

    /// Remove a regular file.
    pub fn unlink(&self, abs: &str) -> KernelResult<()> {
        let (parent, name) = self.resolve_parent(abs)?;
        let target = parent.lookup(&name)?;
        if target.node_type() != NodeType::File {
            return Err(FsError::NotAFile.into());
        }
        parent.unlink(&name)
    }

    pub fn stat(&self, abs: &str) -> KernelResult<Metadata> {
        self.resolve_abs(abs)?.metadata()
    }

    pub fn readdir(&self, abs: &str) -> KernelResult<Vec<DirEntry>> {
        self.resolve_abs(abs)?.readdir()
    }

    /// Rename within one filesystem; cross-mount renames report
    /// `NotSupported` and callers copy + unlink instead.
    pub fn rename(&self, old_abs: &str, new_abs: &str) -> KernelResult<()> {
        validate_path(old_abs)?;
        validate_path(new_abs)?;
        let (old_mount, old_rest) = self.find_mount(old_abs)?;
        let (new_mount, new_rest) = self.find_mount(new_abs)?;
        if !Arc::ptr_eq(&old_mount.fs, &new_mount.fs) {
            return Err(FsError::NotSupported.into());
        }
        let (old_rest, new_rest) = (old_rest.to_string(), new_rest.to_string());
        old_mount.fs.rename(&old_rest, &new_rest)
    }

    /// Sync every mounted filesystem.
    pub fn sync(&self) -> KernelResult<()> {
        for mount in &self.mounts {
            mount.fs.sync()?;
        }
        Ok(())
    }

    pub fn mount_points(&self) -> Vec<(String, &'static str)> {
        self.mounts
            .iter()
            .map(|m| (m.path.clone(), m.fs.name()))
            .collect()
    }
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

static VFS: OnceCell<RwLock<Vfs>> = OnceCell::new();

/// The kernel's VFS instance.
pub fn vfs() -> &'static RwLock<Vfs> {
    VFS.expect("VFS")
}

/// Build the global VFS: register filesystem types, mount RAMFS at `/`,
/// and lay down the standard tree.
pub fn init() {
    let mut instance = Vfs::new();
    instance
        .register_fs_type("ramfs", ramfs::mount)
        .expect("ramfs type");
    #[cfg(feature = "sfs")]
    instance
        .register_fs_type("sfs", sfs::mount)
        .expect("sfs type");

    if let Err(e) = instance.mount("/", "ramfs", None, 0) {
        panic!("cannot mount root filesystem: {}", e);
    }

    for dir in ["/bin", "/etc", "/tmp", "/home", "/dev"] {
        if let Err(e) = instance.mkdir(dir, DEFAULT_DIR_MODE) {
            log::warn!("mkdir {}: {}", dir, e);
        }
    }
    let welcome = instance.open(
        "/etc/welcome.txt",
        OpenFlags::write_create_truncate(),
        DEFAULT_FILE_MODE,
    );
    match welcome {
        Ok(node) => {
            let text = b"Welcome to MiniOS!\nType 'help' for a list of commands.\n";
            let _ = node.write(0, text);
        }
        Err(e) => log::warn!("welcome file: {}", e),
    }

    if VFS.set(RwLock::new(instance)).is_err() {
        log::warn!("VFS already initialized");
        return;
    }
    log::info!("VFS: ramfs mounted at /");
}

// Convenience helpers over the global instance.

/// Read a whole file into memory.
pub fn read_file(abs: &str) -> KernelResult<Vec<u8>> {
    let guard = vfs().read();
    let node = guard.resolve_abs(abs)?;
    if node.node_type() != NodeType::File {
        return Err(FsError::NotAFile.into());
    }
    let size = node.metadata()?.size;
    let mut buf = vec![0u8; size];
    let n = node.read(0, &mut buf)?;
    buf.truncate(n);
    Ok(buf)
}

/// Create/overwrite a file with `data`.
pub fn write_file(abs: &str, data: &[u8]) -> KernelResult<usize> {
    let guard = vfs().read();
    let node = guard.open(abs, OpenFlags::write_create_truncate(), DEFAULT_FILE_MODE)?;
    node.write(0, data)
}

/// Append `data` to a file, creating it if needed.
pub fn append_file(abs: &str, data: &[u8]) -> KernelResult<usize> {
    let guard = vfs().read();
    let node = guard.open(abs, OpenFlags::write_create_append(), DEFAULT_FILE_MODE)?;
    let size = node.metadata()?.size;
    node.write(size, data)
}

pub fn file_exists(abs: &str) -> bool {
    vfs().read().resolve_abs(abs).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vfs() -> Vfs {
        let mut v = Vfs::new();
        v.register_fs_type("ramfs", ramfs::mount).unwrap();
        v.mount("/", "ramfs", None, 0).unwrap();
        v
    }

    // --- canonicalization ---

    #[test]
    fn canonicalize_basics() {
        assert_eq!(canonicalize("/", "/a/b/c"), "/a/b/c");
        assert_eq!(canonicalize("/home", "docs"), "/home/docs");
        assert_eq!(canonicalize("/home", "./docs/../music"), "/home/music");
        assert_eq!(canonicalize("/", ".."), "/");
        assert_eq!(canonicalize("/a", "../../.."), "/");
        assert_eq!(canonicalize("/", "//a///b/"), "/a/b");
        assert_eq!(canonicalize("/a/b", "."), "/a/b");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        for (cwd, path) in [
            ("/", "/x/./y/../z"),
            ("/home/user", "../etc//passwd"),
            ("/a/b/c", "."),
            ("/", "../.."),
        ] {
            let once = canonicalize(cwd, path);
            let twice = canonicalize(cwd, &once);
            assert_eq!(once, twice, "not idempotent for {:?}", (cwd, path));
        }
    }

    #[test]
    fn resolve_equals_resolve_of_canonical() {
        let v = test_vfs();
        v.mkdir("/a", 0o755).unwrap();
        v.mkdir("/a/b", 0o755).unwrap();
        let direct = v.resolve_abs(&canonicalize("/a", "b")).unwrap();
        let canonical = v
            .resolve_abs(&canonicalize("/a", &canonicalize("/a", "b")))
            .unwrap();
        assert_eq!(
            direct.metadata().unwrap().inode,
            canonical.metadata().unwrap().inode
        );
    }

    // --- mounts ---

    #[test]
    fn mount_requires_root_first() {
        let mut v = Vfs::new();
        v.register_fs_type("ramfs", ramfs::mount).unwrap();
        assert!(v.mount("/tmp", "ramfs", None, 0).is_err());
        v.mount("/", "ramfs", None, 0).unwrap();
        v.mkdir("/tmp", 0o755).unwrap();
        v.mount("/tmp", "ramfs", None, 0).unwrap();
    }

    #[test]
    fn duplicate_mount_rejected() {
        let mut v = test_vfs();
        assert_eq!(
            v.mount("/", "ramfs", None, 0).unwrap_err(),
            KernelError::Fs(FsError::AlreadyMounted)
        );
    }

    #[test]
    fn unknown_fs_type_rejected() {
        let mut v = test_vfs();
        v.mkdir("/mnt", 0o755).unwrap();
        assert_eq!(
            v.mount("/mnt", "xfs", None, 0).unwrap_err(),
            KernelError::Fs(FsError::UnknownFsType)
        );
    }

    #[test]
    fn longest_prefix_mount_wins() {
        let mut v = test_vfs();
        v.mkdir("/mnt", 0o755).unwrap();
        v.mkdir("/mnt/inner", 0o755).unwrap();
        v.mount("/mnt", "ramfs", None, 0).unwrap();
        // A file created through the /mnt mount is not in the root fs.
        v.open("/mnt/on-inner", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        // The root fs's /mnt/inner is shadowed by the mounted fs.
        assert!(v.resolve_abs("/mnt/inner").is_err());
        assert!(v.resolve_abs("/mnt/on-inner").is_ok());
    }

    #[test]
    fn unmount_root_refused() {
        let mut v = test_vfs();
        assert!(v.unmount("/").is_err());
    }

    #[test]
    fn mount_point_crossing_dispatches_to_mounted_fs() {
        let mut v = test_vfs();
        v.mkdir("/data", 0o755).unwrap();
        v.mount("/data", "ramfs", None, 0).unwrap();
        v.mkdir("/data/sub", 0o755).unwrap();
        let entries = v.readdir("/data").unwrap();
        assert!(entries.iter().any(|e| e.name == "sub"));
        // After unmount the directory is empty again (it is the original
        // ramfs dir).
        v.unmount("/data").unwrap();
        assert!(v.readdir("/data").unwrap().is_empty());
    }

    // --- operations ---

    #[test]
    fn missing_path_is_not_found() {
        let v = test_vfs();
        assert_eq!(
            v.resolve_abs("/no_such_file").unwrap_err(),
            KernelError::Fs(FsError::NotFound)
        );
    }

    #[test]
    fn open_create_then_stat() {
        let v = test_vfs();
        let node = v
            .open("/notes.txt", OpenFlags::write_create_truncate(), 0o600)
            .unwrap();
        node.write(0, b"hi").unwrap();
        let meta = v.stat("/notes.txt").unwrap();
        assert_eq!(meta.size, 2);
        assert_eq!(meta.perm, 0o600);
        assert_eq!(meta.mode_bits() & S_IFMT, S_IFREG);
    }

    #[test]
    fn open_without_create_fails_on_missing() {
        let v = test_vfs();
        assert!(v.open("/ghost", OpenFlags::read_only(), 0).is_err());
    }

    #[test]
    fn mkdir_rmdir_restores_tree() {
        let v = test_vfs();
        let before = v.readdir("/").unwrap().len();
        v.mkdir("/scratch", 0o755).unwrap();
        assert_eq!(v.readdir("/").unwrap().len(), before + 1);
        v.rmdir("/scratch").unwrap();
        assert_eq!(v.readdir("/").unwrap().len(), before);
    }

    #[test]
    fn rmdir_on_file_fails() {
        let v = test_vfs();
        v.open("/f", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        assert_eq!(
            v.rmdir("/f").unwrap_err(),
            KernelError::Fs(FsError::NotADirectory)
        );
    }

    #[test]
    fn unlink_on_directory_fails() {
        let v = test_vfs();
        v.mkdir("/d", 0o755).unwrap();
        assert_eq!(
            v.unlink("/d").unwrap_err(),
            KernelError::Fs(FsError::NotAFile)
        );
    }

    #[test]
    fn touch_unlink_restores_tree() {
        let v = test_vfs();
        let before = v.readdir("/").unwrap().len();
        v.open("/t", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        v.unlink("/t").unwrap();
        assert_eq!(v.readdir("/").unwrap().len(), before);
        assert!(v.resolve_abs("/t").is_err());
    }

    #[test]
    fn rename_within_fs() {
        let v = test_vfs();
        v.mkdir("/a", 0o755).unwrap();
        v.mkdir("/b", 0o755).unwrap();
        let node = v
            .open("/a/file", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        node.write(0, b"payload").unwrap();
        v.rename("/a/file", "/b/moved").unwrap();
        assert!(v.resolve_abs("/a/file").is_err());
        let meta = v.stat("/b/moved").unwrap();
        assert_eq!(meta.size, 7);
    }

    #[test]
    fn deep_paths_resolve() {
        let v = test_vfs();
        v.mkdir("/a", 0o755).unwrap();
        v.mkdir("/a/b", 0o755).unwrap();
        v.mkdir("/a/b/c", 0o755).unwrap();
        v.open("/a/b/c/leaf", OpenFlags::write_create_truncate(), 0o644)
            .unwrap();
        assert!(v.resolve_abs("/a/b/c/leaf").is_ok());
        let entries = v.readdir("/a/b").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "c");
    }

    #[test]
    fn empty_and_nul_paths_rejected() {
        let v = test_vfs();
        assert!(v.resolve_abs("").is_err());
        assert!(v.resolve_abs("/a\0b").is_err());
    }
}
