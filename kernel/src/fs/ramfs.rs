//! RAM filesystem: the root filesystem of this core.
//!
//! A rooted tree of `Arc` nodes. Parent back-links are `Weak` -- children
//! reference parents and parents reference children, and an owning cycle
//! would leak the whole subtree. File content is a growable byte buffer
//! extended in 4 KiB increments.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::RwLock;

use super::{
    blockdev::BlockDevice, DirEntry, Filesystem, Metadata, NodeType, VfsNode,
};
use crate::error::{FsError, KernelResult};

/// Buffer growth quantum.
const GROW_INCREMENT: usize = 4096;

/// Monotonic inode numbers.
static NEXT_INODE: AtomicU64 = AtomicU64::new(1);

fn next_inode() -> u64 {
    NEXT_INODE.fetch_add(1, Ordering::Relaxed)
}

fn now() -> u64 {
    crate::drivers::timer::uptime_secs()
}

#[derive(Debug)]
struct NodeMeta {
    perm: u32,
    atime: u64,
    mtime: u64,
    ctime: u64,
}

#[derive(Debug)]
struct RamNode {
    inode: u64,
    node_type: NodeType,
    /// Weak handle to the Arc this node lives in, for parent-link setup.
    self_ref: Weak<RamNode>,
    /// File content; empty for directories.
    data: RwLock<Vec<u8>>,
    /// Directory entries; empty for files.
    children: RwLock<BTreeMap<String, Arc<RamNode>>>,
    /// Back-link to the containing directory. Weak, never owning:
    /// parent->child and child->parent form a cycle otherwise.
    parent: RwLock<Weak<RamNode>>,
    meta: RwLock<NodeMeta>,
}

impl RamNode {
    fn new(node_type: NodeType, perm: u32) -> Arc<Self> {
        let t = now();
        Arc::new_cyclic(|weak| Self {
            inode: next_inode(),
            node_type,
            self_ref: weak.clone(),
            data: RwLock::new(Vec::new()),
            children: RwLock::new(BTreeMap::new()),
            parent: RwLock::new(Weak::new()),
            meta: RwLock::new(NodeMeta {
                perm,
                atime: t,
                mtime: t,
                ctime: t,
            }),
        })
    }

    fn require_dir(&self) -> KernelResult<()> {
        if self.node_type != NodeType::Directory {
            return Err(FsError::NotADirectory.into());
        }
        Ok(())
    }

    fn require_file(&self) -> KernelResult<()> {
        if self.node_type != NodeType::File {
            return Err(FsError::NotAFile.into());
        }
        Ok(())
    }

    fn attach(self: &Arc<Self>, parent: &Arc<RamNode>) {
        *self.parent.write() = Arc::downgrade(parent);
    }
}

impl VfsNode for RamNode {
    fn node_type(&self) -> NodeType {
        self.node_type
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        self.require_file()?;
        let data = self.data.read();
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        self.meta.write().atime = now();
        Ok(n)
    }

    fn write(&self, offset: usize, data: &[u8]) -> KernelResult<usize> {
        self.require_file()?;
        let mut content = self.data.write();
        let end = offset + data.len();
        if end > content.len() {
            // Grow capacity in 4 KiB steps, then zero-fill any gap.
            if end > content.capacity() {
                let target = end.div_ceil(GROW_INCREMENT) * GROW_INCREMENT;
                let additional = target - content.len();
                content.reserve(additional);
            }
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
        self.meta.write().mtime = now();
        Ok(data.len())
    }

    fn truncate(&self, size: usize) -> KernelResult<()> {
        self.require_file()?;
        self.data.write().resize(size, 0);
        self.meta.write().mtime = now();
        Ok(())
    }

    fn metadata(&self) -> KernelResult<Metadata> {
        let meta = self.meta.read();
        let size = match self.node_type {
            NodeType::File => self.data.read().len(),
            NodeType::Directory => self.children.read().len(),
        };
        let nlink = match self.node_type {
            NodeType::File => 1,
            // A directory is linked from its parent and from itself.
            NodeType::Directory => 2 + self.children.read().len() as u32,
        };
        Ok(Metadata {
            inode: self.inode,
            node_type: self.node_type,
            perm: meta.perm,
            size,
            nlink,
            atime: meta.atime,
            mtime: meta.mtime,
            ctime: meta.ctime,
        })
    }

    fn readdir(&self) -> KernelResult<Vec<DirEntry>> {
        self.require_dir()?;
        Ok(self
            .children
            .read()
            .iter()
            .map(|(name, child)| DirEntry {
                name: name.clone(),
                node_type: child.node_type,
                inode: child.inode,
            })
            .collect())
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>> {
        self.require_dir()?;
        self.children
            .read()
            .get(name)
            .map(|node| node.clone() as Arc<dyn VfsNode>)
            .ok_or(FsError::NotFound.into())
    }

    fn create(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>> {
        self.insert_child(name, NodeType::File, perm)
    }

    fn mkdir(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>> {
        self.insert_child(name, NodeType::Directory, perm)
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        self.require_dir()?;
        let mut children = self.children.write();
        let node = children.get(name).ok_or(FsError::NotFound)?;
        if node.node_type == NodeType::Directory && !node.children.read().is_empty() {
            return Err(FsError::DirectoryNotEmpty.into());
        }
        children.remove(name);
        self.meta.write().mtime = now();
        Ok(())
    }
}

impl RamNode {
    fn insert_child(
        self: &RamNode,
        name: &str,
        node_type: NodeType,
        perm: u32,
    ) -> KernelResult<Arc<dyn VfsNode>> {
        self.require_dir()?;
        if name.is_empty() || name.contains('/') {
            return Err(FsError::InvalidPath.into());
        }
        let mut children = self.children.write();
        if children.contains_key(name) {
            return Err(FsError::AlreadyExists.into());
        }
        let node = RamNode::new(node_type, perm);
        // The parent link is set before the child becomes visible in the
        // tree.
        *node.parent.write() = self.self_ref.clone();
        children.insert(name.to_string(), node.clone());
        self.meta.write().mtime = now();
        Ok(node as Arc<dyn VfsNode>)
    }
}

/// The filesystem object.
#[derive(Debug)]
pub struct RamFs {
    root: Arc<RamNode>,
}

impl RamFs {
    pub fn new() -> Self {
        Self {
            root: RamNode::new(NodeType::Directory, super::DEFAULT_DIR_MODE),
        }
    }

    /// Walk an fs-relative canonical path.
    fn walk(&self, rel: &str) -> KernelResult<Arc<RamNode>> {
        let mut node = self.root.clone();
        for component in rel.split('/').filter(|c| !c.is_empty()) {
            node.require_dir()?;
            let next = node
                .children
                .read()
                .get(component)
                .cloned()
                .ok_or(FsError::NotFound)?;
            node = next;
        }
        Ok(node)
    }

    fn walk_parent<'p>(&self, rel: &'p str) -> KernelResult<(Arc<RamNode>, &'p str)> {
        let rel = rel.trim_matches('/');
        if rel.is_empty() {
            return Err(FsError::InvalidPath.into());
        }
        match rel.rfind('/') {
            Some(pos) => Ok((self.walk(&rel[..pos])?, &rel[pos + 1..])),
            None => Ok((self.root.clone(), rel)),
        }
    }
}

impl Default for RamFs {
    fn default() -> Self {
        Self::new()
    }
}

impl Filesystem for RamFs {
    fn root(&self) -> Arc<dyn VfsNode> {
        self.root.clone() as Arc<dyn VfsNode>
    }

    fn name(&self) -> &'static str {
        "ramfs"
    }

    fn sync(&self) -> KernelResult<()> {
        // Nothing behind the RAM; already "on media".
        Ok(())
    }

    fn rename(&self, old: &str, new: &str) -> KernelResult<()> {
        let (old_parent, old_name) = self.walk_parent(old)?;
        let (new_parent, new_name) = self.walk_parent(new)?;
        if new_name.is_empty() || new_name.contains('/') {
            return Err(FsError::InvalidPath.into());
        }

        // Same directory: pure name swap. Across directories: move the
        // node and repoint its parent link.
        let node = {
            let mut old_children = old_parent.children.write();
            let node = old_children.get(old_name).ok_or(FsError::NotFound)?.clone();
            if Arc::ptr_eq(&old_parent, &new_parent) {
                if old_children.contains_key(new_name) && old_name != new_name {
                    return Err(FsError::AlreadyExists.into());
                }
                old_children.remove(old_name);
                old_children.insert(new_name.to_string(), node);
                return Ok(());
            }
            if new_parent.children.read().contains_key(new_name) {
                return Err(FsError::AlreadyExists.into());
            }
            old_children.remove(old_name);
            node
        };
        node.attach(&new_parent);
        new_parent
            .children
            .write()
            .insert(new_name.to_string(), node);
        old_parent.meta.write().mtime = now();
        new_parent.meta.write().mtime = now();
        Ok(())
    }
}

/// Mount entry point registered with the VFS. RAMFS ignores the device.
pub fn mount(
    _device: Option<Arc<dyn BlockDevice>>,
    _flags: u32,
) -> KernelResult<Arc<dyn Filesystem>> {
    Ok(Arc::new(RamFs::new()))
}
