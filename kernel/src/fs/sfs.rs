//! Simple File System (SFS): a small on-disk layout exercising the block
//! device path.
//!
//! Layout, in device blocks:
//!   0        superblock
//!   1..=7    free-block bitmap (bit set = allocated)
//!   8..=63   inode table
//!   64..     data
//!
//! Each inode is 72 bytes: mode, size, blocks, direct[12], indirect,
//! ctime, mtime -- all little-endian u32. Directory content is an array of
//! 32-byte entries {inode, name[28]}; inode 0 marks a free entry. Inode 0
//! is reserved, the root directory is inode 1.

use alloc::{
    string::{String, ToString},
    sync::Arc,
    vec,
    vec::Vec,
};

use spin::Mutex;

use super::{
    blockdev::BlockDevice, DirEntry, Filesystem, Metadata, NodeType, VfsNode, S_IFDIR, S_IFMT,
    S_IFREG,
};
use crate::error::{FsError, KernelError, KernelResult};

pub const SFS_MAGIC: u32 = 0x5346_5300;

const BITMAP_START: u64 = 1;
const BITMAP_BLOCKS: u64 = 7;
const INODE_TABLE_START: u64 = 8;
const INODE_TABLE_BLOCKS: u64 = 56;
const DATA_START: u64 = 64;

const INODE_SIZE: usize = 72;
const DIRECT_BLOCKS: usize = 12;
const DIRENT_SIZE: usize = 32;
const NAME_LEN: usize = 28;

const ROOT_INODE: u32 = 1;

fn now32() -> u32 {
    crate::drivers::timer::uptime_secs() as u32
}

#[derive(Debug, Clone, Copy)]
struct Superblock {
    magic: u32,
    block_size: u32,
    total_blocks: u32,
    inode_blocks: u32,
    data_blocks: u32,
    free_blocks: u32,
    root_inode: u32,
}

impl Superblock {
    fn to_bytes(self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        for (i, word) in [
            self.magic,
            self.block_size,
            self.total_blocks,
            self.inode_blocks,
            self.data_blocks,
            self.free_blocks,
            self.root_inode,
        ]
        .into_iter()
        .enumerate()
        {
            buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let word = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        Self {
            magic: word(0),
            block_size: word(1),
            total_blocks: word(2),
            inode_blocks: word(3),
            data_blocks: word(4),
            free_blocks: word(5),
            root_inode: word(6),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DiskInode {
    mode: u32,
    size: u32,
    blocks: u32,
    direct: [u32; DIRECT_BLOCKS],
    indirect: u32,
    ctime: u32,
    mtime: u32,
}

impl DiskInode {
    fn is_free(&self) -> bool {
        self.mode == 0
    }

    fn node_type(&self) -> NodeType {
        if self.mode & S_IFMT == S_IFDIR {
            NodeType::Directory
        } else {
            NodeType::File
        }
    }

    fn to_bytes(self) -> [u8; INODE_SIZE] {
        let mut buf = [0u8; INODE_SIZE];
        let mut words = [0u32; INODE_SIZE / 4];
        words[0] = self.mode;
        words[1] = self.size;
        words[2] = self.blocks;
        words[3..3 + DIRECT_BLOCKS].copy_from_slice(&self.direct);
        words[15] = self.indirect;
        words[16] = self.ctime;
        words[17] = self.mtime;
        for (i, w) in words.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        buf
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let word = |i: usize| u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap());
        let mut direct = [0u32; DIRECT_BLOCKS];
        for (i, d) in direct.iter_mut().enumerate() {
            *d = word(3 + i);
        }
        Self {
            mode: word(0),
            size: word(1),
            blocks: word(2),
            direct,
            indirect: word(15),
            ctime: word(16),
            mtime: word(17),
        }
    }
}

struct SfsInner {
    device: Arc<dyn BlockDevice>,
    block_size: usize,
    /// Serializes superblock/bitmap/inode-table read-modify-write cycles.
    sb: Mutex<Superblock>,
}

impl SfsInner {
    fn read_block(&self, block: u64) -> KernelResult<Vec<u8>> {
        let mut buf = vec![0u8; self.block_size];
        self.device.read_block(block, &mut buf)?;
        Ok(buf)
    }

    fn write_block(&self, block: u64, buf: &[u8]) -> KernelResult<()> {
        self.device.write_block(block, buf)
    }

    fn flush_superblock(&self, sb: &Superblock) -> KernelResult<()> {
        self.write_block(0, &sb.to_bytes(self.block_size))
    }

    fn inodes_per_block(&self) -> usize {
        self.block_size / INODE_SIZE
    }

    fn max_inodes(&self) -> u32 {
        (INODE_TABLE_BLOCKS as usize * self.inodes_per_block()) as u32
    }

    fn inode_location(&self, ino: u32) -> (u64, usize) {
        let per_block = self.inodes_per_block();
        (
            INODE_TABLE_START + (ino as usize / per_block) as u64,
            (ino as usize % per_block) * INODE_SIZE,
        )
    }

    fn read_inode(&self, ino: u32) -> KernelResult<DiskInode> {
        if ino >= self.max_inodes() {
            return Err(KernelError::Corrupt {
                what: "inode number out of table",
            });
        }
        let (block, offset) = self.inode_location(ino);
        let buf = self.read_block(block)?;
        Ok(DiskInode::from_bytes(&buf[offset..offset + INODE_SIZE]))
    }

    fn write_inode(&self, ino: u32, inode: &DiskInode) -> KernelResult<()> {
        let (block, offset) = self.inode_location(ino);
        let mut buf = self.read_block(block)?;
        buf[offset..offset + INODE_SIZE].copy_from_slice(&inode.to_bytes());
        self.write_block(block, &buf)
    }

    fn alloc_inode(&self, mode: u32) -> KernelResult<u32> {
        // Inode 0 stays reserved as the "free entry" marker.
        for ino in 1..self.max_inodes() {
            let inode = self.read_inode(ino)?;
            if inode.is_free() {
                let fresh = DiskInode {
                    mode,
                    ctime: now32(),
                    mtime: now32(),
                    ..Default::default()
                };
                self.write_inode(ino, &fresh)?;
                return Ok(ino);
            }
        }
        Err(KernelError::OutOfSpace)
    }

    fn free_inode(&self, ino: u32) -> KernelResult<()> {
        self.write_inode(ino, &DiskInode::default())
    }

    fn alloc_block(&self) -> KernelResult<u32> {
        let mut sb = self.sb.lock();
        let bits_per_block = self.block_size * 8;
        for bitmap_idx in 0..BITMAP_BLOCKS {
            let mut buf = self.read_block(BITMAP_START + bitmap_idx)?;
            for (byte_idx, byte) in buf.iter_mut().enumerate() {
                if *byte == 0xFF {
                    continue;
                }
                let bit = (0..8).find(|b| *byte & (1 << b) == 0).unwrap();
                let block =
                    bitmap_idx as usize * bits_per_block + byte_idx * 8 + bit;
                if block as u32 >= sb.total_blocks {
                    return Err(KernelError::OutOfSpace);
                }
                *byte |= 1 << bit;
                self.write_block(BITMAP_START + bitmap_idx, &buf)?;
                sb.free_blocks -= 1;
                self.flush_superblock(&sb)?;
                return Ok(block as u32);
            }
        }
        Err(KernelError::OutOfSpace)
    }

    fn free_block(&self, block: u32) -> KernelResult<()> {
        if u64::from(block) < DATA_START {
            return Err(KernelError::Corrupt {
                what: "freeing a metadata block",
            });
        }
        let mut sb = self.sb.lock();
        let bits_per_block = self.block_size * 8;
        let bitmap_idx = block as usize / bits_per_block;
        let mut buf = self.read_block(BITMAP_START + bitmap_idx as u64)?;
        let byte = block as usize % bits_per_block / 8;
        let bit = block as usize % 8;
        buf[byte] &= !(1 << bit);
        self.write_block(BITMAP_START + bitmap_idx as u64, &buf)?;
        sb.free_blocks += 1;
        self.flush_superblock(&sb)
    }

    /// Device block holding `file_block` of `inode`, allocating on demand.
    fn block_of(
        &self,
        inode: &mut DiskInode,
        file_block: usize,
        allocate: bool,
    ) -> KernelResult<Option<u32>> {
        let ptrs_per_block = self.block_size / 4;
        if file_block < DIRECT_BLOCKS {
            if inode.direct[file_block] == 0 {
                if !allocate {
                    return Ok(None);
                }
                inode.direct[file_block] = self.alloc_block()?;
                inode.blocks += 1;
            }
            return Ok(Some(inode.direct[file_block]));
        }

        let indirect_idx = file_block - DIRECT_BLOCKS;
        if indirect_idx >= ptrs_per_block {
            return Err(KernelError::OutOfSpace);
        }
        if inode.indirect == 0 {
            if !allocate {
                return Ok(None);
            }
            let block = self.alloc_block()?;
            self.write_block(u64::from(block), &vec![0u8; self.block_size])?;
            inode.indirect = block;
        }
        let mut table = self.read_block(u64::from(inode.indirect))?;
        let slot = indirect_idx * 4;
        let mut entry = u32::from_le_bytes(table[slot..slot + 4].try_into().unwrap());
        if entry == 0 {
            if !allocate {
                return Ok(None);
            }
            entry = self.alloc_block()?;
            inode.blocks += 1;
            table[slot..slot + 4].copy_from_slice(&entry.to_le_bytes());
            self.write_block(u64::from(inode.indirect), &table)?;
        }
        Ok(Some(entry))
    }

    /// Release every data block of an inode.
    fn release_blocks(&self, inode: &mut DiskInode) -> KernelResult<()> {
        for slot in inode.direct.iter_mut() {
            if *slot != 0 {
                self.free_block(*slot)?;
                *slot = 0;
            }
        }
        if inode.indirect != 0 {
            let table = self.read_block(u64::from(inode.indirect))?;
            for chunk in table.chunks_exact(4) {
                let entry = u32::from_le_bytes(chunk.try_into().unwrap());
                if entry != 0 {
                    self.free_block(entry)?;
                }
            }
            self.free_block(inode.indirect)?;
            inode.indirect = 0;
        }
        inode.blocks = 0;
        Ok(())
    }
}

/// One SFS inode seen through the VFS.
struct SfsNode {
    fs: Arc<SfsInner>,
    ino: u32,
}

impl core::fmt::Debug for SfsNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SfsNode").field("ino", &self.ino).finish()
    }
}

impl SfsNode {
    fn load(&self) -> KernelResult<DiskInode> {
        self.fs.read_inode(self.ino)
    }

    /// Directory entries as (slot index, inode, name).
    fn dir_entries(&self) -> KernelResult<Vec<(usize, u32, String)>> {
        let mut inode = self.load()?;
        if inode.node_type() != NodeType::Directory {
            return Err(FsError::NotADirectory.into());
        }
        let mut out = Vec::new();
        let total_slots = inode.size as usize / DIRENT_SIZE;
        let per_block = self.fs.block_size / DIRENT_SIZE;
        for slot in 0..total_slots {
            let Some(block) = self.fs.block_of(&mut inode, slot / per_block, false)? else {
                continue;
            };
            let buf = self.fs.read_block(u64::from(block))?;
            let off = (slot % per_block) * DIRENT_SIZE;
            let ino = u32::from_le_bytes(buf[off..off + 4].try_into().unwrap());
            if ino == 0 {
                continue;
            }
            let name_bytes = &buf[off + 4..off + 4 + NAME_LEN];
            let end = name_bytes.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
            let name = core::str::from_utf8(&name_bytes[..end])
                .map_err(|_| KernelError::Corrupt {
                    what: "directory entry name",
                })?
                .to_string();
            out.push((slot, ino, name));
        }
        Ok(out)
    }

    /// Write a directory entry into `slot` (extending the directory as
    /// needed).
    fn write_dir_slot(&self, slot: usize, ino: u32, name: &str) -> KernelResult<()> {
        let mut inode = self.load()?;
        let per_block = self.fs.block_size / DIRENT_SIZE;
        let block = self
            .fs
            .block_of(&mut inode, slot / per_block, true)?
            .ok_or(KernelError::IoError)?;
        let mut buf = self.fs.read_block(u64::from(block))?;
        let off = (slot % per_block) * DIRENT_SIZE;
        buf[off..off + 4].copy_from_slice(&ino.to_le_bytes());
        let mut name_buf = [0u8; NAME_LEN];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        buf[off + 4..off + 4 + NAME_LEN].copy_from_slice(&name_buf);
        self.fs.write_block(u64::from(block), &buf)?;

        let end = (slot + 1) * DIRENT_SIZE;
        if end > inode.size as usize {
            inode.size = end as u32;
        }
        inode.mtime = now32();
        self.fs.write_inode(self.ino, &inode)
    }

    fn find_entry(&self, name: &str) -> KernelResult<(usize, u32)> {
        self.dir_entries()?
            .into_iter()
            .find(|(_, _, n)| n == name)
            .map(|(slot, ino, _)| (slot, ino))
            .ok_or(FsError::NotFound.into())
    }

    fn insert_child(&self, name: &str, mode: u32) -> KernelResult<Arc<dyn VfsNode>> {
        if name.is_empty() || name.len() >= NAME_LEN || name.contains('/') {
            return Err(FsError::InvalidPath.into());
        }
        let entries = self.dir_entries()?;
        if entries.iter().any(|(_, _, n)| n == name) {
            return Err(FsError::AlreadyExists.into());
        }
        // Reuse the first tombstone slot, else append.
        let used: Vec<usize> = entries.iter().map(|(slot, _, _)| *slot).collect();
        let total_slots = self.load()?.size as usize / DIRENT_SIZE;
        let slot = (0..total_slots)
            .find(|s| !used.contains(s))
            .unwrap_or(total_slots);

        let ino = self.fs.alloc_inode(mode)?;
        self.write_dir_slot(slot, ino, name)?;
        Ok(Arc::new(SfsNode {
            fs: self.fs.clone(),
            ino,
        }))
    }
}

impl VfsNode for SfsNode {
    fn node_type(&self) -> NodeType {
        self.load().map(|i| i.node_type()).unwrap_or(NodeType::File)
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> KernelResult<usize> {
        let mut inode = self.load()?;
        if inode.node_type() != NodeType::File {
            return Err(FsError::NotAFile.into());
        }
        let size = inode.size as usize;
        if offset >= size {
            return Ok(0);
        }
        let want = buf.len().min(size - offset);
        let bs = self.fs.block_size;
        let mut done = 0;
        while done < want {
            let pos = offset + done;
            let chunk = (bs - pos % bs).min(want - done);
            match self.fs.block_of(&mut inode, pos / bs, false)? {
                Some(block) => {
                    let data = self.fs.read_block(u64::from(block))?;
                    buf[done..done + chunk]
                        .copy_from_slice(&data[pos % bs..pos % bs + chunk]);
                }
                // Sparse hole: reads as zeros.
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
        }
        Ok(want)
    }

    fn write(&self, offset: usize, data: &[u8]) -> KernelResult<usize> {
        let mut inode = self.load()?;
        if inode.node_type() != NodeType::File {
            return Err(FsError::NotAFile.into());
        }
        let bs = self.fs.block_size;
        let mut done = 0;
        while done < data.len() {
            let pos = offset + done;
            let chunk = (bs - pos % bs).min(data.len() - done);
            let block = self
                .fs
                .block_of(&mut inode, pos / bs, true)?
                .ok_or(KernelError::IoError)?;
            let mut buf = self.fs.read_block(u64::from(block))?;
            buf[pos % bs..pos % bs + chunk].copy_from_slice(&data[done..done + chunk]);
            self.fs.write_block(u64::from(block), &buf)?;
            done += chunk;
        }
        let end = offset + data.len();
        if end > inode.size as usize {
            inode.size = end as u32;
        }
        inode.mtime = now32();
        self.fs.write_inode(self.ino, &inode)?;
        Ok(data.len())
    }

    fn truncate(&self, size: usize) -> KernelResult<()> {
        let mut inode = self.load()?;
        if inode.node_type() != NodeType::File {
            return Err(FsError::NotAFile.into());
        }
        if size == 0 {
            self.fs.release_blocks(&mut inode)?;
        }
        // Shrinking to a mid-file size keeps the tail blocks; only the
        // logical size changes. TODO: free the tail blocks past the new
        // size as well.
        inode.size = size as u32;
        inode.mtime = now32();
        self.fs.write_inode(self.ino, &inode)
    }

    fn metadata(&self) -> KernelResult<Metadata> {
        let inode = self.load()?;
        Ok(Metadata {
            inode: u64::from(self.ino),
            node_type: inode.node_type(),
            perm: inode.mode & 0o7777,
            size: if inode.node_type() == NodeType::Directory {
                self.dir_entries()?.len()
            } else {
                inode.size as usize
            },
            nlink: 1,
            atime: u64::from(inode.mtime),
            mtime: u64::from(inode.mtime),
            ctime: u64::from(inode.ctime),
        })
    }

    fn readdir(&self) -> KernelResult<Vec<DirEntry>> {
        let mut out = Vec::new();
        for (_, ino, name) in self.dir_entries()? {
            let child = self.fs.read_inode(ino)?;
            out.push(DirEntry {
                name,
                node_type: child.node_type(),
                inode: u64::from(ino),
            });
        }
        Ok(out)
    }

    fn lookup(&self, name: &str) -> KernelResult<Arc<dyn VfsNode>> {
        let (_, ino) = self.find_entry(name)?;
        Ok(Arc::new(SfsNode {
            fs: self.fs.clone(),
            ino,
        }))
    }

    fn create(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>> {
        self.insert_child(name, S_IFREG | (perm & 0o7777))
    }

    fn mkdir(&self, name: &str, perm: u32) -> KernelResult<Arc<dyn VfsNode>> {
        self.insert_child(name, S_IFDIR | (perm & 0o7777))
    }

    fn unlink(&self, name: &str) -> KernelResult<()> {
        let (slot, ino) = self.find_entry(name)?;
        let mut child = self.fs.read_inode(ino)?;
        if child.node_type() == NodeType::Directory {
            let child_node = SfsNode {
                fs: self.fs.clone(),
                ino,
            };
            if !child_node.dir_entries()?.is_empty() {
                return Err(FsError::DirectoryNotEmpty.into());
            }
        }
        self.fs.release_blocks(&mut child)?;
        self.fs.free_inode(ino)?;
        // Tombstone the directory slot.
        self.write_dir_slot(slot, 0, "")
    }
}

/// A mounted SFS instance.
pub struct SfsFilesystem {
    inner: Arc<SfsInner>,
    root_ino: u32,
}

impl core::fmt::Debug for SfsFilesystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SfsFilesystem")
            .field("root_ino", &self.root_ino)
            .finish()
    }
}

impl Filesystem for SfsFilesystem {
    fn root(&self) -> Arc<dyn VfsNode> {
        Arc::new(SfsNode {
            fs: self.inner.clone(),
            ino: self.root_ino,
        })
    }

    fn name(&self) -> &'static str {
        "sfs"
    }

    fn sync(&self) -> KernelResult<()> {
        self.inner.device.sync()
    }
}

/// Write a fresh filesystem onto `device`.
pub fn mkfs(device: &Arc<dyn BlockDevice>) -> KernelResult<()> {
    let block_size = device.block_size();
    let total_blocks = device.block_count();
    if block_size < 128 || total_blocks <= DATA_START {
        return Err(KernelError::InvalidArgument {
            what: "device too small for SFS",
        });
    }
    // The bitmap must cover every block.
    if total_blocks > (BITMAP_BLOCKS as usize * block_size * 8) as u64 {
        return Err(KernelError::InvalidArgument {
            what: "device too large for the SFS bitmap",
        });
    }

    // Bitmap: metadata blocks allocated, data blocks free.
    let zero = vec![0u8; block_size];
    for i in 0..BITMAP_BLOCKS {
        device.write_block(BITMAP_START + i, &zero)?;
    }
    let mut first = vec![0u8; block_size];
    for block in 0..DATA_START as usize {
        first[block / 8] |= 1 << (block % 8);
    }
    device.write_block(BITMAP_START, &first)?;

    // Empty inode table.
    for i in 0..INODE_TABLE_BLOCKS {
        device.write_block(INODE_TABLE_START + i, &zero)?;
    }

    let sb = Superblock {
        magic: SFS_MAGIC,
        block_size: block_size as u32,
        total_blocks: total_blocks as u32,
        inode_blocks: INODE_TABLE_BLOCKS as u32,
        data_blocks: (total_blocks - DATA_START) as u32,
        free_blocks: (total_blocks - DATA_START) as u32,
        root_inode: ROOT_INODE,
    };
    device.write_block(0, &sb.to_bytes(block_size))?;

    // Root directory inode.
    let inner = SfsInner {
        device: device.clone(),
        block_size,
        sb: Mutex::new(sb),
    };
    inner.write_inode(
        ROOT_INODE,
        &DiskInode {
            mode: S_IFDIR | 0o755,
            ctime: now32(),
            mtime: now32(),
            ..Default::default()
        },
    )?;
    device.sync()
}

/// Mount entry point registered with the VFS; SFS requires a device.
pub fn mount(
    device: Option<Arc<dyn BlockDevice>>,
    _flags: u32,
) -> KernelResult<Arc<dyn Filesystem>> {
    let device = device.ok_or(KernelError::InvalidArgument {
        what: "sfs needs a block device",
    })?;
    let block_size = device.block_size();
    let mut buf = vec![0u8; block_size];
    device.read_block(0, &mut buf)?;
    let sb = Superblock::from_bytes(&buf);
    if sb.magic != SFS_MAGIC {
        return Err(KernelError::Corrupt {
            what: "SFS superblock magic",
        });
    }
    if sb.block_size as usize != block_size || u64::from(sb.total_blocks) > device.block_count() {
        return Err(KernelError::Corrupt {
            what: "SFS superblock geometry",
        });
    }
    let root_ino = sb.root_inode;
    Ok(Arc::new(SfsFilesystem {
        inner: Arc::new(SfsInner {
            device,
            block_size,
            sb: Mutex::new(sb),
        }),
        root_ino,
    }))
}

#[cfg(test)]
mod tests {
    use super::{super::blockdev::RamDisk, *};

    fn fresh_fs() -> Arc<dyn Filesystem> {
        let disk: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(512, 1024));
        mkfs(&disk).unwrap();
        mount(Some(disk), 0).unwrap()
    }

    #[test]
    fn mkfs_then_mount_has_empty_root() {
        let fs = fresh_fs();
        assert_eq!(fs.name(), "sfs");
        let root = fs.root();
        assert_eq!(root.node_type(), NodeType::Directory);
        assert!(root.readdir().unwrap().is_empty());
    }

    #[test]
    fn mount_rejects_bad_magic() {
        let disk: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(512, 1024));
        // No mkfs: block 0 is zeroed.
        let err = mount(Some(disk), 0).unwrap_err();
        assert!(matches!(err, KernelError::Corrupt { .. }));
    }

    #[test]
    fn mount_requires_device() {
        assert!(mount(None, 0).is_err());
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = fresh_fs();
        let file = fs.root().create("data.bin", 0o644).unwrap();
        let payload = b"sfs payload across the block layer";
        assert_eq!(file.write(0, payload).unwrap(), payload.len());

        // Fresh node object; state must come back from the device.
        let reread = fs.root().lookup("data.bin").unwrap();
        let mut buf = alloc::vec![0u8; payload.len() + 8];
        let n = reread.read(0, &mut buf).unwrap();
        assert_eq!(&buf[..n], payload);
        assert_eq!(reread.metadata().unwrap().size, payload.len());
    }

    #[test]
    fn multi_block_files_span_direct_blocks() {
        let fs = fresh_fs();
        let file = fs.root().create("big", 0o644).unwrap();
        // Three blocks plus a tail.
        let payload: Vec<u8> = (0..1700u32).map(|i| (i % 251) as u8).collect();
        file.write(0, &payload).unwrap();

        let mut buf = alloc::vec![0u8; payload.len()];
        assert_eq!(file.read(0, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn large_files_reach_the_indirect_block() {
        let fs = fresh_fs();
        let file = fs.root().create("huge", 0o644).unwrap();
        // Past 12 direct blocks of 512 bytes.
        let payload: Vec<u8> = (0..(13 * 512 + 100) as u32)
            .map(|i| (i % 241) as u8)
            .collect();
        file.write(0, &payload).unwrap();

        let reread = fs.root().lookup("huge").unwrap();
        let mut buf = alloc::vec![0u8; payload.len()];
        assert_eq!(reread.read(0, &mut buf).unwrap(), payload.len());
        assert_eq!(buf, payload);
    }

    #[test]
    fn mkdir_nesting_and_readdir() {
        let fs = fresh_fs();
        let dir = fs.root().mkdir("etc", 0o755).unwrap();
        dir.create("conf", 0o644).unwrap();
        let entries = fs.root().readdir().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "etc");
        assert_eq!(entries[0].node_type, NodeType::Directory);

        let inner = fs.root().lookup("etc").unwrap().readdir().unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].name, "conf");
    }

    #[test]
    fn unlink_frees_blocks() {
        let fs = fresh_fs();
        let file = fs.root().create("victim", 0o644).unwrap();
        file.write(0, &alloc::vec![1u8; 2048]).unwrap();
        fs.root().unlink("victim").unwrap();
        assert!(fs.root().lookup("victim").is_err());

        // The name and the space are reusable.
        let again = fs.root().create("victim", 0o644).unwrap();
        assert_eq!(again.metadata().unwrap().size, 0);
    }

    #[test]
    fn unlink_nonempty_dir_fails() {
        let fs = fresh_fs();
        let dir = fs.root().mkdir("d", 0o755).unwrap();
        dir.create("child", 0o644).unwrap();
        assert_eq!(
            fs.root().unlink("d").unwrap_err(),
            KernelError::Fs(FsError::DirectoryNotEmpty)
        );
    }

    #[test]
    fn duplicate_names_rejected() {
        let fs = fresh_fs();
        fs.root().create("x", 0o644).unwrap();
        assert_eq!(
            fs.root().create("x", 0o644).unwrap_err(),
            KernelError::Fs(FsError::AlreadyExists)
        );
    }

    #[test]
    fn name_length_limit_enforced() {
        let fs = fresh_fs();
        let long = "a".repeat(NAME_LEN);
        assert!(fs.root().create(&long, 0o644).is_err());
        let ok = "a".repeat(NAME_LEN - 1);
        assert!(fs.root().create(&ok, 0o644).is_ok());
    }

    #[test]
    fn state_survives_remount() {
        let disk: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(512, 1024));
        mkfs(&disk).unwrap();
        {
            let fs = mount(Some(disk.clone()), 0).unwrap();
            let f = fs.root().create("persistent", 0o644).unwrap();
            f.write(0, b"still here").unwrap();
            fs.sync().unwrap();
        }
        let fs = mount(Some(disk), 0).unwrap();
        let f = fs.root().lookup("persistent").unwrap();
        let mut buf = [0u8; 10];
        assert_eq!(f.read(0, &mut buf).unwrap(), 10);
        assert_eq!(&buf, b"still here");
    }

    #[test]
    fn out_of_space_is_reported() {
        // Tiny disk: 70 blocks total, only 6 data blocks past DATA_START.
        let disk: Arc<dyn BlockDevice> = Arc::new(RamDisk::new(512, 70));
        mkfs(&disk).unwrap();
        let fs = mount(Some(disk), 0).unwrap();
        let f = fs.root().create("fill", 0o644).unwrap();
        let big = alloc::vec![0u8; 64 * 512];
        assert!(matches!(
            f.write(0, &big).unwrap_err(),
            KernelError::OutOfSpace
        ));
    }
}
