#![forbid(unsafe_code)]
//! The mindfs filesystem façade.
//!
//! [`FileSystem`] is the single externally visible object. It owns the
//! block device, the inode store and the open-file table, and exposes the
//! high-level operations under one reader-writer lock: mutating operations
//! take the exclusive side, pure queries (`file_exists`, `is_directory`,
//! `list_directory`, `disk_info`, `find_inode`) run concurrently on the
//! shared side.

use mindfs_block::{DiskImage, now_epoch_secs};
use mindfs_dir as dir;
use mindfs_error::{FsError, Result};
use mindfs_inode::InodeStore;
use mindfs_path as path;
use mindfs_types::{
    BLOCK_SIZE, DirEntry, DiskLayout, FILE_TYPE_DIRECTORY, FILE_TYPE_REGULAR, Inode, OPEN_APPEND,
    OPEN_CREATE, OPEN_READ, OPEN_WRITE, PERM_READ, PERM_RWX, PERM_WRITE, ROOT_INODE, Superblock,
    blocks_needed,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lowest file descriptor handed out; 0..2 stay reserved by convention.
const FIRST_FD: i32 = 3;
/// Highest file descriptor before the allocator wraps back to [`FIRST_FD`].
const MAX_FD: i32 = 1024;

/// In-memory record of one open file. Never persisted.
#[derive(Debug, Clone, Copy)]
pub struct FileHandle {
    pub inode: i32,
    pub mode: i32,
    pub offset: i64,
    pub live: bool,
}

/// Operator-facing snapshot of image and allocator state.
#[derive(Debug, Clone, Serialize)]
pub struct DiskInfo {
    pub disk_size_mb: u64,
    pub block_size: usize,
    pub total_blocks: u32,
    pub free_blocks: u32,
    pub total_inodes: u32,
    pub free_inodes: u32,
    pub mount_time: i64,
    pub write_time: i64,
}

impl fmt::Display for DiskInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Disk Information:")?;
        writeln!(f, "  Disk Size: {} MB", self.disk_size_mb)?;
        writeln!(f, "  Block Size: {} bytes", self.block_size)?;
        writeln!(f, "  Total Blocks: {}", self.total_blocks)?;
        writeln!(f, "  Free Blocks: {}", self.free_blocks)?;
        writeln!(f, "  Total Inodes: {}", self.total_inodes)?;
        writeln!(f, "  Free Inodes: {}", self.free_inodes)?;
        writeln!(f, "  Mount Time: {}", self.mount_time)?;
        writeln!(f, "  Write Time: {}", self.write_time)
    }
}

#[derive(Debug)]
struct Mounted {
    disk: Arc<DiskImage>,
    store: InodeStore,
    superblock: Superblock,
    layout: DiskLayout,
    handles: HashMap<i32, FileHandle>,
    next_fd: i32,
}

/// The filesystem façade. Cheap to share across threads behind an `Arc`.
#[derive(Debug, Default)]
pub struct FileSystem {
    inner: RwLock<Option<Mounted>>,
}

impl FileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ── Mount lifecycle ─────────────────────────────────────────────────────

    /// Mount the image at `image_path`.
    ///
    /// Opens the device (taking the host lock), verifies the superblock
    /// magic, loads both bitmaps, and repairs the root directory if the
    /// image was formatted but never populated.
    pub fn mount(&self, image_path: impl AsRef<Path>) -> Result<()> {
        let mut guard = self.inner.write();
        if guard.is_some() {
            return Err(FsError::AlreadyMounted);
        }

        let disk = Arc::new(DiskImage::open(image_path.as_ref())?);

        let sb_block = disk.read_block(0)?;
        let superblock = Superblock::decode(&sb_block)?;
        if !superblock.magic_ok() {
            return Err(FsError::MountFailed(format!(
                "invalid file system format on {} (magic {:#010x})",
                image_path.as_ref().display(),
                superblock.magic_number
            )));
        }

        let layout = disk.compute_layout();
        let store = InodeStore::new(Arc::clone(&disk), layout)?;

        let mut mounted = Mounted {
            disk,
            store,
            superblock,
            layout,
            handles: HashMap::new(),
            next_fd: FIRST_FD,
        };
        ensure_root_directory(&mut mounted)?;

        info!(
            target: "mindfs::core",
            event = "mounted",
            image = %image_path.as_ref().display(),
            total_blocks = layout.data_blocks_count + layout.data_blocks_start,
            total_inodes = layout.total_inodes
        );
        *guard = Some(mounted);
        Ok(())
    }

    /// Unmount: close every open handle, flush, release the host lock.
    pub fn unmount(&self) -> Result<()> {
        let mut guard = self.inner.write();
        let mounted = guard.take().ok_or(FsError::NotMounted)?;

        let open = mounted.handles.len();
        if open > 0 {
            debug!(target: "mindfs::core", event = "unmount_closes_handles", open);
        }
        mounted.disk.sync()?;
        info!(target: "mindfs::core", event = "unmounted");
        // Dropping `mounted` drops the last DiskImage references and
        // releases the advisory lock.
        Ok(())
    }

    /// Re-format the mounted image in place.
    ///
    /// Rewrites the on-image skeleton, reloads the superblock and bitmaps,
    /// re-creates the root directory, and invalidates every open handle
    /// (they would otherwise point at freed inodes).
    pub fn format(&self) -> Result<()> {
        self.with_mut(|m| {
            m.disk.format()?;

            let sb_block = m.disk.read_block(0)?;
            m.superblock = Superblock::decode(&sb_block)?;
            m.layout = m.disk.compute_layout();
            m.store.reload_bitmaps()?;
            m.handles.clear();
            m.next_fd = FIRST_FD;
            ensure_root_directory(m)?;

            info!(target: "mindfs::core", event = "formatted");
            Ok(())
        })
    }

    /// Whether an image is currently mounted.
    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.inner.read().is_some()
    }

    // ── Files ───────────────────────────────────────────────────────────────

    /// Create a regular file with the given permission bits. Returns the
    /// new inode number.
    pub fn create_file(&self, file_path: &str, mode: i32) -> Result<i32> {
        let file_path = path::normalize_path(file_path);
        self.with_mut(|m| create_file_locked(m, &file_path, mode))
    }

    /// Delete a regular file: unlink from the parent, free the inode.
    pub fn delete_file(&self, file_path: &str) -> Result<()> {
        let file_path = path::normalize_path(file_path);
        self.with_mut(|m| {
            let ino = path::find_inode(&m.store, &file_path)?;
            let inode = m.store.read_inode(ino)?;
            if inode.is_directory() {
                return Err(FsError::IsADirectory(file_path.clone()));
            }

            let parent = path::parent_path(&file_path);
            let name = path::basename(&file_path);
            let parent_ino = path::find_inode(&m.store, &parent)
                .map_err(|_| FsError::ParentNotFound(parent.clone()))?;

            dir::remove_entry(&m.store, parent_ino, &name)?;
            m.store.free_inode(ino)?;
            debug!(target: "mindfs::core", event = "file_deleted", path = %file_path, ino);
            Ok(())
        })
    }

    /// Open a file, returning a descriptor. `OPEN_CREATE` creates a
    /// missing file with RW permissions; `OPEN_APPEND` starts the offset
    /// at the current size.
    pub fn open_file(&self, file_path: &str, mode: i32) -> Result<i32> {
        let file_path = path::normalize_path(file_path);
        self.with_mut(|m| {
            let ino = match path::find_inode(&m.store, &file_path) {
                Ok(ino) => ino,
                Err(e) if e.is_not_found() && mode & OPEN_CREATE != 0 => {
                    create_file_locked(m, &file_path, PERM_READ | PERM_WRITE)?
                }
                Err(e) => return Err(e),
            };

            let fd = allocate_fd(m)?;
            let mut handle = FileHandle {
                inode: ino,
                mode,
                offset: 0,
                live: true,
            };
            if mode & OPEN_APPEND != 0 {
                handle.offset = m.store.read_inode(ino)?.size;
            }
            m.handles.insert(fd, handle);

            touch_access_time(m, ino);
            Ok(fd)
        })
    }

    /// Close a descriptor, updating the file's modification time.
    pub fn close_file(&self, fd: i32) -> Result<()> {
        self.with_mut(|m| {
            let handle = m
                .handles
                .remove(&fd)
                .ok_or(FsError::InvalidFileDescriptor(fd))?;
            touch_modification_time(m, handle.inode);
            Ok(())
        })
    }

    /// Read up to `buf.len()` bytes at the handle's offset. Returns the
    /// byte count; 0 at or past end of file.
    pub fn read_file(&self, fd: i32, buf: &mut [u8]) -> Result<usize> {
        self.with_mut(|m| {
            let handle = lookup_handle(m, fd)?;
            if handle.mode & OPEN_READ == 0 {
                return Err(FsError::InvalidArgument(format!(
                    "file not opened for reading: fd={fd}"
                )));
            }

            let inode = m.store.read_inode(handle.inode)?;
            if handle.offset >= inode.size {
                return Ok(0);
            }

            let remaining = usize::try_from(inode.size - handle.offset)
                .map_err(|_| FsError::InvalidArgument("file offset overflow".to_owned()))?;
            let count = buf.len().min(remaining);

            let blocks = m.store.get_data_blocks(handle.inode)?;
            copy_from_blocks(m, &blocks, handle.offset, &mut buf[..count])?;

            if let Some(h) = m.handles.get_mut(&fd) {
                h.offset += count as i64;
            }
            touch_access_time(m, handle.inode);
            Ok(count)
        })
    }

    /// Write `buf` at the handle's offset, growing the file as needed.
    pub fn write_file(&self, fd: i32, buf: &[u8]) -> Result<usize> {
        self.with_mut(|m| {
            let handle = lookup_handle(m, fd)?;
            if handle.mode & OPEN_WRITE == 0 {
                return Err(FsError::InvalidArgument(format!(
                    "file not opened for writing: fd={fd}"
                )));
            }
            if buf.is_empty() {
                return Ok(0);
            }

            let end = handle.offset + buf.len() as i64;
            let mut blocks = m.store.get_data_blocks(handle.inode)?;
            let required = blocks_needed(end as u64);
            if required as usize > blocks.len() {
                m.store
                    .allocate_data_blocks(handle.inode, required - blocks.len() as u32)?;
                blocks = m.store.get_data_blocks(handle.inode)?;
            }

            copy_into_blocks(m, &blocks, handle.offset, buf)?;

            // Allocation rewrote the pointer tiers; observe them fresh.
            let mut inode = m.store.read_inode(handle.inode)?;
            inode.size = inode.size.max(end);
            inode.modification_time = now_epoch_secs();
            m.store.write_inode(handle.inode, &inode)?;

            if let Some(h) = m.handles.get_mut(&fd) {
                h.offset += buf.len() as i64;
            }
            Ok(buf.len())
        })
    }

    /// Reposition a handle. Valid positions are `0..=size`.
    pub fn seek_file(&self, fd: i32, position: i64) -> Result<()> {
        self.with_mut(|m| {
            let handle = lookup_handle(m, fd)?;
            let inode = m.store.read_inode(handle.inode)?;
            if position < 0 || position > inode.size {
                return Err(FsError::InvalidArgument(format!(
                    "seek position {position} outside 0..={}",
                    inode.size
                )));
            }
            if let Some(h) = m.handles.get_mut(&fd) {
                h.offset = position;
            }
            Ok(())
        })
    }

    /// Copy `src` to `dst` in one exclusive section: read the source into
    /// memory, create the destination if missing, write from offset zero.
    pub fn copy_file(&self, src: &str, dst: &str) -> Result<usize> {
        let src = path::normalize_path(src);
        let dst = path::normalize_path(dst);
        self.with_mut(|m| {
            let src_ino = path::find_inode(&m.store, &src)?;
            let src_inode = m.store.read_inode(src_ino)?;
            if src_inode.is_directory() {
                return Err(FsError::IsADirectory(src.clone()));
            }

            let mut content = vec![
                0u8;
                usize::try_from(src_inode.size).map_err(|_| {
                    FsError::InvalidArgument("source size overflow".to_owned())
                })?
            ];
            if !content.is_empty() {
                let blocks = m.store.get_data_blocks(src_ino)?;
                copy_from_blocks(m, &blocks, 0, &mut content)?;
            }

            let dst_ino = match path::find_inode(&m.store, &dst) {
                Ok(ino) => ino,
                Err(e) if e.is_not_found() => {
                    create_file_locked(m, &dst, PERM_READ | PERM_WRITE)?
                }
                Err(e) => return Err(e),
            };

            if !content.is_empty() {
                let required = blocks_needed(content.len() as u64);
                let mut blocks = m.store.get_data_blocks(dst_ino)?;
                if required as usize > blocks.len() {
                    m.store
                        .allocate_data_blocks(dst_ino, required - blocks.len() as u32)?;
                    blocks = m.store.get_data_blocks(dst_ino)?;
                }
                copy_into_blocks(m, &blocks, 0, &content)?;
            }

            let mut inode = m.store.read_inode(dst_ino)?;
            inode.size = inode.size.max(content.len() as i64);
            inode.modification_time = now_epoch_secs();
            m.store.write_inode(dst_ino, &inode)?;

            debug!(
                target: "mindfs::core",
                event = "file_copied",
                src = %src,
                dst = %dst,
                bytes = content.len()
            );
            Ok(content.len())
        })
    }

    // ── Directories ─────────────────────────────────────────────────────────

    pub fn create_directory(&self, dir_path: &str) -> Result<i32> {
        let dir_path = path::normalize_path(dir_path);
        self.with_mut(|m| dir::create_directory(&m.store, &dir_path))
    }

    pub fn list_directory(&self, dir_path: &str) -> Result<Vec<DirEntry>> {
        let dir_path = path::normalize_path(dir_path);
        self.with_ref(|m| dir::list_directory(&m.store, &dir_path))
    }

    pub fn remove_directory(&self, dir_path: &str) -> Result<()> {
        let dir_path = path::normalize_path(dir_path);
        self.with_mut(|m| dir::remove_directory(&m.store, &dir_path))
    }

    // ── Queries (shared side) ───────────────────────────────────────────────

    #[must_use]
    pub fn file_exists(&self, file_path: &str) -> bool {
        let file_path = path::normalize_path(file_path);
        self.with_ref(|m| Ok(path::file_exists(&m.store, &file_path)))
            .unwrap_or(false)
    }

    #[must_use]
    pub fn is_directory(&self, file_path: &str) -> bool {
        let file_path = path::normalize_path(file_path);
        self.with_ref(|m| {
            let ino = path::find_inode(&m.store, &file_path)?;
            Ok(m.store.read_inode(ino)?.is_directory())
        })
        .unwrap_or(false)
    }

    /// Resolve a path to an inode number.
    pub fn find_inode(&self, file_path: &str) -> Result<i32> {
        let file_path = path::normalize_path(file_path);
        self.with_ref(|m| path::find_inode(&m.store, &file_path))
    }

    /// Snapshot of image geometry and allocator counters.
    pub fn disk_info(&self) -> Result<DiskInfo> {
        self.with_ref(|m| {
            Ok(DiskInfo {
                disk_size_mb: m.disk.disk_size() / (1024 * 1024),
                block_size: m.disk.block_size(),
                total_blocks: m.disk.total_blocks(),
                free_blocks: m.store.free_data_blocks_count(),
                total_inodes: m.store.total_inodes(),
                free_inodes: m.store.free_inodes(),
                mount_time: m.superblock.mount_time,
                write_time: m.superblock.write_time,
            })
        })
    }

    // ── Lock helpers ────────────────────────────────────────────────────────

    fn with_mut<R>(&self, f: impl FnOnce(&mut Mounted) -> Result<R>) -> Result<R> {
        let mut guard = self.inner.write();
        let mounted = guard.as_mut().ok_or(FsError::NotMounted)?;
        f(mounted)
    }

    fn with_ref<R>(&self, f: impl FnOnce(&Mounted) -> Result<R>) -> Result<R> {
        let guard = self.inner.read();
        let mounted = guard.as_ref().ok_or(FsError::NotMounted)?;
        f(mounted)
    }
}

// ── Locked helpers ──────────────────────────────────────────────────────────

fn create_file_locked(m: &mut Mounted, file_path: &str, mode: i32) -> Result<i32> {
    if path::file_exists(&m.store, file_path) {
        return Err(FsError::FileAlreadyExists(file_path.to_owned()));
    }

    let (filename, directory) = path::split_for_create(file_path)?;
    if filename.is_empty() {
        return Err(FsError::InvalidPath(file_path.to_owned()));
    }
    let parent_ino = path::find_inode(&m.store, &directory)
        .map_err(|_| FsError::ParentNotFound(directory.clone()))?;

    let ino = m.store.allocate_inode()?;

    let finish = |m: &mut Mounted| -> Result<()> {
        let mut inode = m.store.read_inode(ino)?;
        inode.mode = FILE_TYPE_REGULAR | mode;
        m.store.write_inode(ino, &inode)?;
        dir::add_entry(&m.store, parent_ino, &filename, ino)
    };

    if let Err(e) = finish(m) {
        warn!(
            target: "mindfs::core",
            event = "create_rollback",
            path = file_path,
            ino,
            error = %e
        );
        let _ = m.store.free_inode(ino);
        return Err(e);
    }

    debug!(target: "mindfs::core", event = "file_created", path = file_path, ino);
    Ok(ino)
}

fn lookup_handle(m: &Mounted, fd: i32) -> Result<FileHandle> {
    let handle = m
        .handles
        .get(&fd)
        .copied()
        .ok_or(FsError::InvalidFileDescriptor(fd))?;
    if !handle.live {
        return Err(FsError::FileNotOpen(fd));
    }
    Ok(handle)
}

fn allocate_fd(m: &mut Mounted) -> Result<i32> {
    let mut probes = 0;
    while m.handles.contains_key(&m.next_fd) {
        m.next_fd += 1;
        if m.next_fd > MAX_FD {
            m.next_fd = FIRST_FD;
        }
        probes += 1;
        if probes > MAX_FD {
            return Err(FsError::InvalidArgument(
                "no available file descriptors".to_owned(),
            ));
        }
    }
    let fd = m.next_fd;
    m.next_fd += 1;
    if m.next_fd > MAX_FD {
        m.next_fd = FIRST_FD;
    }
    Ok(fd)
}

fn touch_access_time(m: &Mounted, ino: i32) {
    if let Ok(mut inode) = m.store.read_inode(ino) {
        inode.access_time = now_epoch_secs();
        let _ = m.store.write_inode(ino, &inode);
    }
}

fn touch_modification_time(m: &Mounted, ino: i32) {
    if let Ok(mut inode) = m.store.read_inode(ino) {
        inode.modification_time = now_epoch_secs();
        let _ = m.store.write_inode(ino, &inode);
    }
}

/// Copy `buf.len()` bytes starting at byte `offset` of the block list.
fn copy_from_blocks(m: &Mounted, blocks: &[i32], offset: i64, buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let mut copied = 0usize;
    let mut block_index = usize::try_from(offset).unwrap_or(0) / BLOCK_SIZE;
    let mut in_block = usize::try_from(offset).unwrap_or(0) % BLOCK_SIZE;

    while copied < buf.len() {
        let Some(block) = blocks.get(block_index) else {
            return Err(FsError::InvalidArgument(format!(
                "read past block list at byte {}",
                offset as usize + copied
            )));
        };
        let data = m.disk.read_block(i64::from(*block))?;
        let take = (BLOCK_SIZE - in_block).min(buf.len() - copied);
        buf[copied..copied + take].copy_from_slice(&data[in_block..in_block + take]);
        copied += take;
        in_block = 0;
        block_index += 1;
    }
    Ok(())
}

/// Write `buf` starting at byte `offset` of the block list. Blocks that
/// are only partially covered are read-modify-written; fully covered
/// blocks are overwritten outright.
fn copy_into_blocks(m: &Mounted, blocks: &[i32], offset: i64, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let mut written = 0usize;
    let mut block_index = usize::try_from(offset).unwrap_or(0) / BLOCK_SIZE;
    let mut in_block = usize::try_from(offset).unwrap_or(0) % BLOCK_SIZE;

    while written < buf.len() {
        let Some(block) = blocks.get(block_index) else {
            return Err(FsError::InvalidArgument(format!(
                "write past block list at byte {}",
                offset as usize + written
            )));
        };

        let take = (BLOCK_SIZE - in_block).min(buf.len() - written);
        let mut data = if in_block > 0 || take < BLOCK_SIZE {
            m.disk.read_block(i64::from(*block))?
        } else {
            vec![0u8; BLOCK_SIZE]
        };
        data[in_block..in_block + take].copy_from_slice(&buf[written..written + take]);
        m.disk.write_block(i64::from(*block), &data)?;

        written += take;
        in_block = 0;
        block_index += 1;
    }
    Ok(())
}

/// Repair or create the root directory after mount or format.
///
/// Root is inode 0 on every initialized image: a fresh bitmap first-fits
/// to bit 0, and anything else means the image is corrupt. An existing
/// root gets its directory bit, RWX permissions, link count and `.`/`..`
/// entries restored as needed.
fn ensure_root_directory(m: &mut Mounted) -> Result<()> {
    if !m.store.is_inode_allocated(ROOT_INODE) {
        let allocated = m.store.allocate_inode()?;
        if allocated != ROOT_INODE {
            return Err(FsError::InvalidInode(allocated));
        }
    }

    let mut root = m.store.read_inode(ROOT_INODE)?;
    let mut inode_dirty = false;

    if !root.is_directory() {
        root = Inode::init(FILE_TYPE_DIRECTORY | PERM_RWX, 2, now_epoch_secs());
        inode_dirty = true;
    } else {
        if root.mode & PERM_RWX != PERM_RWX {
            root.mode |= PERM_RWX;
            inode_dirty = true;
        }
        if root.link_count < 2 {
            root.link_count = 2;
            inode_dirty = true;
        }
    }
    if inode_dirty {
        m.store.write_inode(ROOT_INODE, &root)?;
    }

    let mut entries = dir::read_entries(&m.store, ROOT_INODE).unwrap_or_default();
    let mut needs_write = false;

    for entry in &mut entries {
        if (entry.name == "." || entry.name == "..") && entry.inode_number != ROOT_INODE {
            entry.inode_number = ROOT_INODE;
            needs_write = true;
        }
    }
    if !entries.iter().any(|e| e.name == ".") {
        entries.insert(0, DirEntry::new(".", ROOT_INODE));
        needs_write = true;
    }
    if !entries.iter().any(|e| e.name == "..") {
        entries.insert(1, DirEntry::new("..", ROOT_INODE));
        needs_write = true;
    }

    if needs_write {
        if m.store.get_data_blocks(ROOT_INODE)?.is_empty() {
            m.store.allocate_data_blocks(ROOT_INODE, 1)?;
        }
        dir::write_entries(&m.store, ROOT_INODE, &entries)?;
        debug!(target: "mindfs::core", event = "root_repaired", entries = entries.len());
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted_fs(size_mb: u32) -> (tempfile::TempDir, FileSystem) {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = dir.path().join("disk.img");
        DiskImage::create(&img, size_mb).expect("create");
        {
            let disk = DiskImage::open(&img).expect("open");
            disk.format().expect("format");
            disk.close().expect("close");
        }
        let fs = FileSystem::new();
        fs.mount(&img).expect("mount");
        (dir, fs)
    }

    #[test]
    fn mount_requires_valid_magic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = dir.path().join("blank.img");
        DiskImage::create(&img, 1).expect("create");

        let fs = FileSystem::new();
        assert!(matches!(fs.mount(&img), Err(FsError::MountFailed(_))));
        assert!(!fs.is_mounted());
        // The failed mount must not keep the image locked.
        let disk = DiskImage::open(&img).expect("reopen");
        disk.close().expect("close");
    }

    #[test]
    fn mount_creates_root_with_dot_entries() {
        let (_tmp, fs) = mounted_fs(10);
        assert!(fs.is_mounted());

        let entries = fs.list_directory("/").expect("ls /");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(entries.iter().all(|e| e.inode_number == ROOT_INODE));
        assert!(fs.is_directory("/"));
    }

    #[test]
    fn double_mount_and_unmount_errors() {
        let (_tmp, fs) = mounted_fs(10);
        assert!(matches!(
            fs.mount("/nonexistent.img"),
            Err(FsError::AlreadyMounted)
        ));
        fs.unmount().expect("unmount");
        assert!(matches!(fs.unmount(), Err(FsError::NotMounted)));
        assert!(matches!(fs.format(), Err(FsError::NotMounted)));
    }

    #[test]
    fn operations_require_mount() {
        let fs = FileSystem::new();
        assert!(matches!(
            fs.create_file("/a.txt", PERM_READ),
            Err(FsError::NotMounted)
        ));
        assert!(!fs.file_exists("/a.txt"));
        assert!(matches!(fs.disk_info(), Err(FsError::NotMounted)));
    }

    #[test]
    fn create_open_write_read_roundtrip() {
        let (_tmp, fs) = mounted_fs(10);
        fs.create_file("/hello.txt", PERM_READ | PERM_WRITE)
            .expect("create");

        let fd = fs
            .open_file("/hello.txt", OPEN_READ | OPEN_WRITE)
            .expect("open");
        assert!(fd >= FIRST_FD);

        let payload = b"Disk simulator functional test";
        assert_eq!(fs.write_file(fd, payload).expect("write"), payload.len());

        fs.seek_file(fd, 0).expect("seek");
        let mut back = vec![0u8; payload.len()];
        assert_eq!(fs.read_file(fd, &mut back).expect("read"), payload.len());
        assert_eq!(&back, payload);

        // EOF after the payload.
        let mut extra = [0u8; 8];
        assert_eq!(fs.read_file(fd, &mut extra).expect("read eof"), 0);

        fs.close_file(fd).expect("close");
        assert!(matches!(
            fs.close_file(fd),
            Err(FsError::InvalidFileDescriptor(_))
        ));
    }

    #[test]
    fn writes_spanning_blocks_roundtrip() {
        let (_tmp, fs) = mounted_fs(10);
        let fd = fs
            .open_file("/big.dat", OPEN_READ | OPEN_WRITE | OPEN_CREATE)
            .expect("open");

        // 3.5 blocks of patterned data.
        let payload: Vec<u8> = (0..BLOCK_SIZE * 7 / 2).map(|i| (i % 251) as u8).collect();
        assert_eq!(fs.write_file(fd, &payload).expect("write"), payload.len());

        fs.seek_file(fd, 0).expect("seek");
        let mut back = vec![0u8; payload.len()];
        assert_eq!(fs.read_file(fd, &mut back).expect("read"), payload.len());
        assert_eq!(back, payload);

        // Partial overwrite in the middle, straddling a block boundary.
        fs.seek_file(fd, (BLOCK_SIZE - 100) as i64).expect("seek");
        let patch = vec![0xEEu8; 200];
        fs.write_file(fd, &patch).expect("patch");

        fs.seek_file(fd, 0).expect("seek");
        fs.read_file(fd, &mut back).expect("reread");
        assert_eq!(&back[BLOCK_SIZE - 100..BLOCK_SIZE + 100], patch.as_slice());
        assert_eq!(back[BLOCK_SIZE - 101], payload[BLOCK_SIZE - 101]);
        assert_eq!(back[BLOCK_SIZE + 100], payload[BLOCK_SIZE + 100]);

        fs.close_file(fd).expect("close");
    }

    #[test]
    fn append_mode_starts_at_size() {
        let (_tmp, fs) = mounted_fs(10);
        let fd = fs
            .open_file("/log.txt", OPEN_WRITE | OPEN_CREATE)
            .expect("open");
        fs.write_file(fd, b"first|").expect("write");
        fs.close_file(fd).expect("close");

        let fd = fs
            .open_file("/log.txt", OPEN_WRITE | OPEN_APPEND)
            .expect("append open");
        fs.write_file(fd, b"second").expect("append");
        fs.close_file(fd).expect("close");

        let fd = fs.open_file("/log.txt", OPEN_READ).expect("read open");
        let mut buf = [0u8; 64];
        let n = fs.read_file(fd, &mut buf).expect("read");
        assert_eq!(&buf[..n], b"first|second");
        fs.close_file(fd).expect("close");
    }

    #[test]
    fn mode_bits_are_enforced() {
        let (_tmp, fs) = mounted_fs(10);
        let fd = fs
            .open_file("/f.txt", OPEN_WRITE | OPEN_CREATE)
            .expect("open");
        let mut buf = [0u8; 4];
        assert!(matches!(
            fs.read_file(fd, &mut buf),
            Err(FsError::InvalidArgument(_))
        ));
        fs.close_file(fd).expect("close");

        let fd = fs.open_file("/f.txt", OPEN_READ).expect("open read");
        assert!(matches!(
            fs.write_file(fd, b"x"),
            Err(FsError::InvalidArgument(_))
        ));
        fs.close_file(fd).expect("close");
    }

    #[test]
    fn seek_bounds_are_validated() {
        let (_tmp, fs) = mounted_fs(10);
        let fd = fs
            .open_file("/s.txt", OPEN_READ | OPEN_WRITE | OPEN_CREATE)
            .expect("open");
        fs.write_file(fd, b"12345").expect("write");
        fs.seek_file(fd, 5).expect("seek to size is allowed");
        assert!(matches!(
            fs.seek_file(fd, 6),
            Err(FsError::InvalidArgument(_))
        ));
        assert!(matches!(
            fs.seek_file(fd, -1),
            Err(FsError::InvalidArgument(_))
        ));
        fs.close_file(fd).expect("close");
    }

    #[test]
    fn delete_file_rejects_directories() {
        let (_tmp, fs) = mounted_fs(10);
        fs.create_directory("/docs").expect("mkdir");
        assert!(matches!(
            fs.delete_file("/docs"),
            Err(FsError::IsADirectory(_))
        ));

        fs.create_file("/docs/a.txt", PERM_READ | PERM_WRITE)
            .expect("create");
        fs.delete_file("/docs/a.txt").expect("delete");
        assert!(!fs.file_exists("/docs/a.txt"));
        assert!(matches!(
            fs.delete_file("/docs/a.txt"),
            Err(FsError::FileNotFound(_))
        ));
    }

    #[test]
    fn delete_returns_all_blocks() {
        let (_tmp, fs) = mounted_fs(10);
        let before = fs.disk_info().expect("info").free_blocks;

        let fd = fs
            .open_file("/fat.dat", OPEN_WRITE | OPEN_CREATE)
            .expect("open");
        let payload = vec![7u8; BLOCK_SIZE * 20];
        fs.write_file(fd, &payload).expect("write");
        fs.close_file(fd).expect("close");
        assert!(fs.disk_info().expect("info").free_blocks < before);

        fs.delete_file("/fat.dat").expect("delete");
        assert_eq!(fs.disk_info().expect("info").free_blocks, before);
    }

    #[test]
    fn copy_file_duplicates_content() {
        let (_tmp, fs) = mounted_fs(10);
        let fd = fs
            .open_file("/src.txt", OPEN_WRITE | OPEN_CREATE)
            .expect("open");
        let payload: Vec<u8> = (0..9000).map(|i| (i % 256) as u8).collect();
        fs.write_file(fd, &payload).expect("write");
        fs.close_file(fd).expect("close");

        let copied = fs.copy_file("/src.txt", "/dst.txt").expect("copy");
        assert_eq!(copied, payload.len());

        let fd = fs.open_file("/dst.txt", OPEN_READ).expect("open dst");
        let mut back = vec![0u8; payload.len()];
        assert_eq!(fs.read_file(fd, &mut back).expect("read"), payload.len());
        assert_eq!(back, payload);
        fs.close_file(fd).expect("close");

        // Copying a missing source fails cleanly.
        assert!(matches!(
            fs.copy_file("/nope.txt", "/other.txt"),
            Err(FsError::FileNotFound(_))
        ));
    }

    #[test]
    fn format_resets_tree_and_invalidates_handles() {
        let (_tmp, fs) = mounted_fs(10);
        fs.create_directory("/docs").expect("mkdir");
        let fd = fs
            .open_file("/docs/x.txt", OPEN_WRITE | OPEN_CREATE)
            .expect("open");

        fs.format().expect("format");

        // The tree is gone, the root is fresh, the handle is dead.
        assert!(!fs.file_exists("/docs"));
        let names: Vec<_> = fs
            .list_directory("/")
            .expect("ls")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(matches!(
            fs.write_file(fd, b"stale"),
            Err(FsError::InvalidFileDescriptor(_))
        ));

        let info = fs.disk_info().expect("info");
        assert_eq!(info.free_inodes, info.total_inodes - 1); // root only
    }

    #[test]
    fn fd_numbers_start_at_three_and_recycle() {
        let (_tmp, fs) = mounted_fs(10);
        let a = fs
            .open_file("/a", OPEN_WRITE | OPEN_CREATE)
            .expect("open a");
        let b = fs
            .open_file("/b", OPEN_WRITE | OPEN_CREATE)
            .expect("open b");
        assert_eq!(a, FIRST_FD);
        assert_eq!(b, FIRST_FD + 1);

        fs.close_file(a).expect("close");
        let c = fs
            .open_file("/c", OPEN_WRITE | OPEN_CREATE)
            .expect("open c");
        assert_eq!(c, FIRST_FD + 2);
    }

    #[test]
    fn disk_info_reports_consistent_counters() {
        let (_tmp, fs) = mounted_fs(10);
        let info = fs.disk_info().expect("info");
        assert_eq!(info.block_size, BLOCK_SIZE);
        assert_eq!(info.disk_size_mb, 10);
        assert_eq!(info.total_blocks, 2560);
        assert_eq!(info.free_inodes, info.total_inodes - 1);
        let text = info.to_string();
        assert!(text.contains("Disk Information:"));
        assert!(text.contains("Total Blocks: 2560"));
    }

    #[test]
    fn concurrent_readers_and_writers_stay_consistent() {
        let (_tmp, fs) = mounted_fs(10);
        let fs = Arc::new(fs);

        let mut handles = Vec::new();
        for w in 0..4 {
            let fs = Arc::clone(&fs);
            handles.push(std::thread::spawn(move || {
                let p = format!("/w{w}.dat");
                for round in 0..10 {
                    let fd = fs
                        .open_file(&p, OPEN_READ | OPEN_WRITE | OPEN_CREATE)
                        .expect("open");
                    let payload = vec![b'A' + ((w + round) % 26) as u8; 512];
                    fs.seek_file(fd, 0).expect("seek");
                    fs.write_file(fd, &payload).expect("write");
                    fs.seek_file(fd, 0).expect("seek back");
                    let mut back = vec![0u8; 512];
                    assert_eq!(fs.read_file(fd, &mut back).expect("read"), 512);
                    assert_eq!(back, payload);
                    fs.close_file(fd).expect("close");

                    assert!(fs.file_exists(&p));
                    let _ = fs.list_directory("/").expect("ls");
                }
            }));
        }
        for h in handles {
            h.join().expect("join");
        }

        let entries = fs.list_directory("/").expect("ls");
        assert_eq!(entries.len(), 2 + 4);
    }
}
