#![forbid(unsafe_code)]
//! On-image data model for mindfs.
//!
//! Byte-exact little-endian codecs for the superblock, inode records and
//! directory entries, plus the deterministic region layout computed from a
//! total block count. Everything here is pure data; I/O lives in
//! `mindfs-block` and above.

use mindfs_error::{FsError, Result};
use serde::{Deserialize, Serialize};

// ── Basic constants ─────────────────────────────────────────────────────────

/// Disk block size in bytes.
pub const BLOCK_SIZE: usize = 4096;
/// Bits held by one bitmap block.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;
/// Filesystem magic number ("MIND").
pub const MAGIC_NUMBER: i32 = 0x4D49_4E44;
/// Maximum file name length, including the NUL padding byte.
pub const MAX_FILENAME_LEN: usize = 256;
/// Maximum path length in bytes.
pub const MAX_PATH_LEN: usize = 1024;
/// Direct block pointers per inode.
pub const DIRECT_BLOCKS: usize = 10;
/// Block pointers held by one indirect block.
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;

/// Serialized superblock size in bytes.
pub const SUPERBLOCK_DISK_SIZE: usize = 56;
/// Serialized inode record size in bytes (92 payload + 4 reserved).
pub const INODE_DISK_SIZE: usize = 96;
/// Inode records per inode-table block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_DISK_SIZE;
/// Serialized directory entry size in bytes.
pub const DIRENT_DISK_SIZE: usize = 264;
/// Directory entries per data block.
pub const DIRENTS_PER_BLOCK: usize = BLOCK_SIZE / DIRENT_DISK_SIZE;

/// Inode number of the root directory.
pub const ROOT_INODE: i32 = 0;
/// Sentinel for "no indirect block".
pub const NO_INDIRECT: i32 = -1;
/// Sentinel for "empty direct slot" (block 0 is the superblock).
pub const NO_BLOCK: i32 = 0;

// ── File type and permission bits ───────────────────────────────────────────

/// Regular file type bit.
pub const FILE_TYPE_REGULAR: i32 = 0x8000;
/// Directory file type bit.
pub const FILE_TYPE_DIRECTORY: i32 = 0x4000;
/// Read permission bit.
pub const PERM_READ: i32 = 0x400;
/// Write permission bit.
pub const PERM_WRITE: i32 = 0x200;
/// Execute permission bit.
pub const PERM_EXECUTE: i32 = 0x100;
/// Read + write + execute.
pub const PERM_RWX: i32 = PERM_READ | PERM_WRITE | PERM_EXECUTE;

// ── Open mode bits ──────────────────────────────────────────────────────────

/// Open for reading.
pub const OPEN_READ: i32 = 0x01;
/// Open for writing.
pub const OPEN_WRITE: i32 = 0x02;
/// Create the file if it does not exist.
pub const OPEN_CREATE: i32 = 0x04;
/// Position the initial offset at the current file size.
pub const OPEN_APPEND: i32 = 0x08;

// ── Little-endian read/write helpers ────────────────────────────────────────

#[inline]
fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or_else(|| FsError::InvalidArgument("byte offset overflow".to_owned()))?;
    if end > data.len() {
        return Err(FsError::InvalidArgument(format!(
            "short buffer: need {len} bytes at offset {offset}, have {}",
            data.len().saturating_sub(offset)
        )));
    }
    Ok(&data[offset..end])
}

#[inline]
pub fn read_le_i32(data: &[u8], offset: usize) -> Result<i32> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_i64(data: &[u8], offset: usize) -> Result<i64> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(i64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn write_le_i32(data: &mut [u8], offset: usize, value: i32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_le_i64(data: &mut [u8], offset: usize, value: i64) {
    data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

/// Number of whole blocks needed to hold `size` bytes.
#[must_use]
pub fn blocks_needed(size: u64) -> u32 {
    let block = BLOCK_SIZE as u64;
    u32::try_from(size.div_ceil(block)).unwrap_or(u32::MAX)
}

// ── Disk layout ─────────────────────────────────────────────────────────────

/// On-image region layout, derived purely from the total block count.
///
/// Region order: superblock, inode table, inode bitmap, data bitmap, data.
/// The layout is never stored verbatim; it is recomputed on mount from the
/// superblock's total block count and must agree with the region start
/// fields persisted there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLayout {
    pub superblock_start: u32,
    pub superblock_blocks: u32,
    pub inode_table_start: u32,
    pub inode_table_blocks: u32,
    pub inode_bitmap_start: u32,
    pub inode_bitmap_blocks: u32,
    pub data_bitmap_start: u32,
    pub data_bitmap_blocks: u32,
    pub data_blocks_start: u32,
    pub data_blocks_count: u32,
    pub total_inodes: u32,
}

impl DiskLayout {
    /// Compute the layout for an image of `total_blocks` blocks.
    ///
    /// Inode count is ~10% of total blocks, rounded up to a whole block of
    /// inodes; images of more than 10 blocks get at least one table block.
    #[must_use]
    pub fn compute(total_blocks: u32) -> Self {
        let ipb = INODES_PER_BLOCK as u32;
        let bits = BITS_PER_BLOCK as u32;

        let mut inode_count = (total_blocks / 10).div_ceil(ipb) * ipb;
        if inode_count == 0 && total_blocks > 10 {
            inode_count = ipb;
        }

        let inode_table_blocks = inode_count / ipb;
        let inode_bitmap_blocks = inode_count.div_ceil(bits);
        let data_bitmap_blocks = total_blocks.div_ceil(bits);

        let inode_table_start = 1;
        let inode_bitmap_start = inode_table_start + inode_table_blocks;
        let data_bitmap_start = inode_bitmap_start + inode_bitmap_blocks;
        let data_blocks_start = data_bitmap_start + data_bitmap_blocks;
        let data_blocks_count = total_blocks.saturating_sub(data_blocks_start);

        Self {
            superblock_start: 0,
            superblock_blocks: 1,
            inode_table_start,
            inode_table_blocks,
            inode_bitmap_start,
            inode_bitmap_blocks,
            data_bitmap_start,
            data_bitmap_blocks,
            data_blocks_start,
            data_blocks_count,
            total_inodes: inode_count,
        }
    }
}

// ── Superblock ──────────────────────────────────────────────────────────────

/// Global filesystem metadata stored in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    pub magic_number: i32,
    pub total_blocks: i32,
    pub free_blocks: i32,
    pub total_inodes: i32,
    pub free_inodes: i32,
    pub block_size: i32,
    pub inode_table_start: i32,
    pub data_blocks_start: i32,
    pub inode_bitmap_start: i32,
    pub data_bitmap_start: i32,
    /// Wall-clock seconds of the last format/mount.
    pub mount_time: i64,
    /// Wall-clock seconds of the last metadata write.
    pub write_time: i64,
}

impl Superblock {
    /// Build a fresh superblock for a just-formatted image.
    #[must_use]
    pub fn for_layout(layout: &DiskLayout, total_blocks: u32, now: i64) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            total_blocks: total_blocks as i32,
            free_blocks: layout.data_blocks_count as i32,
            total_inodes: layout.total_inodes as i32,
            free_inodes: layout.total_inodes as i32,
            block_size: BLOCK_SIZE as i32,
            inode_table_start: layout.inode_table_start as i32,
            data_blocks_start: layout.data_blocks_start as i32,
            inode_bitmap_start: layout.inode_bitmap_start as i32,
            data_bitmap_start: layout.data_bitmap_start as i32,
            mount_time: now,
            write_time: now,
        }
    }

    /// Serialize into the first [`SUPERBLOCK_DISK_SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        ensure_slice(buf, 0, SUPERBLOCK_DISK_SIZE)?;
        write_le_i32(buf, 0x00, self.magic_number);
        write_le_i32(buf, 0x04, self.total_blocks);
        write_le_i32(buf, 0x08, self.free_blocks);
        write_le_i32(buf, 0x0C, self.total_inodes);
        write_le_i32(buf, 0x10, self.free_inodes);
        write_le_i32(buf, 0x14, self.block_size);
        write_le_i32(buf, 0x18, self.inode_table_start);
        write_le_i32(buf, 0x1C, self.data_blocks_start);
        write_le_i32(buf, 0x20, self.inode_bitmap_start);
        write_le_i32(buf, 0x24, self.data_bitmap_start);
        write_le_i64(buf, 0x28, self.mount_time);
        write_le_i64(buf, 0x30, self.write_time);
        Ok(())
    }

    /// Parse from the first [`SUPERBLOCK_DISK_SIZE`] bytes of `buf`.
    ///
    /// Does not validate the magic; mount does that so it can report
    /// `MountFailed` with context.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_slice(buf, 0, SUPERBLOCK_DISK_SIZE)?;
        Ok(Self {
            magic_number: read_le_i32(buf, 0x00)?,
            total_blocks: read_le_i32(buf, 0x04)?,
            free_blocks: read_le_i32(buf, 0x08)?,
            total_inodes: read_le_i32(buf, 0x0C)?,
            free_inodes: read_le_i32(buf, 0x10)?,
            block_size: read_le_i32(buf, 0x14)?,
            inode_table_start: read_le_i32(buf, 0x18)?,
            data_blocks_start: read_le_i32(buf, 0x1C)?,
            inode_bitmap_start: read_le_i32(buf, 0x20)?,
            data_bitmap_start: read_le_i32(buf, 0x24)?,
            mount_time: read_le_i64(buf, 0x28)?,
            write_time: read_le_i64(buf, 0x30)?,
        })
    }

    /// Whether the magic field identifies a mindfs image.
    #[must_use]
    pub fn magic_ok(&self) -> bool {
        self.magic_number == MAGIC_NUMBER
    }
}

// ── Inode ───────────────────────────────────────────────────────────────────

/// Metadata record for one file or directory.
///
/// `size` is widened to `i64` in memory; the on-disk field stays `i32` for
/// image compatibility, which caps practical file size at 2 GiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inode {
    pub mode: i32,
    pub owner_id: i32,
    pub group_id: i32,
    pub size: i64,
    pub access_time: i64,
    pub modification_time: i64,
    pub creation_time: i64,
    pub link_count: i32,
    pub direct: [i32; DIRECT_BLOCKS],
    pub indirect: i32,
    pub double_indirect: i32,
}

impl Inode {
    /// Zero-initialized inode with the given mode and link count; all
    /// timestamps set to `now`, indirect pointers cleared to the sentinel.
    #[must_use]
    pub fn init(mode: i32, link_count: i32, now: i64) -> Self {
        Self {
            mode,
            owner_id: 0,
            group_id: 0,
            size: 0,
            access_time: now,
            modification_time: now,
            creation_time: now,
            link_count,
            direct: [NO_BLOCK; DIRECT_BLOCKS],
            indirect: NO_INDIRECT,
            double_indirect: NO_INDIRECT,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.mode & FILE_TYPE_DIRECTORY != 0
    }

    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.mode & FILE_TYPE_REGULAR != 0
    }

    /// Serialize into the first [`INODE_DISK_SIZE`] bytes of `buf`.
    ///
    /// Fails if the in-memory size no longer fits the on-disk `i32` field.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        ensure_slice(buf, 0, INODE_DISK_SIZE)?;
        let size32 = i32::try_from(self.size)
            .map_err(|_| FsError::DiskFull(format!("file size {} exceeds 2 GiB", self.size)))?;
        write_le_i32(buf, 0x00, self.mode);
        write_le_i32(buf, 0x04, self.owner_id);
        write_le_i32(buf, 0x08, self.group_id);
        write_le_i32(buf, 0x0C, size32);
        write_le_i64(buf, 0x10, self.access_time);
        write_le_i64(buf, 0x18, self.modification_time);
        write_le_i64(buf, 0x20, self.creation_time);
        write_le_i32(buf, 0x28, self.link_count);
        for (i, ptr) in self.direct.iter().enumerate() {
            write_le_i32(buf, 0x2C + i * 4, *ptr);
        }
        write_le_i32(buf, 0x54, self.indirect);
        write_le_i32(buf, 0x58, self.double_indirect);
        // 0x5C..0x60 reserved.
        buf[0x5C..INODE_DISK_SIZE].fill(0);
        Ok(())
    }

    /// Parse from the first [`INODE_DISK_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        ensure_slice(buf, 0, INODE_DISK_SIZE)?;
        let mut direct = [NO_BLOCK; DIRECT_BLOCKS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_le_i32(buf, 0x2C + i * 4)?;
        }
        Ok(Self {
            mode: read_le_i32(buf, 0x00)?,
            owner_id: read_le_i32(buf, 0x04)?,
            group_id: read_le_i32(buf, 0x08)?,
            size: i64::from(read_le_i32(buf, 0x0C)?),
            access_time: read_le_i64(buf, 0x10)?,
            modification_time: read_le_i64(buf, 0x18)?,
            creation_time: read_le_i64(buf, 0x20)?,
            link_count: read_le_i32(buf, 0x28)?,
            direct,
            indirect: read_le_i32(buf, 0x54)?,
            double_indirect: read_le_i32(buf, 0x58)?,
        })
    }
}

// ── Directory entry ─────────────────────────────────────────────────────────

/// One name → inode binding inside a directory data block.
///
/// In-memory entries always have a non-empty name; on disk, a record with
/// `name_length == 0` is a hole and decodes to `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode_number: i32,
    pub name: String,
}

impl DirEntry {
    /// Build an entry, truncating the name to the 255-byte on-disk limit.
    #[must_use]
    pub fn new(name: &str, inode_number: i32) -> Self {
        let mut name = name.to_owned();
        if name.len() > MAX_FILENAME_LEN - 1 {
            // Byte-truncate on a char boundary.
            let mut cut = MAX_FILENAME_LEN - 1;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            name.truncate(cut);
        }
        Self { inode_number, name }
    }

    /// Serialize into the first [`DIRENT_DISK_SIZE`] bytes of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        ensure_slice(buf, 0, DIRENT_DISK_SIZE)?;
        write_le_i32(buf, 0, self.inode_number);
        let name_bytes = self.name.as_bytes();
        let len = name_bytes.len().min(MAX_FILENAME_LEN - 1);
        buf[4..4 + len].copy_from_slice(&name_bytes[..len]);
        buf[4 + len..4 + MAX_FILENAME_LEN].fill(0);
        write_le_i32(buf, 4 + MAX_FILENAME_LEN, len as i32);
        Ok(())
    }

    /// Parse one record; `None` if the slot is a hole.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        ensure_slice(buf, 0, DIRENT_DISK_SIZE)?;
        let name_length = read_le_i32(buf, 4 + MAX_FILENAME_LEN)?;
        if name_length <= 0 {
            return Ok(None);
        }
        let len = (name_length as usize).min(MAX_FILENAME_LEN - 1);
        let name = String::from_utf8_lossy(&buf[4..4 + len]).into_owned();
        Ok(Some(Self {
            inode_number: read_le_i32(buf, 0)?,
            name,
        }))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
