#![forbid(unsafe_code)]
//! Block I/O layer over a single host-file disk image.
//!
//! [`DiskImage`] owns the image file for the full lifetime of a mount. It
//! provides whole-block positional reads and writes, format-time region
//! initialization, and cross-process exclusion via an exclusive advisory
//! file lock held from open to close.

use mindfs_error::{FsError, Result};
use mindfs_types::{BLOCK_SIZE, DiskLayout, Superblock};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Wall-clock seconds since the UNIX epoch.
#[must_use]
pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// A fixed-size block device simulated on top of one host file.
///
/// Block I/O uses positional `pread`/`pwrite`, which carries no shared file
/// offset, so concurrent readers need no device-level serialization. The
/// advisory lock taken in [`DiskImage::open`] keeps other processes off the
/// image until [`DiskImage::close`] (or drop).
#[derive(Debug)]
pub struct DiskImage {
    file: File,
    path: PathBuf,
    disk_size: u64,
    total_blocks: u32,
}

impl DiskImage {
    /// Create a new sparse image file of `size_mb` megabytes.
    ///
    /// The file is extended by seeking to the last byte and writing a single
    /// zero, so creation is O(1) in image size. A freshly created image is
    /// not mountable until it has been opened and formatted.
    pub fn create(path: impl AsRef<Path>, size_mb: u32) -> Result<()> {
        let path = path.as_ref();
        if size_mb == 0 {
            return Err(FsError::InvalidArgument(
                "disk size must be a positive number of megabytes".to_owned(),
            ));
        }
        if path.exists() {
            return Err(FsError::DiskAlreadyExists(path.display().to_string()));
        }

        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let disk_size = u64::from(size_mb) * 1024 * 1024;
        file.seek(SeekFrom::Start(disk_size - 1))?;
        file.write_all(&[0u8])?;

        info!(
            target: "mindfs::block",
            event = "image_created",
            path = %path.display(),
            size_mb,
            total_blocks = disk_size / BLOCK_SIZE as u64
        );
        Ok(())
    }

    /// Open an existing image read+write and take the exclusive host lock.
    ///
    /// The lock is mandatory: failure to acquire it aborts the open. Lock
    /// acquisition blocks until any other holder releases, which is what
    /// serializes whole processes sharing one image.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FsError::DiskNotFound(path.display().to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        file.lock().map_err(|e| {
            FsError::MountFailed(format!("cannot lock image {}: {e}", path.display()))
        })?;

        let disk_size = file.metadata()?.len();
        let total_blocks = u32::try_from(disk_size / BLOCK_SIZE as u64)
            .map_err(|_| FsError::MountFailed("image too large".to_owned()))?;

        debug!(
            target: "mindfs::block",
            event = "image_opened",
            path = %path.display(),
            total_blocks
        );
        Ok(Self {
            file,
            path: path.to_owned(),
            disk_size,
            total_blocks,
        })
    }

    /// Release the host lock and close the image file.
    pub fn close(self) -> Result<()> {
        self.file.unlock()?;
        debug!(
            target: "mindfs::block",
            event = "image_closed",
            path = %self.path.display()
        );
        Ok(())
    }

    /// Read block `block_num` into a fresh buffer.
    pub fn read_block(&self, block_num: i64) -> Result<Vec<u8>> {
        let offset = self.block_offset(block_num)?;
        let mut buf = vec![0u8; BLOCK_SIZE];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Read block `block_num` into `buf` (must be exactly one block long).
    pub fn read_block_into(&self, block_num: i64, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument(format!(
                "block buffer must be {BLOCK_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let offset = self.block_offset(block_num)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Write one whole block at `block_num`.
    pub fn write_block(&self, block_num: i64, buf: &[u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE {
            return Err(FsError::InvalidArgument(format!(
                "block buffer must be {BLOCK_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        let offset = self.block_offset(block_num)?;
        self.file.write_all_at(buf, offset)?;
        Ok(())
    }

    /// Flush pending writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Total number of addressable blocks.
    #[must_use]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Image size in bytes.
    #[must_use]
    pub fn disk_size(&self) -> u64 {
        self.disk_size
    }

    /// Block size in bytes.
    #[must_use]
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Path of the backing host file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Region layout for this image, recomputed from the block count.
    #[must_use]
    pub fn compute_layout(&self) -> DiskLayout {
        DiskLayout::compute(self.total_blocks)
    }

    /// Write a fresh filesystem skeleton onto the image.
    ///
    /// Lays down the superblock, then zeroes the inode bitmap, data bitmap
    /// and inode table regions. The data region is left untouched: a sparse
    /// image reads as zero and data blocks are never read before allocation.
    pub fn format(&self) -> Result<DiskLayout> {
        let layout = self.compute_layout();
        let now = now_epoch_secs();

        let sb = Superblock::for_layout(&layout, self.total_blocks, now);
        let mut block = vec![0u8; BLOCK_SIZE];
        sb.encode_into(&mut block)?;
        self.write_block(i64::from(layout.superblock_start), &block)
            .map_err(|e| FsError::FormatFailed(format!("superblock write: {e}")))?;

        self.write_zeroed_region(layout.inode_bitmap_start, layout.inode_bitmap_blocks)?;
        self.write_zeroed_region(layout.data_bitmap_start, layout.data_bitmap_blocks)?;
        self.write_zeroed_region(layout.inode_table_start, layout.inode_table_blocks)?;

        info!(
            target: "mindfs::block",
            event = "image_formatted",
            path = %self.path.display(),
            total_blocks = self.total_blocks,
            total_inodes = layout.total_inodes,
            data_blocks = layout.data_blocks_count
        );
        Ok(layout)
    }

    fn write_zeroed_region(&self, start: u32, count: u32) -> Result<()> {
        let zeroes = vec![0u8; BLOCK_SIZE];
        for block in start..start + count {
            self.write_block(i64::from(block), &zeroes).map_err(|e| {
                warn!(
                    target: "mindfs::block",
                    event = "format_zero_failed",
                    block,
                    error = %e
                );
                FsError::FormatFailed(format!("zeroing block {block}: {e}"))
            })?;
        }
        Ok(())
    }

    fn block_offset(&self, block_num: i64) -> Result<u64> {
        if block_num < 0 || block_num >= i64::from(self.total_blocks) {
            return Err(FsError::InvalidBlock {
                block: block_num,
                total: self.total_blocks,
            });
        }
        Ok(block_num as u64 * BLOCK_SIZE as u64)
    }
}

impl Drop for DiskImage {
    fn drop(&mut self) {
        // Close releases the lock explicitly; dropping without close still
        // unlocks when the descriptor goes away, but be deliberate about it.
        let _ = self.file.unlock();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
