#![forbid(unsafe_code)]
//! Inode management for mindfs.
//!
//! [`InodeStore`] owns the inode and data-block bitmaps and implements
//! inode CRUD plus block-list maintenance across the three pointer tiers:
//! ten direct slots, one single-indirect block of 1024 pointers, and one
//! double-indirect block whose entries each name an inner indirect block.
//!
//! Inode writes are read-modify-write at block granularity so that
//! neighboring inodes sharing the block survive unchanged.

use mindfs_alloc::Bitmap;
use mindfs_block::{DiskImage, now_epoch_secs};
use mindfs_error::{FsError, Result};
use mindfs_types::{
    BLOCK_SIZE, DIRECT_BLOCKS, DiskLayout, INODE_DISK_SIZE, INODES_PER_BLOCK, Inode, NO_BLOCK,
    NO_INDIRECT, POINTERS_PER_BLOCK, read_le_i32, write_le_i32,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Largest block count one inode can address.
const MAX_BLOCKS_PER_INODE: usize =
    DIRECT_BLOCKS + POINTERS_PER_BLOCK + POINTERS_PER_BLOCK * POINTERS_PER_BLOCK;

/// Allocator and accessor for inodes and their data-block lists.
#[derive(Debug)]
pub struct InodeStore {
    disk: Arc<DiskImage>,
    layout: DiskLayout,
    inode_bitmap: Bitmap,
    data_bitmap: Bitmap,
    /// Serializes allocate/free sequences so bitmap reservation and the
    /// subsequent persistence steps act as one unit within this process.
    alloc_lock: Mutex<()>,
}

impl InodeStore {
    /// Build a store over an opened image and load both bitmaps.
    pub fn new(disk: Arc<DiskImage>, layout: DiskLayout) -> Result<Self> {
        let store = Self {
            disk,
            layout,
            inode_bitmap: Bitmap::new(layout.total_inodes),
            data_bitmap: Bitmap::new(layout.data_blocks_count),
            alloc_lock: Mutex::new(()),
        };
        store.reload_bitmaps()?;
        Ok(store)
    }

    /// The backing block device.
    #[must_use]
    pub fn disk(&self) -> &DiskImage {
        &self.disk
    }

    /// The region layout this store was mounted with.
    #[must_use]
    pub fn layout(&self) -> &DiskLayout {
        &self.layout
    }

    /// Re-read both bitmaps from their on-image regions.
    pub fn reload_bitmaps(&self) -> Result<()> {
        self.inode_bitmap.load_from(
            &self.disk,
            self.layout.inode_bitmap_start,
            self.layout.inode_bitmap_blocks,
        )?;
        self.data_bitmap.load_from(
            &self.disk,
            self.layout.data_bitmap_start,
            self.layout.data_bitmap_blocks,
        )?;
        Ok(())
    }

    // ── Inode I/O ───────────────────────────────────────────────────────────

    /// Read inode `ino` from the inode table.
    pub fn read_inode(&self, ino: i32) -> Result<Inode> {
        let (block, offset) = self.inode_position(ino)?;
        let data = self.disk.read_block(block)?;
        Inode::decode(&data[offset..offset + INODE_DISK_SIZE])
    }

    /// Write inode `ino`, preserving the other inodes in its table block.
    pub fn write_inode(&self, ino: i32, inode: &Inode) -> Result<()> {
        let (block, offset) = self.inode_position(ino)?;
        let mut data = self.disk.read_block(block)?;
        inode.encode_into(&mut data[offset..offset + INODE_DISK_SIZE])?;
        self.disk.write_block(block, &data)?;
        Ok(())
    }

    // ── Inode allocation ────────────────────────────────────────────────────

    /// Allocate a fresh inode: zero-initialized, link count 1, timestamps
    /// now, indirect pointers cleared. The bitmap reservation is rolled
    /// back if the inode or bitmap write fails.
    pub fn allocate_inode(&self) -> Result<i32> {
        let _guard = self.alloc_lock.lock();

        let bit = self.inode_bitmap.allocate().ok_or(FsError::NoFreeInodes)?;
        let ino = bit as i32;

        let inode = Inode::init(0, 1, now_epoch_secs());
        if let Err(e) = self.write_inode(ino, &inode) {
            warn!(
                target: "mindfs::inode",
                event = "allocate_rollback",
                ino,
                error = %e
            );
            self.inode_bitmap.free(bit)?;
            return Err(e);
        }

        if let Err(e) = self.save_inode_bitmap() {
            self.inode_bitmap.free(bit)?;
            return Err(e);
        }

        trace!(target: "mindfs::inode", event = "inode_allocated", ino);
        Ok(ino)
    }

    /// Free `ino`: release all of its data blocks, then its bitmap bit.
    pub fn free_inode(&self, ino: i32) -> Result<()> {
        if !self.is_inode_allocated(ino) {
            return Err(FsError::InvalidArgument(format!(
                "inode {ino} is not allocated"
            )));
        }

        let _guard = self.alloc_lock.lock();
        self.release_data_blocks(ino)?;
        self.inode_bitmap.free(ino as u32)?;
        self.save_inode_bitmap()?;
        debug!(target: "mindfs::inode", event = "inode_freed", ino);
        Ok(())
    }

    /// Whether `ino` is currently allocated.
    #[must_use]
    pub fn is_inode_allocated(&self, ino: i32) -> bool {
        u32::try_from(ino).is_ok_and(|bit| self.inode_bitmap.is_allocated(bit))
    }

    #[must_use]
    pub fn total_inodes(&self) -> u32 {
        self.inode_bitmap.total_bits()
    }

    #[must_use]
    pub fn free_inodes(&self) -> u32 {
        self.inode_bitmap.free_bits()
    }

    #[must_use]
    pub fn total_data_blocks(&self) -> u32 {
        self.data_bitmap.total_bits()
    }

    #[must_use]
    pub fn free_data_blocks_count(&self) -> u32 {
        self.data_bitmap.free_bits()
    }

    // ── Data-block allocation ───────────────────────────────────────────────

    /// Reserve `count` data blocks and splice them onto the end of the
    /// inode's block list, rebuilding the indirection tree. Returns the
    /// absolute numbers of the new blocks in file order.
    ///
    /// On any failure every bit reserved by this call is rolled back.
    pub fn allocate_data_blocks(&self, ino: i32, count: u32) -> Result<Vec<i32>> {
        if count == 0 {
            return Err(FsError::InvalidArgument(
                "cannot allocate 0 data blocks".to_owned(),
            ));
        }
        self.inode_position(ino)?;

        let _guard = self.alloc_lock.lock();

        let mut reserved = Vec::with_capacity(count as usize);
        for _ in 0..count {
            match self.data_bitmap.allocate() {
                Some(bit) => reserved.push(self.layout.data_blocks_start as i32 + bit as i32),
                None => {
                    self.rollback_data_blocks(&reserved);
                    return Err(FsError::NoFreeBlocks);
                }
            }
        }

        if let Err(e) = self.rebuild_block_pointers(ino, &reserved) {
            warn!(
                target: "mindfs::inode",
                event = "block_splice_rollback",
                ino,
                count,
                error = %e
            );
            self.rollback_data_blocks(&reserved);
            return Err(e);
        }

        self.save_data_bitmap()?;
        trace!(
            target: "mindfs::inode",
            event = "data_blocks_allocated",
            ino,
            count,
            first = reserved.first().copied().unwrap_or(NO_BLOCK)
        );
        Ok(reserved)
    }

    /// Release every data block of `ino`, including the indirection
    /// metadata blocks, and reset the inode's pointers and size.
    pub fn free_data_blocks(&self, ino: i32) -> Result<()> {
        let _guard = self.alloc_lock.lock();
        self.release_data_blocks(ino)
    }

    /// Walk direct, single-indirect, then double-indirect pointers and
    /// collect every non-zero entry. The returned order is the file's byte
    /// order and is the only correct order for reads and writes.
    pub fn get_data_blocks(&self, ino: i32) -> Result<Vec<i32>> {
        let inode = self.read_inode(ino)?;
        let mut blocks = Vec::new();

        for ptr in inode.direct {
            if ptr != NO_BLOCK {
                blocks.push(ptr);
            }
        }

        if inode.indirect != NO_INDIRECT {
            blocks.extend(self.read_indirect_block(inode.indirect)?);
        }

        if inode.double_indirect != NO_INDIRECT {
            for inner in self.read_indirect_block(inode.double_indirect)? {
                blocks.extend(self.read_indirect_block(inner)?);
            }
        }

        Ok(blocks)
    }

    // ── Internal: indirection maintenance ───────────────────────────────────

    /// Merge `new_blocks` onto the inode's existing list and rewrite all
    /// three pointer tiers. The single-indirect block is freed and
    /// reallocated; the double-indirect tree is extended in place.
    fn rebuild_block_pointers(&self, ino: i32, new_blocks: &[i32]) -> Result<()> {
        let mut inode = self.read_inode(ino)?;
        let mut all = self.get_data_blocks(ino)?;
        all.extend_from_slice(new_blocks);

        if all.len() > MAX_BLOCKS_PER_INODE {
            return Err(FsError::DiskFull(format!(
                "inode {ino} would need {} blocks, limit is {MAX_BLOCKS_PER_INODE}",
                all.len()
            )));
        }

        // Direct tier.
        inode.direct = [NO_BLOCK; DIRECT_BLOCKS];
        for (slot, block) in inode.direct.iter_mut().zip(all.iter()) {
            *slot = *block;
        }

        // Single-indirect tier: rebuilt from scratch each time.
        if inode.indirect != NO_INDIRECT {
            self.free_region_block(inode.indirect)?;
            inode.indirect = NO_INDIRECT;
        }
        let single: &[i32] = if all.len() > DIRECT_BLOCKS {
            &all[DIRECT_BLOCKS..all.len().min(DIRECT_BLOCKS + POINTERS_PER_BLOCK)]
        } else {
            &[]
        };
        if !single.is_empty() {
            let block = self.allocate_metadata_block()?;
            self.write_indirect_block(block, single)?;
            inode.indirect = block;
        }

        // Double-indirect tier: outer block and inner blocks are reused.
        let doubles: &[i32] = if all.len() > DIRECT_BLOCKS + POINTERS_PER_BLOCK {
            &all[DIRECT_BLOCKS + POINTERS_PER_BLOCK..]
        } else {
            &[]
        };
        if !doubles.is_empty() {
            let mut outer = if inode.double_indirect != NO_INDIRECT {
                self.read_indirect_block(inode.double_indirect)?
            } else {
                let block = self.allocate_metadata_block()?;
                inode.double_indirect = block;
                Vec::new()
            };

            for (idx, chunk) in doubles.chunks(POINTERS_PER_BLOCK).enumerate() {
                let inner = if let Some(existing) = outer.get(idx).copied() {
                    existing
                } else {
                    let block = self.allocate_metadata_block()?;
                    outer.push(block);
                    block
                };
                // The chunk is the complete prefix for this inner block, so
                // overwrite rather than read-modify.
                self.write_indirect_block(inner, chunk)?;
            }

            self.write_indirect_block(inode.double_indirect, &outer)?;
        }

        inode.modification_time = now_epoch_secs();
        self.write_inode(ino, &inode)
    }

    /// Free the whole indirection tree bottom-up: data entries of each
    /// inner indirect block, the inner blocks themselves, then the
    /// double-indirect block, then the single-indirect tier.
    fn release_data_blocks(&self, ino: i32) -> Result<()> {
        let mut inode = self.read_inode(ino)?;

        for ptr in &mut inode.direct {
            if *ptr != NO_BLOCK {
                self.free_region_block(*ptr)?;
                *ptr = NO_BLOCK;
            }
        }

        if inode.indirect != NO_INDIRECT {
            for block in self.read_indirect_block(inode.indirect)? {
                self.free_region_block(block)?;
            }
            self.free_region_block(inode.indirect)?;
            inode.indirect = NO_INDIRECT;
        }

        if inode.double_indirect != NO_INDIRECT {
            for inner in self.read_indirect_block(inode.double_indirect)? {
                for block in self.read_indirect_block(inner)? {
                    self.free_region_block(block)?;
                }
                self.free_region_block(inner)?;
            }
            self.free_region_block(inode.double_indirect)?;
            inode.double_indirect = NO_INDIRECT;
        }

        inode.size = 0;
        self.write_inode(ino, &inode)?;
        self.save_data_bitmap()
    }

    /// Read a zero-terminated pointer array from an indirect block.
    fn read_indirect_block(&self, block: i32) -> Result<Vec<i32>> {
        let data = self.disk.read_block(i64::from(block))?;
        let mut pointers = Vec::new();
        for i in 0..POINTERS_PER_BLOCK {
            let ptr = read_le_i32(&data, i * 4)?;
            if ptr == NO_BLOCK {
                break;
            }
            pointers.push(ptr);
        }
        Ok(pointers)
    }

    /// Write a pointer array into an indirect block, zero-padding the tail.
    fn write_indirect_block(&self, block: i32, pointers: &[i32]) -> Result<()> {
        if pointers.len() > POINTERS_PER_BLOCK {
            return Err(FsError::InvalidArgument(format!(
                "indirect block holds {POINTERS_PER_BLOCK} pointers, got {}",
                pointers.len()
            )));
        }
        let mut data = vec![0u8; BLOCK_SIZE];
        for (i, ptr) in pointers.iter().enumerate() {
            write_le_i32(&mut data, i * 4, *ptr);
        }
        self.disk.write_block(i64::from(block), &data)
    }

    /// Take one bit from the data bitmap and return the absolute block
    /// number, zeroed on disk (indirect blocks are parsed before first
    /// write, so they must not carry stale pointers).
    fn allocate_metadata_block(&self) -> Result<i32> {
        let bit = self.data_bitmap.allocate().ok_or(FsError::NoFreeBlocks)?;
        let block = self.layout.data_blocks_start as i32 + bit as i32;
        let zeroes = vec![0u8; BLOCK_SIZE];
        self.disk.write_block(i64::from(block), &zeroes)?;
        Ok(block)
    }

    /// Return an absolute data-region block to the bitmap.
    fn free_region_block(&self, block: i32) -> Result<()> {
        let bit = block - self.layout.data_blocks_start as i32;
        if bit < 0 {
            return Err(FsError::InvalidBlock {
                block: i64::from(block),
                total: self.disk.total_blocks(),
            });
        }
        self.data_bitmap.free(bit as u32)
    }

    fn rollback_data_blocks(&self, blocks: &[i32]) {
        for block in blocks {
            let bit = block - self.layout.data_blocks_start as i32;
            if bit >= 0 {
                let _ = self.data_bitmap.free(bit as u32);
            }
        }
    }

    fn save_inode_bitmap(&self) -> Result<()> {
        self.inode_bitmap.save_to(
            &self.disk,
            self.layout.inode_bitmap_start,
            self.layout.inode_bitmap_blocks,
        )
    }

    fn save_data_bitmap(&self) -> Result<()> {
        self.data_bitmap.save_to(
            &self.disk,
            self.layout.data_bitmap_start,
            self.layout.data_bitmap_blocks,
        )
    }

    fn inode_position(&self, ino: i32) -> Result<(i64, usize)> {
        if ino < 0 || ino >= self.layout.total_inodes as i32 {
            return Err(FsError::InvalidInode(ino));
        }
        let ipb = INODES_PER_BLOCK as i32;
        let block = i64::from(self.layout.inode_table_start as i32 + ino / ipb);
        let offset = (ino % ipb) as usize * INODE_DISK_SIZE;
        Ok((block, offset))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mindfs_types::{FILE_TYPE_REGULAR, PERM_READ, PERM_WRITE};

    fn fresh_store(size_mb: u32) -> (tempfile::TempDir, InodeStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("disk.img");
        DiskImage::create(&path, size_mb).expect("create");
        let disk = Arc::new(DiskImage::open(&path).expect("open"));
        let layout = disk.format().expect("format");
        let store = InodeStore::new(Arc::clone(&disk), layout).expect("store");
        (dir, store)
    }

    #[test]
    fn allocate_inode_zero_initializes() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");
        assert_eq!(ino, 0);

        let inode = store.read_inode(ino).expect("read");
        assert_eq!(inode.size, 0);
        assert_eq!(inode.link_count, 1);
        assert_eq!(inode.indirect, NO_INDIRECT);
        assert_eq!(inode.double_indirect, NO_INDIRECT);
        assert_eq!(inode.direct, [NO_BLOCK; DIRECT_BLOCKS]);
        assert!(inode.creation_time > 0);
    }

    #[test]
    fn allocations_are_unique_until_freed() {
        let (_dir, store) = fresh_store(10);
        let a = store.allocate_inode().expect("a");
        let b = store.allocate_inode().expect("b");
        let c = store.allocate_inode().expect("c");
        assert_eq!((a, b, c), (0, 1, 2));

        store.free_inode(b).expect("free");
        // First-fit hands the freed slot back.
        assert_eq!(store.allocate_inode().expect("again"), b);
    }

    #[test]
    fn inode_writes_do_not_disturb_block_neighbors() {
        let (_dir, store) = fresh_store(10);
        let a = store.allocate_inode().expect("a");
        let b = store.allocate_inode().expect("b");

        let mut ia = store.read_inode(a).expect("read a");
        ia.mode = FILE_TYPE_REGULAR | PERM_READ;
        ia.size = 111;
        store.write_inode(a, &ia).expect("write a");

        let mut ib = store.read_inode(b).expect("read b");
        ib.mode = FILE_TYPE_REGULAR | PERM_WRITE;
        ib.size = 222;
        store.write_inode(b, &ib).expect("write b");

        // Both live in inode-table block 0; each must survive the other.
        let ra = store.read_inode(a).expect("reread a");
        let rb = store.read_inode(b).expect("reread b");
        assert_eq!(ra.size, 111);
        assert_eq!(rb.size, 222);
        assert_eq!(ra.mode, FILE_TYPE_REGULAR | PERM_READ);
    }

    #[test]
    fn counters_partition_totals() {
        let (_dir, store) = fresh_store(10);
        let total = store.total_inodes();
        assert_eq!(store.free_inodes(), total);

        let ino = store.allocate_inode().expect("allocate");
        assert_eq!(store.free_inodes(), total - 1);
        store.allocate_data_blocks(ino, 3).expect("blocks");
        assert_eq!(
            store.free_data_blocks_count() + 3,
            store.total_data_blocks()
        );
        store.free_inode(ino).expect("free");
        assert_eq!(store.free_inodes(), total);
        assert_eq!(store.free_data_blocks_count(), store.total_data_blocks());
    }

    #[test]
    fn direct_tier_allocation() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");
        let blocks = store.allocate_data_blocks(ino, 4).expect("blocks");
        assert_eq!(blocks.len(), 4);

        let inode = store.read_inode(ino).expect("read");
        assert_eq!(&inode.direct[..4], blocks.as_slice());
        assert_eq!(inode.indirect, NO_INDIRECT);

        assert_eq!(store.get_data_blocks(ino).expect("list"), blocks);
    }

    #[test]
    fn growth_spills_into_single_indirect() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");

        let first = store.allocate_data_blocks(ino, 8).expect("first");
        let second = store.allocate_data_blocks(ino, 7).expect("second");

        let inode = store.read_inode(ino).expect("read");
        assert!(inode.indirect != NO_INDIRECT);
        assert_eq!(inode.double_indirect, NO_INDIRECT);

        let mut expected = first;
        expected.extend(second);
        assert_eq!(store.get_data_blocks(ino).expect("list"), expected);
    }

    #[test]
    fn growth_spills_into_double_indirect() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");

        let need = (DIRECT_BLOCKS + POINTERS_PER_BLOCK + 6) as u32;
        let blocks = store.allocate_data_blocks(ino, need).expect("allocate");
        assert_eq!(blocks.len(), need as usize);

        let inode = store.read_inode(ino).expect("read");
        assert!(inode.indirect != NO_INDIRECT);
        assert!(inode.double_indirect != NO_INDIRECT);

        let listed = store.get_data_blocks(ino).expect("list");
        assert_eq!(listed, blocks);
    }

    #[test]
    fn incremental_growth_keeps_order() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");

        let mut expected = Vec::new();
        for count in [3u32, 9, 20, 1] {
            expected.extend(store.allocate_data_blocks(ino, count).expect("grow"));
        }
        assert_eq!(store.get_data_blocks(ino).expect("list"), expected);
    }

    #[test]
    fn free_data_blocks_releases_indirection_tree() {
        let (_dir, store) = fresh_store(10);
        let baseline = store.free_data_blocks_count();

        let ino = store.allocate_inode().expect("allocate");
        let need = (DIRECT_BLOCKS + POINTERS_PER_BLOCK + 6) as u32;
        store.allocate_data_blocks(ino, need).expect("allocate");

        // Data blocks plus single-indirect, double-indirect and one inner
        // indirect block are all accounted against the bitmap.
        assert!(store.free_data_blocks_count() < baseline - need);

        store.free_data_blocks(ino).expect("release");
        // Bottom-up release returns every bit, inner indirect blocks
        // included.
        assert_eq!(store.free_data_blocks_count(), baseline);

        let inode = store.read_inode(ino).expect("read");
        assert_eq!(inode.size, 0);
        assert_eq!(inode.direct, [NO_BLOCK; DIRECT_BLOCKS]);
        assert_eq!(inode.indirect, NO_INDIRECT);
        assert_eq!(inode.double_indirect, NO_INDIRECT);
    }

    #[test]
    fn exhaustion_rolls_back_partial_reservation() {
        let (_dir, store) = fresh_store(1);
        let ino = store.allocate_inode().expect("allocate");

        let free_before = store.free_data_blocks_count();
        let result = store.allocate_data_blocks(ino, free_before + 100);
        assert!(matches!(result, Err(FsError::NoFreeBlocks)));
        // Nothing stays reserved after the failed batch.
        assert_eq!(store.free_data_blocks_count(), free_before);
        assert!(store.get_data_blocks(ino).expect("list").is_empty());
    }

    #[test]
    fn invalid_inode_numbers_are_rejected() {
        let (_dir, store) = fresh_store(10);
        assert!(matches!(
            store.read_inode(-1),
            Err(FsError::InvalidInode(-1))
        ));
        assert!(matches!(
            store.read_inode(store.total_inodes() as i32),
            Err(FsError::InvalidInode(_))
        ));
        assert!(matches!(
            store.free_inode(5),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn bitmaps_persist_across_reload() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");
        store.allocate_data_blocks(ino, 5).expect("blocks");

        let free_inodes = store.free_inodes();
        let free_data = store.free_data_blocks_count();

        store.reload_bitmaps().expect("reload");
        assert_eq!(store.free_inodes(), free_inodes);
        assert_eq!(store.free_data_blocks_count(), free_data);
        assert!(store.is_inode_allocated(ino));
    }

    #[test]
    fn zero_count_allocation_is_invalid() {
        let (_dir, store) = fresh_store(10);
        let ino = store.allocate_inode().expect("allocate");
        assert!(matches!(
            store.allocate_data_blocks(ino, 0),
            Err(FsError::InvalidArgument(_))
        ));
    }
}
