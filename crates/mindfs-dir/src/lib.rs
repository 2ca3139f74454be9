#![forbid(unsafe_code)]
//! Directory operations for mindfs.
//!
//! A directory's data is a packed array of fixed-size entry records;
//! records with a zero name length are holes. Reads skip holes; writes
//! pack the live entries contiguously from the first slot of the first
//! data block, growing the block list as needed, and zero whatever
//! remains so stale records cannot resurface.

use mindfs_block::now_epoch_secs;
use mindfs_error::{FsError, Result};
use mindfs_inode::InodeStore;
use mindfs_path as path;
use mindfs_types::{
    BLOCK_SIZE, DIRENT_DISK_SIZE, DIRENTS_PER_BLOCK, DirEntry, FILE_TYPE_DIRECTORY, PERM_RWX,
    blocks_needed,
};
use tracing::{debug, trace};

/// Read the live entries of directory `ino`.
pub fn read_entries(store: &InodeStore, ino: i32) -> Result<Vec<DirEntry>> {
    let inode = store.read_inode(ino)?;
    if !inode.is_directory() {
        return Err(FsError::NotADirectory(format!("inode {ino}")));
    }

    let mut entries = Vec::new();
    if inode.size == 0 {
        return Ok(entries);
    }

    for block in store.get_data_blocks(ino)? {
        let data = store.disk().read_block(i64::from(block))?;
        for slot in 0..DIRENTS_PER_BLOCK {
            let offset = slot * DIRENT_DISK_SIZE;
            if let Some(entry) = DirEntry::decode(&data[offset..offset + DIRENT_DISK_SIZE])? {
                entries.push(entry);
            }
        }
    }
    Ok(entries)
}

/// Overwrite directory `ino` with `entries`, packed contiguously.
///
/// Grows the block list when the entry count needs it, rewrites every
/// owned block (zero-filling the tail), and updates the inode's size and
/// modification time.
pub fn write_entries(store: &InodeStore, ino: i32, entries: &[DirEntry]) -> Result<()> {
    let required_size = entries.len() * DIRENT_DISK_SIZE;
    let required_blocks = blocks_needed(required_size as u64);

    let mut blocks = store.get_data_blocks(ino)?;
    if (blocks.len() as u32) < required_blocks {
        let additional = required_blocks - blocks.len() as u32;
        store.allocate_data_blocks(ino, additional)?;
        blocks = store.get_data_blocks(ino)?;
    }

    let mut next = entries.iter();
    for block in &blocks {
        let mut data = vec![0u8; BLOCK_SIZE];
        for slot in 0..DIRENTS_PER_BLOCK {
            let Some(entry) = next.next() else { break };
            let offset = slot * DIRENT_DISK_SIZE;
            entry.encode_into(&mut data[offset..offset + DIRENT_DISK_SIZE])?;
        }
        store.disk().write_block(i64::from(*block), &data)?;
    }

    // Read after the block writes: allocation above rewrote the pointer
    // tiers.
    let mut inode = store.read_inode(ino)?;
    inode.size = required_size as i64;
    inode.modification_time = now_epoch_secs();
    store.write_inode(ino, &inode)
}

/// Bind `name` → `ino` inside directory `dir_ino`.
pub fn add_entry(store: &InodeStore, dir_ino: i32, name: &str, ino: i32) -> Result<()> {
    let mut entries = read_entries(store, dir_ino)?;
    if entries.iter().any(|e| e.name == name) {
        return Err(FsError::FileAlreadyExists(name.to_owned()));
    }
    entries.push(DirEntry::new(name, ino));
    trace!(
        target: "mindfs::dir",
        event = "entry_added",
        dir_ino,
        name,
        ino
    );
    write_entries(store, dir_ino, &entries)
}

/// Remove the entry called `name` from directory `dir_ino`.
pub fn remove_entry(store: &InodeStore, dir_ino: i32, name: &str) -> Result<()> {
    let mut entries = read_entries(store, dir_ino)?;
    let before = entries.len();
    entries.retain(|e| e.name != name);
    if entries.len() == before {
        return Err(FsError::FileNotFound(name.to_owned()));
    }
    trace!(
        target: "mindfs::dir",
        event = "entry_removed",
        dir_ino,
        name
    );
    write_entries(store, dir_ino, &entries)
}

/// Create the directory at `path` with `.` and `..` seeded.
///
/// Any failure after inode allocation frees the inode again, which
/// cascades the data-block release.
pub fn create_directory(store: &InodeStore, dir_path: &str) -> Result<i32> {
    if path::file_exists(store, dir_path) {
        return Err(FsError::FileAlreadyExists(dir_path.to_owned()));
    }

    let parent_dir = path::parent_path(dir_path);
    let name = path::basename(dir_path);
    if name.is_empty() {
        return Err(FsError::InvalidPath(dir_path.to_owned()));
    }

    let parent_ino = path::find_inode(store, &parent_dir)
        .map_err(|_| FsError::ParentNotFound(parent_dir.clone()))?;

    let new_ino = store.allocate_inode()?;

    let seed = || -> Result<()> {
        let mut inode = store.read_inode(new_ino)?;
        inode.mode = FILE_TYPE_DIRECTORY | PERM_RWX;
        inode.link_count = 2;
        store.write_inode(new_ino, &inode)?;

        store.allocate_data_blocks(new_ino, 1)?;
        write_entries(
            store,
            new_ino,
            &[DirEntry::new(".", new_ino), DirEntry::new("..", parent_ino)],
        )?;
        add_entry(store, parent_ino, &name, new_ino)
    };

    if let Err(e) = seed() {
        let _ = store.free_inode(new_ino);
        return Err(e);
    }

    debug!(
        target: "mindfs::dir",
        event = "directory_created",
        path = dir_path,
        ino = new_ino,
        parent = parent_ino
    );
    Ok(new_ino)
}

/// List the entries of the directory at `path`.
pub fn list_directory(store: &InodeStore, dir_path: &str) -> Result<Vec<DirEntry>> {
    let ino = path::find_inode(store, dir_path)?;
    read_entries(store, ino)
}

/// Remove the directory at `path`.
///
/// The root cannot be removed, and the directory must hold nothing beyond
/// `.` and `..`.
pub fn remove_directory(store: &InodeStore, dir_path: &str) -> Result<()> {
    if dir_path == "/" {
        return Err(FsError::InvalidArgument(
            "Cannot remove root directory".to_owned(),
        ));
    }

    let ino = path::find_inode(store, dir_path)?;
    let entries = read_entries(store, ino)?;
    if entries.len() > 2 {
        return Err(FsError::DirectoryNotEmpty(dir_path.to_owned()));
    }

    let parent_dir = path::parent_path(dir_path);
    let name = path::basename(dir_path);
    let parent_ino = path::find_inode(store, &parent_dir)
        .map_err(|_| FsError::ParentNotFound(parent_dir.clone()))?;

    remove_entry(store, parent_ino, &name)?;
    store.free_inode(ino)?;

    debug!(
        target: "mindfs::dir",
        event = "directory_removed",
        path = dir_path,
        ino
    );
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mindfs_block::DiskImage;
    use mindfs_types::ROOT_INODE;
    use std::sync::Arc;

    /// Fresh store with a seeded root directory (inode 0, `.` and `..`).
    fn fresh_store() -> (tempfile::TempDir, InodeStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = dir.path().join("disk.img");
        DiskImage::create(&img, 10).expect("create");
        let disk = Arc::new(DiskImage::open(&img).expect("open"));
        let layout = disk.format().expect("format");
        let store = InodeStore::new(Arc::clone(&disk), layout).expect("store");

        let root = store.allocate_inode().expect("root");
        assert_eq!(root, ROOT_INODE);
        let mut inode = store.read_inode(root).expect("read");
        inode.mode = FILE_TYPE_DIRECTORY | PERM_RWX;
        inode.link_count = 2;
        store.write_inode(root, &inode).expect("write");
        store.allocate_data_blocks(root, 1).expect("block");
        write_entries(
            &store,
            root,
            &[DirEntry::new(".", root), DirEntry::new("..", root)],
        )
        .expect("seed root");

        (dir, store)
    }

    #[test]
    fn empty_directory_lists_dot_entries() {
        let (_tmp, store) = fresh_store();
        let entries = read_entries(&store, ROOT_INODE).expect("read");
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".", ".."]);
        assert!(entries.iter().all(|e| e.inode_number == ROOT_INODE));
    }

    #[test]
    fn create_directory_seeds_dot_and_dotdot() {
        let (_tmp, store) = fresh_store();
        let ino = create_directory(&store, "/docs").expect("mkdir");

        let entries = read_entries(&store, ino).expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, ".");
        assert_eq!(entries[0].inode_number, ino);
        assert_eq!(entries[1].name, "..");
        assert_eq!(entries[1].inode_number, ROOT_INODE);

        let inode = store.read_inode(ino).expect("read inode");
        assert!(inode.is_directory());
        assert_eq!(inode.link_count, 2);
        assert_eq!(inode.size, (2 * DIRENT_DISK_SIZE) as i64);

        // The parent lists it.
        let root_names: Vec<_> = read_entries(&store, ROOT_INODE)
            .expect("root")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(root_names.contains(&"docs".to_owned()));
    }

    #[test]
    fn duplicate_directory_is_rejected() {
        let (_tmp, store) = fresh_store();
        create_directory(&store, "/docs").expect("mkdir");
        assert!(matches!(
            create_directory(&store, "/docs"),
            Err(FsError::FileAlreadyExists(_))
        ));
    }

    #[test]
    fn missing_parent_is_reported() {
        let (_tmp, store) = fresh_store();
        let err = create_directory(&store, "/ghost/dir").expect_err("no parent");
        assert!(matches!(err, FsError::ParentNotFound(_)));
        assert!(err.to_string().contains("Parent directory not found"));
    }

    #[test]
    fn failed_create_leaks_nothing() {
        let (_tmp, store) = fresh_store();
        let free_inodes = store.free_inodes();
        let free_blocks = store.free_data_blocks_count();
        assert!(create_directory(&store, "/nope/dir").is_err());
        assert_eq!(store.free_inodes(), free_inodes);
        assert_eq!(store.free_data_blocks_count(), free_blocks);
    }

    #[test]
    fn nested_directories() {
        let (_tmp, store) = fresh_store();
        create_directory(&store, "/a").expect("a");
        create_directory(&store, "/a/b").expect("b");
        let b = path::find_inode(&store, "/a/b").expect("resolve");
        let entries = read_entries(&store, b).expect("read");
        assert_eq!(entries[1].name, "..");
        assert_eq!(
            entries[1].inode_number,
            path::find_inode(&store, "/a").expect("a ino")
        );
    }

    #[test]
    fn add_and_remove_entries() {
        let (_tmp, store) = fresh_store();
        let file_ino = store.allocate_inode().expect("file inode");
        add_entry(&store, ROOT_INODE, "a.txt", file_ino).expect("add");

        assert!(matches!(
            add_entry(&store, ROOT_INODE, "a.txt", file_ino),
            Err(FsError::FileAlreadyExists(_))
        ));

        remove_entry(&store, ROOT_INODE, "a.txt").expect("remove");
        assert!(matches!(
            remove_entry(&store, ROOT_INODE, "a.txt"),
            Err(FsError::FileNotFound(_))
        ));
    }

    #[test]
    fn directory_grows_past_one_block() {
        let (_tmp, store) = fresh_store();
        // 2 dot entries + 20 children > 15 entries/block.
        for i in 0..20 {
            let ino = store.allocate_inode().expect("inode");
            add_entry(&store, ROOT_INODE, &format!("file_{i:02}"), ino).expect("add");
        }
        let entries = read_entries(&store, ROOT_INODE).expect("read");
        assert_eq!(entries.len(), 22);
        assert!(store.get_data_blocks(ROOT_INODE).expect("blocks").len() >= 2);

        // Entries survive a shrink back below one block.
        for i in 0..20 {
            remove_entry(&store, ROOT_INODE, &format!("file_{i:02}")).expect("remove");
        }
        let names: Vec<_> = read_entries(&store, ROOT_INODE)
            .expect("read")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec![".", ".."]);
    }

    #[test]
    fn remove_directory_refuses_root_and_nonempty() {
        let (_tmp, store) = fresh_store();
        let err = remove_directory(&store, "/").expect_err("root");
        assert!(err.to_string().contains("Cannot remove root directory"));

        create_directory(&store, "/docs").expect("mkdir");
        let child = store.allocate_inode().expect("inode");
        let docs = path::find_inode(&store, "/docs").expect("docs");
        add_entry(&store, docs, "readme.txt", child).expect("add");

        let err = remove_directory(&store, "/docs").expect_err("non-empty");
        assert!(matches!(err, FsError::DirectoryNotEmpty(_)));

        remove_entry(&store, docs, "readme.txt").expect("clear");
        remove_directory(&store, "/docs").expect("rmdir");
        assert!(!path::file_exists(&store, "/docs"));
        assert!(!store.is_inode_allocated(docs));
    }

    #[test]
    fn read_entries_on_file_inode_fails() {
        let (_tmp, store) = fresh_store();
        let ino = store.allocate_inode().expect("inode");
        assert!(matches!(
            read_entries(&store, ino),
            Err(FsError::NotADirectory(_))
        ));
    }
}
