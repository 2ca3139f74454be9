#![forbid(unsafe_code)]
//! Path handling for mindfs.
//!
//! Pure string operations (normalize, validate, split) plus stateful
//! resolution that descends from the root inode through directory data
//! blocks. `.` and `..` are not interpreted here; they are ordinary
//! directory entries and traversal follows whatever the on-image entry
//! says.

use mindfs_error::{FsError, Result};
use mindfs_inode::InodeStore;
use mindfs_types::{DIRENT_DISK_SIZE, DIRENTS_PER_BLOCK, DirEntry, MAX_PATH_LEN, ROOT_INODE};
use tracing::trace;

// ── Pure string operations ──────────────────────────────────────────────────

/// Normalize a path: fold `\` to `/`, collapse runs of `/`, and strip the
/// trailing `/` everywhere except at the root.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    let mut normalized = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if !prev_slash {
                normalized.push('/');
            }
            prev_slash = true;
        } else {
            normalized.push(ch);
            prev_slash = false;
        }
    }

    if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

/// Reject empty paths, paths longer than [`MAX_PATH_LEN`] bytes, and paths
/// containing NUL, CR or LF.
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || path.len() > MAX_PATH_LEN {
        return Err(FsError::InvalidPath(path.to_owned()));
    }
    if path.bytes().any(|b| b == 0 || b == b'\n' || b == b'\r') {
        return Err(FsError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

fn absolutize(path: &str) -> String {
    if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Parent directory of `path`. The parent of `/` (and of the empty path)
/// is `/` itself.
#[must_use]
pub fn parent_path(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_owned();
    }
    let p = absolutize(path);
    match p.rfind('/') {
        Some(0) | None => "/".to_owned(),
        Some(pos) => p[..pos].to_owned(),
    }
}

/// Final component of `path`; empty for the root.
#[must_use]
pub fn basename(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return String::new();
    }
    let p = absolutize(path);
    match p.rfind('/') {
        Some(pos) => p[pos + 1..].to_owned(),
        None => p,
    }
}

/// Split a path into its non-empty components. Relative paths are
/// interpreted as relative to the root.
pub fn parse_components(path: &str) -> Result<Vec<String>> {
    validate_path(path)?;
    Ok(absolutize(path)
        .split('/')
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect())
}

/// Split `path` into `(filename, parent_directory)` for creation sites.
///
/// A bare filename maps to the root directory as its parent.
pub fn split_for_create(path: &str) -> Result<(String, String)> {
    validate_path(path)?;

    let (filename, directory) = match path.rfind('/') {
        None => (path.to_owned(), "/".to_owned()),
        Some(0) => (path[1..].to_owned(), "/".to_owned()),
        Some(pos) => (path[pos + 1..].to_owned(), path[..pos].to_owned()),
    };

    let directory = if directory.is_empty() || directory == "." {
        "/".to_owned()
    } else {
        directory
    };
    Ok((filename, directory))
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Look up `name` among the entries of directory `parent_ino`.
///
/// Name comparison is byte-exact. Returns `FileNotFound` on a miss and
/// `NotADirectory` if `parent_ino` is not a directory.
pub fn find_in_directory(store: &InodeStore, parent_ino: i32, name: &str) -> Result<i32> {
    let inode = store.read_inode(parent_ino)?;
    if !inode.is_directory() {
        return Err(FsError::NotADirectory(format!("inode {parent_ino}")));
    }

    for block in store.get_data_blocks(parent_ino)? {
        let data = store.disk().read_block(i64::from(block))?;
        for slot in 0..DIRENTS_PER_BLOCK {
            let offset = slot * DIRENT_DISK_SIZE;
            if let Some(entry) = DirEntry::decode(&data[offset..offset + DIRENT_DISK_SIZE])?
                && entry.name == name
            {
                return Ok(entry.inode_number);
            }
        }
    }

    trace!(
        target: "mindfs::path",
        event = "lookup_miss",
        parent_ino,
        name
    );
    Err(FsError::FileNotFound(name.to_owned()))
}

/// Resolve `path` to an inode number by descending from the root.
pub fn find_inode(store: &InodeStore, path: &str) -> Result<i32> {
    if path == "/" {
        return Ok(ROOT_INODE);
    }

    let components = parse_components(path)?;
    let mut current = ROOT_INODE;
    for component in &components {
        current = find_in_directory(store, current, component)
            .map_err(|e| match e {
                // Report the full path, not the failing component.
                FsError::FileNotFound(_) => FsError::FileNotFound(path.to_owned()),
                other => other,
            })?;
    }
    Ok(current)
}

/// Whether `path` resolves to an inode.
#[must_use]
pub fn file_exists(store: &InodeStore, path: &str) -> bool {
    find_inode(store, path).is_ok()
}

// ── Tests ───────────────────────────────────────────────────────────────────
