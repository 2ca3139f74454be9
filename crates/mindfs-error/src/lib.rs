#![forbid(unsafe_code)]
//! Error types for mindfs.
//!
//! Defines `FsError` and a `Result<T>` alias used throughout the workspace.
//! The display strings of the path-level variants are a stable contract:
//! test suites grep stderr for substrings such as `File not found` and
//! `Directory not empty`.

use thiserror::Error;

/// Unified error type for all mindfs operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Disk image not found: {0}")]
    DiskNotFound(String),

    #[error("Disk image already exists: {0}")]
    DiskAlreadyExists(String),

    #[error("Invalid block number: {block} (total {total})")]
    InvalidBlock { block: i64, total: u32 },

    #[error("No free data blocks")]
    NoFreeBlocks,

    #[error("No free inodes")]
    NoFreeInodes,

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Parent directory not found: {0}")]
    ParentNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Disk full: {0}")]
    DiskFull(String),

    #[error("Invalid inode number: {0}")]
    InvalidInode(i32),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Is a directory: {0}")]
    IsADirectory(String),

    #[error("Invalid file descriptor: {0}")]
    InvalidFileDescriptor(i32),

    #[error("File not open: fd={0}")]
    FileNotOpen(i32),

    #[error("A disk image is already open")]
    FileAlreadyOpen,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    #[error("Mount failed: {0}")]
    MountFailed(String),

    #[error("Unmount failed: {0}")]
    UnmountFailed(String),

    #[error("Format failed: {0}")]
    FormatFailed(String),

    #[error("File system already mounted")]
    AlreadyMounted,

    #[error("File system not mounted")]
    NotMounted,

    #[error("Task pool stopped")]
    PoolStopped,
}

impl FsError {
    /// Process exit code for this error.
    ///
    /// The CLI contract is binary: 0 on success, 1 on any failure.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Whether the error denotes a missing path component.
    ///
    /// Used by callers that probe for existence and want to distinguish
    /// "absent" from a real fault.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::FileNotFound(_) | Self::ParentNotFound(_) | Self::DiskNotFound(_)
        )
    }
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
