#![forbid(unsafe_code)]
//! Task dispatch for mindfs.
//!
//! [`TaskDispatcher`] classifies a command line by its first token —
//! `ls`, `cat` and `info` are **shared**, everything else **exclusive** —
//! and runs it through the façade on a worker pool, holding the matching
//! side of the dispatcher's own reader-writer lock around the call. The
//! façade locks again internally; the dispatcher lock only serializes
//! dispatcher-level ordering when batches of commands arrive together.

pub mod commands;
pub mod pool;

use mindfs_core::FileSystem;
use mindfs_error::{FsError, Result};
use parking_lot::RwLock;
use pool::WorkerPool;
use std::sync::Arc;
use std::sync::mpsc;
use tracing::trace;

/// How a command interacts with the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Read-only commands that may overlap.
    Shared,
    /// Mutating commands that must run alone.
    Exclusive,
}

/// Commands that only observe filesystem state.
const SHARED_COMMANDS: [&str; 3] = ["ls", "cat", "info"];

/// Classify a command line by its first whitespace-delimited token.
/// Unparseable lines are treated as exclusive.
#[must_use]
pub fn classify(command_line: &str) -> DispatchMode {
    match command_line.split_whitespace().next() {
        Some(token) if SHARED_COMMANDS.contains(&token) => DispatchMode::Shared,
        _ => DispatchMode::Exclusive,
    }
}

/// Pending result of an asynchronously dispatched command.
pub struct TaskReceipt {
    rx: mpsc::Receiver<i32>,
}

impl TaskReceipt {
    /// Block until the command finishes and yield its exit code.
    pub fn wait(self) -> Result<i32> {
        self.rx.recv().map_err(|_| FsError::PoolStopped)
    }
}

/// Routes command lines to the façade through a worker pool.
pub struct TaskDispatcher {
    fs: Arc<FileSystem>,
    pool: WorkerPool,
    gate: Arc<RwLock<()>>,
}

impl TaskDispatcher {
    /// Build a dispatcher over `fs` with `threads` pool workers
    /// (0 = one per CPU).
    #[must_use]
    pub fn new(fs: Arc<FileSystem>, threads: usize) -> Self {
        Self {
            fs,
            pool: WorkerPool::new(threads),
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Queue a command for execution; the receipt resolves to its exit
    /// code.
    pub fn execute_async(&self, command_line: &str) -> Result<TaskReceipt> {
        let mode = classify(command_line);
        let fs = Arc::clone(&self.fs);
        let gate = Arc::clone(&self.gate);
        let line = command_line.to_owned();
        let (tx, rx) = mpsc::channel();

        trace!(
            target: "mindfs::dispatch",
            event = "dispatch",
            command = %line,
            mode = ?mode
        );
        self.pool.execute(move || {
            let code = run_gated(&fs, &gate, mode, &line);
            let _ = tx.send(code);
        })?;

        Ok(TaskReceipt { rx })
    }

    /// Run a command on the calling thread under the same classification.
    #[must_use]
    pub fn execute_sync(&self, command_line: &str) -> i32 {
        let mode = classify(command_line);
        run_gated(&self.fs, &self.gate, mode, command_line)
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }
}

fn run_gated(fs: &Arc<FileSystem>, gate: &RwLock<()>, mode: DispatchMode, line: &str) -> i32 {
    match mode {
        DispatchMode::Shared => {
            let _shared = gate.read();
            commands::run_command_line(fs, line)
        }
        DispatchMode::Exclusive => {
            let _exclusive = gate.write();
            commands::run_command_line(fs, line)
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
