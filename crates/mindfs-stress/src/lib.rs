#![forbid(unsafe_code)]
//! Long-duration stress harness for mindfs.
//!
//! Drives write/read/verify loops against a mounted [`FileSystem`] from a
//! configurable number of worker threads, with a monitor thread emitting a
//! stable one-line metrics report every interval. The stdout envelope is a
//! contract: the run opens with `[Stress] Starting` and closes with
//! `[Stress] Test finished`.

pub mod monitor;

use mindfs_core::FileSystem;
use mindfs_error::{FsError, Result};
use mindfs_path as path;
use mindfs_types::{OPEN_READ, OPEN_WRITE, PERM_READ, PERM_WRITE};
use monitor::{CpuSampler, memory_summary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Backoff after a failed worker step.
const FAILURE_BACKOFF: Duration = Duration::from_millis(5);
/// Granularity of the main thread's duration wait and the stop polls.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stress run configuration. Every option is overridable from the
/// `stress` command's argument vector via [`StressConfig::parse_args`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    /// Total run time.
    pub duration: Duration,
    /// Number of target files.
    pub file_count: usize,
    /// Concurrent workers.
    pub thread_count: usize,
    /// Bytes per write.
    pub write_size: usize,
    /// Reporter cadence.
    pub monitor_interval: Duration,
    /// Root directory for the workload.
    pub workspace_path: String,
    /// Delete the workspace when the run ends.
    pub cleanup_after: bool,
    /// Sub-directory sharding; 0 means "default to thread count".
    pub bucket_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(12 * 60 * 60),
            file_count: 50,
            thread_count: 8,
            write_size: 4096,
            monitor_interval: Duration::from_secs(30),
            workspace_path: "/stress_suite".to_owned(),
            cleanup_after: false,
            bucket_count: 0,
        }
    }
}

impl StressConfig {
    /// Parse a `stress` argument vector
    /// (`--duration N --files N --threads N --write-size N --monitor N
    /// --workspace P --buckets N --cleanup`).
    pub fn parse_args(args: &[String]) -> Result<Self> {
        let mut config = Self::default();
        let mut iter = args.iter();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--cleanup" => config.cleanup_after = true,
                "--workspace" => {
                    let value = iter.next().ok_or_else(|| {
                        FsError::InvalidSyntax("--workspace requires a value".to_owned())
                    })?;
                    config.workspace_path = value.clone();
                }
                "--duration" => {
                    config.duration = Duration::from_secs(parse_positive(arg, iter.next())?);
                }
                "--files" => {
                    config.file_count = parse_positive(arg, iter.next())? as usize;
                }
                "--threads" => {
                    config.thread_count = parse_positive(arg, iter.next())? as usize;
                }
                "--write-size" => {
                    config.write_size = parse_positive(arg, iter.next())? as usize;
                }
                "--monitor" => {
                    config.monitor_interval =
                        Duration::from_secs(parse_positive(arg, iter.next())?);
                }
                "--buckets" => {
                    config.bucket_count = parse_positive(arg, iter.next())? as usize;
                }
                other => {
                    return Err(FsError::InvalidSyntax(format!(
                        "Unknown stress option: {other}"
                    )));
                }
            }
        }

        Ok(config)
    }

    /// Resolve defaults: absolutize and normalize the workspace path and
    /// clamp the bucket count into `1..=file_count`.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        if config.workspace_path.is_empty() {
            config.workspace_path = "/stress_suite".to_owned();
        }
        if !config.workspace_path.starts_with('/') {
            config.workspace_path = format!("/{}", config.workspace_path);
        }
        config.workspace_path = path::normalize_path(&config.workspace_path);

        if config.bucket_count == 0 {
            config.bucket_count = config.thread_count.max(1);
        }
        config.bucket_count = config.bucket_count.max(1).min(config.file_count.max(1));
        config
    }
}

fn parse_positive(option: &str, value: Option<&String>) -> Result<u64> {
    let value =
        value.ok_or_else(|| FsError::InvalidSyntax(format!("{option} requires a value")))?;
    match value.parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(FsError::InvalidSyntax(format!(
            "Invalid value for {option}: {value}"
        ))),
    }
}

/// Bucket directory for file `index`: the workspace itself when there is a
/// single bucket, otherwise `<workspace>/bucket_<bbb>`.
#[must_use]
pub fn bucket_path(config: &StressConfig, index: usize) -> String {
    if config.bucket_count <= 1 {
        return config.workspace_path.clone();
    }
    let bucket = index % config.bucket_count;
    if config.workspace_path.ends_with('/') {
        format!("{}bucket_{bucket:03}", config.workspace_path)
    } else {
        format!("{}/bucket_{bucket:03}", config.workspace_path)
    }
}

/// Target file path for `index`: `<bucket>/file_<iii>.dat`.
#[must_use]
pub fn file_path(config: &StressConfig, index: usize) -> String {
    let bucket = bucket_path(config, index);
    if bucket.ends_with('/') {
        format!("{bucket}file_{index:03}.dat")
    } else {
        format!("{bucket}/file_{index:03}.dat")
    }
}

/// Multi-worker write/read/verify loop with live metrics.
pub struct StressHarness {
    fs: Arc<FileSystem>,
}

impl StressHarness {
    #[must_use]
    pub fn new(fs: Arc<FileSystem>) -> Self {
        Self { fs }
    }

    /// Run the workload. Returns `true` iff no operation failed.
    pub fn run(&self, config: &StressConfig) -> bool {
        let config = Arc::new(config.normalized());

        if !self.fs.is_mounted() {
            eprintln!("{}", FsError::NotMounted);
            return false;
        }
        if config.file_count == 0 || config.thread_count == 0 || config.write_size == 0 {
            eprintln!(
                "{}",
                FsError::InvalidArgument("Invalid stress test configuration".to_owned())
            );
            return false;
        }

        if let Err(e) = self.prepare_workspace(&config) {
            eprintln!("{e}");
            return false;
        }

        println!(
            "[Stress] Starting stress test with {} files, {} threads, duration {} seconds",
            config.file_count,
            config.thread_count,
            config.duration.as_secs()
        );

        let stop = Arc::new(AtomicBool::new(false));
        let operations = Arc::new(AtomicU64::new(0));
        let errors = Arc::new(AtomicU64::new(0));
        let started = Instant::now();

        let mut workers = Vec::with_capacity(config.thread_count);
        for worker_id in 0..config.thread_count {
            let fs = Arc::clone(&self.fs);
            let config = Arc::clone(&config);
            let stop = Arc::clone(&stop);
            let operations = Arc::clone(&operations);
            let errors = Arc::clone(&errors);
            workers.push(thread::spawn(move || {
                worker_loop(&fs, worker_id, &config, &stop, &operations, &errors);
            }));
        }

        let monitor = {
            let config = Arc::clone(&config);
            let stop = Arc::clone(&stop);
            let operations = Arc::clone(&operations);
            let errors = Arc::clone(&errors);
            thread::spawn(move || {
                monitor_loop(&config, &stop, &operations, &errors, started);
            })
        };

        while started.elapsed() < config.duration {
            thread::sleep(POLL_INTERVAL.min(config.duration));
        }
        stop.store(true, Ordering::Relaxed);

        for worker in workers {
            let _ = worker.join();
        }
        let _ = monitor.join();

        let elapsed = started.elapsed().as_secs_f64();
        let total_ops = operations.load(Ordering::Relaxed);
        let total_errors = errors.load(Ordering::Relaxed);
        let avg_rate = if elapsed > 0.0 {
            total_ops as f64 / elapsed
        } else {
            0.0
        };

        let verdict = if total_errors == 0 {
            "successfully".to_owned()
        } else {
            format!("with {total_errors} errors")
        };
        println!(
            "[Stress] Test finished {verdict} | elapsed_s: {elapsed:.3} | ops_total: {total_ops} \
             | avg_ops_rate: {avg_rate:.3} ops/s | errors_total: {total_errors}"
        );

        if config.cleanup_after {
            self.cleanup_workspace(&config);
        }

        total_errors == 0
    }

    /// Ensure the workspace, bucket directories and target files exist.
    fn prepare_workspace(&self, config: &StressConfig) -> Result<()> {
        if !self.fs.file_exists(&config.workspace_path) {
            self.fs.create_directory(&config.workspace_path)?;
        }

        for index in 0..config.file_count {
            let bucket = bucket_path(config, index);
            if !self.fs.file_exists(&bucket) {
                self.fs.create_directory(&bucket)?;
            }

            let target = file_path(config, index);
            if !self.fs.file_exists(&target) {
                self.fs.create_file(&target, PERM_READ | PERM_WRITE)?;
            }
        }

        debug!(
            target: "mindfs::stress",
            event = "workspace_prepared",
            workspace = %config.workspace_path,
            files = config.file_count,
            buckets = config.bucket_count
        );
        Ok(())
    }

    /// Recursively delete the workspace.
    fn cleanup_workspace(&self, config: &StressConfig) {
        self.remove_tree(&config.workspace_path);
        let _ = self.fs.remove_directory(&config.workspace_path);
    }

    fn remove_tree(&self, dir: &str) {
        let Ok(entries) = self.fs.list_directory(dir) else {
            return;
        };
        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let child = if dir == "/" {
                format!("/{}", entry.name)
            } else {
                format!("{dir}/{}", entry.name)
            };
            if self.fs.is_directory(&child) {
                self.remove_tree(&child);
                let _ = self.fs.remove_directory(&child);
            } else {
                let _ = self.fs.delete_file(&child);
            }
        }
    }
}

/// One worker: stride the file set (`w, w+t, w+2t, …`), writing a fill
/// pattern, reading it back, and verifying, until told to stop.
fn worker_loop(
    fs: &FileSystem,
    worker_id: usize,
    config: &StressConfig,
    stop: &AtomicBool,
    operations: &AtomicU64,
    errors: &AtomicU64,
) {
    let mut write_buffer = vec![0u8; config.write_size];
    let mut read_buffer = vec![0u8; config.write_size];
    let mut iteration = 0usize;

    while !stop.load(Ordering::Relaxed) {
        // A worker whose stride starts past the file set has nothing to do.
        if worker_id >= config.file_count {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        let mut index = worker_id;
        while index < config.file_count && !stop.load(Ordering::Relaxed) {
            let target = file_path(config, index);
            index += config.thread_count;

            if !ensure_file_available(fs, &target) {
                record_failure(errors, &target, "unavailable");
                continue;
            }

            let fill = b'A' + ((worker_id + iteration) % 26) as u8;
            write_buffer.fill(fill);

            let written = match write_cycle(fs, &target, &write_buffer) {
                Ok(n) => n,
                Err(e) => {
                    record_failure(errors, &target, &e.to_string());
                    continue;
                }
            };
            operations.fetch_add(1, Ordering::Relaxed);

            match read_cycle(fs, &target, &mut read_buffer[..written]) {
                Ok(()) if read_buffer[..written] == write_buffer[..written] => {
                    operations.fetch_add(1, Ordering::Relaxed);
                }
                Ok(()) => record_failure(errors, &target, "verification mismatch"),
                Err(e) => record_failure(errors, &target, &e.to_string()),
            }
        }
        iteration += 1;
    }
}

fn write_cycle(fs: &FileSystem, target: &str, buffer: &[u8]) -> Result<usize> {
    let fd = fs.open_file(target, OPEN_WRITE)?;
    let result = fs
        .seek_file(fd, 0)
        .and_then(|()| fs.write_file(fd, buffer));
    let _ = fs.close_file(fd);
    result
}

fn read_cycle(fs: &FileSystem, target: &str, buffer: &mut [u8]) -> Result<()> {
    let fd = fs.open_file(target, OPEN_READ)?;
    let result = fs.read_file(fd, buffer);
    let _ = fs.close_file(fd);
    match result {
        Ok(n) if n == buffer.len() => Ok(()),
        Ok(n) => Err(FsError::InvalidArgument(format!(
            "short read: {n} of {} bytes",
            buffer.len()
        ))),
        Err(e) => Err(e),
    }
}

fn record_failure(errors: &AtomicU64, target: &str, reason: &str) {
    errors.fetch_add(1, Ordering::Relaxed);
    warn!(
        target: "mindfs::stress",
        event = "worker_failure",
        file = target,
        reason
    );
    thread::sleep(FAILURE_BACKOFF);
}

/// Recreate the target if it vanished mid-run; brief backoff on failure.
fn ensure_file_available(fs: &FileSystem, target: &str) -> bool {
    let parent = path::parent_path(target);
    if !parent.is_empty() && parent != target && !fs.file_exists(&parent) {
        let _ = fs.create_directory(&parent);
    }

    if fs.file_exists(target) {
        return true;
    }
    if fs.create_file(target, PERM_READ | PERM_WRITE).is_ok() {
        return true;
    }
    thread::sleep(FAILURE_BACKOFF);
    fs.file_exists(target)
}

/// Reporter: every interval, one stable metrics line with rates, error
/// counts, configuration echo and best-effort host CPU/memory.
fn monitor_loop(
    config: &StressConfig,
    stop: &AtomicBool,
    operations: &AtomicU64,
    errors: &AtomicU64,
    started: Instant,
) {
    let mut cpu = CpuSampler::new();
    cpu.sample(); // Baseline.

    let mut last_tick = started;
    let mut last_ops = 0u64;
    let mut last_errors = 0u64;

    loop {
        let should_stop = sleep_until_stop(config.monitor_interval, stop);

        let now = Instant::now();
        let ops = operations.load(Ordering::Relaxed);
        let errs = errors.load(Ordering::Relaxed);
        let ops_delta = ops - last_ops;
        let errors_delta = errs - last_errors;

        let elapsed_total = now.duration_since(started).as_secs_f64();
        let elapsed_window = now.duration_since(last_tick).as_secs_f64();
        let inst_rate = if elapsed_window > 0.0 {
            ops_delta as f64 / elapsed_window
        } else {
            0.0
        };
        let avg_rate = if elapsed_total > 0.0 {
            ops as f64 / elapsed_total
        } else {
            0.0
        };

        println!(
            "[Stress] Metrics | elapsed_s: {elapsed_total:.3} | ops_total: {ops} \
             | ops_delta: {ops_delta} | inst_ops_rate: {inst_rate:.3} ops/s \
             | avg_ops_rate: {avg_rate:.3} ops/s | errors_total: {errs} \
             | errors_delta: {errors_delta} | cfg_threads: {} | cfg_files: {} \
             | write_size_bytes: {} | cpu: {:.2}% | {}",
            config.thread_count,
            config.file_count,
            config.write_size,
            cpu.sample(),
            memory_summary()
        );

        last_tick = now;
        last_ops = ops;
        last_errors = errs;

        if should_stop {
            break;
        }
    }
}

/// Sleep for up to `interval`, waking early when `stop` is set. Returns
/// whether the stop flag was observed.
fn sleep_until_stop(interval: Duration, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    while Instant::now() < deadline {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        thread::sleep(POLL_INTERVAL.min(interval));
    }
    stop.load(Ordering::Relaxed)
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mindfs_block::DiskImage;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn defaults_match_contract() {
        let config = StressConfig::default();
        assert_eq!(config.duration, Duration::from_secs(43200));
        assert_eq!(config.file_count, 50);
        assert_eq!(config.thread_count, 8);
        assert_eq!(config.write_size, 4096);
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
        assert_eq!(config.workspace_path, "/stress_suite");
        assert!(!config.cleanup_after);
    }

    #[test]
    fn parse_args_full_set() {
        let config = StressConfig::parse_args(&args(&[
            "--duration",
            "2",
            "--files",
            "8",
            "--threads",
            "2",
            "--write-size",
            "512",
            "--monitor",
            "1",
            "--workspace",
            "/stress_ts",
            "--buckets",
            "4",
            "--cleanup",
        ]))
        .expect("parse");

        assert_eq!(config.duration, Duration::from_secs(2));
        assert_eq!(config.file_count, 8);
        assert_eq!(config.thread_count, 2);
        assert_eq!(config.write_size, 512);
        assert_eq!(config.monitor_interval, Duration::from_secs(1));
        assert_eq!(config.workspace_path, "/stress_ts");
        assert_eq!(config.bucket_count, 4);
        assert!(config.cleanup_after);
    }

    #[test]
    fn parse_args_rejects_bad_input() {
        assert!(StressConfig::parse_args(&args(&["--frobnicate"])).is_err());
        assert!(StressConfig::parse_args(&args(&["--duration"])).is_err());
        assert!(StressConfig::parse_args(&args(&["--files", "0"])).is_err());
        assert!(StressConfig::parse_args(&args(&["--threads", "abc"])).is_err());
    }

    #[test]
    fn normalization_fills_derived_fields() {
        let mut config = StressConfig {
            workspace_path: "suite".to_owned(),
            thread_count: 6,
            file_count: 4,
            bucket_count: 0,
            ..StressConfig::default()
        };
        config = config.normalized();
        assert_eq!(config.workspace_path, "/suite");
        // Defaulted to thread count, clamped to file count.
        assert_eq!(config.bucket_count, 4);
    }

    #[test]
    fn bucket_and_file_paths_are_sharded() {
        let config = StressConfig {
            workspace_path: "/ws".to_owned(),
            bucket_count: 3,
            ..StressConfig::default()
        }
        .normalized();

        assert_eq!(bucket_path(&config, 0), "/ws/bucket_000");
        assert_eq!(bucket_path(&config, 4), "/ws/bucket_001");
        assert_eq!(file_path(&config, 4), "/ws/bucket_001/file_004.dat");
        assert_eq!(file_path(&config, 12), "/ws/bucket_000/file_012.dat");

        let flat = StressConfig {
            workspace_path: "/ws".to_owned(),
            bucket_count: 1,
            ..StressConfig::default()
        }
        .normalized();
        assert_eq!(file_path(&flat, 7), "/ws/file_007.dat");
    }

    #[test]
    fn run_requires_mounted_filesystem() {
        let harness = StressHarness::new(Arc::new(FileSystem::new()));
        let config = StressConfig {
            duration: Duration::from_secs(1),
            ..StressConfig::default()
        };
        assert!(!harness.run(&config));
    }

    #[test]
    fn short_run_verifies_and_cleans_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let img = dir.path().join("stress.img");
        DiskImage::create(&img, 10).expect("create");
        let disk = DiskImage::open(&img).expect("open");
        disk.format().expect("format");
        disk.close().expect("close");

        let fs = Arc::new(FileSystem::new());
        fs.mount(&img).expect("mount");

        let config = StressConfig {
            duration: Duration::from_secs(1),
            file_count: 4,
            thread_count: 2,
            write_size: 256,
            monitor_interval: Duration::from_secs(1),
            workspace_path: "/stress_ts".to_owned(),
            cleanup_after: true,
            bucket_count: 0,
        };

        let harness = StressHarness::new(Arc::clone(&fs));
        assert!(harness.run(&config), "stress run reported errors");

        // Cleanup removed the workspace.
        assert!(!fs.file_exists("/stress_ts"));
        let names: Vec<_> = fs
            .list_directory("/")
            .expect("ls")
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert!(!names.contains(&"stress_ts".to_owned()));
        fs.unmount().expect("unmount");
    }
}
