//! Best-effort host metrics from `/proc`.
//!
//! CPU usage comes from deltas of the aggregate line in `/proc/stat`;
//! memory totals from `/proc/meminfo`. Hosts without a `/proc` report
//! zero CPU and an "unavailable" memory summary rather than failing.

use std::fmt;
use std::fs;

/// Stateful CPU sampler; each call reports utilization over the window
/// since the previous call. The first call establishes the baseline.
#[derive(Debug, Default)]
pub struct CpuSampler {
    prev_idle: u64,
    prev_total: u64,
}

impl CpuSampler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host CPU percent since the last sample, 0.0 when unavailable.
    pub fn sample(&mut self) -> f64 {
        let Some((idle, total)) = read_proc_stat() else {
            return 0.0;
        };

        let delta_idle = idle.saturating_sub(self.prev_idle);
        let delta_total = total.saturating_sub(self.prev_total);
        self.prev_idle = idle;
        self.prev_total = total;

        if delta_total == 0 {
            return 0.0;
        }
        100.0 * delta_total.saturating_sub(delta_idle) as f64 / delta_total as f64
    }
}

fn read_proc_stat() -> Option<(u64, u64)> {
    let text = fs::read_to_string("/proc/stat").ok()?;
    let line = text.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }

    let values: Vec<u64> = fields.filter_map(|f| f.parse().ok()).collect();
    if values.len() < 8 {
        return None;
    }
    // user nice system idle iowait irq softirq steal
    let idle = values[3] + values[4];
    let total: u64 = values[..8].iter().sum();
    Some((idle, total))
}

/// Host memory totals in megabytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryStats {
    pub total_mb: f64,
    pub used_mb: f64,
    pub free_mb: f64,
    pub available_mb: f64,
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Memory(MB): total={:.3}, used={:.3}, free={:.3}, available={:.3}",
            self.total_mb, self.used_mb, self.free_mb, self.available_mb
        )
    }
}

/// Read `/proc/meminfo`; `None` when unavailable or incomplete.
#[must_use]
pub fn read_memory_info() -> Option<MemoryStats> {
    let text = fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo(&text)
}

fn parse_meminfo(text: &str) -> Option<MemoryStats> {
    let mut total_kb = 0.0f64;
    let mut free_kb = 0.0f64;
    let mut available_kb = 0.0f64;

    for line in text.lines() {
        let mut fields = line.split_whitespace();
        let key = fields.next()?;
        let value: f64 = fields.next().and_then(|v| v.parse().ok()).unwrap_or(0.0);
        match key {
            "MemTotal:" => total_kb = value,
            "MemFree:" => free_kb = value,
            "MemAvailable:" => available_kb = value,
            _ => {}
        }
        if total_kb > 0.0 && free_kb > 0.0 && available_kb > 0.0 {
            break;
        }
    }

    if total_kb <= 0.0 {
        return None;
    }
    let total_mb = total_kb / 1024.0;
    let free_mb = free_kb / 1024.0;
    let available_mb = available_kb / 1024.0;
    Some(MemoryStats {
        total_mb,
        used_mb: (total_mb - available_mb).max(0.0),
        free_mb,
        available_mb,
    })
}

/// Render memory totals for the metrics line, degrading gracefully.
#[must_use]
pub fn memory_summary() -> String {
    read_memory_info().map_or_else(|| "Memory(MB): unavailable".to_owned(), |m| m.to_string())
}
