use crate::error::{AppError, AppResult};

use super::types::MemoryUsage;

use serde::Deserialize;
use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Tick resolution of the histogram delay probe.
pub const DELAY_RESOLUTION: Duration = Duration::from_millis(10);

// ==================================================
// Memory
// ==================================================

/// Reads current process memory counters. No smoothing, no history.
pub trait MemoryProbe: Send + Sync + 'static {
    fn sample(&self) -> AppResult<MemoryUsage>;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> AppResult<MemoryUsage> + Send + Sync + 'static,
{
    fn sample(&self) -> AppResult<MemoryUsage> {
        self()
    }
}

/// Linux implementation via /proc:
/// - RSS bytes:  /proc/self/status (VmRSS)
/// - heap bytes: /proc/self/status (VmData, private data + heap mappings)
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMemoryProbe;

impl MemoryProbe for ProcMemoryProbe {
    fn sample(&self) -> AppResult<MemoryUsage> {
        #[cfg(target_os = "linux")]
        {
            let s = fs::read_to_string("/proc/self/status")?;
            Ok(MemoryUsage {
                heap_used_bytes: read_status_kb(&s, "VmData:")?.saturating_mul(1024),
                rss_bytes: read_status_kb(&s, "VmRSS:")?.saturating_mul(1024),
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(AppError::Disabled(
                "memory probe is only implemented for linux (/proc)".into(),
            ))
        }
    }
}

fn read_status_kb(status: &str, key: &'static str) -> AppResult<u64> {
    // "VmRSS:    123456 kB"
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix(key) {
            return parse_first_u64(rest);
        }
    }
    Err(AppError::Internal(format!(
        "failed to read {key} from /proc/self/status"
    )))
}

fn parse_first_u64(s: &str) -> AppResult<u64> {
    let num = s
        .split_whitespace()
        .next()
        .ok_or_else(|| AppError::Internal("failed to parse numeric value from /proc".into()))?;
    num.parse::<u64>()
        .map_err(|_| AppError::Internal("failed to parse u64 from /proc".into()))
}

// ==================================================
// Scheduler delay
// ==================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelayMode {
    /// Dedicated probe task records tick gaps at `DELAY_RESOLUTION`.
    #[default]
    Histogram,
    /// Delay is how late the sampling tick itself fired.
    Polling,
}

/// Produces one delay estimate (ms) per sampling tick.
pub trait DelaySampler: Send {
    fn sample(&mut self) -> f64;
}

#[derive(Debug, Default)]
struct DelayWindow {
    sum_ns: u128,
    count: u64,
}

impl DelayWindow {
    fn record(&mut self, gap: Duration) {
        self.sum_ns = self.sum_ns.saturating_add(gap.as_nanos());
        self.count = self.count.saturating_add(1);
    }

    /// Mean gap in ms; NaN for an empty window.
    fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        (self.sum_ns as f64 / self.count as f64) / 1e6
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Histogram mode: a probe task sleeps for `resolution` in a loop and records
/// how long each sleep actually took. A busy scheduler stretches those gaps.
#[derive(Debug)]
pub struct HistogramDelaySampler {
    resolution: Duration,
    window: Arc<Mutex<DelayWindow>>,
}

impl HistogramDelaySampler {
    /// Spawns the probe task. It stops when `shutdown` is cancelled.
    pub fn start(resolution: Duration, shutdown: CancellationToken) -> (Self, JoinHandle<()>) {
        let window = Arc::new(Mutex::new(DelayWindow::default()));
        let probe_window = window.clone();

        let jh = tokio::spawn(async move {
            loop {
                let started = Instant::now();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(resolution) => {}
                }
                if let Ok(mut w) = probe_window.lock() {
                    w.record(started.elapsed());
                }
            }
            tracing::debug!(component = "delay_probe", "delay probe stopped");
        });

        (Self { resolution, window }, jh)
    }
}

impl DelaySampler for HistogramDelaySampler {
    fn sample(&mut self) -> f64 {
        let mean = match self.window.lock() {
            Ok(mut w) => {
                let m = w.mean_ms();
                w.reset();
                m
            }
            Err(_) => f64::NAN,
        };

        // An empty window must read as "definitely over", not as 0.
        if mean.is_nan() {
            return f64::INFINITY;
        }

        let resolution_ms = self.resolution.as_secs_f64() * 1e3;
        (mean - resolution_ms).max(0.0)
    }
}

/// Polling mode: delay = actual gap since the previous tick - configured interval.
#[derive(Debug)]
pub struct PollingDelaySampler {
    interval: Duration,
    last: Instant,
}

impl PollingDelaySampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }
}

impl DelaySampler for PollingDelaySampler {
    fn sample(&mut self) -> f64 {
        let now = Instant::now();
        let gap = now.saturating_duration_since(self.last);
        self.last = now;
        gap.saturating_sub(self.interval).as_secs_f64() * 1e3
    }
}

// ==================================================
// Utilization
// ==================================================

/// Fraction (0..=1) of time the scheduler was busy since the previous sample.
/// `None` means the capability is missing and the check stays disabled.
pub trait UtilizationSampler: Send {
    fn sample(&mut self) -> Option<f64>;
}

#[derive(Debug, Default)]
pub struct UtilizationUnavailable;

impl<F> UtilizationSampler for F
where
    F: FnMut() -> Option<f64> + Send,
{
    fn sample(&mut self) -> Option<f64> {
        self()
    }
}

impl UtilizationSampler for UtilizationUnavailable {
    fn sample(&mut self) -> Option<f64> {
        None
    }
}

/// Picks the best utilization source this build/platform offers.
pub fn select_utilization_sampler() -> Box<dyn UtilizationSampler> {
    #[cfg(tokio_unstable)]
    {
        if let Some(s) = TokioBusyUtilization::new() {
            return Box::new(s);
        }
    }

    #[cfg(target_os = "linux")]
    {
        match ProcCpuUtilization::new() {
            Ok(s) => return Box::new(s),
            Err(e) => {
                tracing::warn!(
                    component = "sampler",
                    error = %e,
                    "cpu utilization unavailable; utilization checks disabled"
                );
            }
        }
    }

    Box::new(UtilizationUnavailable)
}

#[cfg(target_os = "linux")]
fn runtime_workers() -> usize {
    tokio::runtime::Handle::try_current()
        .map(|h| h.metrics().num_workers())
        .unwrap_or(1)
        .max(1)
}

/// Busy time reported by the tokio workers themselves.
#[cfg(tokio_unstable)]
#[derive(Debug)]
pub struct TokioBusyUtilization {
    handle: tokio::runtime::Handle,
    mark_at: Instant,
    mark_busy: Duration,
}

#[cfg(tokio_unstable)]
impl TokioBusyUtilization {
    pub fn new() -> Option<Self> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let mark_busy = total_busy(&handle);
        Some(Self {
            handle,
            mark_at: Instant::now(),
            mark_busy,
        })
    }
}

#[cfg(tokio_unstable)]
fn total_busy(handle: &tokio::runtime::Handle) -> Duration {
    let m = handle.metrics();
    (0..m.num_workers())
        .map(|i| m.worker_total_busy_duration(i))
        .sum()
}

#[cfg(tokio_unstable)]
impl UtilizationSampler for TokioBusyUtilization {
    fn sample(&mut self) -> Option<f64> {
        let now = Instant::now();
        let busy = total_busy(&self.handle);
        let elapsed = now.saturating_duration_since(self.mark_at);
        if elapsed.is_zero() {
            return Some(0.0);
        }

        let workers = self.handle.metrics().num_workers().max(1) as f64;
        let used = busy.saturating_sub(self.mark_busy).as_secs_f64();

        self.mark_at = now;
        self.mark_busy = busy;

        Some((used / (elapsed.as_secs_f64() * workers)).clamp(0.0, 1.0))
    }
}

/// Process CPU share from /proc/stat and /proc/self/stat deltas, scaled to the
/// number of runtime workers.
///
/// Notes:
/// - uses deltas between marks, so the first mark is taken at construction
/// - the mark only moves once the kernel has accounted new jiffies
/// - a failed read repeats the previous value
#[derive(Debug)]
pub struct ProcCpuUtilization {
    cpus: u64,
    workers: u64,
    mark: CpuMark,
    last: f64,
}

#[derive(Debug, Clone, Copy)]
struct CpuMark {
    // total CPU time across all CPUs (jiffies)
    total_jiffies: u64,
    // process CPU time (utime+stime) (jiffies)
    proc_jiffies: u64,
}

impl ProcCpuUtilization {
    pub fn new() -> AppResult<Self> {
        #[cfg(target_os = "linux")]
        {
            let mark = read_cpu_mark_linux()?;
            Ok(Self {
                cpus: read_cpu_count_linux()?.max(1),
                workers: runtime_workers() as u64,
                mark,
                last: 0.0,
            })
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(AppError::Disabled(
                "cpu utilization is only implemented for linux (/proc)".into(),
            ))
        }
    }

    fn utilization_since(&self, cur: CpuMark) -> Option<f64> {
        let d_total = cur.total_jiffies.saturating_sub(self.mark.total_jiffies);
        if d_total == 0 {
            return None;
        }
        let d_proc = cur.proc_jiffies.saturating_sub(self.mark.proc_jiffies);

        // d_total / cpus = wall-clock jiffies elapsed
        let busy = (d_proc as f64 * self.cpus as f64) / (d_total as f64 * self.workers as f64);
        Some(busy.clamp(0.0, 1.0))
    }
}

impl UtilizationSampler for ProcCpuUtilization {
    fn sample(&mut self) -> Option<f64> {
        let cur = match read_cpu_mark_linux() {
            Ok(m) => m,
            Err(_) => return Some(self.last),
        };

        if let Some(u) = self.utilization_since(cur) {
            self.mark = cur;
            self.last = u;
        }
        Some(self.last)
    }
}

fn read_cpu_mark_linux() -> AppResult<CpuMark> {
    let stat = fs::read_to_string("/proc/stat")?;
    let self_stat = fs::read_to_string("/proc/self/stat")?;
    Ok(CpuMark {
        total_jiffies: parse_total_cpu_jiffies(&stat)?,
        proc_jiffies: parse_process_cpu_jiffies(&self_stat)?,
    })
}

fn read_cpu_count_linux() -> AppResult<u64> {
    let stat = fs::read_to_string("/proc/stat")?;
    Ok(parse_cpu_count(&stat))
}

fn parse_cpu_count(stat: &str) -> u64 {
    // per-cpu lines: "cpu0 ...", "cpu1 ..."
    stat.lines()
        .filter(|l| {
            l.strip_prefix("cpu")
                .and_then(|rest| rest.chars().next())
                .is_some_and(|c| c.is_ascii_digit())
        })
        .count() as u64
}

fn parse_total_cpu_jiffies(stat: &str) -> AppResult<u64> {
    // first line: "cpu  3357 0 4313 1362393 ..."
    let line = stat
        .lines()
        .next()
        .ok_or_else(|| AppError::Internal("failed to read /proc/stat cpu line".into()))?;

    let mut it = line.split_whitespace();
    if it.next() != Some("cpu") {
        return Err(AppError::Internal(
            "unexpected /proc/stat format (missing 'cpu')".into(),
        ));
    }

    let mut sum: u64 = 0;
    for field in it {
        match field.parse::<u64>() {
            Ok(v) => sum = sum.saturating_add(v),
            Err(_) => break,
        }
    }
    Ok(sum)
}

fn parse_process_cpu_jiffies(self_stat: &str) -> AppResult<u64> {
    // Fields 14=utime, 15=stime (1-indexed). comm (field 2) is in parentheses and
    // may contain spaces, so split after the last ')'.
    let end = self_stat
        .rfind(')')
        .ok_or_else(|| AppError::Internal("unexpected /proc/self/stat format".into()))?;

    let fields: Vec<&str> = self_stat[end + 1..].split_whitespace().collect();

    // After ')' the first field is state (field 3), so utime is index 11, stime 12.
    if fields.len() <= 12 {
        return Err(AppError::Internal(
            "unexpected /proc/self/stat field count".into(),
        ));
    }

    let utime: u64 = fields[11]
        .parse()
        .map_err(|_| AppError::Internal("failed to parse utime from /proc/self/stat".into()))?;
    let stime: u64 = fields[12]
        .parse()
        .map_err(|_| AppError::Internal("failed to parse stime from /proc/self/stat".into()))?;

    Ok(utime.saturating_add(stime))
}
