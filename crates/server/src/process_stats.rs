//! Process CPU/RSS snapshot, grounded on `amqpprox_cpumonitor.{h,cpp}`.
//!
//! The original samples `getrusage`/`boost::timer::cpu_timer` on a fixed
//! interval and reports CPU time as a ratio of user/system time elapsed
//! since the previous sample against the wall-clock time elapsed over the
//! same span. This reads the same counters the kernel already tracks per
//! process on Linux (`/proc/self/stat`, `/proc/self/status`) instead of
//! calling `getrusage`, keeping the same ratio-of-wall-time shape and the
//! "need two samples before the ratio means anything" rule.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ProcessStats {
    pub cpu_user_ratio: f64,
    pub cpu_system_ratio: f64,
    pub max_rss_kb: u64,
}

struct Sample {
    at: Instant,
    utime_ticks: u64,
    stime_ticks: u64,
}

/// Samples process CPU/RSS counters on demand and keeps the last-computed
/// ratios around for [`current`](ProcessMonitor::current) to return
/// between samples.
pub struct ProcessMonitor {
    last: Mutex<Option<Sample>>,
    samples: AtomicU64,
    current: Mutex<ProcessStats>,
}

impl Default for ProcessMonitor {
    fn default() -> Self {
        ProcessMonitor {
            last: Mutex::new(None),
            samples: AtomicU64::new(0),
            current: Mutex::new(ProcessStats::default()),
        }
    }
}

impl ProcessMonitor {
    pub fn new() -> Self {
        ProcessMonitor::default()
    }

    /// Take a fresh sample. The first call only establishes a baseline;
    /// ratios stay zero until a second call gives it a wall-clock span to
    /// divide against, matching `CpuMonitor::valid()`'s "d_samples > 1".
    pub fn sample(&self) {
        let (utime_ticks, stime_ticks) = read_cpu_ticks();
        let max_rss_kb = read_max_rss_kb();
        let now = Instant::now();

        let mut last = self.last.lock().unwrap();
        self.samples.fetch_add(1, Ordering::Relaxed);
        if let Some(prev) = last.as_ref() {
            let wall = now.duration_since(prev.at).as_secs_f64();
            if wall > 0.0 {
                let ticks_per_sec = clock_ticks_per_sec() as f64;
                let mut current = self.current.lock().unwrap();
                current.cpu_user_ratio =
                    utime_ticks.saturating_sub(prev.utime_ticks) as f64 / ticks_per_sec / wall;
                current.cpu_system_ratio =
                    stime_ticks.saturating_sub(prev.stime_ticks) as f64 / ticks_per_sec / wall;
                current.max_rss_kb = max_rss_kb;
            }
        } else {
            self.current.lock().unwrap().max_rss_kb = max_rss_kb;
        }
        *last = Some(Sample {
            at: now,
            utime_ticks,
            stime_ticks,
        });
    }

    /// Last-computed ratios; all-zero (but `max_rss_kb` populated) until a
    /// second sample has been taken.
    pub fn current(&self) -> ProcessStats {
        *self.current.lock().unwrap()
    }

    /// True once at least two samples have been taken.
    pub fn valid(&self) -> bool {
        self.samples.load(Ordering::Relaxed) > 1
    }
}

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> (u64, u64) {
    let stat = std::fs::read_to_string("/proc/self/stat").unwrap_or_default();
    parse_proc_self_stat(&stat).unwrap_or((0, 0))
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> (u64, u64) {
    (0, 0)
}

#[cfg(target_os = "linux")]
fn read_max_rss_kb() -> u64 {
    let status = std::fs::read_to_string("/proc/self/status").unwrap_or_default();
    parse_vm_hwm_kb(&status).unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn read_max_rss_kb() -> u64 {
    0
}

/// `sysconf(_SC_CLK_TCK)` is 100 on every Linux platform amqpprox ships on;
/// hardcoded to avoid pulling in `libc` just for this one constant.
#[cfg(target_os = "linux")]
fn clock_ticks_per_sec() -> u64 {
    100
}

/// `/proc/self/stat`'s `comm` field is parenthesized and may itself contain
/// spaces or parens, so the only safe split point is the *last* `)` in the
/// line; fields are whitespace-separated after that. `utime`/`stime` are
/// fields 14/15 overall, i.e. indices 11/12 counting from `state` (field 3).
#[cfg(target_os = "linux")]
fn parse_proc_self_stat(contents: &str) -> Option<(u64, u64)> {
    let close_paren = contents.rfind(')')?;
    let fields: Vec<&str> = contents[close_paren + 2..].split_whitespace().collect();
    let utime = fields.get(11)?.parse().ok()?;
    let stime = fields.get(12)?.parse().ok()?;
    Some((utime, stime))
}

#[cfg(target_os = "linux")]
fn parse_vm_hwm_kb(status: &str) -> Option<u64> {
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            return rest.trim().split_whitespace().next()?.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_utime_stime_past_a_comm_field_containing_spaces_and_parens() {
        let stat = "1234 (some (weird) proc name) S 1 1234 1234 0 -1 4194560 100 0 0 0 55 20 0 0 20 0 4 0 123456 1000000 500 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 2 0 0 0 0 0";
        let (utime, stime) = parse_proc_self_stat(stat).unwrap();
        assert_eq!(utime, 55);
        assert_eq!(stime, 20);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn parses_vm_hwm_line() {
        let status = "Name:\tfoo\nVmHWM:\t  12345 kB\nVmRSS:\t10000 kB\n";
        assert_eq!(parse_vm_hwm_kb(status), Some(12345));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_vm_hwm_line_is_none() {
        let status = "Name:\tfoo\nVmRSS:\t10000 kB\n";
        assert_eq!(parse_vm_hwm_kb(status), None);
    }

    #[test]
    fn invalid_until_second_sample() {
        let monitor = ProcessMonitor::new();
        assert!(!monitor.valid());
        monitor.sample();
        assert!(!monitor.valid());
        monitor.sample();
        assert!(monitor.valid());
    }
}
