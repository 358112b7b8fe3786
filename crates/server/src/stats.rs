//! Per-connection/vhost/backend counters and the periodic emitter,
//! grounded on the teacher's `QueueMetrics` atomic-counter struct
//! (`server/src/state.rs`) and spec.md section 6 "Statistics".

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use crate::process_stats::{ProcessMonitor, ProcessStats};

/// Lock-free per-connection counters. All fields use `Ordering::Relaxed`;
/// eventual visibility is fine for a dashboard/status read.
#[derive(Default)]
pub struct ConnectionStats {
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub frames_in: AtomicU64,
    pub frames_out: AtomicU64,
    pub pause_count: AtomicU64,
}

impl ConnectionStats {
    pub fn record_in(&self, bytes: usize, frames: u64) {
        self.bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_in.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_out(&self, bytes: usize, frames: u64) {
        self.bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
        self.frames_out.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_pause(&self) {
        self.pause_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ConnectionStatsSnapshot {
        ConnectionStatsSnapshot {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            pause_count: self.pause_count.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ConnectionStatsSnapshot {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub pause_count: u64,
}

/// Process-wide aggregate counters, keyed by vhost, source ip, and
/// backend name, plus a rolling process-level snapshot.
#[derive(Default)]
pub struct Stats {
    started_at: Mutex<Option<Instant>>,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    failed_connect_attempts: AtomicU64,
    per_vhost: Mutex<HashMap<String, ConnectionStatsSnapshot>>,
    per_backend: Mutex<HashMap<String, ConnectionStatsSnapshot>>,
    process: ProcessMonitor,
}

impl Stats {
    pub fn new() -> Self {
        Stats {
            started_at: Mutex::new(Some(Instant::now())),
            ..Default::default()
        }
    }

    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connect_attempt_failed(&self) {
        self.failed_connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Sample process CPU/RSS counters. Called from the periodic stats
    /// task rather than from `summary()` so a `STAT PRINT` in between
    /// samples just reads the last snapshot instead of forcing one.
    pub fn sample_process(&self) {
        self.process.sample();
    }

    pub fn merge_session(&self, vhost: &str, backend: &str, snapshot: ConnectionStatsSnapshot) {
        merge_into(&mut self.per_vhost.lock().unwrap(), vhost, snapshot);
        merge_into(&mut self.per_backend.lock().unwrap(), backend, snapshot);
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            uptime_secs: self
                .started_at
                .lock()
                .unwrap()
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            failed_connect_attempts: self.failed_connect_attempts.load(Ordering::Relaxed),
            per_vhost: self.per_vhost.lock().unwrap().clone(),
            per_backend: self.per_backend.lock().unwrap().clone(),
            process: self.process.current(),
            process_valid: self.process.valid(),
        }
    }
}

fn merge_into(map: &mut HashMap<String, ConnectionStatsSnapshot>, key: &str, delta: ConnectionStatsSnapshot) {
    let entry = map.entry(key.to_string()).or_default();
    entry.bytes_in += delta.bytes_in;
    entry.bytes_out += delta.bytes_out;
    entry.frames_in += delta.frames_in;
    entry.frames_out += delta.frames_out;
    entry.pause_count += delta.pause_count;
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StatsSummary {
    pub uptime_secs: u64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub failed_connect_attempts: u64,
    pub per_vhost: HashMap<String, ConnectionStatsSnapshot>,
    pub per_backend: HashMap<String, ConnectionStatsSnapshot>,
    pub process: ProcessStats,
    pub process_valid: bool,
}

/// Published on a recurring timer (default 1s); the default emitter logs
/// a one-line summary, mirroring the teacher's preference for
/// `tracing`-based observability over a bespoke metrics sink.
#[async_trait]
pub trait StatsEmitter: Send + Sync {
    async fn emit(&self, summary: &StatsSummary);
}

pub struct LogEmitter;

#[async_trait]
impl StatsEmitter for LogEmitter {
    async fn emit(&self, summary: &StatsSummary) {
        info!(
            active = summary.active_connections,
            total = summary.total_connections,
            failed_attempts = summary.failed_connect_attempts,
            uptime_secs = summary.uptime_secs,
            cpu_user = summary.process.cpu_user_ratio,
            cpu_system = summary.process.cpu_system_ratio,
            max_rss_kb = summary.process.max_rss_kb,
            "stats"
        );
    }
}
