//! Connection and data-rate limiters, grounded on
//! `amqpprox_fixedwindowconnectionratelimiter.cpp`,
//! `amqpprox_totalconnectionlimiter.{h,cpp}`, and `amqpprox_dataratelimit.{h,cpp}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Injectable time source so the fixed-window limiter is testable without
/// a real clock.
pub trait LimiterClock: Send + Sync {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl LimiterClock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub trait ConnectionLimiter: Send + Sync {
    fn allow_new_connection(&self) -> bool;
    fn connection_closed(&self) {}
    fn describe(&self) -> String;
}

/// Allows at most `connection_limit` accepted connections per
/// `window` duration; the window resets wholesale once it elapses,
/// not per-connection.
pub struct FixedWindowConnectionRateLimiter {
    clock: Box<dyn LimiterClock>,
    connection_limit: AtomicU32,
    window_secs: AtomicU64,
    state: Mutex<WindowState>,
}

struct WindowState {
    last_reset: Instant,
    current_count: u32,
}

impl FixedWindowConnectionRateLimiter {
    pub fn new(connection_limit: u32, window_secs: u32) -> Self {
        Self::with_clock(connection_limit, window_secs, Box::new(SystemClock))
    }

    pub fn with_clock(
        connection_limit: u32,
        window_secs: u32,
        clock: Box<dyn LimiterClock>,
    ) -> Self {
        let now = clock.now();
        FixedWindowConnectionRateLimiter {
            clock,
            connection_limit: AtomicU32::new(connection_limit),
            window_secs: AtomicU64::new(window_secs as u64),
            state: Mutex::new(WindowState {
                last_reset: now,
                current_count: 0,
            }),
        }
    }

    pub fn connection_limit(&self) -> u32 {
        self.connection_limit.load(Ordering::Relaxed)
    }

    pub fn window_secs(&self) -> u64 {
        self.window_secs.load(Ordering::Relaxed)
    }

    /// Update the limit and window in place, taking effect on the next
    /// `allow_new_connection` call. Mirrors the `LIMIT CONN_RATE` control
    /// verb, which reconfigures a live limiter rather than replacing it.
    pub fn set_limit(&self, connection_limit: u32, window_secs: u32) {
        self.connection_limit.store(connection_limit, Ordering::Relaxed);
        self.window_secs.store(window_secs as u64, Ordering::Relaxed);
    }
}

impl ConnectionLimiter for FixedWindowConnectionRateLimiter {
    fn allow_new_connection(&self) -> bool {
        let now = self.clock.now();
        let window = Duration::from_secs(self.window_secs.load(Ordering::Relaxed));
        let limit = self.connection_limit.load(Ordering::Relaxed);
        let mut state = self.state.lock().unwrap();

        if now.duration_since(state.last_reset) >= window {
            state.last_reset = now;
            state.current_count = 0;
        }

        if state.current_count >= limit {
            return false;
        }
        state.current_count += 1;
        true
    }

    fn describe(&self) -> String {
        format!(
            "Allow average {} number of connections per {} seconds",
            self.connection_limit(),
            self.window_secs()
        )
    }
}

/// Allows while the number of currently-open connections stays below
/// `total_connection_limit`.
pub struct TotalConnectionLimiter {
    total_connection_limit: AtomicU32,
    connection_count: AtomicUsize,
}

impl TotalConnectionLimiter {
    pub fn new(total_connection_limit: u32) -> Self {
        TotalConnectionLimiter {
            total_connection_limit: AtomicU32::new(total_connection_limit),
            connection_count: AtomicUsize::new(0),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Update the limit in place. Mirrors the `LIMIT CONN_COUNT` control
    /// verb; in-flight connections already counted are unaffected.
    pub fn set_limit(&self, total_connection_limit: u32) {
        self.total_connection_limit
            .store(total_connection_limit, Ordering::Relaxed);
    }
}

impl ConnectionLimiter for TotalConnectionLimiter {
    fn allow_new_connection(&self) -> bool {
        let limit = self.total_connection_limit.load(Ordering::Relaxed) as usize;
        let current = self.connection_count.load(Ordering::Relaxed);
        if current < limit {
            self.connection_count.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    fn connection_closed(&self) {
        // Tolerant of pre-existing connections: a limiter installed
        // mid-flight never decrements below zero.
        let _ = self
            .connection_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                if c == 0 {
                    None
                } else {
                    Some(c - 1)
                }
            });
    }

    fn describe(&self) -> String {
        format!(
            "Allow total {} connections",
            self.total_connection_limit.load(Ordering::Relaxed)
        )
    }
}

/// Byte-rate limiter: `setQuota` may be called from any thread;
/// `record_usage`/`remaining_quota`/`on_timer` must be called serially
/// for a given instance.
pub struct DataRateLimit {
    quota: AtomicUsize,
    remaining_quota: usize,
}

impl DataRateLimit {
    pub fn new() -> Self {
        DataRateLimit {
            quota: AtomicUsize::new(usize::MAX),
            remaining_quota: usize::MAX,
        }
    }

    pub fn set_quota(&self, bytes_per_second: usize) {
        self.quota.store(bytes_per_second, Ordering::Relaxed);
    }

    pub fn quota(&self) -> usize {
        self.quota.load(Ordering::Relaxed)
    }

    pub fn record_usage(&mut self, bytes_read: usize) {
        let quota = self.quota.load(Ordering::Relaxed);
        if quota == usize::MAX {
            return;
        }
        if quota < self.remaining_quota {
            self.remaining_quota = quota;
        }
        self.remaining_quota -= self.remaining_quota.min(bytes_read);
    }

    pub fn remaining_quota(&self) -> usize {
        self.remaining_quota
    }

    pub fn on_timer(&mut self) {
        self.remaining_quota = self.quota.load(Ordering::Relaxed);
    }
}

impl Default for DataRateLimit {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-vhost data-rate limiters plus an alarm threshold that raises a
/// non-fatal notification when crossed, keyed by vhost name.
pub struct DataRateLimitManager {
    limiters: Mutex<HashMap<String, DataRateLimit>>,
    alarm_thresholds: Mutex<HashMap<String, usize>>,
}

impl DataRateLimitManager {
    pub fn new() -> Self {
        DataRateLimitManager {
            limiters: Mutex::new(HashMap::new()),
            alarm_thresholds: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_quota(&self, vhost: &str, bytes_per_second: usize) {
        self.limiters
            .lock()
            .unwrap()
            .entry(vhost.to_string())
            .or_insert_with(DataRateLimit::new)
            .set_quota(bytes_per_second);
    }

    pub fn set_alarm_threshold(&self, vhost: &str, bytes_per_second: usize) {
        self.alarm_thresholds
            .lock()
            .unwrap()
            .insert(vhost.to_string(), bytes_per_second);
    }

    /// Records usage for `vhost` and returns `true` if this call crossed
    /// the configured alarm threshold (non-fatal; caller logs/notifies).
    pub fn record_usage(&self, vhost: &str, bytes_read: usize) -> bool {
        let mut guard = self.limiters.lock().unwrap();
        let limiter = guard.entry(vhost.to_string()).or_insert_with(DataRateLimit::new);
        let before = limiter.remaining_quota();
        limiter.record_usage(bytes_read);
        let after = limiter.remaining_quota();

        if let Some(threshold) = self.alarm_thresholds.lock().unwrap().get(vhost) {
            let used = before.saturating_sub(after);
            return used > 0 && limiter.quota().saturating_sub(after) >= *threshold;
        }
        false
    }

    pub fn on_timer(&self) {
        for limiter in self.limiters.lock().unwrap().values_mut() {
            limiter.on_timer();
        }
    }
}

impl Default for DataRateLimitManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct SteppedClock {
        now: RefCell<Instant>,
    }

    impl SteppedClock {
        fn new() -> Rc<Self> {
            Rc::new(SteppedClock {
                now: RefCell::new(Instant::now()),
            })
        }

        fn advance(&self, d: Duration) {
            let mut now = self.now.borrow_mut();
            *now += d;
        }
    }

    impl LimiterClock for Rc<SteppedClock> {
        fn now(&self) -> Instant {
            *self.now.borrow()
        }
    }

    #[test]
    fn fixed_window_allows_at_most_n_per_window() {
        let clock = SteppedClock::new();
        let limiter = FixedWindowConnectionRateLimiter::with_clock(2, 1, Box::new(clock.clone()));

        assert!(limiter.allow_new_connection());
        assert!(limiter.allow_new_connection());
        assert!(!limiter.allow_new_connection());

        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow_new_connection());
    }

    #[test]
    fn total_limiter_never_decrements_below_zero() {
        let limiter = TotalConnectionLimiter::new(1);
        limiter.connection_closed();
        limiter.connection_closed();
        assert_eq!(limiter.connection_count(), 0);
        assert!(limiter.allow_new_connection());
    }

    #[test]
    fn set_limit_takes_effect_on_next_check() {
        let limiter = TotalConnectionLimiter::new(1);
        assert!(limiter.allow_new_connection());
        assert!(!limiter.allow_new_connection());
        limiter.set_limit(2);
        assert!(limiter.allow_new_connection());
    }

    #[test]
    fn fixed_window_set_limit_changes_rate() {
        let clock = SteppedClock::new();
        let limiter = FixedWindowConnectionRateLimiter::with_clock(1, 1, Box::new(clock.clone()));
        assert!(limiter.allow_new_connection());
        assert!(!limiter.allow_new_connection());

        limiter.set_limit(5, 1);
        assert_eq!(limiter.connection_limit(), 5);
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow_new_connection());
        assert!(limiter.allow_new_connection());
    }

    #[test]
    fn data_rate_limit_clamps_to_quota_range() {
        let mut limiter = DataRateLimit::new();
        limiter.set_quota(100);
        limiter.record_usage(40);
        assert_eq!(limiter.remaining_quota(), 60);
        limiter.record_usage(1000);
        assert_eq!(limiter.remaining_quota(), 0);
        limiter.on_timer();
        assert_eq!(limiter.remaining_quota(), 100);
    }

    #[test]
    fn max_quota_disables_the_limiter() {
        let mut limiter = DataRateLimit::new();
        limiter.record_usage(1_000_000);
        assert_eq!(limiter.remaining_quota(), usize::MAX);
    }
}
