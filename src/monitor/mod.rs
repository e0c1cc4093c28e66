//! Error monitoring and trading circuit breaker.
//!
//! Every classified failure in the bot funnels into [`ErrorMonitor::record`].
//! Repeats are merged rather than duplicated, recording is itself rate
//! limited so a failure storm cannot flood the accounting, and once enough
//! Error/Critical weight lands inside the configured window the breaker trips
//! and halts trading until its cooldown passes or an operator resets it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

/// Stored messages are truncated to this length
const MAX_MESSAGE_LEN: usize = 500;
/// Hard cap on distinct tracked events
const MAX_EVENTS: usize = 1000;
/// Rolling window for the per-kind recording rate limit
const RATE_LIMIT_WINDOW: Duration = Duration::seconds(60);
/// Max recordings accepted per kind within the rolling window
const MAX_RECORDS_PER_WINDOW: usize = 20;
/// Fixed breaker cooldown, deliberately independent of the trip window
const RESET_COOLDOWN: Duration = Duration::hours(1);
/// Default retention for stored events
pub const DEFAULT_RETENTION_HOURS: i64 = 48;
/// How long the shutdown path waits for the cleanup task to join
const SHUTDOWN_JOIN_TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Only these severities count toward tripping the breaker
    fn is_breaking(self) -> bool {
        matches!(self, Severity::Error | Severity::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// A classified failure, merged with its repeats
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub hash: u64,
    pub count: u32,
}

/// Breaker configuration consumed from [`crate::config::Settings`]
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Error/Critical occurrence sum that trips the breaker
    pub error_threshold: u32,
    /// Window the trip rule sums over
    pub window_hours: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            window_hours: 1,
        }
    }
}

/// Detailed breaker state for reporting
#[derive(Debug, Clone)]
pub struct BreakerStatus {
    pub active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub reset_at: Option<DateTime<Utc>>,
    pub error_threshold: u32,
    pub window_hours: i64,
}

/// Event storage plus the per-kind recording rate limiter. The dedup map is
/// the primary store: one entry per distinct (kind, message) hash.
#[derive(Default)]
struct EventStore {
    events: HashMap<u64, ErrorEvent>,
    rate: HashMap<String, VecDeque<DateTime<Utc>>>,
}

#[derive(Default)]
struct BreakerState {
    active: bool,
    activated_at: Option<DateTime<Utc>>,
    reset_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn clear(&mut self) {
        self.active = false;
        self.activated_at = None;
        self.reset_at = None;
    }
}

/// Thread-safe error monitor and circuit breaker.
///
/// Event storage and breaker state sit behind two distinct locks: trip
/// evaluation reads the store, releases it, and only then touches breaker
/// state, so `record` calls running concurrently can never deadlock against
/// the trip path.
pub struct ErrorMonitor {
    config: MonitorConfig,
    store: Mutex<EventStore>,
    breaker: Mutex<BreakerState>,
}

impl ErrorMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            store: Mutex::new(EventStore::default()),
            breaker: Mutex::new(BreakerState::default()),
        }
    }

    /// Record a classified failure. Deduplicates repeats, enforces the
    /// per-kind rate limit, then evaluates the trip rule.
    pub fn record(&self, kind: &str, message: &str, severity: Severity) {
        let now = Utc::now();

        {
            let mut store = self.store.lock().unwrap();
            let EventStore { events, rate } = &mut *store;

            // Per-kind self rate limiting: excess recordings are dropped,
            // logged, never stored.
            let timestamps = rate.entry(kind.to_string()).or_default();
            while timestamps
                .front()
                .is_some_and(|t| now - *t > RATE_LIMIT_WINDOW)
            {
                timestamps.pop_front();
            }
            if timestamps.len() >= MAX_RECORDS_PER_WINDOW {
                tracing::warn!("Recording rate limit exceeded for error kind {}", kind);
                return;
            }

            let hash = event_hash(kind, message);
            if let Some(existing) = events.get_mut(&hash) {
                // Duplicate within its dedup lifetime: merge, don't allocate
                existing.count += 1;
                existing.timestamp = now;
                tracing::warn!("Duplicate error #{}: {}", existing.count, kind);
            } else {
                if events.len() >= MAX_EVENTS {
                    evict_oldest(events);
                }
                tracing::error!("Error recorded: {} - {}", kind, truncate(message, 200));
                events.insert(
                    hash,
                    ErrorEvent {
                        timestamp: now,
                        kind: kind.to_string(),
                        message: truncate(message, MAX_MESSAGE_LEN).to_string(),
                        severity,
                        hash,
                        count: 1,
                    },
                );
                timestamps.push_back(now);
            }
        }

        // Store lock released before breaker state is touched
        self.check_trip(now);
    }

    fn check_trip(&self, now: DateTime<Utc>) {
        let window_start = now - Duration::hours(self.config.window_hours);

        let recent: u64 = {
            let store = self.store.lock().unwrap();
            store
                .events
                .values()
                .filter(|e| e.severity.is_breaking() && e.timestamp >= window_start)
                .map(|e| e.count as u64)
                .sum()
        };

        if recent < self.config.error_threshold as u64 {
            return;
        }

        let mut breaker = self.breaker.lock().unwrap();
        if breaker.active {
            // Idempotent: a second trip while active is a no-op
            return;
        }
        breaker.active = true;
        breaker.activated_at = Some(now);
        breaker.reset_at = Some(now + RESET_COOLDOWN);

        tracing::error!("CIRCUIT BREAKER ACTIVATED - trading paused due to excessive errors");
        tracing::error!("Trading will resume at {}", now + RESET_COOLDOWN);
    }

    /// Whether trading is currently halted. Lazily auto-resets once the
    /// cooldown has passed; the breaker can never be observed both active
    /// and past its reset time.
    pub fn is_active(&self) -> bool {
        let mut breaker = self.breaker.lock().unwrap();
        if !breaker.active {
            return false;
        }

        if breaker.reset_at.is_some_and(|t| Utc::now() >= t) {
            breaker.clear();
            tracing::info!("Circuit breaker auto-reset - trading resumed");
            return false;
        }

        true
    }

    /// Operator override: clear the breaker regardless of its cooldown
    pub fn force_reset(&self) {
        tracing::warn!("Circuit breaker manually reset");
        self.breaker.lock().unwrap().clear();
    }

    /// Sum of occurrence counts recorded within the last `hours`
    pub fn error_count(&self, hours: i64) -> u64 {
        let window_start = Utc::now() - Duration::hours(hours);
        let store = self.store.lock().unwrap();
        store
            .events
            .values()
            .filter(|e| e.timestamp >= window_start)
            .map(|e| e.count as u64)
            .sum()
    }

    pub fn status(&self) -> BreakerStatus {
        let breaker = self.breaker.lock().unwrap();
        BreakerStatus {
            active: breaker.active,
            activated_at: breaker.activated_at,
            reset_at: breaker.reset_at,
            error_threshold: self.config.error_threshold,
            window_hours: self.config.window_hours,
        }
    }

    /// Purge events past the retention window along with their dedup entries
    /// and expired rate-limiter timestamps. Runs off the request path.
    pub fn cleanup(&self, retention_hours: i64) {
        let now = Utc::now();
        let cutoff = now - Duration::hours(retention_hours);

        let mut store = self.store.lock().unwrap();
        let before = store.events.len();
        store.events.retain(|_, e| e.timestamp >= cutoff);

        for timestamps in store.rate.values_mut() {
            while timestamps
                .front()
                .is_some_and(|t| now - *t > RATE_LIMIT_WINDOW)
            {
                timestamps.pop_front();
            }
        }
        store.rate.retain(|_, timestamps| !timestamps.is_empty());

        let removed = before - store.events.len();
        if removed > 0 {
            tracing::debug!("Cleaned up {} old errors", removed);
        }
    }

    #[cfg(test)]
    fn unique_events(&self) -> usize {
        self.store.lock().unwrap().events.len()
    }

    #[cfg(test)]
    fn backdate_events(&self, to: DateTime<Utc>) {
        for event in self.store.lock().unwrap().events.values_mut() {
            event.timestamp = to;
        }
    }

    #[cfg(test)]
    fn set_reset_at(&self, at: DateTime<Utc>) {
        self.breaker.lock().unwrap().reset_at = Some(at);
    }
}

fn event_hash(kind: &str, message: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    kind.hash(&mut hasher);
    message.hash(&mut hasher);
    hasher.finish()
}

fn evict_oldest(events: &mut HashMap<u64, ErrorEvent>) {
    if let Some(oldest) = events
        .values()
        .min_by_key(|e| e.timestamp)
        .map(|e| e.hash)
    {
        events.remove(&oldest);
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Handle to the background cleanup task
pub struct CleanupTask {
    tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl CleanupTask {
    /// Stop the task and wait for it, bounded. A task that does not stop in
    /// time is logged and abandoned, not retried.
    pub async fn shutdown(self) {
        let _ = self.tx.send(true);
        if tokio::time::timeout(SHUTDOWN_JOIN_TIMEOUT, self.handle)
            .await
            .is_err()
        {
            tracing::warn!(
                "Error monitor cleanup task did not stop within {:?}",
                SHUTDOWN_JOIN_TIMEOUT
            );
        }
    }
}

/// Spawn the periodic cleanup pass on its own schedule, coordinated with
/// shutdown through a cancellable wait.
pub fn spawn_cleanup(monitor: Arc<ErrorMonitor>, every: StdDuration) -> CleanupTask {
    let (tx, mut rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = rx.changed() => break,
                _ = tokio::time::sleep(every) => {
                    monitor.cleanup(DEFAULT_RETENTION_HOURS);
                }
            }
        }
        tracing::debug!("Error monitor cleanup task stopped");
    });

    CleanupTask { tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(threshold: u32) -> ErrorMonitor {
        ErrorMonitor::new(MonitorConfig {
            error_threshold: threshold,
            window_hours: 1,
        })
    }

    #[test]
    fn test_dedup_merges_repeats() {
        let m = monitor(100);

        m.record("ORDER_EXECUTION", "connection reset", Severity::Error);
        m.record("ORDER_EXECUTION", "connection reset", Severity::Error);

        assert_eq!(m.unique_events(), 1);
        assert_eq!(m.error_count(1), 2);
    }

    #[test]
    fn test_distinct_messages_not_merged() {
        let m = monitor(100);

        m.record("ORDER_EXECUTION", "connection reset", Severity::Error);
        m.record("ORDER_EXECUTION", "dns lookup failed", Severity::Error);
        m.record("SIGNAL_EXECUTION", "connection reset", Severity::Error);

        assert_eq!(m.unique_events(), 3);
    }

    #[test]
    fn test_trips_at_threshold() {
        let m = monitor(5);

        for i in 0..4 {
            m.record("CYCLE", &format!("failure {i}"), Severity::Error);
            assert!(!m.is_active(), "tripped too early at {i}");
        }
        m.record("CYCLE", "failure 4", Severity::Error);

        assert!(m.is_active());
        let status = m.status();
        assert!(status.activated_at.is_some());
        assert!(status.reset_at.is_some());
    }

    #[test]
    fn test_duplicate_counts_reach_threshold() {
        let m = monitor(5);

        for _ in 0..5 {
            m.record("CYCLE", "same failure", Severity::Error);
        }

        assert_eq!(m.unique_events(), 1);
        assert!(m.is_active());
    }

    #[test]
    fn test_warnings_do_not_trip() {
        let m = monitor(3);

        for i in 0..10 {
            m.record("HEALTH", &format!("slow response {i}"), Severity::Warning);
        }

        assert!(!m.is_active());
        assert_eq!(m.error_count(1), 10);
    }

    #[test]
    fn test_trip_is_idempotent() {
        let m = monitor(2);

        m.record("CYCLE", "a", Severity::Critical);
        m.record("CYCLE", "b", Severity::Critical);
        assert!(m.is_active());
        let first = m.status().activated_at;

        m.record("CYCLE", "c", Severity::Critical);
        assert_eq!(m.status().activated_at, first);
    }

    #[test]
    fn test_auto_reset_after_cooldown() {
        let m = monitor(1);

        m.record("CYCLE", "boom", Severity::Error);
        assert!(m.is_active());

        // Cooldown elapsed: the next query must atomically clear the breaker
        m.set_reset_at(Utc::now() - Duration::seconds(1));
        assert!(!m.is_active());
        assert!(m.status().reset_at.is_none());
    }

    #[test]
    fn test_force_reset_overrides_cooldown() {
        let m = monitor(1);

        m.record("CYCLE", "boom", Severity::Error);
        assert!(m.is_active());

        m.force_reset();
        assert!(!m.is_active());
    }

    #[test]
    fn test_old_events_outside_window_do_not_trip() {
        let m = monitor(3);

        m.record("CYCLE", "a", Severity::Error);
        m.record("CYCLE", "b", Severity::Error);
        m.backdate_events(Utc::now() - Duration::hours(2));

        // Only one fresh error inside the 1h window
        m.record("CYCLE", "c", Severity::Error);
        assert!(!m.is_active());
    }

    #[test]
    fn test_recording_rate_limit_drops_excess() {
        let m = monitor(10_000);

        for i in 0..30 {
            m.record("NOISY", &format!("failure {i}"), Severity::Error);
        }

        // Only the first 20 within the rolling minute are stored
        assert_eq!(m.unique_events(), MAX_RECORDS_PER_WINDOW);

        // Other kinds have their own budget
        m.record("QUIET", "failure", Severity::Error);
        assert_eq!(m.unique_events(), MAX_RECORDS_PER_WINDOW + 1);
    }

    #[test]
    fn test_cleanup_purges_old_events() {
        let m = monitor(10_000);

        m.record("CYCLE", "old failure", Severity::Error);
        m.backdate_events(Utc::now() - Duration::hours(72));
        m.record("CYCLE", "fresh failure", Severity::Error);

        m.cleanup(DEFAULT_RETENTION_HOURS);

        assert_eq!(m.unique_events(), 1);
        assert_eq!(m.error_count(1), 1);
    }

    #[test]
    fn test_message_truncated() {
        let m = monitor(10_000);
        let long = "x".repeat(2000);

        m.record("CYCLE", &long, Severity::Error);

        let store = m.store.lock().unwrap();
        let event = store.events.values().next().unwrap();
        assert_eq!(event.message.len(), MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_cleanup_task_shutdown_is_bounded() {
        let m = Arc::new(monitor(10));
        let task = spawn_cleanup(m, StdDuration::from_secs(300));

        let start = std::time::Instant::now();
        task.shutdown().await;
        assert!(start.elapsed() < StdDuration::from_secs(1));
    }
}
