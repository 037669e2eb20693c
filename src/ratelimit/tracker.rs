//! Failed-attempt tracking for the token gate.
//!
//! Each client identifier gets a failure counter and the time of its last
//! failure. An identifier is blocked while its counter is at or above the
//! threshold and its last failure is inside the reset window. The map is
//! capped by the caller-supplied capacity; when a new identifier would
//! overflow it, the least recently updated entry is evicted first.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

pub const DEFAULT_BLOCK_THRESHOLD: u32 = 5;
pub const DEFAULT_RESET_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Blocking policy for an [`AttemptTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Failures needed before an identifier is blocked.
    pub block_threshold: u32,
    /// How long after its last failure an identifier is forgotten.
    pub reset_window: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            block_threshold: DEFAULT_BLOCK_THRESHOLD,
            reset_window: DEFAULT_RESET_WINDOW,
        }
    }
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    failure_count: u32,
    last_attempt_at: DateTime<Utc>,
    /// Logical clock value of the last update, smallest is evicted first.
    recency: u64,
}

impl AttemptRecord {
    fn is_expired(&self, now: DateTime<Utc>, window: TimeDelta) -> bool {
        now - self.last_attempt_at > window
    }
}

#[derive(Debug, Default)]
struct Attempts {
    records: HashMap<String, AttemptRecord>,
    clock: u64,
}

impl Attempts {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> Option<String> {
        let victim = self
            .records
            .iter()
            .min_by_key(|(_, record)| record.recency)
            .map(|(id, _)| id.clone())?;
        self.records.remove(&victim);
        Some(victim)
    }
}

/// Bounded, concurrency-safe store of failed attempts per client identifier.
///
/// Shared between request handlers behind an `Arc`; every operation runs in a
/// single critical section so concurrent failures for one identifier never
/// lose an increment.
#[derive(Debug)]
pub struct AttemptTracker {
    config: LimiterConfig,
    reset_window: TimeDelta,
    attempts: Mutex<Attempts>,
}

impl Default for AttemptTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptTracker {
    pub fn new() -> Self {
        Self::with_config(LimiterConfig::default())
    }

    pub fn with_config(config: LimiterConfig) -> Self {
        let reset_window = TimeDelta::from_std(config.reset_window).unwrap_or(TimeDelta::MAX);
        AttemptTracker {
            config,
            reset_window,
            attempts: Mutex::new(Attempts::default()),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Returns true when `id` has reached the failure threshold and its last
    /// failure is still inside the reset window.
    ///
    /// A record found outside the window is dropped on the spot.
    pub fn is_blocked(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut attempts = self.lock();

        let (expired, failure_count) = match attempts.records.get(id) {
            Some(record) => (
                record.is_expired(now, self.reset_window),
                record.failure_count,
            ),
            None => return false,
        };

        if expired {
            attempts.records.remove(id);
            return false;
        }

        failure_count >= self.config.block_threshold
    }

    /// Records one failed attempt for `id`, keeping at most `max_entries`
    /// identifiers tracked.
    ///
    /// An empty identifier is ignored and a zero capacity is treated as 1.
    pub fn record_failed_attempt(&self, id: &str, max_entries: usize) {
        if id.is_empty() {
            return;
        }
        let max_entries = max_entries.max(1);
        let now = Utc::now();

        let mut attempts = self.lock();
        let recency = attempts.tick();

        if let Some(record) = attempts.records.get_mut(id) {
            // Decayed records start counting again from scratch.
            if record.is_expired(now, self.reset_window) {
                record.failure_count = 0;
            }
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_attempt_at = now;
            record.recency = recency;
            return;
        }

        while attempts.records.len() >= max_entries {
            match attempts.evict_lru() {
                Some(victim) => tracing::debug!(
                    client = %victim,
                    capacity = max_entries,
                    "Evicted least recently used client from attempt tracker"
                ),
                None => break,
            }
        }

        attempts.records.insert(
            id.to_owned(),
            AttemptRecord {
                failure_count: 1,
                last_attempt_at: now,
                recency,
            },
        );
    }

    /// Drops every record whose last attempt is outside the reset window.
    /// Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let window = self.reset_window;
        let mut attempts = self.lock();
        let before = attempts.records.len();
        attempts
            .records
            .retain(|_, record| !record.is_expired(now, window));
        before - attempts.records.len()
    }

    /// Number of identifiers currently tracked.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> MutexGuard<'_, Attempts> {
        // Records are updated field by field, a panicking holder cannot leave
        // the map in a state worse than a stale count.
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn backdate(&self, id: &str, by: TimeDelta) {
        if let Some(record) = self.lock().records.get_mut(id) {
            record.last_attempt_at -= by;
        }
    }

    #[cfg(test)]
    fn failure_count(&self, id: &str) -> Option<u32> {
        self.lock().records.get(id).map(|r| r.failure_count)
    }

    #[cfg(test)]
    fn contains(&self, id: &str) -> bool {
        self.lock().records.contains_key(id)
    }
}
