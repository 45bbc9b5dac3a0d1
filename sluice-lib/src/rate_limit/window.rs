//! Strict sliding-window call counter.

use std::collections::VecDeque;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::sync::RwLockExt;

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// Clock regressions are not corrected: a clock stepping backwards keeps old
/// timestamps around for longer.
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Admission counter for a single rate-limited identity.
///
/// Keeps the timestamps of admitted calls that are still inside the trailing
/// window. A call is admitted while fewer than `limit` timestamps are
/// retained. Stale timestamps are only dropped by [`RateWindowCounter::prune`],
/// which callers run before [`RateWindowCounter::throttle`].
///
/// # Thread Safety
///
/// Admission first checks the count under the read lock and only takes the
/// write lock (re-checking the count) when a slot still looks free, so an
/// exhausted counter never serializes its callers.
#[derive(Debug)]
pub struct RateWindowCounter {
    limit: u32,
    window_millis: u64,
    timestamps: RwLock<VecDeque<u64>>,
}

impl RateWindowCounter {
    /// `window_millis` is clamped to at least one millisecond.
    pub fn new(window_millis: u64, limit: u32) -> Self {
        Self {
            limit,
            window_millis: window_millis.max(1),
            timestamps: RwLock::new(VecDeque::with_capacity(limit.min(64) as usize)),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Drops every timestamp that is `window` or more old at `now`.
    pub fn prune(&self, now: u64) {
        let mut timestamps = self.timestamps.acquire_write();
        timestamps.retain(|&ts| now.saturating_sub(ts) < self.window_millis);
    }

    /// Admits the call and records the current time if the window has room.
    pub fn throttle(&self) -> bool {
        self.throttle_at(current_millis())
    }

    /// Same as [`RateWindowCounter::throttle`] with an explicit timestamp.
    pub fn throttle_at(&self, now: u64) -> bool {
        if self.timestamps.acquire_read().len() >= self.limit as usize {
            return false;
        }
        let mut timestamps = self.timestamps.acquire_write();
        if timestamps.len() < self.limit as usize {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of timestamps currently retained.
    pub fn in_window(&self) -> usize {
        self.timestamps.acquire_read().len()
    }

    /// Admissions left before the counter starts denying.
    pub fn remaining(&self) -> u32 {
        let used = u32::try_from(self.in_window()).unwrap_or(u32::MAX);
        self.limit.saturating_sub(used)
    }

    /// Time until the oldest retained call leaves the window, measured at `now`.
    pub fn reset_after(&self, now: u64) -> Duration {
        let oldest = self.timestamps.acquire_read().iter().min().copied();
        match oldest {
            Some(ts) => Duration::from_millis(
                ts.saturating_add(self.window_millis).saturating_sub(now),
            ),
            None => Duration::ZERO,
        }
    }
}
