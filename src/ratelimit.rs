//! Fixed-window per-key admission control, keyed by device id.

use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Bucket {
    count: u32,
    window_start: Instant,
}

/// A fixed-window rate limiter. `limit <= 0` disables it entirely — every
/// `allow` call returns `true` without touching the bucket map.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(limit: i64, window: Duration) -> Self {
        Self {
            limit: limit.max(0) as u32,
            window,
            buckets: DashMap::new(),
        }
    }

    pub fn disabled(window: Duration) -> Self {
        Self::new(0, window)
    }

    /// Admits one more call under `key` at instant `now`. Resets the
    /// window if it has elapsed, then increments and compares.
    pub fn allow(&self, key: &str, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut entry = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket {
                count: 0,
                window_start: now,
            });
        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.limit
    }
}
