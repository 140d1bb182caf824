use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::health::EndpointKey;

/// Fixed bucket size. The window resets on first use after expiry rather
/// than rolling continuously, so bursts smooth only across minute
/// boundaries.
const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    reset_at: Instant,
}

/// Fixed-window per-endpoint request budget. Each operation is a single
/// entry-guarded read-modify-write, so concurrent requests racing for the
/// same endpoint's budget cannot interleave on one key.
pub struct RateLimitTracker {
    windows: DashMap<EndpointKey, Window>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// True iff the endpoint still has headroom within the current window.
    /// `buffer` is the fraction of the nominal budget treated as usable.
    pub fn available_now(&self, key: &EndpointKey, rate_limit: u32, buffer: f64) -> bool {
        self.available_at(key, rate_limit, buffer, Instant::now())
    }

    /// Count one request against the endpoint's current window.
    pub fn record_use(&self, key: &EndpointKey) {
        self.record_use_at(key, Instant::now());
    }

    /// Drop all windows; used when a config reload resets accounting.
    pub fn clear(&self) {
        self.windows.clear();
    }

    fn available_at(&self, key: &EndpointKey, rate_limit: u32, buffer: f64, now: Instant) -> bool {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + WINDOW,
            });
        if now > entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + WINDOW;
        }
        let usable = (f64::from(rate_limit) * buffer).floor() as u32;
        entry.count < usable
    }

    fn record_use_at(&self, key: &EndpointKey, now: Instant) {
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| Window {
                count: 0,
                reset_at: now + WINDOW,
            });
        if now > entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + WINDOW;
        } else {
            entry.count += 1;
        }
    }

    #[cfg(test)]
    fn count(&self, key: &EndpointKey) -> u32 {
        self.windows.get(key).map_or(0, |w| w.count)
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}
