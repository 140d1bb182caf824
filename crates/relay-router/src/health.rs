use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::ConfigSnapshot;

/// Successful responses slower than this mark the endpoint degraded.
pub(crate) const SLOW_RESPONSE: Duration = Duration::from_secs(10);

/// A live-traffic error streak longer than this forces degraded status
/// between probe cycles.
pub(crate) const CONSECUTIVE_ERROR_LIMIT: u32 = 5;

/// Key of the health and rate-limit maps: one entry per (provider, endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub provider: String,
    pub endpoint: String,
}

impl EndpointKey {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            endpoint: endpoint.into(),
        }
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.provider, self.endpoint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Health record for one endpoint. There is no terminal state: a down
/// endpoint returns to healthy on its next successful probe.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub status: HealthStatus,
    /// Unix milliseconds of the last probe or live call; 0 = never checked.
    pub last_checked: u64,
    pub last_response_time_ms: u64,
    pub consecutive_errors: u32,
    pub success_count: u64,
    pub error_count: u64,
}

impl EndpointHealth {
    fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_checked: 0,
            last_response_time_ms: 0,
            consecutive_errors: 0,
            success_count: 0,
            error_count: 0,
        }
    }
}

/// Concurrency-safe health state for every credentialed endpoint, mutated by
/// the health monitor's probes and by the dispatcher's outcome bookkeeping.
/// Every mutation holds the per-key entry lock, so a single key's
/// read-modify-write never interleaves.
pub struct HealthBoard {
    entries: DashMap<EndpointKey, EndpointHealth>,
}

impl HealthBoard {
    /// Create the board with one healthy entry per credentialed endpoint of
    /// each enabled provider.
    pub fn new(snapshot: &ConfigSnapshot) -> Self {
        let board = Self {
            entries: DashMap::new(),
        };
        board.rebuild(snapshot);
        board
    }

    /// Rebuild the map from scratch. Reload is a reset event: historical
    /// counters are dropped by design.
    pub fn rebuild(&self, snapshot: &ConfigSnapshot) {
        self.entries.clear();
        for (id, provider) in &snapshot.providers {
            if !provider.enabled {
                continue;
            }
            for endpoint in &provider.endpoints {
                if !endpoint.credentialed() {
                    continue;
                }
                self.entries
                    .insert(EndpointKey::new(id, &endpoint.name), EndpointHealth::new());
            }
        }
    }

    pub fn status(&self, key: &EndpointKey) -> Option<HealthStatus> {
        self.entries.get(key).map(|h| h.status)
    }

    pub fn get(&self, key: &EndpointKey) -> Option<EndpointHealth> {
        self.entries.get(key).map(|h| h.value().clone())
    }

    pub fn keys(&self) -> Vec<EndpointKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn healthy_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.status == HealthStatus::Healthy)
            .count()
    }

    /// Shared success path for probes and live calls.
    pub fn record_success(&self, key: &EndpointKey, elapsed: Duration) {
        if let Some(mut health) = self.entries.get_mut(key) {
            health.status = if elapsed <= SLOW_RESPONSE {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            };
            health.last_response_time_ms = elapsed.as_millis() as u64;
            health.consecutive_errors = 0;
            health.success_count += 1;
            health.last_checked = now_ms();
        }
    }

    /// A failed synthetic probe takes the endpoint down.
    pub fn record_probe_failure(&self, key: &EndpointKey) {
        if let Some(mut health) = self.entries.get_mut(key) {
            health.status = HealthStatus::Down;
            health.consecutive_errors += 1;
            health.error_count += 1;
            health.last_checked = now_ms();
        }
    }

    /// A failed live call counts errors; the status only drops to degraded
    /// once the consecutive-error streak passes the limit.
    pub fn record_call_failure(&self, key: &EndpointKey) {
        if let Some(mut health) = self.entries.get_mut(key) {
            health.consecutive_errors += 1;
            health.error_count += 1;
            health.last_checked = now_ms();
            if health.consecutive_errors > CONSECUTIVE_ERROR_LIMIT {
                health.status = HealthStatus::Degraded;
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, RawConfig};

    fn snapshot() -> ConfigSnapshot {
        let toml_str = r#"
[providers.gemini]
name = "Google Gemini"
type = "gemini"
priority = 1

[[providers.gemini.endpoints]]
name = "flash"
api_key = "k1"
model = "gemini-2.5-flash"

[[providers.gemini.endpoints]]
name = "nokey"
model = "gemini-2.5-pro"

[providers.disabled]
name = "Disabled"
type = "gemini"
enabled = false

[[providers.disabled.endpoints]]
name = "hidden"
api_key = "k2"
model = "whatever"
"#;
        let raw: RawConfig = toml::from_str(toml_str).unwrap();
        ConfigSnapshot::from_raw(raw).unwrap()
    }

    #[test]
    fn board_tracks_only_credentialed_endpoints_of_enabled_providers() {
        let board = HealthBoard::new(&snapshot());
        assert_eq!(board.len(), 1);
        let key = EndpointKey::new("gemini", "flash");
        assert_eq!(board.status(&key), Some(HealthStatus::Healthy));
        assert_eq!(board.status(&EndpointKey::new("gemini", "nokey")), None);
        assert_eq!(board.status(&EndpointKey::new("disabled", "hidden")), None);
    }

    #[test]
    fn slow_success_degrades_fast_success_heals() {
        let board = HealthBoard::new(&snapshot());
        let key = EndpointKey::new("gemini", "flash");

        board.record_success(&key, Duration::from_secs(11));
        assert_eq!(board.status(&key), Some(HealthStatus::Degraded));

        board.record_success(&key, Duration::from_millis(200));
        let health = board.get(&key).unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.success_count, 2);
        assert_eq!(health.last_response_time_ms, 200);
    }

    #[test]
    fn probe_failure_takes_endpoint_down_and_success_restores_it() {
        let board = HealthBoard::new(&snapshot());
        let key = EndpointKey::new("gemini", "flash");

        board.record_probe_failure(&key);
        let health = board.get(&key).unwrap();
        assert_eq!(health.status, HealthStatus::Down);
        assert_eq!(health.consecutive_errors, 1);
        assert_eq!(health.error_count, 1);

        board.record_success(&key, Duration::from_millis(50));
        let health = board.get(&key).unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.consecutive_errors, 0);
    }

    #[test]
    fn call_failures_force_degraded_past_the_streak_limit() {
        let board = HealthBoard::new(&snapshot());
        let key = EndpointKey::new("gemini", "flash");

        for _ in 0..CONSECUTIVE_ERROR_LIMIT {
            board.record_call_failure(&key);
        }
        assert_eq!(board.status(&key), Some(HealthStatus::Healthy));

        board.record_call_failure(&key);
        let health = board.get(&key).unwrap();
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.error_count, u64::from(CONSECUTIVE_ERROR_LIMIT) + 1);
    }

    #[test]
    fn rebuild_resets_counters() {
        let snap = snapshot();
        let board = HealthBoard::new(&snap);
        let key = EndpointKey::new("gemini", "flash");
        board.record_call_failure(&key);
        assert_eq!(board.get(&key).unwrap().error_count, 1);

        board.rebuild(&snap);
        let health = board.get(&key).unwrap();
        assert_eq!(health.error_count, 0);
        assert_eq!(health.status, HealthStatus::Healthy);
    }
}
