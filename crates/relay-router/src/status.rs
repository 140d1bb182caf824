use serde::Serialize;

use crate::config::ConfigSnapshot;
use crate::health::{EndpointHealth, EndpointKey, HealthBoard};

/// External-facing aggregation of config + health state. Read-only; safe to
/// build at any concurrency level.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub total_providers: usize,
    /// Credentialed endpoints currently tracked by the health board.
    pub total_endpoints: usize,
    pub healthy_endpoints: usize,
    /// Credentialed free-tier endpoints.
    pub free_endpoints: usize,
    pub endpoints: Vec<EndpointStatus>,
}

/// Per-endpoint detail. Uncredentialed endpoints stay visible here even
/// though they are excluded from the selectable pool.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub credentialed: bool,
    pub free_tier: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<EndpointHealth>,
}

pub fn snapshot(config: &ConfigSnapshot, health: &HealthBoard) -> StatusReport {
    let mut providers: Vec<_> = config.providers.iter().collect();
    providers.sort_by(|a, b| a.1.priority.cmp(&b.1.priority).then_with(|| a.0.cmp(b.0)));

    let mut endpoints = Vec::new();
    let mut free_endpoints = 0;
    for (id, provider) in providers {
        for endpoint in &provider.endpoints {
            let credentialed = endpoint.credentialed();
            if credentialed && endpoint.free_tier {
                free_endpoints += 1;
            }
            let key = EndpointKey::new(id, &endpoint.name);
            endpoints.push(EndpointStatus {
                provider: id.clone(),
                endpoint: endpoint.name.clone(),
                model: endpoint.model.clone(),
                credentialed,
                free_tier: endpoint.free_tier,
                specialty: endpoint.specialty.clone(),
                health: health.get(&key),
            });
        }
    }

    StatusReport {
        total_providers: config.providers.len(),
        total_endpoints: health.len(),
        healthy_endpoints: health.healthy_count(),
        free_endpoints,
        endpoints,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;
    use crate::health::HealthStatus;

    fn config() -> ConfigSnapshot {
        let toml_str = r#"
[providers.gemini]
name = "Google Gemini"
type = "gemini"
priority = 1

[[providers.gemini.endpoints]]
name = "flash"
api_key = "k"
model = "gemini-2.5-flash"
free_tier = true

[[providers.gemini.endpoints]]
name = "pending"
model = "gemini-2.5-pro"
free_tier = true
"#;
        let raw: RawConfig = toml::from_str(toml_str).unwrap();
        ConfigSnapshot::from_raw(raw).unwrap()
    }

    #[test]
    fn report_counts_and_detail() {
        let config = config();
        let health = HealthBoard::new(&config);
        let report = snapshot(&config, &health);

        assert_eq!(report.total_providers, 1);
        assert_eq!(report.total_endpoints, 1);
        assert_eq!(report.healthy_endpoints, 1);
        // Only the credentialed free-tier endpoint counts.
        assert_eq!(report.free_endpoints, 1);
        assert_eq!(report.endpoints.len(), 2);
    }

    #[test]
    fn uncredentialed_endpoint_is_visible_without_health() {
        let config = config();
        let health = HealthBoard::new(&config);
        let report = snapshot(&config, &health);

        let pending = report
            .endpoints
            .iter()
            .find(|e| e.endpoint == "pending")
            .unwrap();
        assert!(!pending.credentialed);
        assert!(pending.health.is_none());

        let flash = report
            .endpoints
            .iter()
            .find(|e| e.endpoint == "flash")
            .unwrap();
        assert_eq!(
            flash.health.as_ref().unwrap().status,
            HealthStatus::Healthy
        );
    }

    #[test]
    fn report_serializes_to_json() {
        let config = config();
        let health = HealthBoard::new(&config);
        let report = snapshot(&config, &health);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"total_providers\":1"));
        assert!(json.contains("\"status\":\"healthy\""));
    }
}
