use relay_protocol::GenerateResponse;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::adapters::{AdapterSet, CompiledPrompt, EndpointError};
use crate::config::{ConfigError, ConfigSnapshot, ConfigStore, ModeProfile};
use crate::health::{EndpointKey, HealthBoard};
use crate::ratelimit::RateLimitTracker;
use crate::select::select_candidates;
use crate::status::{self, StatusReport};

/// Terminal errors a caller of [`CompletionRouter::generate`] can see.
/// Per-endpoint failures are recovered by the failover loop and never
/// surface directly.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no available endpoints")]
    NoAvailableEndpoint,

    #[error("all endpoints failed after {attempts} attempt(s); last was {provider}/{endpoint}")]
    ExhaustedRetries {
        attempts: u32,
        provider: String,
        endpoint: String,
        #[source]
        source: EndpointError,
    },
}

/// Routes generation requests across configured providers with health
/// tracking, rate-limit accounting, and retry/failover. The single entry
/// point the rest of the application calls.
pub struct CompletionRouter {
    config: ConfigStore,
    health: HealthBoard,
    limits: RateLimitTracker,
    adapters: AdapterSet,
}

impl CompletionRouter {
    pub fn new(config: ConfigStore) -> Self {
        Self::with_adapters(config, AdapterSet::standard())
    }

    pub fn with_adapters(config: ConfigStore, adapters: AdapterSet) -> Self {
        let snapshot = config.current();
        let health = HealthBoard::new(&snapshot);
        log_inventory(&snapshot, health.len());
        Self {
            config,
            health,
            limits: RateLimitTracker::new(),
            adapters,
        }
    }

    pub fn current_config(&self) -> Arc<ConfigSnapshot> {
        self.config.current()
    }

    /// Generate text for `prompt` in `mode`. Candidates are attempted
    /// strictly in selector order; bookkeeping side effects are additive
    /// only — the config is never mutated here.
    pub async fn generate(
        &self,
        prompt: &str,
        mode: &str,
    ) -> Result<GenerateResponse, GenerateError> {
        let snapshot = self.config.current();
        let settings = &snapshot.settings;
        let profile = snapshot.mode(mode);
        let compiled = CompiledPrompt::new(&profile.system_prompt, prompt);

        let candidates = select_candidates(&snapshot, mode, &self.health, &self.limits);
        if candidates.is_empty() {
            warn!(mode, "no eligible endpoints for request");
            return Err(GenerateError::NoAvailableEndpoint);
        }

        let timeout = Duration::from_millis(settings.timeout_ms);
        let planned = candidates.len().min(settings.retry_attempts as usize);
        let mut attempts = 0u32;
        let mut last: Option<(EndpointKey, EndpointError)> = None;

        for key in candidates.iter().take(planned) {
            let Some((provider, endpoint)) = snapshot.endpoint(&key.provider, &key.endpoint)
            else {
                continue;
            };
            let Some(adapter) = self.adapters.get(provider.family) else {
                warn!(provider = %key.provider, "no adapter for provider family");
                continue;
            };

            attempts += 1;
            self.limits.record_use(key);

            let started = Instant::now();
            match adapter.invoke(provider, endpoint, &compiled, timeout).await {
                Ok(text) => {
                    let elapsed = started.elapsed();
                    self.health.record_success(key, elapsed);
                    if settings.usage_logging {
                        info!(
                            provider = %key.provider,
                            endpoint = %key.endpoint,
                            model = %endpoint.model,
                            latency_ms = elapsed.as_millis() as u64,
                            "Request served"
                        );
                    }
                    return Ok(GenerateResponse {
                        text,
                        provider: key.provider.clone(),
                        endpoint: key.endpoint.clone(),
                        model: endpoint.model.clone(),
                        latency_ms: elapsed.as_millis() as u64,
                    });
                }
                Err(err) => {
                    warn!(
                        provider = %key.provider,
                        endpoint = %key.endpoint,
                        kind = err.kind(),
                        error = %err,
                        attempt = attempts,
                        "Endpoint failed"
                    );
                    self.health.record_call_failure(key);
                    let failover = settings.auto_failover;
                    last = Some((key.clone(), err));
                    if !failover {
                        break;
                    }
                    if (attempts as usize) < planned {
                        tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)).await;
                    }
                }
            }
        }

        let (key, source) = last.ok_or(GenerateError::NoAvailableEndpoint)?;
        Err(GenerateError::ExhaustedRetries {
            attempts,
            provider: key.provider,
            endpoint: key.endpoint,
            source,
        })
    }

    /// Rebuild the config snapshot and reset health and rate-limit state.
    /// Reload is a reset event: historical counters do not survive it.
    pub fn reload(&self) -> Result<(), ConfigError> {
        self.config.reload()?;
        let snapshot = self.config.current();
        self.health.rebuild(&snapshot);
        self.limits.clear();
        info!(
            providers = snapshot.providers.len(),
            endpoints = self.health.len(),
            "Configuration reloaded"
        );
        Ok(())
    }

    /// Persist a credential into the durable config, then reload.
    pub fn set_credential(
        &self,
        provider: &str,
        endpoint: &str,
        api_key: &str,
    ) -> Result<(), ConfigError> {
        self.config.set_credential(provider, endpoint, api_key)?;
        let snapshot = self.config.current();
        self.health.rebuild(&snapshot);
        self.limits.clear();
        info!(provider, endpoint, "Credential updated");
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        status::snapshot(&self.config.current(), &self.health)
    }

    /// Available mode profiles, sorted by name.
    pub fn modes(&self) -> BTreeMap<String, ModeProfile> {
        self.config
            .current()
            .modes
            .iter()
            .map(|(name, profile)| (name.clone(), profile.clone()))
            .collect()
    }

    /// Start the background probe loop. Returns `None` when probing is
    /// disabled by a zero interval. The loop never fails: every probe
    /// error is absorbed into a down transition.
    pub fn spawn_health_monitor(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let interval_ms = self.config.current().settings.health_check_interval_ms;
        if interval_ms == 0 {
            debug!("Health monitor disabled");
            return None;
        }
        let router = Arc::clone(self);
        info!(interval_ms, "Health monitor started");
        Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                router.probe_all().await;
            }
        }))
    }

    /// Probe every tracked endpoint once through its family adapter.
    pub async fn probe_all(&self) {
        let snapshot = self.config.current();
        let timeout = Duration::from_millis(snapshot.settings.timeout_ms);
        let probe = CompiledPrompt::probe();

        debug!(endpoints = self.health.len(), "Running health probes");
        for key in self.health.keys() {
            let Some((provider, endpoint)) = snapshot.endpoint(&key.provider, &key.endpoint)
            else {
                continue;
            };
            let Some(adapter) = self.adapters.get(provider.family) else {
                continue;
            };

            let started = Instant::now();
            match adapter.invoke(provider, endpoint, &probe, timeout).await {
                Ok(_) => self.health.record_success(&key, started.elapsed()),
                Err(err) => {
                    warn!(
                        provider = %key.provider,
                        endpoint = %key.endpoint,
                        error = %err,
                        "Health probe failed"
                    );
                    self.health.record_probe_failure(&key);
                }
            }
        }
    }
}

/// Log the startup inventory of enabled providers and their endpoints.
fn log_inventory(snapshot: &ConfigSnapshot, active: usize) {
    let enabled = snapshot.providers.values().filter(|p| p.enabled).count();
    info!(
        providers = enabled,
        endpoints = active,
        "Provider inventory initialized"
    );
    for (id, provider) in &snapshot.providers {
        if !provider.enabled {
            continue;
        }
        for endpoint in &provider.endpoints {
            info!(
                provider = %id,
                endpoint = %endpoint.name,
                model = %endpoint.model,
                credentialed = endpoint.credentialed(),
                free_tier = endpoint.free_tier,
                specialty = endpoint.specialty.as_deref().unwrap_or(""),
                "Endpoint registered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::ProviderAdapter;
    use crate::config::{EndpointDefinition, ProtocolFamily, ProviderDefinition};
    use crate::health::HealthStatus;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Adapter whose outcomes are scripted by endpoint name; records the
    /// order of invocations and the system prompt it was handed.
    struct ScriptedAdapter {
        fail: HashSet<String>,
        calls: Arc<Mutex<Vec<String>>>,
        systems: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ProviderAdapter for ScriptedAdapter {
        fn family(&self) -> ProtocolFamily {
            ProtocolFamily::Gemini
        }

        async fn invoke(
            &self,
            _provider: &ProviderDefinition,
            endpoint: &EndpointDefinition,
            prompt: &CompiledPrompt,
            _timeout: Duration,
        ) -> Result<String, EndpointError> {
            self.calls.lock().unwrap().push(endpoint.name.clone());
            self.systems.lock().unwrap().push(prompt.system.clone());
            if self.fail.contains(&endpoint.name) {
                Err(EndpointError::Transport("connection refused".into()))
            } else {
                Ok(format!("reply from {}", endpoint.name))
            }
        }
    }

    struct Harness {
        router: Arc<CompletionRouter>,
        calls: Arc<Mutex<Vec<String>>>,
        systems: Arc<Mutex<Vec<String>>>,
        path: PathBuf,
    }

    fn harness(tag: &str, config: &str, fail: &[&str]) -> Harness {
        let path = std::env::temp_dir().join(format!(
            "relay-router-test-{}-{tag}.toml",
            std::process::id()
        ));
        std::fs::write(&path, config).unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let systems = Arc::new(Mutex::new(Vec::new()));
        let adapter = ScriptedAdapter {
            fail: fail.iter().map(|s| s.to_string()).collect(),
            calls: Arc::clone(&calls),
            systems: Arc::clone(&systems),
        };

        let store = ConfigStore::load(&path).unwrap();
        let router = Arc::new(CompletionRouter::with_adapters(
            store,
            AdapterSet::new(vec![Box::new(adapter)]),
        ));
        Harness {
            router,
            calls,
            systems,
            path,
        }
    }

    const TWO_PROVIDERS: &str = r#"
[settings]
retry_delay_ms = 0
prefer_free_tier = false

[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k1"
model = "m1"

[providers.p2]
name = "Secondary"
type = "gemini"
priority = 2

[[providers.p2.endpoints]]
name = "e2"
api_key = "k2"
model = "m2"
"#;

    #[tokio::test]
    async fn failover_recovers_on_second_endpoint() {
        let h = harness("failover", TWO_PROVIDERS, &["e1"]);

        let response = h.router.generate("hello", "general").await.unwrap();
        assert_eq!(response.text, "reply from e2");
        assert_eq!(response.provider, "p2");
        assert_eq!(*h.calls.lock().unwrap(), vec!["e1", "e2"]);

        let first = h.router.health.get(&EndpointKey::new("p1", "e1")).unwrap();
        assert_eq!(first.consecutive_errors, 1);
        assert_eq!(first.error_count, 1);
        let second = h.router.health.get(&EndpointKey::new("p2", "e2")).unwrap();
        assert_eq!(second.success_count, 1);

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn no_candidates_fails_without_any_adapter_call() {
        let config = r#"
[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
model = "m1"
"#;
        let h = harness("nocreds", config, &[]);

        let err = h.router.generate("hello", "general").await.unwrap_err();
        assert!(matches!(err, GenerateError::NoAvailableEndpoint));
        assert!(h.calls.lock().unwrap().is_empty());

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn rate_limited_primary_falls_to_secondary() {
        let config = r#"
[settings]
retry_delay_ms = 0
prefer_free_tier = false
rate_limit_buffer = 1.0

[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k1"
model = "m1"
rate_limit = 1

[providers.p2]
name = "Secondary"
type = "gemini"
priority = 2

[[providers.p2.endpoints]]
name = "e2"
api_key = "k2"
model = "m2"
"#;
        let h = harness("ratelimit", config, &[]);

        let first = h.router.generate("one", "general").await.unwrap();
        assert_eq!(first.text, "reply from e1");

        // E1's single-request budget is spent within the same minute.
        let second = h.router.generate("two", "general").await.unwrap();
        assert_eq!(second.text, "reply from e2");

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn disabled_failover_fails_after_first_error() {
        let config = r#"
[settings]
auto_failover = false
retry_delay_ms = 0
prefer_free_tier = false

[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k1"
model = "m1"

[providers.p2]
name = "Secondary"
type = "gemini"
priority = 2

[[providers.p2.endpoints]]
name = "e2"
api_key = "k2"
model = "m2"
"#;
        let h = harness("nofailover", config, &["e1", "e2"]);

        let err = h.router.generate("hello", "general").await.unwrap_err();
        match err {
            GenerateError::ExhaustedRetries {
                attempts, endpoint, ..
            } => {
                assert_eq!(attempts, 1);
                assert_eq!(endpoint, "e1");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*h.calls.lock().unwrap(), vec!["e1"]);

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn exhaustion_wraps_the_last_endpoint_error() {
        let h = harness("exhausted", TWO_PROVIDERS, &["e1", "e2"]);

        let err = h.router.generate("hello", "general").await.unwrap_err();
        match err {
            GenerateError::ExhaustedRetries {
                attempts,
                provider,
                endpoint,
                source,
            } => {
                assert_eq!(attempts, 2);
                assert_eq!(provider, "p2");
                assert_eq!(endpoint, "e2");
                assert!(matches!(source, EndpointError::Transport(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn retry_attempts_cap_the_candidate_walk() {
        let config = r#"
[settings]
retry_attempts = 2
retry_delay_ms = 0
prefer_free_tier = false

[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k"
model = "m"

[[providers.p1.endpoints]]
name = "e2"
api_key = "k"
model = "m"

[[providers.p1.endpoints]]
name = "e3"
api_key = "k"
model = "m"
"#;
        let h = harness("retrycap", config, &["e1", "e2", "e3"]);

        let err = h.router.generate("hello", "general").await.unwrap_err();
        assert!(matches!(
            err,
            GenerateError::ExhaustedRetries { attempts: 2, .. }
        ));
        assert_eq!(h.calls.lock().unwrap().len(), 2);

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn generate_uses_the_mode_system_prompt() {
        let config = r#"
[settings]
retry_delay_ms = 0

[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k1"
model = "m1"

[modes.pirate]
description = "Talks like a pirate"
system_prompt = "You are a pirate."
"#;
        let h = harness("modes", config, &[]);

        h.router.generate("ahoy", "pirate").await.unwrap();
        assert_eq!(*h.systems.lock().unwrap(), vec!["You are a pirate."]);

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn reload_applies_to_subsequent_calls_only() {
        let h = harness("reload", TWO_PROVIDERS, &[]);

        // A snapshot captured before the reload stays intact.
        let before = h.router.current_config();
        assert_eq!(before.providers.len(), 2);

        let replacement = r#"
[settings]
retry_delay_ms = 0
prefer_free_tier = false

[providers.p3]
name = "Tertiary"
type = "gemini"
priority = 1

[[providers.p3.endpoints]]
name = "e3"
api_key = "k3"
model = "m3"
"#;
        std::fs::write(&h.path, replacement).unwrap();
        h.router.reload().unwrap();

        let response = h.router.generate("hello", "general").await.unwrap();
        assert_eq!(response.text, "reply from e3");
        assert_eq!(before.providers.len(), 2);

        let _ = std::fs::remove_file(&h.path);
    }

    #[tokio::test]
    async fn probe_failure_marks_endpoint_down_and_deselects_it() {
        struct FailingProbe;

        #[async_trait]
        impl ProviderAdapter for FailingProbe {
            fn family(&self) -> ProtocolFamily {
                ProtocolFamily::Gemini
            }

            async fn invoke(
                &self,
                _provider: &ProviderDefinition,
                _endpoint: &EndpointDefinition,
                _prompt: &CompiledPrompt,
                _timeout: Duration,
            ) -> Result<String, EndpointError> {
                Err(EndpointError::Timeout)
            }
        }

        let path = std::env::temp_dir().join(format!(
            "relay-router-test-{}-probe.toml",
            std::process::id()
        ));
        let config = r#"
[providers.p1]
name = "Primary"
type = "gemini"
priority = 1

[[providers.p1.endpoints]]
name = "e1"
api_key = "k1"
model = "m1"
"#;
        std::fs::write(&path, config).unwrap();
        let store = ConfigStore::load(&path).unwrap();
        let router = CompletionRouter::with_adapters(
            store,
            AdapterSet::new(vec![Box::new(FailingProbe)]),
        );

        router.probe_all().await;
        let key = EndpointKey::new("p1", "e1");
        assert_eq!(router.health.status(&key), Some(HealthStatus::Down));

        let err = router.generate("hello", "general").await.unwrap_err();
        assert!(matches!(err, GenerateError::NoAvailableEndpoint));

        let _ = std::fs::remove_file(&path);
    }
}
