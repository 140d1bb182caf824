use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("{0} not found")]
    NotFound(String),
}

/// Protocol family a provider speaks. Chosen at config load; adapters are
/// looked up by this tag, never by runtime type inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolFamily {
    Gemini,
    OpenAi,
}

/// One upstream service grouping endpoints under a protocol family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDefinition {
    /// Display name (e.g., "Google Gemini").
    pub name: String,
    #[serde(rename = "type")]
    pub family: ProtocolFamily,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower priority rank is tried first.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

/// One credentialed, independently rate-limited access path to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDefinition {
    /// Unique within its provider.
    pub name: String,
    /// Literal key or `${VAR}` placeholder; resolved at load time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Requests-per-minute budget.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,
    #[serde(default)]
    pub free_tier: bool,
    /// Human description of the free-tier limit, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_limit: Option<String>,
    /// Task category this endpoint is preferentially suited to (e.g. "coding").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialty: Option<String>,
    /// Whether the endpoint is a local network call.
    #[serde(default)]
    pub local: bool,
}

impl EndpointDefinition {
    /// An endpoint without a resolved credential is excluded from the
    /// selectable pool but stays visible in status output.
    pub fn credentialed(&self) -> bool {
        self.api_key
            .as_deref()
            .is_some_and(|key| !key.trim().is_empty())
    }
}

/// A named task profile selecting a system prompt and specialty preference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeProfile {
    #[serde(default)]
    pub description: String,
    /// Specialty tags preferred by this mode, in order.
    #[serde(default)]
    pub preferred_specialties: Vec<String>,
    pub system_prompt: String,
}

/// Global router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub auto_failover: bool,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub usage_logging: bool,
    #[serde(default = "default_true")]
    pub prefer_free_tier: bool,
    #[serde(default)]
    pub prefer_specialty_match: bool,
    /// Probe interval for the health monitor; 0 disables it.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Fraction of each endpoint's nominal budget treated as usable headroom.
    #[serde(default = "default_rate_limit_buffer")]
    pub rate_limit_buffer: f64,
}

fn default_true() -> bool {
    true
}

fn default_priority() -> u32 {
    100
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_rate_limit() -> u32 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_health_check_interval_ms() -> u64 {
    300_000
}

fn default_rate_limit_buffer() -> f64 {
    0.8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_failover: default_true(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            usage_logging: default_true(),
            prefer_free_tier: default_true(),
            prefer_specialty_match: false,
            health_check_interval_ms: default_health_check_interval_ms(),
            rate_limit_buffer: default_rate_limit_buffer(),
        }
    }
}

/// The config document as written on disk. Credential placeholders are kept
/// unresolved so the file can be edited and written back without baking in
/// secrets. Unrelated sections (e.g. `[daemon]`) pass through untouched.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon: Option<toml::Value>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderDefinition>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub modes: HashMap<String, ModeProfile>,
}

/// Immutable, atomically published view of the configuration. Credentials
/// are resolved; a snapshot handed to an in-flight request is never mutated.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub providers: HashMap<String, ProviderDefinition>,
    pub settings: Settings,
    pub modes: HashMap<String, ModeProfile>,
}

impl ConfigSnapshot {
    pub(crate) fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let settings = raw.settings;
        if !(0.0..=1.0).contains(&settings.rate_limit_buffer) {
            return Err(ConfigError::Invalid(format!(
                "rate_limit_buffer must be within [0, 1], got {}",
                settings.rate_limit_buffer
            )));
        }
        if settings.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_attempts must be at least 1".to_string(),
            ));
        }

        let mut providers = raw.providers;
        for (id, provider) in &mut providers {
            if provider.family == ProtocolFamily::OpenAi && provider.base_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "provider {id} uses the openai protocol but has no base_url"
                )));
            }
            let mut seen = std::collections::HashSet::new();
            for endpoint in &mut provider.endpoints {
                if !seen.insert(endpoint.name.clone()) {
                    return Err(ConfigError::Invalid(format!(
                        "provider {id} has duplicate endpoint {}",
                        endpoint.name
                    )));
                }
                endpoint.api_key = endpoint.api_key.as_deref().and_then(resolve_credential);
            }
        }

        let mut modes = raw.modes;
        modes.entry("general".to_string()).or_insert_with(|| ModeProfile {
            description: "General AI assistant".to_string(),
            preferred_specialties: vec![],
            system_prompt: "You are a helpful AI assistant.".to_string(),
        });

        Ok(Self {
            providers,
            settings,
            modes,
        })
    }

    /// Look up a mode profile, falling back to `general`.
    pub fn mode(&self, name: &str) -> &ModeProfile {
        self.modes
            .get(name)
            .unwrap_or_else(|| &self.modes["general"])
    }

    /// Resolve a (provider, endpoint) pair back to its definitions.
    pub fn endpoint(
        &self,
        provider_id: &str,
        endpoint_name: &str,
    ) -> Option<(&ProviderDefinition, &EndpointDefinition)> {
        let provider = self.providers.get(provider_id)?;
        let endpoint = provider.endpoints.iter().find(|e| e.name == endpoint_name)?;
        Some((provider, endpoint))
    }
}

/// Resolve a credential value: `${VAR}` placeholders come from the process
/// environment; an unresolved placeholder or empty value means no credential.
fn resolve_credential(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some(var) = trimmed.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        return std::env::var(var).ok().filter(|v| !v.trim().is_empty());
    }
    Some(trimmed.to_string())
}

/// Loads, validates, and atomically republishes the provider configuration.
pub struct ConfigStore {
    path: PathBuf,
    snapshot: ArcSwap<ConfigSnapshot>,
}

impl ConfigStore {
    /// Load the config from `path`. A missing file yields the default
    /// (empty) snapshot so partially-configured deployments still start;
    /// a malformed file is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let snapshot = Self::build_snapshot(&path)?;
        Ok(Self {
            path,
            snapshot: ArcSwap::from_pointee(snapshot),
        })
    }

    fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
        if !path.exists() {
            warn!(path = %path.display(), "config file missing, using defaults");
            return Ok(RawConfig::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    fn build_snapshot(path: &Path) -> Result<ConfigSnapshot, ConfigError> {
        ConfigSnapshot::from_raw(Self::read_raw(path)?)
    }

    /// The most recently successfully loaded snapshot.
    pub fn current(&self) -> Arc<ConfigSnapshot> {
        self.snapshot.load_full()
    }

    /// Rebuild the snapshot off the hot path, then atomically replace the
    /// published reference. In-flight callers keep the snapshot they hold.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let next = Self::build_snapshot(&self.path)?;
        self.snapshot.store(Arc::new(next));
        Ok(())
    }

    /// Persist a credential into the on-disk document and republish.
    pub fn set_credential(
        &self,
        provider_id: &str,
        endpoint_name: &str,
        api_key: &str,
    ) -> Result<(), ConfigError> {
        let mut raw = Self::read_raw(&self.path)?;
        let provider = raw
            .providers
            .get_mut(provider_id)
            .ok_or_else(|| ConfigError::NotFound(format!("provider {provider_id}")))?;
        let endpoint = provider
            .endpoints
            .iter_mut()
            .find(|e| e.name == endpoint_name)
            .ok_or_else(|| {
                ConfigError::NotFound(format!("endpoint {endpoint_name} in provider {provider_id}"))
            })?;
        endpoint.api_key = Some(api_key.to_string());

        let rendered = toml::to_string_pretty(&raw)?;
        std::fs::write(&self.path, rendered).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.reload()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
