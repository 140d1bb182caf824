use serde::Deserialize;
use std::path::PathBuf;

/// Daemon-level configuration. Lives in the same TOML file as the router's
/// provider/settings/modes sections; this struct reads only `[daemon]`.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_socket_path() -> String {
    "/tmp/relay.sock".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from the default path (~/.config/relay/config.toml).
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(format!("{home}/.config/relay/config.toml"))
    }

    pub fn pid_path() -> PathBuf {
        PathBuf::from("/tmp/relay.pid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.daemon.socket_path, "/tmp/relay.sock");
        assert_eq!(config.daemon.log_level, "info");
    }

    #[test]
    fn parse_toml_config_ignores_router_sections() {
        let toml_str = r#"
[daemon]
socket_path = "/tmp/test.sock"
log_level = "debug"

[providers.gemini]
name = "Google Gemini"
type = "gemini"
priority = 1

[settings]
retry_attempts = 2
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.daemon.socket_path, "/tmp/test.sock");
        assert_eq!(config.daemon.log_level, "debug");
    }
}
