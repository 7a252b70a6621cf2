// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Broker configuration manifest — YAML, discovered the same way the
//! reference node manifest is: `--config`, then `$CODEBROKER_CONFIG_PATH`,
//! then a platform-conventional default, falling back to an in-memory
//! default with a loud warning.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::tool::ToolSourceConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxRuntimeKind {
    Docker,
    Process,
}

impl Default for SandboxRuntimeKind {
    fn default() -> Self {
        SandboxRuntimeKind::Docker
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub runtime: SandboxRuntimeKind,
    pub docker_socket_path: Option<String>,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub default_timeout_ms: u64,
}

fn default_sandbox_timeout_ms() -> u64 {
    crate::domain::task::DEFAULT_TIMEOUT_MS
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            runtime: SandboxRuntimeKind::default(),
            docker_socket_path: None,
            default_timeout_ms: default_sandbox_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OauthSection {
    pub authorization_server: String,
    pub protected_resource_metadata: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BrokerConfig {
    #[serde(default)]
    pub listen: ListenConfig,
    pub database: Option<String>,
    #[serde(default)]
    pub sandbox: SandboxSection,
    pub oauth: Option<OauthSection>,
    #[serde(default)]
    pub sources: Vec<NamedToolSourceConfig>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedToolSourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub config: ToolSourceConfig,
}

const CONFIG_ENV_VAR: &str = "CODEBROKER_CONFIG_PATH";
const DATABASE_ENV_VAR: &str = "CODEBROKER_DATABASE_URL";
const LOG_LEVEL_ENV_VAR: &str = "CODEBROKER_LOG_LEVEL";

/// Platform-conventional default config path: `$XDG_CONFIG_HOME/codebroker/config.yaml`
/// (or the platform equivalent via `dirs`).
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("codebroker").join("config.yaml"))
}

impl BrokerConfig {
    /// Resolves the manifest using the discovery order documented on this
    /// type: an explicit path, then the environment variable, then the
    /// platform default, finally an in-memory default with a warning.
    pub fn load_or_default(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load_from(path).with_context(|| format!("loading config from {}", path.display()));
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = PathBuf::from(env_path);
            return Self::load_from(&path).with_context(|| format!("loading config from {}", path.display()));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::load_from(&path).with_context(|| format!("loading config from {}", path.display()));
            }
        }

        tracing::warn!("no configuration manifest found; starting with an in-memory default configuration");
        Ok(Self::default().with_env_overrides())
    }

    fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config manifest at {}", path.display()))?;
        let config: BrokerConfig =
            serde_yaml::from_str(&raw).with_context(|| format!("parsing config manifest at {}", path.display()))?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(database_url) = std::env::var(DATABASE_ENV_VAR) {
            self.database = Some(database_url);
        }
        if let Ok(log_level) = std::env::var(LOG_LEVEL_ENV_VAR) {
            self.log_level = log_level;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = BrokerConfig::default();
        assert_eq!(config.listen.port, 8787);
        assert_eq!(config.sandbox.runtime, SandboxRuntimeKind::Docker);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn parses_a_minimal_manifest() {
        let yaml = r#"
listen:
  host: "0.0.0.0"
  port: 9000
sandbox:
  runtime: process
  default_timeout_ms: 60000
"#;
        let config: BrokerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen.host, "0.0.0.0");
        assert_eq!(config.listen.port, 9000);
        assert_eq!(config.sandbox.runtime, SandboxRuntimeKind::Process);
        assert_eq!(config.sandbox.default_timeout_ms, 60_000);
    }

    #[test]
    fn load_or_default_reads_an_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codebroker.yaml");
        std::fs::write(&path, "listen:\n  port: 9999\n").unwrap();

        let config = BrokerConfig::load_or_default(Some(&path)).unwrap();
        assert_eq!(config.listen.port, 9999);
    }

    #[test]
    fn load_or_default_errors_on_an_explicit_path_that_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(BrokerConfig::load_or_default(Some(&missing)).is_err());
    }
}
