//! Gateway configuration.
//!
//! Settings resolve in layers: built-in defaults, then the TOML file given
//! with `--config`, then environment variables and CLI flags (applied in
//! `main`). Cluster tunables live under a `[cluster]` table and map
//! straight onto [`ClusterConfig`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use slotline_cluster::ClusterConfig;

/// Largest request body accepted by default (1 MiB).
const DEFAULT_MAX_VALUE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct GatewayConfig {
    /// Address the HTTP listener binds to.
    pub bind: String,
    pub port: u16,
    /// Serve Prometheus text on `/metrics`.
    pub metrics: bool,
    /// Maximum concurrent HTTP connections. Extra clients are dropped.
    pub max_connections: usize,
    /// Largest value accepted in a `PUT`/`POST` body.
    pub max_value_bytes: usize,
    pub cluster: ClusterConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            metrics: true,
            max_connections: 1024,
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            cluster: ClusterConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Reads and parses a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read config file '{}': {e}", path.display()))?;
        Self::from_toml(&text)
            .map_err(|e| format!("invalid config file '{}': {e}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Renders the config as TOML, used by `--config-template`.
    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("failed to render config: {e}"))
    }

    /// Checks everything that can be checked before connecting.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max-connections must be at least 1".into());
        }
        if self.max_value_bytes == 0 {
            return Err("max-value-bytes must be at least 1".into());
        }
        self.cluster.validate().map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Splits a comma-separated seed list such as `"a:7000, b:7000"`.
pub fn parse_seed_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
