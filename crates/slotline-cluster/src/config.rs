//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::topology::NodeId;

/// Tunables for [`ClusterClient`](crate::ClusterClient).
///
/// Deserializes from the `[cluster]` table of the gateway's TOML file;
/// every field has a default so partial tables are fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ClusterConfig {
    /// Bootstrap nodes as `host:port`. Also the fallback for refreshes
    /// when every known node is unreachable.
    pub seed_nodes: Vec<String>,
    /// Maximum open connections per node.
    pub pool_size_per_node: usize,
    /// Background refresh period. Zero disables the periodic task.
    pub refresh_interval_ms: u64,
    /// Attempts after the first before a request gives up.
    pub max_retries: u32,
    /// Overall deadline for one request, retries included.
    pub request_timeout_ms: u64,
    /// Deadline for establishing one connection.
    pub connect_timeout_ms: u64,
    /// How long to wait for a free pooled connection.
    pub pool_timeout_ms: u64,
    /// Base delay between retries after a failure. Doubles per attempt.
    pub retry_backoff_ms: u64,
    /// Consecutive failures that take a suspected node down.
    pub down_after_failures: u32,
    /// Time a node may stay suspected without a success before going down.
    pub down_after_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seed_nodes: vec!["127.0.0.1:7000".into()],
            pool_size_per_node: 8,
            refresh_interval_ms: 30_000,
            max_retries: 3,
            request_timeout_ms: 2_000,
            connect_timeout_ms: 500,
            pool_timeout_ms: 1_000,
            retry_backoff_ms: 20,
            down_after_failures: 3,
            down_after_ms: 5_000,
        }
    }
}

impl ClusterConfig {
    /// Builds a config for the given seeds with every other field at its
    /// default.
    pub fn with_seeds<I, S>(seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seed_nodes: seeds.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Checks the values and parses the seed addresses.
    pub fn validate(&self) -> Result<Vec<NodeId>, ClusterError> {
        if self.seed_nodes.is_empty() {
            return Err(ClusterError::Configuration(
                "at least one seed node is required".into(),
            ));
        }
        if self.pool_size_per_node == 0 {
            return Err(ClusterError::Configuration(
                "pool-size-per-node must be at least 1".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ClusterError::Configuration(
                "request-timeout-ms must be greater than 0".into(),
            ));
        }
        if self.down_after_failures == 0 {
            return Err(ClusterError::Configuration(
                "down-after-failures must be at least 1".into(),
            ));
        }

        let mut seeds: Vec<NodeId> = Vec::with_capacity(self.seed_nodes.len());
        for addr in &self.seed_nodes {
            let id = NodeId::parse(addr.trim())?;
            if !seeds.contains(&id) {
                seeds.push(id);
            }
        }
        Ok(seeds)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_ms > 0).then(|| Duration::from_millis(self.refresh_interval_ms))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn down_after(&self) -> Duration {
        Duration::from_millis(self.down_after_ms)
    }
}
