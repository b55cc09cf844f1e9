//! Backplane tunables.
//!
//! `BackplaneFileConfig` is the deserialized `[backplane]` section; hosts
//! layer it however they like and convert it with [`BackplaneConfig::from_file`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::heartbeat::HeartbeatOptions;

/// Backplane tunables (lives under `[backplane]` in the host's config file).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackplaneFileConfig {
    /// Identifier of the pub/sub stream provider; prefixes every topic name
    #[serde(default = "default_broadcast_provider")]
    pub broadcast_provider: String,
    /// Overrides `broadcast_provider` when set and non-empty
    #[serde(default)]
    pub broadcast_provider_name: Option<String>,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Timeout used when asking the directory for dead servers
    #[serde(default = "default_dead_server_timeout_secs")]
    pub dead_server_timeout_secs: u64,
    /// Purge servers dead for this long on every heartbeat tick; 0 disables
    #[serde(default)]
    pub reap_dead_after_secs: u64,
    #[serde(default = "default_dispose_timeout_secs")]
    pub dispose_timeout_secs: u64,
    /// Buffered messages per in-memory topic before slow subscribers lag
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

impl Default for BackplaneFileConfig {
    fn default() -> Self {
        Self {
            broadcast_provider: default_broadcast_provider(),
            broadcast_provider_name: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            dead_server_timeout_secs: default_dead_server_timeout_secs(),
            reap_dead_after_secs: 0,
            dispose_timeout_secs: default_dispose_timeout_secs(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

fn default_broadcast_provider() -> String {
    "default".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_dead_server_timeout_secs() -> u64 {
    90
}
fn default_dispose_timeout_secs() -> u64 {
    5
}
fn default_topic_capacity() -> usize {
    1024
}

/// Backplane configuration (runtime view).
#[derive(Clone, Debug)]
pub struct BackplaneConfig {
    /// Resolved provider name used in topic names
    pub provider: String,
    pub heartbeat_interval: Duration,
    pub dead_server_timeout: Duration,
    pub reap_dead_after: Option<Duration>,
    pub dispose_timeout: Duration,
    pub topic_capacity: usize,
}

impl BackplaneConfig {
    pub fn from_file(fc: &BackplaneFileConfig) -> Self {
        let provider = fc
            .broadcast_provider_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fc.broadcast_provider.trim());
        let provider = if provider.is_empty() {
            default_broadcast_provider()
        } else {
            provider.to_string()
        };

        Self {
            provider,
            heartbeat_interval: Duration::from_secs(fc.heartbeat_interval_secs.max(1)),
            dead_server_timeout: Duration::from_secs(fc.dead_server_timeout_secs),
            reap_dead_after: (fc.reap_dead_after_secs > 0)
                .then(|| Duration::from_secs(fc.reap_dead_after_secs)),
            dispose_timeout: Duration::from_secs(fc.dispose_timeout_secs),
            topic_capacity: fc.topic_capacity.max(1),
        }
    }

    pub fn heartbeat_options(&self) -> HeartbeatOptions {
        HeartbeatOptions {
            interval: self.heartbeat_interval,
            reap_dead_after: self.reap_dead_after,
            dispose_timeout: self.dispose_timeout,
        }
    }
}

impl Default for BackplaneConfig {
    fn default() -> Self {
        Self::from_file(&BackplaneFileConfig::default())
    }
}
