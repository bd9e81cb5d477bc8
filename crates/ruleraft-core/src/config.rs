//! # config
//!
//! why: election and replication timing knobs for one node
//! relations: owned by node.rs, embedded in ruleraft-cluster's NodeConfig
//! what: RaftConfig with defaults and validation

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Timing and batching configuration for a raft node. Durations are in
/// milliseconds of the node's logical clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout
    pub election_timeout_max: u64,
    /// Interval between leader heartbeats
    pub heartbeat_interval: u64,
    /// Heartbeat rounds a leader keeps retrying an uncommitted proposal
    /// before reporting the quorum as unavailable
    pub replication_retry_budget: u64,
    /// Cap on entries carried by one AppendEntries message
    pub max_entries_per_append: usize,
    /// Seed for the election timeout rng; defaults to the node id
    pub rng_seed: Option<u64>,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            replication_retry_budget: 20,
            max_entries_per_append: 64,
            rng_seed: None,
        }
    }
}

impl RaftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min > self.election_timeout_max {
            return Err(ConfigError::ElectionRange {
                min: self.election_timeout_min,
                max: self.election_timeout_max,
            });
        }
        if self.heartbeat_interval == 0 {
            return Err(ConfigError::Zero("heartbeat_interval"));
        }
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(ConfigError::HeartbeatTooSlow {
                heartbeat: self.heartbeat_interval,
                election_min: self.election_timeout_min,
            });
        }
        if self.replication_retry_budget == 0 {
            return Err(ConfigError::Zero("replication_retry_budget"));
        }
        if self.max_entries_per_append == 0 {
            return Err(ConfigError::Zero("max_entries_per_append"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(RaftConfig::default().validate(), Ok(()));
    }

    #[test]
    fn heartbeat_must_undercut_election_timeout() {
        let config = RaftConfig {
            heartbeat_interval: 150,
            ..RaftConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HeartbeatTooSlow { .. })
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RaftConfig = serde_json::from_str(r#"{"heartbeat_interval": 20}"#).unwrap();
        assert_eq!(config.heartbeat_interval, 20);
        assert_eq!(config.election_timeout_min, 150);
    }
}
