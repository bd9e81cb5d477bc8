//! # config
//!
//! why: everything a node needs to join a cluster, loadable from json or the environment
//! relations: consumed by manager.rs, client.rs and context.rs
//! what: NodeConfig, ClientConfig, EngineConfig, HistoryConfig
//!
//! Environment overrides:
//! - `RULERAFT_NODE_ID`: this node's id
//! - `RULERAFT_PEERS`: `"1=host:port,2=host:port"`
//! - `RULERAFT_TICK_MS`: runtime tick interval
//! - `RULERAFT_HISTORY_DIR`: directory for the committed-rule history file

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use backon::ExponentialBuilder;
use ruleraft_core::{NodeId, RaftConfig};
use ruleraft_history::{FileHistory, HistoryError, HistoryStore, InMemoryHistory, Retention};
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// Retry behaviour of [`crate::ClusterClient::propose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Total tries, including the first
    pub max_attempts: usize,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_backoff_ms: 20,
            max_backoff_ms: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn policy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_max_times(self.max_attempts.saturating_sub(1))
            .with_jitter()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count used when a call passes 0; 0 here means one per core
    pub default_workers: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention: Retention,
    /// Keep history on disk here; in memory when unset
    pub dir: Option<PathBuf>,
}

impl HistoryConfig {
    /// Open the configured store, or `None` when retention is disabled.
    pub fn open(&self) -> Result<Option<Box<dyn HistoryStore>>, HistoryError> {
        if self.retention == Retention::Disabled {
            return Ok(None);
        }
        let store: Box<dyn HistoryStore> = match &self.dir {
            Some(dir) => Box::new(FileHistory::new(dir, self.retention)?),
            None => Box::new(InMemoryHistory::new(self.retention)),
        };
        Ok(Some(store))
    }
}

/// Configuration of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: NodeId,
    /// Every member's address, keyed by id. May include this node.
    pub peers: BTreeMap<NodeId, String>,
    pub raft: RaftConfig,
    pub tick_interval_ms: u64,
    pub propose_timeout_ms: u64,
    pub client: ClientConfig,
    pub engine: EngineConfig,
    pub history: HistoryConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            peers: BTreeMap::new(),
            raft: RaftConfig::default(),
            tick_interval_ms: 10,
            propose_timeout_ms: 5_000,
            client: ClientConfig::default(),
            engine: EngineConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: NodeId, peers: BTreeMap<NodeId, String>) -> Self {
        Self {
            node_id,
            peers,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ClusterError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ClusterError::Config(format!("invalid json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ClusterError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| ClusterError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Defaults overridden by `RULERAFT_*` environment variables.
    pub fn from_env() -> Result<Self, ClusterError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ClusterError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("RULERAFT_NODE_ID") {
            self.node_id = raw
                .trim()
                .parse()
                .map_err(|e| ClusterError::Config(format!("invalid RULERAFT_NODE_ID: {e}")))?;
        }
        if let Some(raw) = lookup("RULERAFT_PEERS") {
            self.peers = parse_peers(&raw)?;
        }
        if let Some(raw) = lookup("RULERAFT_TICK_MS") {
            self.tick_interval_ms = raw
                .trim()
                .parse()
                .map_err(|e| ClusterError::Config(format!("invalid RULERAFT_TICK_MS: {e}")))?;
        }
        if let Some(dir) = lookup("RULERAFT_HISTORY_DIR") {
            self.history.dir = Some(PathBuf::from(dir));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        self.raft
            .validate()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        if self.tick_interval_ms == 0 {
            return Err(ClusterError::Config("tick_interval_ms must be greater than zero".into()));
        }
        if self.tick_interval_ms > self.raft.heartbeat_interval {
            return Err(ClusterError::Config(format!(
                "tick interval {}ms is longer than the heartbeat interval {}ms",
                self.tick_interval_ms, self.raft.heartbeat_interval
            )));
        }
        if self.client.max_attempts == 0 {
            return Err(ClusterError::Config("client.max_attempts must be greater than zero".into()));
        }
        Ok(())
    }

    /// Every voting member, this node included.
    pub fn cluster_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.peers.keys().copied().collect();
        if !nodes.contains(&self.node_id) {
            nodes.push(self.node_id);
        }
        nodes.sort_unstable();
        nodes
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn propose_timeout(&self) -> Duration {
        Duration::from_millis(self.propose_timeout_ms)
    }
}

/// Parse `"1=host:port,2=host:port"`. Empty segments are skipped.
pub fn parse_peers(raw: &str) -> Result<BTreeMap<NodeId, String>, ClusterError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|member| {
            let (id, addr) = member
                .split_once('=')
                .ok_or_else(|| ClusterError::Config(format!("peer entry {member:?} is not id=address")))?;
            let id = id
                .trim()
                .parse::<NodeId>()
                .map_err(|e| ClusterError::Config(format!("invalid peer id in {member:?}: {e}")))?;
            Ok((id, addr.trim().to_string()))
        })
        .collect()
}
