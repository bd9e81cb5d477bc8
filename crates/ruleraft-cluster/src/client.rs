//! # client
//!
//! why: give callers one entry point that finds the leader and waits for commits
//! relations: wraps manager.rs's ConsensusHandle, forwards through transport.rs
//! what: ClusterClient (propose with redirect and backoff, await_commit, disconnect)

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use ruleraft_core::{ConsensusError, NodeId, RuleId, RuleVersion};
use tokio::time;
use tracing::{debug, info};

use crate::config::{ClientConfig, NodeConfig};
use crate::error::ClusterError;
use crate::manager::ConsensusHandle;
use crate::transport::Transport;

pub struct ClusterClient {
    handle: ConsensusHandle,
    transport: Arc<dyn Transport>,
    peers: BTreeMap<NodeId, String>,
    config: ClientConfig,
    propose_timeout: Duration,
}

impl ClusterClient {
    /// Attach to a running node. Says nothing about whether a quorum exists.
    pub fn connect(
        handle: ConsensusHandle,
        transport: Arc<dyn Transport>,
        peers: BTreeMap<NodeId, String>,
    ) -> Self {
        let defaults = NodeConfig::default();
        Self {
            handle,
            transport,
            peers,
            config: defaults.client,
            propose_timeout: Duration::from_millis(defaults.propose_timeout_ms),
        }
    }

    pub fn from_config(
        handle: ConsensusHandle,
        transport: Arc<dyn Transport>,
        config: &NodeConfig,
    ) -> Self {
        Self::connect(handle, transport, config.peers.clone())
            .with_client_config(config.client.clone())
            .with_propose_timeout(config.propose_timeout())
    }

    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_propose_timeout(mut self, timeout: Duration) -> Self {
        self.propose_timeout = timeout;
        self
    }

    /// `127.0.0.1:{8000 + id}` for each id.
    pub fn default_peer_addresses(ids: impl IntoIterator<Item = NodeId>) -> BTreeMap<NodeId, String> {
        ids.into_iter()
            .map(|id| (id, format!("127.0.0.1:{}", 8000 + id)))
            .collect()
    }

    pub fn node_id(&self) -> NodeId {
        self.handle.node_id()
    }

    pub fn handle(&self) -> &ConsensusHandle {
        &self.handle
    }

    pub fn peers(&self) -> &BTreeMap<NodeId, String> {
        &self.peers
    }

    /// Leader as last seen by the local node.
    pub fn leader(&self) -> Option<NodeId> {
        self.handle.status().leader_id
    }

    pub fn current_rule(&self) -> RuleVersion {
        self.handle.current_rule()
    }

    pub fn is_latest(&self, id: &RuleId) -> bool {
        self.handle.is_latest(id)
    }

    /// Commit a new rule version through whichever node leads.
    ///
    /// A known leader is tried directly. Leaderless and quorum-loss errors
    /// are retried with exponential backoff until `max_attempts` runs out.
    pub async fn propose(&self, payload: impl Into<String>) -> Result<RuleVersion, ClusterError> {
        let payload = payload.into();
        (|| self.propose_once(&payload))
            .retry(self.config.policy())
            .when(ClusterError::is_retryable)
            .notify(|err, delay| {
                debug!(node_id = self.handle.node_id(), error = %err, ?delay, "retrying proposal");
            })
            .await
    }

    async fn propose_once(&self, payload: &str) -> Result<RuleVersion, ClusterError> {
        let local = self.bounded(self.handle.propose(payload)).await?;
        match local {
            Err(ConsensusError::NotLeader {
                known_leader: Some(leader),
            }) if leader != self.handle.node_id() => {
                debug!(node_id = self.handle.node_id(), leader, "redirecting proposal to leader");
                let forwarded = self
                    .transport
                    .forward_propose(self.handle.node_id(), leader, payload.to_string());
                Ok(self.bounded(forwarded).await??)
            }
            other => Ok(other?),
        }
    }

    async fn bounded<F: std::future::Future>(&self, fut: F) -> Result<F::Output, ClusterError> {
        time::timeout(self.propose_timeout, fut)
            .await
            .map_err(|_| ClusterError::Timeout {
                waited: self.propose_timeout,
            })
    }

    /// Wait until the local node has committed `version` or newer.
    pub async fn await_commit(&self, version: u64, timeout: Duration) -> Result<RuleVersion, ClusterError> {
        let mut rules = self.handle.subscribe_rule();
        let committed = time::timeout(timeout, async {
            rules
                .wait_for(|rule| rule.version() >= version)
                .await
                .map(|rule| (**rule).clone())
        })
        .await;

        match committed {
            Ok(Ok(rule)) => Ok(rule),
            Ok(Err(_)) => Err(ConsensusError::Shutdown.into()),
            Err(_) => Err(ClusterError::Timeout { waited: timeout }),
        }
    }

    /// Stop the local node and forget the cluster view.
    pub async fn disconnect(&mut self) {
        info!(node_id = self.handle.node_id(), "disconnecting");
        self.handle.shutdown().await;
        self.peers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_addresses_follow_node_ids() {
        let peers = ClusterClient::default_peer_addresses([1, 2, 3]);
        assert_eq!(peers[&1], "127.0.0.1:8001");
        assert_eq!(peers[&3], "127.0.0.1:8003");
    }
}
