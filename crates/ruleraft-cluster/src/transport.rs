//! # transport
//!
//! why: keep the consensus loop independent of how bytes move between nodes
//! relations: used by manager.rs for rpcs and by client.rs for leader redirects
//! what: Transport trait, InMemoryNetwork with partition controls

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use ruleraft_core::{ConsensusError, NodeId, RaftMessage, RuleVersion};
use tracing::debug;

use crate::error::TransportError;
use crate::manager::ConsensusHandle;

/// Delivers rpcs and forwarded proposals between cluster members.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a request and wait for the peer's response.
    async fn send(
        &self,
        from: NodeId,
        to: NodeId,
        message: RaftMessage,
    ) -> Result<RaftMessage, TransportError>;

    /// Ask node `to` to propose `payload` on behalf of `from`.
    ///
    /// An unreachable target is reported as `NotLeader` with no known
    /// leader, which callers treat as retryable.
    async fn forward_propose(
        &self,
        from: NodeId,
        to: NodeId,
        payload: String,
    ) -> Result<RuleVersion, ConsensusError>;
}

/// In-process network connecting every registered node directly.
///
/// Isolating a node drops all traffic to and from it until healed.
#[derive(Default)]
pub struct InMemoryNetwork {
    nodes: RwLock<HashMap<NodeId, ConsensusHandle>>,
    isolated: RwLock<HashSet<NodeId>>,
}

impl InMemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, handle: ConsensusHandle) {
        self.nodes.write().insert(handle.node_id(), handle);
    }

    pub fn deregister(&self, id: NodeId) -> Option<ConsensusHandle> {
        self.nodes.write().remove(&id)
    }

    pub fn isolate(&self, id: NodeId) {
        debug!(node_id = id, "isolating node");
        self.isolated.write().insert(id);
    }

    pub fn heal(&self, id: NodeId) {
        debug!(node_id = id, "healing node");
        self.isolated.write().remove(&id);
    }

    pub fn heal_all(&self) {
        self.isolated.write().clear();
    }

    pub fn is_isolated(&self, id: NodeId) -> bool {
        self.isolated.read().contains(&id)
    }

    fn route(&self, from: NodeId, to: NodeId) -> Result<ConsensusHandle, TransportError> {
        {
            let isolated = self.isolated.read();
            if isolated.contains(&from) || isolated.contains(&to) {
                return Err(TransportError::Unreachable { from, to });
            }
        }
        self.nodes
            .read()
            .get(&to)
            .cloned()
            .ok_or(TransportError::UnknownNode(to))
    }
}

#[async_trait]
impl Transport for InMemoryNetwork {
    async fn send(
        &self,
        from: NodeId,
        to: NodeId,
        message: RaftMessage,
    ) -> Result<RaftMessage, TransportError> {
        let target = self.route(from, to)?;
        match target.deliver(from, message).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(TransportError::NoReply { to }),
            Err(_) => Err(TransportError::Closed(to)),
        }
    }

    async fn forward_propose(
        &self,
        from: NodeId,
        to: NodeId,
        payload: String,
    ) -> Result<RuleVersion, ConsensusError> {
        let target = match self.route(from, to) {
            Ok(target) => target,
            Err(err) => {
                debug!(node_id = from, leader = to, error = %err, "cannot forward proposal");
                return Err(ConsensusError::NotLeader { known_leader: None });
            }
        };
        target.propose(payload).await
    }
}
