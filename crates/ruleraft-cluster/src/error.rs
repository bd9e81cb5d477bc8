//! # error
//!
//! why: one error type for everything a caller of the cluster API can hit
//! relations: wraps ruleraft-core, ruleraft-exec and ruleraft-history errors
//! what: ClusterError, TransportError

use std::time::Duration;

use ruleraft_core::{ConsensusError, NodeId};
use ruleraft_exec::{ApplyError, EngineError};
use ruleraft_history::HistoryError;
use thiserror::Error;

/// Failure delivering an rpc between nodes. These stay inside the
/// consensus layer: a lost rpc is just retried on the next round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("node {to} is unreachable from node {from}")]
    Unreachable { from: NodeId, to: NodeId },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("node {0} has shut down")]
    Closed(NodeId),

    #[error("node {to} sent no reply")]
    NoReply { to: NodeId },
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("rule application failed: {0}")]
    Apply(#[from] ApplyError),

    #[error("timed out after {waited:?}")]
    Timeout { waited: Duration },

    #[error("history error: {0}")]
    History(#[from] HistoryError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ClusterError {
    /// Whether the client should retry the request that produced this error.
    ///
    /// Timeouts are not retried: the proposal may still commit.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Consensus(err) => err.is_retryable(),
            _ => false,
        }
    }
}
