//! # error
//!
//! why: name every way a proposal or replicated entry can fail
//! relations: returned by node.rs and log.rs, wrapped by ruleraft-cluster errors
//! what: ConsensusError taxonomy, ConfigError for RaftConfig validation

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::NodeId;

/// Errors surfaced by the consensus layer.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ConsensusError {
    /// Proposal reached a node that does not lead; redirect to `known_leader` if set.
    #[error("not the leader (known leader: {known_leader:?})")]
    NotLeader { known_leader: Option<NodeId> },

    /// A majority did not acknowledge the entry within the retry budget.
    #[error("quorum unavailable: entry {index} not acknowledged by a majority after {attempts} replication rounds")]
    QuorumUnavailable { index: u64, attempts: u64 },

    /// The leader that accepted the proposal was deposed by a higher term.
    #[error("stale term {term}, cluster has moved on to term {current}")]
    StaleTerm { term: u64, current: u64 },

    /// Replicated entry whose payload does not hash to its checksum.
    #[error("checksum mismatch at index {index}: stored {expected}, computed {actual}")]
    Corruption {
        index: u64,
        expected: String,
        actual: String,
    },

    #[error("no rule has been committed yet")]
    NoCommittedRule,

    #[error("consensus manager has shut down")]
    Shutdown,
}

impl ConsensusError {
    /// Whether a caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotLeader { .. } | Self::QuorumUnavailable { .. } | Self::StaleTerm { .. }
        )
    }
}

/// Invalid raft timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("election timeout range is empty: min {min}ms > max {max}ms")]
    ElectionRange { min: u64, max: u64 },

    #[error("heartbeat interval {heartbeat}ms must be below the minimum election timeout {election_min}ms")]
    HeartbeatTooSlow { heartbeat: u64, election_min: u64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leadership_and_quorum_faults_are_retryable() {
        assert!(ConsensusError::NotLeader { known_leader: None }.is_retryable());
        assert!(ConsensusError::QuorumUnavailable { index: 1, attempts: 3 }.is_retryable());
        assert!(ConsensusError::StaleTerm { term: 1, current: 2 }.is_retryable());
        assert!(!ConsensusError::NoCommittedRule.is_retryable());
        assert!(!ConsensusError::Shutdown.is_retryable());
    }

    #[test]
    fn not_leader_message_names_leader() {
        let err = ConsensusError::NotLeader { known_leader: Some(3) };
        assert_eq!(err.to_string(), "not the leader (known leader: Some(3))");
    }
}
