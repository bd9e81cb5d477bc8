//! # message
//!
//! why: define the raft rpc shapes exchanged between nodes
//! relations: produced and consumed by node.rs, carried by ruleraft-cluster's Transport
//! what: RequestVote, AppendEntries and their responses, addressed Envelope

use serde::{Deserialize, Serialize};

use crate::log::LogEntry;
use crate::NodeId;

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    /// Request a vote during leader election
    RequestVote {
        term: u64,
        candidate_id: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },
    /// Response to a vote request
    VoteResponse { term: u64, vote_granted: bool },
    /// Replicate log entries (also serves as heartbeat when entries is empty)
    AppendEntries {
        term: u64,
        leader_id: NodeId,
        prev_log_index: u64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    /// Response to AppendEntries; `match_index` is the last index known to
    /// match the leader when `success` is true
    AppendEntriesResponse {
        term: u64,
        success: bool,
        match_index: u64,
    },
}

impl RaftMessage {
    pub fn term(&self) -> u64 {
        match self {
            Self::RequestVote { term, .. }
            | Self::VoteResponse { term, .. }
            | Self::AppendEntries { term, .. }
            | Self::AppendEntriesResponse { term, .. } => *term,
        }
    }

    /// Requests expect a reply; responses do not.
    pub fn is_request(&self) -> bool {
        matches!(self, Self::RequestVote { .. } | Self::AppendEntries { .. })
    }

    /// Wire encoding for transport implementations.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// An outgoing message addressed to one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: RaftMessage,
}
