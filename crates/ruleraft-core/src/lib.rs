//! # ruleraft-core
//!
//! why: keep a single versioned rule consistent across a cluster with raft
//! relations: driven by ruleraft-cluster's event loop, rules consumed by ruleraft-exec
//! what: rule versions, replication log, rpc messages, pure election/replication state machine

pub mod config;
pub mod error;
pub mod log;
pub mod message;
pub mod node;
pub mod rule;

pub use config::RaftConfig;
pub use error::{ConfigError, ConsensusError};
pub use log::{LogEntry, ReplicationLog};
pub use message::{Envelope, RaftMessage};
pub use node::{NodeState, NodeStatus, RaftNode, Step};
pub use rule::{checksum, RuleId, RuleVersion};

/// Identifier of a node in the cluster.
pub type NodeId = u64;
