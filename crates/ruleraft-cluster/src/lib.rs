//! # ruleraft-cluster
//!
//! why: run the rule consensus on tokio and expose it to applications
//! relations: drives ruleraft-core, executes with ruleraft-exec, records into ruleraft-history
//! what: consensus manager event loop, transport seam, cluster client, execution context, config, logging

pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod telemetry;
pub mod transport;

pub use client::ClusterClient;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{parse_peers, ClientConfig, EngineConfig, HistoryConfig, NodeConfig};
pub use context::ExecutionContext;
pub use error::{ClusterError, TransportError};
pub use manager::{ConsensusHandle, ConsensusManager};
pub use transport::{InMemoryNetwork, Transport};
