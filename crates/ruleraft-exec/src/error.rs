//! # error
//!
//! why: report per-item and per-batch failures without losing which shard broke
//! relations: ApplyError comes from caller-supplied rule functions, EngineError from engine.rs
//! what: ApplyError, ShardFailure, AggregateError, EngineError

use std::fmt;

use thiserror::Error;

/// Failure raised by a rule-application function for one item.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ApplyError(String);

impl ApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// One failed shard and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub shard_id: u32,
    pub reason: String,
}

/// Every shard that failed in a run, in shard order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AggregateError {
    pub total_shards: u32,
    pub failures: Vec<ShardFailure>,
}

impl AggregateError {
    pub fn failed_shards(&self) -> Vec<u32> {
        self.failures.iter().map(|f| f.shard_id).collect()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} shards failed",
            self.failures.len(),
            self.total_shards
        )?;
        for failure in &self.failures {
            write!(f, "; shard {}: {}", failure.shard_id, failure.reason)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("failed to build worker pool: {0}")]
    Pool(String),
}
