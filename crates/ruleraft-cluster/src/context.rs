//! Applying the committed rule to caller data.
//!
//! A call takes one snapshot of the committed rule and every shard of that
//! call uses it, even if a newer version commits halfway through.

use std::time::Duration;

use ruleraft_core::{ConsensusError, RuleVersion};
use ruleraft_exec::{plan, ParallelEngine};
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::ClusterError;

pub struct ExecutionContext<T> {
    client: ClusterClient,
    engine: ParallelEngine<T>,
    default_workers: usize,
}

impl<T: Send + Sync> ExecutionContext<T> {
    pub fn new(client: ClusterClient, engine: ParallelEngine<T>) -> Self {
        Self {
            client,
            engine,
            default_workers: 0,
        }
    }

    /// Workers used when a call passes `0`. `0` here means one per core.
    pub fn with_default_workers(mut self, workers: usize) -> Self {
        self.default_workers = workers;
        self
    }

    pub fn client(&self) -> &ClusterClient {
        &self.client
    }

    pub fn current_rule(&self) -> RuleVersion {
        self.client.current_rule()
    }

    fn committed_rule(&self) -> Result<RuleVersion, ClusterError> {
        let rule = self.client.current_rule();
        if rule.is_empty() {
            return Err(ConsensusError::NoCommittedRule.into());
        }
        Ok(rule)
    }

    /// Apply the committed rule to every item, output in input order.
    ///
    /// Runs on the engine's thread pool and blocks the caller until done;
    /// from async code wrap it in `spawn_blocking`.
    pub fn format(&self, data: Vec<T>, worker_limit: usize) -> Result<Vec<String>, ClusterError> {
        let rule = self.committed_rule()?;
        let workers = if worker_limit == 0 {
            self.default_workers
        } else {
            worker_limit
        };
        debug!(items = data.len(), workers, version = rule.version(), "formatting batch");
        let shards = plan(data, workers);
        Ok(self.engine.run(shards, &rule, workers)?)
    }

    pub fn format_one(&self, item: &T) -> Result<String, ClusterError> {
        let rule = self.committed_rule()?;
        Ok(self.engine.apply_one(item, &rule)?)
    }

    /// Commit `payload` as the next rule and wait until this node sees it.
    pub async fn set_rule(&self, payload: impl Into<String>, timeout: Duration) -> Result<RuleVersion, ClusterError> {
        let proposed = self.client.propose(payload).await?;
        self.client.await_commit(proposed.version(), timeout).await
    }
}
