//! # engine
//!
//! why: run the rule over every shard on a bounded pool and merge in input order
//! relations: consumes shard.rs shards, returns error.rs failures
//! what: ParallelEngine, FormatResult/Outcome per shard, one cached rayon pool sized to the work

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use ruleraft_core::RuleVersion;
use tracing::{debug, warn};

use crate::error::{AggregateError, ApplyError, EngineError, ShardFailure};
use crate::shard::{resolve_workers, DataShard};

type ApplyFn<T> = dyn Fn(&T, &RuleVersion) -> Result<String, ApplyError> + Send + Sync;

/// How a shard finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Output of one shard task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatResult {
    pub shard_id: u32,
    /// Empty when the shard failed
    pub output: Vec<String>,
    pub rule_used: RuleVersion,
    pub outcome: Outcome,
}

impl FormatResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}

/// Applies a caller-supplied function to every item of every shard.
pub struct ParallelEngine<T> {
    apply: Arc<ApplyFn<T>>,
    /// Pool from the last run, with its thread count
    pool: Mutex<Option<(usize, Arc<ThreadPool>)>>,
}

impl<T: Send + Sync> ParallelEngine<T> {
    pub fn new<F>(apply: F) -> Self
    where
        F: Fn(&T, &RuleVersion) -> Result<String, ApplyError> + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
            pool: Mutex::new(None),
        }
    }

    /// Reuse the cached pool if it has `workers` threads, otherwise replace it.
    /// Runs still holding the old pool keep it alive until they finish.
    fn pool(&self, workers: usize) -> Result<Arc<ThreadPool>, EngineError> {
        let mut cached = self.pool.lock();
        if let Some((size, pool)) = cached.as_ref() {
            if *size == workers {
                return Ok(Arc::clone(pool));
            }
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("ruleraft-worker-{i}"))
            .build()
            .map_err(|e| EngineError::Pool(e.to_string()))?;
        let pool = Arc::new(pool);
        debug!(workers, "built worker pool");
        *cached = Some((workers, Arc::clone(&pool)));
        Ok(pool)
    }

    /// Threads in the cached pool, if one has been built.
    pub fn pool_size(&self) -> Option<usize> {
        self.pool.lock().as_ref().map(|(size, _)| *size)
    }

    /// Apply the rule to one item on the calling thread.
    pub fn apply_one(&self, item: &T, rule: &RuleVersion) -> Result<String, ApplyError> {
        (self.apply)(item, rule)
    }

    /// Run every shard and return the raw per-shard results in shard order.
    pub fn run_detailed(
        &self,
        shards: Vec<DataShard<T>>,
        rule: &RuleVersion,
        worker_limit: usize,
    ) -> Result<Vec<FormatResult>, EngineError> {
        // never more threads than shards
        let workers = resolve_workers(worker_limit).min(shards.len().max(1));
        let pool = self.pool(workers)?;
        debug!(shards = shards.len(), workers, version = rule.version(), "running shards");

        let apply = &self.apply;
        let mut results: Vec<FormatResult> = pool.install(|| {
            shards
                .into_par_iter()
                .map(|shard| run_shard(apply.as_ref(), shard, rule.clone()))
                .collect()
        });
        results.sort_by_key(|r| r.shard_id);
        Ok(results)
    }

    /// Run every shard and concatenate the output in input order. Any failed
    /// shard fails the whole call; partial output is never returned.
    pub fn run(
        &self,
        shards: Vec<DataShard<T>>,
        rule: &RuleVersion,
        worker_limit: usize,
    ) -> Result<Vec<String>, EngineError> {
        let total_shards = shards.len() as u32;
        let results = self.run_detailed(shards, rule, worker_limit)?;
        merge(results, total_shards)
    }
}

fn run_shard<T>(apply: &ApplyFn<T>, shard: DataShard<T>, rule: RuleVersion) -> FormatResult {
    let shard_id = shard.shard_id();
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        shard
            .data()
            .iter()
            .enumerate()
            .map(|(i, item)| apply(item, &rule).map_err(|e| format!("item {i}: {e}")))
            .collect::<Result<Vec<String>, String>>()
    }));

    let (output, outcome) = match attempt {
        Ok(Ok(output)) => (output, Outcome::Success),
        Ok(Err(reason)) => (Vec::new(), Outcome::Failure(reason)),
        Err(payload) => (
            Vec::new(),
            Outcome::Failure(format!("panicked: {}", panic_message(payload.as_ref()))),
        ),
    };
    FormatResult {
        shard_id,
        output,
        rule_used: rule,
        outcome,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic".to_string()
}

fn merge(results: Vec<FormatResult>, total_shards: u32) -> Result<Vec<String>, EngineError> {
    let failures: Vec<ShardFailure> = results
        .iter()
        .filter_map(|r| match &r.outcome {
            Outcome::Success => None,
            Outcome::Failure(reason) => Some(ShardFailure {
                shard_id: r.shard_id,
                reason: reason.clone(),
            }),
        })
        .collect();

    if !failures.is_empty() {
        warn!(failed = ?failures.iter().map(|f| f.shard_id).collect::<Vec<_>>(), total_shards, "shard run failed");
        return Err(AggregateError {
            total_shards,
            failures,
        }
        .into());
    }

    Ok(results.into_iter().flat_map(|r| r.output).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::plan;

    fn doubling() -> ParallelEngine<u32> {
        ParallelEngine::new(|item: &u32, rule: &RuleVersion| Ok(format!("{}:{}", rule.version(), item * 2)))
    }

    #[test]
    fn output_keeps_input_order() {
        let engine = doubling();
        let rule = RuleVersion::new(3, "double");

        let out = engine.run(plan((0..100).collect(), 7), &rule, 3).unwrap();

        assert_eq!(out.len(), 100);
        assert_eq!(out[0], "3:0");
        assert_eq!(out[99], "3:198");
    }

    #[test]
    fn pool_is_reused_for_the_same_size() {
        let engine = doubling();
        let rule = RuleVersion::new(1, "x");
        engine.run(plan(vec![1, 2], 2), &rule, 2).unwrap();
        let first = engine.pool.lock().as_ref().map(|(_, p)| Arc::as_ptr(p));
        engine.run(plan(vec![3, 4], 2), &rule, 2).unwrap();
        let second = engine.pool.lock().as_ref().map(|(_, p)| Arc::as_ptr(p));
        assert_eq!(first, second);
    }

    #[test]
    fn varying_limits_keep_thread_count_bounded() {
        let engine = doubling();
        let rule = RuleVersion::new(1, "x");

        for limit in 1..=64 {
            let out = engine.run(plan(vec![1, 2, 3], limit), &rule, limit).unwrap();
            assert_eq!(out.len(), 3);
            assert!(engine.pool_size().unwrap() <= 3);
        }

        let threads = engine
            .pool
            .lock()
            .as_ref()
            .map(|(_, p)| p.current_num_threads());
        assert_eq!(threads, Some(3));
    }

    #[test]
    fn huge_limit_on_tiny_input_builds_one_thread() {
        let engine = doubling();
        let rule = RuleVersion::new(1, "x");
        engine.run(plan(vec![7], 10_000), &rule, 10_000).unwrap();
        assert_eq!(engine.pool_size(), Some(1));
    }

    #[test]
    fn panic_is_captured_as_failure() {
        let engine = ParallelEngine::new(|item: &u32, _: &RuleVersion| {
            if *item == 5 {
                panic!("boom");
            }
            Ok(item.to_string())
        });
        let rule = RuleVersion::new(1, "x");

        let results = engine.run_detailed(plan((0..10).collect(), 2), &rule, 2).unwrap();

        assert!(results[0].is_success());
        assert_eq!(results[1].outcome, Outcome::Failure("panicked: boom".into()));
        assert!(results[1].output.is_empty());
    }
}
