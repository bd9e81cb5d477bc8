//! # ruleraft-exec
//!
//! why: apply the committed rule to large inputs in parallel with deterministic output
//! relations: consumes ruleraft-core's RuleVersion, driven by ruleraft-cluster's ExecutionContext
//! what: shard planner, bounded rayon worker pool, ordered merge, aggregated shard failures

pub mod engine;
pub mod error;
pub mod render;
pub mod shard;

pub use engine::{FormatResult, Outcome, ParallelEngine};
pub use error::{AggregateError, ApplyError, EngineError, ShardFailure};
pub use render::render_placeholder;
pub use shard::{plan, resolve_workers, shard_bounds, DataShard};
