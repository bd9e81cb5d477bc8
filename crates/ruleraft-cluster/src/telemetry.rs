//! Logging setup.
//!
//! `RUST_LOG` controls levels (default `info`), e.g.
//! `RUST_LOG=ruleraft_core=debug,ruleraft_cluster=info`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global fmt subscriber filtered by `RUST_LOG`.
///
/// Fails if a global subscriber is already set.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
