//! # ruleraft-history
//!
//! why: keep an audit trail of committed rule versions when operators want one
//! relations: fed by ruleraft-cluster's consensus manager on every commit
//! what: HistoryStore trait, FileHistory (json on disk), InMemoryHistory, retention policy
//!
//! Retention is a deployment choice, so the consensus core never depends on
//! this crate; the manager only records into a store if one is configured.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::PathBuf;

use ruleraft_core::RuleVersion;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by history stores
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history io error: {0}")]
    Io(#[from] io::Error),

    #[error("history file is not valid json: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("stored rule version {version} fails checksum verification")]
    Corrupt { version: u64 },
}

/// How many superseded versions to keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep every committed version
    #[default]
    KeepAll,
    /// Keep only the newest `n` versions
    KeepLast(usize),
    /// Record nothing
    Disabled,
}

impl Retention {
    fn apply(self, rules: &mut Vec<RuleVersion>) {
        match self {
            Retention::KeepAll => {}
            Retention::KeepLast(n) => {
                let excess = rules.len().saturating_sub(n);
                rules.drain(..excess);
            }
            Retention::Disabled => rules.clear(),
        }
    }
}

/// trait for recording committed rule versions
///
/// versions are recorded in commit order; recording a version at or below
/// the newest stored one is a no-op, so replays after a restart are harmless
pub trait HistoryStore: Send {
    /// record a newly committed rule
    fn record(&mut self, rule: &RuleVersion) -> Result<(), HistoryError>;

    /// all retained versions, oldest first
    fn load(&self) -> Result<Vec<RuleVersion>, HistoryError>;

    /// drop everything
    fn clear(&mut self) -> Result<(), HistoryError>;

    /// newest retained version
    fn latest(&self) -> Result<Option<RuleVersion>, HistoryError> {
        Ok(self.load()?.pop())
    }

    /// a specific version, if still retained
    fn get(&self, version: u64) -> Result<Option<RuleVersion>, HistoryError> {
        Ok(self.load()?.into_iter().find(|r| r.version() == version))
    }
}

fn should_record(existing: &[RuleVersion], rule: &RuleVersion) -> bool {
    !rule.is_empty() && existing.last().map_or(true, |last| rule.version() > last.version())
}

// -- file history implementation --

/// file-based history using std::fs
///
/// stores every retained version as a json array in `history.json`
pub struct FileHistory {
    dir: PathBuf,
    retention: Retention,
}

impl FileHistory {
    /// create a file history at the given directory, creating it if needed
    pub fn new(dir: impl Into<PathBuf>, retention: Retention) -> Result<Self, HistoryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, retention })
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join("history.json")
    }

    fn write_all(&self, rules: &[RuleVersion]) -> Result<(), HistoryError> {
        let json = serde_json::to_string_pretty(rules)?;

        // atomic write: write to temp file then rename
        let temp_path = self.dir.join("history.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, self.history_path())?;
        Ok(())
    }
}

impl HistoryStore for FileHistory {
    fn record(&mut self, rule: &RuleVersion) -> Result<(), HistoryError> {
        if self.retention == Retention::Disabled {
            return Ok(());
        }
        let mut rules = self.load()?;
        if !should_record(&rules, rule) {
            debug!(version = rule.version(), "rule already recorded");
            return Ok(());
        }
        rules.push(rule.clone());
        self.retention.apply(&mut rules);
        self.write_all(&rules)
    }

    fn load(&self) -> Result<Vec<RuleVersion>, HistoryError> {
        let path = self.history_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut contents = String::new();
        File::open(&path)?.read_to_string(&mut contents)?;
        let rules: Vec<RuleVersion> = serde_json::from_str(&contents)?;

        if let Some(bad) = rules.iter().find(|r| !r.verify()) {
            warn!(version = bad.version(), path = %path.display(), "history entry failed checksum");
            return Err(HistoryError::Corrupt {
                version: bad.version(),
            });
        }
        Ok(rules)
    }

    fn clear(&mut self) -> Result<(), HistoryError> {
        match fs::remove_file(self.history_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// -- in-memory history implementation --

/// in-memory history for tests and short-lived nodes
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    rules: Vec<RuleVersion>,
    retention: Retention,
}

impl InMemoryHistory {
    pub fn new(retention: Retention) -> Self {
        Self {
            rules: Vec::new(),
            retention,
        }
    }
}

impl HistoryStore for InMemoryHistory {
    fn record(&mut self, rule: &RuleVersion) -> Result<(), HistoryError> {
        if should_record(&self.rules, rule) {
            self.rules.push(rule.clone());
            self.retention.apply(&mut self.rules);
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<RuleVersion>, HistoryError> {
        Ok(self.rules.clone())
    }

    fn clear(&mut self) -> Result<(), HistoryError> {
        self.rules.clear();
        Ok(())
    }
}
