//! # log
//!
//! why: manage the append-only log of rule versions that raft replicates
//! relations: owned by node.rs, entries shipped inside message.rs AppendEntries
//! what: LogEntry, ReplicationLog with 1-based indexing, checksum validation

use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::error::ConsensusError;
use crate::rule::{checksum, RuleVersion};

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The index of this entry in the log (1-indexed)
    pub index: u64,
    /// The rule version carried by this entry
    pub rule: RuleVersion,
}

impl LogEntry {
    pub fn new(term: u64, index: u64, rule: RuleVersion) -> Self {
        Self { term, index, rule }
    }

    /// Reject entries whose payload no longer matches its checksum.
    pub fn verify(&self) -> Result<(), ConsensusError> {
        if self.rule.verify() {
            return Ok(());
        }
        Err(ConsensusError::Corruption {
            index: self.index,
            expected: self.rule.checksum().to_string(),
            actual: checksum(self.rule.payload()),
        })
    }
}

/// Check a whole batch before any of it touches the log.
pub fn verify_entries(entries: &[LogEntry]) -> Result<(), ConsensusError> {
    entries.iter().try_for_each(LogEntry::verify)
}

/// Per-node sequence of entries. Index 0 is the empty position before the
/// first entry; `get(0)` is always `None` and `term_at(0)` is 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationLog {
    entries: Vec<LogEntry>,
}

impl ReplicationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn last_index(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.index)
    }

    pub fn last_term(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.term)
    }

    pub fn get(&self, index: u64) -> Option<&LogEntry> {
        if index == 0 {
            return None;
        }
        self.entries.get((index - 1) as usize)
    }

    pub fn term_at(&self, index: u64) -> u64 {
        self.get(index).map_or(0, |e| e.term)
    }

    /// Log-matching check for an AppendEntries `prev` position.
    pub fn matches(&self, prev_index: u64, prev_term: u64) -> bool {
        prev_index == 0 || self.get(prev_index).is_some_and(|e| e.term == prev_term)
    }

    /// Drop `from_index` and everything after it.
    pub fn truncate_from(&mut self, from_index: u64) {
        let keep = from_index.saturating_sub(1) as usize;
        self.entries.truncate(keep);
    }

    /// Up to `limit` entries starting at `from_index`.
    pub fn entries_from(&self, from_index: u64, limit: usize) -> Vec<LogEntry> {
        let start = from_index.max(1) as usize - 1;
        self.entries.iter().skip(start).take(limit).cloned().collect()
    }

    /// Highest rule version anywhere in the log, committed or not.
    pub fn last_rule_version(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.rule.version())
    }
}

impl Deref for ReplicationLog {
    type Target = [LogEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(term: u64, index: u64, payload: &str) -> LogEntry {
        LogEntry::new(term, index, RuleVersion::with_timestamp(index, payload, 0))
    }

    #[test]
    fn indexing_is_one_based() {
        let mut log = ReplicationLog::new();
        log.push(entry(1, 1, "a"));
        log.push(entry(2, 2, "b"));

        assert!(log.get(0).is_none());
        assert_eq!(log.get(2).unwrap().rule.payload(), "b");
        assert_eq!(log.term_at(1), 1);
        assert_eq!(log.term_at(9), 0);
        assert_eq!(log.last_index(), 2);
        assert_eq!(log.last_term(), 2);
    }

    #[test]
    fn matches_prev_position() {
        let mut log = ReplicationLog::new();
        log.push(entry(3, 1, "a"));

        assert!(log.matches(0, 0));
        assert!(log.matches(1, 3));
        assert!(!log.matches(1, 2));
        assert!(!log.matches(2, 3));
    }

    #[test]
    fn truncate_drops_suffix() {
        let mut log = ReplicationLog::new();
        for i in 1..=4 {
            log.push(entry(1, i, "x"));
        }
        log.truncate_from(3);
        assert_eq!(log.len(), 2);
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn entries_from_respects_limit() {
        let mut log = ReplicationLog::new();
        for i in 1..=5 {
            log.push(entry(1, i, "x"));
        }
        let batch = log.entries_from(2, 2);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].index, 2);
        assert_eq!(batch[1].index, 3);
        assert!(log.entries_from(6, 10).is_empty());
    }

    #[test]
    fn corrupted_entry_fails_verification() {
        let json = r#"{"term":1,"index":4,"rule":{"version":4,"payload":"Z","created_at":0,"checksum":"00"}}"#;
        let bad: LogEntry = serde_json::from_str(json).unwrap();

        match verify_entries(&[entry(1, 3, "ok"), bad]) {
            Err(ConsensusError::Corruption { index, expected, .. }) => {
                assert_eq!(index, 4);
                assert_eq!(expected, "00");
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }
}
