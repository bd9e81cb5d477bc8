//! # comprehensive history tests
//!
//! why: verify committed-rule history behaves under restarts, retention and tampering
//! relations: tests ruleraft-history crate
//! what: ordering, idempotent replays, retention policies, corruption detection, edge cases

use ruleraft_core::RuleVersion;
use ruleraft_history::{FileHistory, HistoryError, HistoryStore, InMemoryHistory, Retention};
use std::fs;
use tempfile::tempdir;

fn rule(version: u64) -> RuleVersion {
    RuleVersion::with_timestamp(version, format!("{{:>{version}}}"), 1_000 + version)
}

// =============================================================================
// SECTION 1: IN-MEMORY HISTORY TESTS
// =============================================================================

mod in_memory {
    use super::*;

    #[test]
    fn new_history_is_empty() {
        let history = InMemoryHistory::new(Retention::KeepAll);
        assert!(history.load().unwrap().is_empty());
        assert!(history.latest().unwrap().is_none());
    }

    #[test]
    fn replayed_versions_are_ignored() {
        let mut history = InMemoryHistory::new(Retention::KeepAll);

        history.record(&rule(1)).unwrap();
        history.record(&rule(2)).unwrap();
        history.record(&rule(2)).unwrap();
        history.record(&rule(1)).unwrap();

        assert_eq!(history.load().unwrap().len(), 2);
    }

    #[test]
    fn get_finds_retained_version() {
        let mut history = InMemoryHistory::new(Retention::KeepAll);
        history.record(&rule(1)).unwrap();
        history.record(&rule(5)).unwrap();

        assert_eq!(history.get(5).unwrap(), Some(rule(5)));
        assert_eq!(history.get(3).unwrap(), None);
    }

    #[test]
    fn keep_last_one_holds_only_latest() {
        let mut history = InMemoryHistory::new(Retention::KeepLast(1));
        for v in 1..=3 {
            history.record(&rule(v)).unwrap();
        }
        assert_eq!(history.load().unwrap(), vec![rule(3)]);
    }

    #[test]
    fn disabled_records_nothing() {
        let mut history = InMemoryHistory::new(Retention::Disabled);
        history.record(&rule(1)).unwrap();
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let mut history = InMemoryHistory::new(Retention::KeepAll);
        history.record(&rule(1)).unwrap();
        history.clear().unwrap();
        assert!(history.load().unwrap().is_empty());
    }
}

// =============================================================================
// SECTION 2: FILE HISTORY TESTS
// =============================================================================

mod file_history {
    use super::*;

    #[test]
    fn creates_missing_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let history = FileHistory::new(&nested, Retention::KeepAll).unwrap();

        assert!(nested.exists());
        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn preserves_rule_identity_on_disk() {
        let dir = tempdir().unwrap();
        let mut history = FileHistory::new(dir.path(), Retention::KeepAll).unwrap();
        let original = rule(7);

        history.record(&original).unwrap();

        let loaded = history.latest().unwrap().unwrap();
        assert_eq!(loaded.id(), original.id());
        assert_eq!(loaded.created_at(), original.created_at());
        assert!(loaded.verify());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let mut history = FileHistory::new(dir.path(), Retention::KeepAll).unwrap();

        history.record(&rule(1)).unwrap();

        assert!(dir.path().join("history.json").exists());
        assert!(!dir.path().join("history.tmp").exists());
    }

    #[test]
    fn disabled_writes_no_file() {
        let dir = tempdir().unwrap();
        let mut history = FileHistory::new(dir.path(), Retention::Disabled).unwrap();

        history.record(&rule(1)).unwrap();

        assert!(!dir.path().join("history.json").exists());
    }

    #[test]
    fn tampered_file_reports_corruption() {
        let dir = tempdir().unwrap();
        let mut history = FileHistory::new(dir.path(), Retention::KeepAll).unwrap();
        history.record(&rule(1)).unwrap();

        let path = dir.path().join("history.json");
        let contents = fs::read_to_string(&path).unwrap();
        fs::write(&path, contents.replace("{:>1}", "{:<1}")).unwrap();

        match history.load() {
            Err(HistoryError::Corrupt { version }) => assert_eq!(version, 1),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn garbage_file_reports_serde_error() {
        let dir = tempdir().unwrap();
        let history = FileHistory::new(dir.path(), Retention::KeepAll).unwrap();
        fs::write(dir.path().join("history.json"), "not json").unwrap();

        assert!(matches!(history.load(), Err(HistoryError::Serde(_))));
    }

    #[test]
    fn clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut history = FileHistory::new(dir.path(), Retention::KeepAll).unwrap();
        history.record(&rule(1)).unwrap();

        history.clear().unwrap();
        history.clear().unwrap();

        assert!(history.load().unwrap().is_empty());
    }

    #[test]
    fn retention_parses_from_config_json() {
        let keep: Retention = serde_json::from_str(r#"{"keep_last": 5}"#).unwrap();
        assert_eq!(keep, Retention::KeepLast(5));
        let all: Retention = serde_json::from_str(r#""keep_all""#).unwrap();
        assert_eq!(all, Retention::KeepAll);
    }
}
