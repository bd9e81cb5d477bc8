//! # rule
//!
//! why: the replicated value itself - an immutable, checksummed, versioned payload
//! relations: wrapped by log.rs entries, read by ruleraft-exec when applying rules
//! what: RuleVersion, RuleId identity pair, sha-256 checksum helper

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex-encoded sha-256 of a payload.
pub fn checksum(payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// A single version of the replicated rule.
///
/// Fields are private: once built, a rule version never changes. Updating
/// the rule means committing a new version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVersion {
    version: u64,
    payload: String,
    /// Unix timestamp in milliseconds
    created_at: u64,
    checksum: String,
}

/// Identity of a rule: `(version, checksum)`, never the payload alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId {
    pub version: u64,
    pub checksum: String,
}

impl RuleVersion {
    /// Build a rule stamped with the current wall-clock time.
    pub fn new(version: u64, payload: impl Into<String>) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Self::with_timestamp(version, payload, created_at)
    }

    /// Build a rule with an explicit creation timestamp.
    pub fn with_timestamp(version: u64, payload: impl Into<String>, created_at: u64) -> Self {
        let payload = payload.into();
        let checksum = checksum(&payload);
        Self {
            version,
            payload,
            created_at,
            checksum,
        }
    }

    /// Sentinel returned before anything has committed.
    pub fn empty() -> Self {
        Self::with_timestamp(0, String::new(), 0)
    }

    pub fn is_empty(&self) -> bool {
        self.version == 0
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn id(&self) -> RuleId {
        RuleId {
            version: self.version,
            checksum: self.checksum.clone(),
        }
    }

    /// Recompute the payload hash and compare it with the stored checksum.
    pub fn verify(&self) -> bool {
        checksum(&self.payload) == self.checksum
    }
}

impl Default for RuleVersion {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_sha256_hex() {
        assert_eq!(
            checksum("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn new_rule_verifies() {
        let rule = RuleVersion::new(3, "{:>8}");
        assert_eq!(rule.version(), 3);
        assert!(rule.verify());
        assert!(rule.created_at() > 0);
    }

    #[test]
    fn empty_rule_is_sentinel() {
        let rule = RuleVersion::empty();
        assert!(rule.is_empty());
        assert_eq!(rule.payload(), "");
        assert!(rule.verify());
    }

    #[test]
    fn identity_ignores_timestamp() {
        let a = RuleVersion::with_timestamp(1, "X", 10);
        let b = RuleVersion::with_timestamp(1, "X", 20);
        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let json = r#"{"version":1,"payload":"Y","created_at":0,"checksum":"deadbeef"}"#;
        let rule: RuleVersion = serde_json::from_str(json).unwrap();
        assert!(!rule.verify());
    }
}
