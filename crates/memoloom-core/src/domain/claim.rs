//! Claimant identity and the value written into lock keys.
//!
//! # ULID を使う理由
//! - 調整なしで複数ノード・複数プロセスが生成できる
//! - 時刻でソート可能なので、どの claim が先だったか後から追える

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identity of one worker process.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClaimantId(Ulid);

impl ClaimantId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for ClaimantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "claimant-{}", self.0)
    }
}

/// Value stored under a lock key. Permanent until an explicit reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub claimant: ClaimantId,
    pub pid: u32,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimRecord {
    pub fn now(claimant: ClaimantId) -> Self {
        Self {
            claimant,
            pid: std::process::id(),
            claimed_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimants_are_distinct_and_prefixed() {
        let a = ClaimantId::generate();
        let b = ClaimantId::generate();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("claimant-"));
    }

    #[test]
    fn claim_record_serializes_claimant_as_ulid_string() {
        let ulid = Ulid::new();
        let record = ClaimRecord::now(ClaimantId::from_ulid(ulid));
        let v = serde_json::to_value(&record).unwrap();
        assert_eq!(v["claimant"], ulid.to_string());
        assert_eq!(v["pid"], std::process::id());

        let back: ClaimRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back.claimant.as_ulid(), ulid);
    }
}
