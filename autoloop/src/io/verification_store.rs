//! Verification ledger (`.autoloop/verification.json`): task id -> attempts in order.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::verification::{MAX_VERIFICATION_ATTEMPTS, VerificationRecord};
use crate::io::atomic::write_json_atomic;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VerificationLedger {
    records: BTreeMap<String, Vec<VerificationRecord>>,
}

impl VerificationLedger {
    pub fn records(&self, task_id: &str) -> &[VerificationRecord] {
        self.records.get(task_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn attempts(&self, task_id: &str) -> u32 {
        u32::try_from(self.records(task_id).len()).unwrap_or(u32::MAX)
    }

    /// Attempt number the next check would carry.
    pub fn next_attempt(&self, task_id: &str) -> u32 {
        self.attempts(task_id).saturating_add(1)
    }

    pub fn is_exhausted(&self, task_id: &str) -> bool {
        self.attempts(task_id) >= MAX_VERIFICATION_ATTEMPTS
    }

    pub fn latest(&self, task_id: &str) -> Option<&VerificationRecord> {
        self.records(task_id).last()
    }

    /// Guidance from the latest attempt, if it failed.
    pub fn pending_guidance(&self, task_id: &str) -> Option<&str> {
        self.latest(task_id)
            .filter(|record| !record.passed() && !record.guidance.trim().is_empty())
            .map(|record| record.guidance.as_str())
    }

    /// Tasks whose attempts reached the ceiling without a pass.
    pub fn exhausted_tasks(&self) -> BTreeSet<String> {
        self.records
            .iter()
            .filter(|(_, records)| {
                records.len() >= MAX_VERIFICATION_ATTEMPTS as usize
                    && !records.last().is_some_and(VerificationRecord::passed)
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn push(&mut self, record: VerificationRecord) {
        self.records
            .entry(record.task_id.clone())
            .or_default()
            .push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Load the ledger, treating a missing or malformed file as empty.
pub fn load_ledger_or_default(path: &Path) -> VerificationLedger {
    if !path.exists() {
        return VerificationLedger::default();
    }
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("read ledger {}", path.display()))
        .and_then(|contents| {
            serde_json::from_str(&contents)
                .with_context(|| format!("parse ledger {}", path.display()))
        });
    match parsed {
        Ok(ledger) => ledger,
        Err(err) => {
            warn!(err = %format!("{err:#}"), "treating malformed verification ledger as empty");
            VerificationLedger::default()
        }
    }
}

pub fn write_ledger(path: &Path, ledger: &VerificationLedger) -> Result<()> {
    write_json_atomic(path, ledger)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::core::verification::TestOutcome;

    fn record(task_id: &str, attempt: u32, passed: bool) -> VerificationRecord {
        VerificationRecord {
            task_id: task_id.to_string(),
            attempt,
            behavior_passed: passed,
            quality_passed: true,
            outcome: TestOutcome::None,
            failures: Vec::new(),
            guidance: if passed { String::new() } else { "fix it".to_string() },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn attempts_count_per_task() {
        let mut ledger = VerificationLedger::default();
        assert_eq!(ledger.next_attempt("a"), 1);
        ledger.push(record("a", 1, false));
        ledger.push(record("a", 2, false));
        ledger.push(record("b", 1, true));
        assert_eq!(ledger.attempts("a"), 2);
        assert_eq!(ledger.next_attempt("a"), 3);
        assert_eq!(ledger.pending_guidance("a"), Some("fix it"));
        assert_eq!(ledger.pending_guidance("b"), None);
        assert!(!ledger.is_exhausted("a"));

        ledger.push(record("a", 3, false));
        assert!(ledger.is_exhausted("a"));
        assert_eq!(ledger.exhausted_tasks(), BTreeSet::from(["a".to_string()]));
    }

    #[test]
    fn passing_last_attempt_is_not_exhausted() {
        let mut ledger = VerificationLedger::default();
        ledger.push(record("a", 1, false));
        ledger.push(record("a", 2, false));
        ledger.push(record("a", 3, true));
        assert!(ledger.exhausted_tasks().is_empty());
    }

    #[test]
    fn persists_and_tolerates_corruption() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("verification.json");
        let mut ledger = VerificationLedger::default();
        ledger.push(record("a", 1, false));
        write_ledger(&path, &ledger).expect("write");
        assert_eq!(load_ledger_or_default(&path), ledger);

        fs::write(&path, "{not json").expect("corrupt");
        assert!(load_ledger_or_default(&path).is_empty());
    }
}
