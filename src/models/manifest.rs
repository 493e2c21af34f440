//! Manifest: the ordered, derived index of every exported plan.
//!
//! Statuses mirrored here are informational only. The scheduler and every
//! lifecycle operation read live status from the state files.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{PlanStatus, CURRENT_SCHEMA_VERSION};

/// Summary key for entries whose state file is missing.
pub const NO_STATE: &str = "no-state";

pub const DEFAULT_BATCH_SIZE: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManifestEntry {
    pub plan_id: String,
    pub wave: u32,
    pub phase: String,
    pub plan_number: u32,
    pub priority: u64,
    pub plan_path: String,
    pub state_path: String,
    pub source_path: String,
    pub source_hash: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching: Option<Vec<Vec<u32>>>,
    /// Mirror of the state file status, or `no-state`
    #[serde(default = "default_mirror_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_contract: Option<ExecutionContract>,
}

/// Structured execution metadata a plan may declare.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionContract {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<String>,
    /// Raw rollback contract; validated only when a rollback is run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<serde_json::Value>,
}

impl ManifestEntry {
    /// Ordering key: waves first, then phase number, then plan number.
    pub fn compute_priority(wave: u32, phase: &str, plan_number: u32) -> u64 {
        u64::from(wave) * 1000 + u64::from(phase_number(phase)) * 10 + u64::from(plan_number)
    }

    pub fn mirrored_status(&self) -> Option<PlanStatus> {
        self.status.parse().ok()
    }
}

/// Leading digits of a phase name: `"02-homepage"` is phase 2, `"setup"` is 0.
pub fn phase_number(phase: &str) -> u32 {
    let trimmed = phase.trim_start();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);
    digits.parse().unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default = "default_version")]
    pub version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub project_root: String,
    #[serde(default)]
    pub plans: Vec<ManifestEntry>,
    #[serde(default)]
    pub summary: BTreeMap<String, usize>,
}

impl Manifest {
    pub fn new(project_root: impl Into<String>, plans: Vec<ManifestEntry>) -> Self {
        let mut manifest = Self {
            version: CURRENT_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            project_root: project_root.into(),
            plans,
            summary: BTreeMap::new(),
        };
        manifest.sort_by_priority();
        manifest.compute_summary();
        manifest
    }

    /// Stable sort so equal priorities keep their export order.
    pub fn sort_by_priority(&mut self) {
        self.plans.sort_by_key(|entry| entry.priority);
    }

    /// Count entries per mirrored status, plus `no-state` and `total`.
    ///
    /// Every status key is present even when its count is zero.
    pub fn compute_summary(&mut self) -> &BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = PlanStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        counts.insert(NO_STATE.to_string(), 0);
        counts.insert("total".to_string(), self.plans.len());

        for entry in &self.plans {
            let key = match entry.mirrored_status() {
                Some(status) => status.as_str(),
                None => NO_STATE,
            };
            *counts.entry(key.to_string()).or_default() += 1;
        }

        self.summary = counts;
        &self.summary
    }

    pub fn entry(&self, plan_id: &str) -> Option<&ManifestEntry> {
        self.plans.iter().find(|entry| entry.plan_id == plan_id)
    }
}

fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

fn default_mirror_status() -> String {
    PlanStatus::Pending.to_string()
}

fn default_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(plan_id: &str, wave: u32, phase: &str, plan_number: u32, status: &str) -> ManifestEntry {
        ManifestEntry {
            plan_id: plan_id.to_string(),
            wave,
            phase: phase.to_string(),
            plan_number,
            priority: ManifestEntry::compute_priority(wave, phase, plan_number),
            plan_path: format!("docs/plans/{plan_id}.md"),
            state_path: format!("docs/plans/_state/{plan_id}.json"),
            source_path: format!(".planning/phases/{phase}/{plan_number:02}-PLAN.md"),
            source_hash: "h".to_string(),
            depends_on: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            batching: None,
            status: status.to_string(),
            execution_contract: None,
        }
    }

    #[test]
    fn test_phase_number_extraction() {
        assert_eq!(phase_number("02-homepage"), 2);
        assert_eq!(phase_number("10"), 10);
        assert_eq!(phase_number("setup"), 0);
        assert_eq!(phase_number(""), 0);
        assert_eq!(phase_number("  07-api"), 7);
        assert_eq!(phase_number("99999999999-overflow"), 0);
    }

    #[test]
    fn test_priority_formula() {
        assert_eq!(ManifestEntry::compute_priority(2, "03-api", 4), 2034);
        assert_eq!(ManifestEntry::compute_priority(1, "misc", 1), 1001);
    }

    #[test]
    fn test_manifest_sorted_and_summarised() {
        let manifest = Manifest::new(
            "/repo",
            vec![
                entry("b", 2, "01-core", 1, "pending"),
                entry("a", 1, "01-core", 2, "verified"),
                entry("c", 1, "01-core", 1, "no-state"),
            ],
        );

        let ids: Vec<&str> = manifest.plans.iter().map(|e| e.plan_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(manifest.summary["total"], 3);
        assert_eq!(manifest.summary["verified"], 1);
        assert_eq!(manifest.summary["pending"], 1);
        assert_eq!(manifest.summary[NO_STATE], 1);
        assert_eq!(manifest.summary["failed"], 0);
    }

    #[test]
    fn test_entry_defaults_on_read() {
        let raw = r#"{
            "plan_id": "p", "wave": 1, "phase": "01", "plan_number": 1, "priority": 1011,
            "plan_path": "a", "state_path": "b", "source_path": "c", "source_hash": "d"
        }"#;
        let parsed: ManifestEntry = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.batch_size, 3);
        assert_eq!(parsed.status, "pending");
        assert!(parsed.depends_on.is_empty());
    }
}
