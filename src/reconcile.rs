//! Read-only reconciliation of a plans directory
//!
//! Walks the manifest and reports anything an operator should look at:
//! missing state, source drift, unverified work, stale executions, expired
//! leases and past lease recoveries. Nothing is written.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::drift::current_source_hash;
use crate::error::Result;
use crate::fs::layout::PlansLayout;
use crate::fs::manifest_store::read_manifest;
use crate::fs::state_store::read_state;
use crate::models::manifest::{ManifestEntry, NO_STATE};
use crate::models::state::{PlanState, PlanStatus, RecoveryEvent};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingState,
    Drift,
    VerificationMissing,
    StaleExecution,
    ExpiredLease,
    LeaseRecovery,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReconcileIssue {
    pub plan_id: String,
    pub kind: IssueKind,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DriftWarning {
    pub plan_id: String,
    pub source_path: String,
    pub expected_hash: String,
    pub actual_hash: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReconcileReport {
    pub issues: Vec<ReconcileIssue>,
    pub drift_warnings: Vec<DriftWarning>,
    /// Count per live status, plus `no-state` and `total`
    pub summary: BTreeMap<String, usize>,
    pub plan_states: Vec<PlanState>,
}

impl ReconcileReport {
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &ReconcileIssue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }

    fn push(&mut self, plan_id: &str, kind: IssueKind, description: String) {
        self.issues.push(ReconcileIssue {
            plan_id: plan_id.to_string(),
            kind,
            description,
        });
    }
}

/// Build a reconciliation report for the plans directory of `layout`.
///
/// # Arguments
/// * `stale_after` - An executing plan whose last run is older is stale
/// * `now` - Reference time for staleness and lease expiry
pub fn reconcile(layout: &PlansLayout, stale_after: Duration, now: DateTime<Utc>) -> Result<ReconcileReport> {
    let manifest = read_manifest(&layout.manifest_path())?;
    let mut report = ReconcileReport::default();
    report.summary.insert("total".to_string(), 0);
    report.summary.insert(NO_STATE.to_string(), 0);

    for entry in &manifest.plans {
        *report.summary.entry("total".to_string()).or_default() += 1;
        let state_path = layout.state_path(&entry.plan_id);

        let Some(state) = read_state(&state_path)? else {
            *report.summary.entry(NO_STATE.to_string()).or_default() += 1;
            report.push(
                &entry.plan_id,
                IssueKind::MissingState,
                format!("No state file found at {}", layout.display_relative(&state_path)),
            );
            continue;
        };
        *report.summary.entry(state.status.to_string()).or_default() += 1;

        check_drift(&mut report, entry, &state, layout)?;
        check_state(&mut report, &state, stale_after, now);
        report.plan_states.push(state);
    }

    tracing::debug!(
        plans = manifest.plans.len(),
        issues = report.issues.len(),
        "reconciliation finished"
    );
    Ok(report)
}

fn check_drift(
    report: &mut ReconcileReport,
    entry: &ManifestEntry,
    state: &PlanState,
    layout: &PlansLayout,
) -> Result<()> {
    let Some(actual) = current_source_hash(state, layout)? else {
        return Ok(());
    };
    if actual == state.source_plan_hash {
        return Ok(());
    }

    report.push(
        &entry.plan_id,
        IssueKind::Drift,
        format!(
            "Source plan changed since export. Expected hash {}..., got {}...",
            short_hash(&state.source_plan_hash),
            short_hash(&actual)
        ),
    );
    report.drift_warnings.push(DriftWarning {
        plan_id: entry.plan_id.clone(),
        source_path: entry.source_path.clone(),
        expected_hash: state.source_plan_hash.clone(),
        actual_hash: actual,
    });
    Ok(())
}

fn check_state(report: &mut ReconcileReport, state: &PlanState, stale_after: Duration, now: DateTime<Utc>) {
    let plan_id = state.plan_id.as_str();

    if !state.completed_tasks.is_empty() && !state.has_verification_results() {
        let tasks: Vec<String> = state.completed_tasks.iter().map(u32::to_string).collect();
        report.push(
            plan_id,
            IssueKind::VerificationMissing,
            format!(
                "Tasks [{}] completed but no verification results recorded",
                tasks.join(", ")
            ),
        );
    }

    if state.status == PlanStatus::Executing {
        if let Some(last_run) = state.last_run_at {
            let age = now - last_run;
            if age > stale_after {
                report.push(
                    plan_id,
                    IssueKind::StaleExecution,
                    format!(
                        "Executing for {:.1}h with no progress (threshold: {}h)",
                        age.num_seconds() as f64 / 3600.0,
                        stale_after.num_hours()
                    ),
                );
            }
        }

        if let Some(lease) = state.lease.as_ref().filter(|lease| lease.is_expired_at(now)) {
            report.push(
                plan_id,
                IssueKind::ExpiredLease,
                format!(
                    "Lease held by run_id={} expired at {}. Next executor will perform recovery takeover.",
                    lease.run_id,
                    lease.expires_at.to_rfc3339()
                ),
            );
        }
    }

    for note in &state.recovery_notes {
        let what = match note.event {
            RecoveryEvent::LeaseExpiredTakeover => "Lease takeover",
            RecoveryEvent::LeaseHandoff => "Lease handoff",
        };
        report.push(
            plan_id,
            IssueKind::LeaseRecovery,
            format!(
                "{what} at {}: previous run_id={}, new run_id={}",
                note.taken_over_at.to_rfc3339(),
                note.previous_run_id,
                note.new_run_id
            ),
        );
    }
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drift::content_hash;
    use crate::fs::manifest_store::write_manifest;
    use crate::fs::state_store::write_state;
    use crate::models::manifest::Manifest;
    use crate::models::state::{Lease, RecoveryNote};
    use std::fs;
    use tempfile::TempDir;

    fn entry(plan_id: &str, source_path: &str) -> ManifestEntry {
        ManifestEntry {
            plan_id: plan_id.to_string(),
            wave: 1,
            phase: "01-setup".to_string(),
            plan_number: 1,
            priority: 1011,
            plan_path: String::new(),
            state_path: String::new(),
            source_path: source_path.to_string(),
            source_hash: String::new(),
            depends_on: vec![],
            batch_size: 3,
            batching: None,
            status: "pending".to_string(),
            execution_contract: None,
        }
    }

    fn setup() -> (TempDir, PlansLayout) {
        let temp_dir = TempDir::new().unwrap();
        let layout = PlansLayout::new(temp_dir.path().join("docs/plans"), temp_dir.path());
        (temp_dir, layout)
    }

    #[test]
    fn test_missing_state_and_drift() {
        let (temp_dir, layout) = setup();
        fs::write(temp_dir.path().join("a.md"), "edited").unwrap();

        let manifest = Manifest::new("", vec![entry("a", "a.md"), entry("b", "b.md")]);
        write_manifest(&layout.manifest_path(), &manifest).unwrap();
        let mut state = PlanState::new("a", "a.md", content_hash("original"), 2);
        write_state(&layout.state_path("a"), &mut state).unwrap();

        let report = reconcile(&layout, Duration::hours(24), Utc::now()).unwrap();
        assert_eq!(report.issues_of(IssueKind::MissingState).count(), 1);
        assert_eq!(report.issues_of(IssueKind::Drift).count(), 1);
        assert_eq!(report.drift_warnings[0].actual_hash, content_hash("edited"));
        assert_eq!(report.summary["total"], 2);
        assert_eq!(report.summary[NO_STATE], 1);
        assert_eq!(report.summary["pending"], 1);
        assert_eq!(report.plan_states.len(), 1);
    }

    #[test]
    fn test_execution_issues() {
        let (_temp_dir, layout) = setup();
        let manifest = Manifest::new("", vec![entry("a", "a.md")]);
        write_manifest(&layout.manifest_path(), &manifest).unwrap();

        let now = Utc::now();
        let mut state = PlanState::new("a", "a.md", "hash", 2);
        state.status = PlanStatus::Executing;
        state.completed_tasks.insert(1);
        state.last_run_at = Some(now - Duration::hours(30));
        state.lease = Some(Lease {
            run_id: "old".to_string(),
            acquired_at: now - Duration::hours(30),
            expires_at: now - Duration::hours(29),
        });
        state.recovery_notes.push(RecoveryNote {
            event: RecoveryEvent::LeaseHandoff,
            previous_run_id: "older".to_string(),
            previous_acquired_at: None,
            previous_expires_at: None,
            taken_over_at: now - Duration::hours(30),
            new_run_id: "old".to_string(),
        });
        write_state(&layout.state_path("a"), &mut state).unwrap();

        let report = reconcile(&layout, Duration::hours(24), now).unwrap();
        assert_eq!(report.issues_of(IssueKind::VerificationMissing).count(), 1);
        assert_eq!(report.issues_of(IssueKind::StaleExecution).count(), 1);
        assert_eq!(report.issues_of(IssueKind::ExpiredLease).count(), 1);
        assert_eq!(report.issues_of(IssueKind::LeaseRecovery).count(), 1);
        // missing source is not drift
        assert_eq!(report.issues_of(IssueKind::Drift).count(), 0);

        let relaxed = reconcile(&layout, Duration::hours(48), now).unwrap();
        assert_eq!(relaxed.issues_of(IssueKind::StaleExecution).count(), 0);
    }

    #[test]
    fn test_expired_lease_on_blocked_plan_not_reported() {
        let (_temp_dir, layout) = setup();
        let manifest = Manifest::new("", vec![entry("a", "a.md")]);
        write_manifest(&layout.manifest_path(), &manifest).unwrap();

        let now = Utc::now();
        let mut state = PlanState::new("a", "a.md", "hash", 1);
        state.status = PlanStatus::Blocked;
        state.lease = Some(Lease {
            run_id: "r".to_string(),
            acquired_at: now - Duration::hours(2),
            expires_at: now - Duration::hours(1),
        });
        write_state(&layout.state_path("a"), &mut state).unwrap();

        let report = reconcile(&layout, Duration::hours(24), now).unwrap();
        assert!(report.issues.is_empty());
    }
}
