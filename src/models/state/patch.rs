//! Closed, validated partial update of a [`PlanState`].
//!
//! Each field distinguishes "absent" (leave untouched) from an explicit
//! `null` (clear) through `Option<Option<T>>`. Unknown keys are rejected at
//! deserialization time.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::error::{Result, TrackerError};

use super::types::{
    Cursor, ExecutorInfo, Lease, PlanState, PlanStatus, RecoveryNote, Severity,
    VerificationResult, VerifyTier,
};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatePatch {
    #[serde(default)]
    pub status: Option<PlanStatus>,
    #[serde(default)]
    pub completed_tasks: Option<Vec<u32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub verification: Option<Option<BTreeMap<VerifyTier, OneOrMany>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub executor: Option<Option<ExecutorInfo>>,
    #[serde(default, deserialize_with = "double_option")]
    pub blocked_reason: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub blocked_severity: Option<Option<Severity>>,
    #[serde(default, deserialize_with = "double_option")]
    pub failure_reason: Option<Option<String>>,
    #[serde(default, rename = "lock", deserialize_with = "double_option")]
    pub lease: Option<Option<Lease>>,
    #[serde(default)]
    pub recovery_notes: Option<Vec<RecoveryNote>>,
    #[serde(default, deserialize_with = "double_option")]
    pub cursor: Option<Option<Cursor>>,
    #[serde(default, deserialize_with = "double_option")]
    pub verify_quick: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_error_output_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_sha_before: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub git_sha_after: Option<Option<String>>,
    #[serde(default)]
    pub touched_paths: Option<Vec<String>>,
}

/// Older documents stored a single result object per tier.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    Many(Vec<VerificationResult>),
    One(VerificationResult),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<VerificationResult> {
        match self {
            OneOrMany::Many(results) => results,
            OneOrMany::One(result) => vec![result],
        }
    }
}

impl StatePatch {
    /// Parse a patch from a JSON object.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| TrackerError::InvalidPatch {
            reason: e.to_string(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.completed_tasks.is_none()
            && self.last_run_at.is_none()
            && self.verification.is_none()
            && self.executor.is_none()
            && self.blocked_reason.is_none()
            && self.blocked_severity.is_none()
            && self.failure_reason.is_none()
            && self.lease.is_none()
            && self.recovery_notes.is_none()
            && self.cursor.is_none()
            && self.verify_quick.is_none()
            && self.last_error_output_path.is_none()
            && self.git_sha_before.is_none()
            && self.git_sha_after.is_none()
            && self.touched_paths.is_none()
    }

    /// Apply the patch to `state`.
    ///
    /// The patch is applied to a copy which is validated as a whole; `state`
    /// is only replaced when every field checks out. A status change goes
    /// through the transition table and its side effects run before the
    /// explicit field values, so the patch can still override them.
    pub fn apply_to(self, state: &mut PlanState, now: DateTime<Utc>) -> Result<()> {
        let mut next = state.clone();

        if let Some(status) = self.status {
            if status != next.status {
                next.try_transition(status, now)?;
            }
        }
        if let Some(tasks) = self.completed_tasks {
            next.completed_tasks = tasks.into_iter().collect::<BTreeSet<_>>();
        }
        if let Some(value) = self.last_run_at {
            next.last_run_at = value;
        }
        if let Some(value) = self.verification {
            next.verification = value
                .unwrap_or_default()
                .into_iter()
                .map(|(tier, results)| (tier, results.into_vec()))
                .collect();
        }
        if let Some(value) = self.executor {
            next.executor = value;
        }
        if let Some(value) = self.blocked_reason {
            next.blocked_reason = value;
        }
        if let Some(value) = self.blocked_severity {
            next.blocked_severity = value;
        }
        if let Some(value) = self.failure_reason {
            next.failure_reason = value;
        }
        if let Some(value) = self.lease {
            next.lease = value;
        }
        if let Some(notes) = self.recovery_notes {
            next.recovery_notes = notes;
        }
        if let Some(value) = self.cursor {
            next.cursor = value;
        }
        if let Some(value) = self.verify_quick {
            next.verify_quick = value;
        }
        if let Some(value) = self.last_error_output_path {
            next.last_error_output_path = value;
        }
        if let Some(value) = self.git_sha_before {
            next.git_sha_before = value;
        }
        if let Some(value) = self.git_sha_after {
            next.git_sha_after = value;
        }
        if let Some(paths) = self.touched_paths {
            next.touched_paths = paths;
        }

        next.check_invariants().map_err(|e| TrackerError::InvalidPatch {
            reason: e.to_string(),
        })?;
        next.updated_at = now;
        *state = next;
        Ok(())
    }
}

/// Deserialize a present field, including an explicit `null`, as `Some(..)`.
fn double_option<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
