use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::TrackerError;

/// Schema version written into every state file.
pub const CURRENT_SCHEMA_VERSION: &str = "3.1";

/// Authoritative per-plan execution record.
///
/// Stored as one JSON document per plan under `_state/<plan_id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanState {
    pub plan_id: String,
    pub source_plan_path: String,
    pub source_plan_hash: String,
    pub status: PlanStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_tasks: BTreeSet<u32>,
    #[serde(default)]
    pub total_tasks: u32,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Append-only results per tier
    #[serde(default, deserialize_with = "null_as_default")]
    pub verification: BTreeMap<VerifyTier, Vec<VerificationResult>>,
    #[serde(default)]
    pub executor: Option<ExecutorInfo>,
    #[serde(default)]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub blocked_severity: Option<Severity>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Logical ownership of the plan by one executor run.
    ///
    /// Persisted under the historical `lock` key. Unrelated to the short-lived
    /// lock file that guards a single read-modify-write cycle.
    #[serde(default, rename = "lock")]
    pub lease: Option<Lease>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub recovery_notes: Vec<RecoveryNote>,
    #[serde(default)]
    pub cursor: Option<Cursor>,
    /// Exact command that reproduces the first passing quick verification
    #[serde(default)]
    pub verify_quick: Option<String>,
    #[serde(default)]
    pub last_error_output_path: Option<String>,
    #[serde(default)]
    pub git_sha_before: Option<String>,
    #[serde(default)]
    pub git_sha_after: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub touched_paths: Vec<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Status of a plan in the execution lifecycle.
///
/// State machine transitions:
/// - `Pending` -> `Executing` (start)
/// - `Executing` -> `Verified` | `Failed` | `Blocked`
/// - `Blocked` -> `Executing` (resume)
/// - `Failed` -> `Executing` (retry)
/// - `Verified` is a terminal state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Executing,
    Blocked,
    Verified,
    Failed,
}

impl PlanStatus {
    pub const ALL: [PlanStatus; 5] = [
        PlanStatus::Pending,
        PlanStatus::Executing,
        PlanStatus::Blocked,
        PlanStatus::Verified,
        PlanStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Executing => "executing",
            PlanStatus::Blocked => "blocked",
            PlanStatus::Verified => "verified",
            PlanStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanStatus {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PlanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| {
                TrackerError::invalid_input(
                    "status",
                    format!("unknown status '{s}' (valid: pending, executing, blocked, verified, failed)"),
                )
            })
    }
}

/// Resumable position inside a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cursor {
    pub task: u32,
    pub step: i32,
}

impl Cursor {
    /// Step value signalling that every task is finished
    pub const ALL_DONE: i32 = -1;

    pub fn new(task: u32, step: i32) -> Self {
        Self { task, step }
    }

    pub fn is_finished(&self) -> bool {
        self.step == Self::ALL_DONE
    }
}

/// Long-lived claim by one executor run on a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub run_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// A new run acquired a lease whose holder had let it expire
    LeaseExpiredTakeover,
    /// An operator resume displaced a still-active lease
    LeaseHandoff,
}

/// Audit entry written whenever lease ownership changes hands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecoveryNote {
    pub event: RecoveryEvent,
    pub previous_run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_acquired_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_expires_at: Option<DateTime<Utc>>,
    pub taken_over_at: DateTime<Utc>,
    pub new_run_id: String,
}

/// Verification tier names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum VerifyTier {
    Quick,
    Full,
    Smoke,
}

impl VerifyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerifyTier::Quick => "quick",
            VerifyTier::Full => "full",
            VerifyTier::Smoke => "smoke",
        }
    }
}

impl fmt::Display for VerifyTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerifyTier {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quick" => Ok(VerifyTier::Quick),
            "full" => Ok(VerifyTier::Full),
            "smoke" => Ok(VerifyTier::Smoke),
            _ => Err(TrackerError::invalid_input(
                "tier",
                format!("unknown verification tier '{s}' (valid: quick, full, smoke)"),
            )),
        }
    }
}

/// One recorded verification run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationResult {
    pub command: String,
    pub exit_code: i32,
    #[serde(default)]
    pub log_path: String,
    #[serde(default)]
    pub ran_at: Option<DateTime<Utc>>,
}

impl VerificationResult {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Severity attached to a blocked plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Parse a severity, falling back to `High` for anything unrecognised.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
            Severity::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Severity {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            _ => Err(TrackerError::invalid_input(
                "severity",
                format!("unknown severity '{s}' (valid: critical, high, medium, low)"),
            )),
        }
    }
}

/// Who is executing the plan, as reported by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Any additional caller-defined keys
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_schema_version() -> String {
    CURRENT_SCHEMA_VERSION.to_string()
}

/// Treat an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
