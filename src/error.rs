//! Error types for plan tracking operations.
//!
//! Every variant belongs to one [`ErrorCategory`] so callers can triage a
//! failure without matching on individual variants:
//!
//! - `Input`: malformed or missing documents, bad arguments
//! - `Logic`: illegal transitions and violated invariants
//! - `Integration`: lock timeouts, lease mismatches, subprocess failures
//! - `Drift`: the source plan changed since export

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::state::PlanStatus;

/// Broad classification used for reporting and exit handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Logic,
    Integration,
    Drift,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Input => write!(f, "input"),
            ErrorCategory::Logic => write!(f, "logic"),
            ErrorCategory::Integration => write!(f, "integration"),
            ErrorCategory::Drift => write!(f, "drift"),
        }
    }
}

#[derive(Error, Debug)]
pub enum TrackerError {
    /// A state file that the operation requires does not exist
    #[error("State file not found: {path}")]
    StateNotFound { path: PathBuf },

    /// The file exists but is not a valid state document
    #[error("Invalid state document at {path}: {reason}")]
    InvalidState { path: PathBuf, reason: String },

    /// The manifest is missing, unreadable, or malformed
    #[error("Invalid manifest at {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    /// File system operation failed
    #[error("File system error at '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A caller-supplied value failed validation
    #[error("Invalid input for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    /// Configuration file could not be parsed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The requested status change is not in the transition table
    #[error("Invalid transition: {from} -> {to} (allowed: {allowed})")]
    IllegalTransition {
        from: PlanStatus,
        to: PlanStatus,
        allowed: String,
    },

    /// The operation requires a specific status
    #[error("{action} requires {expected} state, got: {actual}")]
    WrongStatus {
        action: &'static str,
        expected: String,
        actual: PlanStatus,
    },

    /// Task index outside `1..=total_tasks`
    #[error("Task {task} is out of range for plan {plan_id} (total_tasks={total_tasks})")]
    TaskOutOfRange {
        plan_id: String,
        task: u32,
        total_tasks: u32,
    },

    /// Mark-verified preconditions are not met
    #[error("Cannot mark {plan_id} verified: {reason}")]
    VerificationPrecondition { plan_id: String, reason: String },

    /// Another run holds an unexpired lease
    #[error("Plan {plan_id} is already leased by run_id={run_id} until {expires_at}")]
    LeaseHeld {
        plan_id: String,
        run_id: String,
        expires_at: DateTime<Utc>,
    },

    /// A dependency token resolves to more than one plan
    #[error("Ambiguous dependency '{token}' for {plan_id}: matches {}", .matches.join(", "))]
    AmbiguousDependency {
        token: String,
        plan_id: String,
        matches: Vec<String>,
    },

    /// A state patch was rejected
    #[error("Invalid state patch: {reason}")]
    InvalidPatch { reason: String },

    /// The per-state lock could not be acquired before the deadline
    #[error("Timed out waiting for lock {lock_path}{}", describe_holder(.holder.as_deref(), .expires_at.as_ref()))]
    LockTimeout {
        lock_path: PathBuf,
        holder: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },

    /// Lease renewal attempted by a run that does not hold the lease
    #[error("Lease on {plan_id} is held by {holder}, not {requested}")]
    LeaseMismatch {
        plan_id: String,
        holder: String,
        requested: String,
    },

    /// Lease renewal attempted while no lease exists
    #[error("No active lease on plan {plan_id}")]
    NoActiveLease { plan_id: String },

    /// Rollback could not be executed
    #[error("Rollback rejected for {plan_id}: {reason}")]
    RollbackRejected { plan_id: String, reason: String },

    /// External command could not be spawned
    #[error("Failed to run '{command}': {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Source document changed since export
    #[error("Cannot continue: source plan drift detected for {plan_id} ({source_path}). Re-export plans before execution.")]
    SourceDrift {
        plan_id: String,
        source_path: String,
    },
}

fn describe_holder(holder: Option<&str>, expires_at: Option<&DateTime<Utc>>) -> String {
    match (holder, expires_at) {
        (Some(owner), Some(expiry)) => format!(" (held by {owner} until {expiry})"),
        (Some(owner), None) => format!(" (held by {owner})"),
        _ => String::new(),
    }
}

impl TrackerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            TrackerError::StateNotFound { .. }
            | TrackerError::InvalidState { .. }
            | TrackerError::InvalidManifest { .. }
            | TrackerError::FileSystem { .. }
            | TrackerError::InvalidInput { .. }
            | TrackerError::Configuration { .. } => ErrorCategory::Input,
            TrackerError::IllegalTransition { .. }
            | TrackerError::WrongStatus { .. }
            | TrackerError::TaskOutOfRange { .. }
            | TrackerError::VerificationPrecondition { .. }
            | TrackerError::LeaseHeld { .. }
            | TrackerError::AmbiguousDependency { .. }
            | TrackerError::InvalidPatch { .. } => ErrorCategory::Logic,
            TrackerError::LockTimeout { .. }
            | TrackerError::LeaseMismatch { .. }
            | TrackerError::NoActiveLease { .. }
            | TrackerError::RollbackRejected { .. }
            | TrackerError::CommandFailed { .. } => ErrorCategory::Integration,
            TrackerError::SourceDrift { .. } => ErrorCategory::Drift,
        }
    }

    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        TrackerError::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Extension trait attaching a path to raw I/O errors.
pub trait IoResultExt<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| TrackerError::FileSystem {
            path: path.into(),
            source,
        })
    }
}

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
