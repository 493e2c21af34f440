//! Verification logs, debug fixtures and rollback logs under the plans dir.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::error::{IoResultExt, Result};
use crate::fs::layout::PlansLayout;
use crate::models::state::VerifyTier;

/// Filename-safe UTC timestamp with microseconds.
fn stamp() -> String {
    Utc::now().format("%Y%m%dT%H%M%S%6fZ").to_string()
}

/// Make sure a log file exists for a verification run.
///
/// Uses `requested` (relative to the project root) when given, otherwise
/// allocates `_logs/<plan_id>/<tier>-<stamp>.log`. Existing files are never
/// overwritten; a missing one gets a short header describing the run.
///
/// # Returns
/// The log path as it should be recorded in state (project-relative when
/// it lies inside the project)
pub fn ensure_verification_log(
    layout: &PlansLayout,
    plan_id: &str,
    tier: VerifyTier,
    command: &str,
    exit_code: i32,
    requested: Option<&str>,
) -> Result<String> {
    let path = match requested.map(str::trim).filter(|p| !p.is_empty()) {
        Some(requested) => layout.resolve(requested),
        None => layout
            .logs_dir(plan_id)
            .join(format!("{tier}-{}.log", stamp())),
    };

    if !path.exists() {
        create_parent(&path)?;
        let body = format!(
            "# Verification ({tier})\nRecorded at: {}\nCommand: {command}\nExit code: {exit_code}\n",
            Utc::now().to_rfc3339()
        );
        fs::write(&path, body).at_path(&path)?;
    }

    Ok(layout.display_relative(&path))
}

#[derive(Debug, Serialize)]
struct DebugFixture<'a> {
    plan_id: &'a str,
    tier: VerifyTier,
    command: &'a str,
    reproduce: &'a str,
    log_path: &'a str,
    recorded_at: String,
}

/// Save a reproduction fixture for a failed verification at
/// `_debug/<plan_id>/<tier>-<stamp>.json`.
pub fn write_debug_fixture(
    layout: &PlansLayout,
    plan_id: &str,
    tier: VerifyTier,
    command: &str,
    log_path: &str,
) -> Result<PathBuf> {
    let path = layout
        .debug_dir(plan_id)
        .join(format!("{tier}-{}.json", stamp()));
    let fixture = DebugFixture {
        plan_id,
        tier,
        command,
        reproduce: command,
        log_path,
        recorded_at: Utc::now().to_rfc3339(),
    };

    create_parent(&path)?;
    let json = serde_json::to_string_pretty(&fixture).map_err(std::io::Error::other).at_path(&path)?;
    fs::write(&path, json).at_path(&path)?;
    tracing::debug!(path = %path.display(), "debug fixture written");
    Ok(path)
}

/// Captured output of a rollback command.
pub struct RollbackOutput<'a> {
    pub command: &'a str,
    pub exit_code: i32,
    pub stdout: &'a str,
    pub stderr: &'a str,
}

/// Write `_logs/<plan_id>/rollback-<stamp>.log` and return its recorded path.
pub fn write_rollback_log(
    layout: &PlansLayout,
    plan_id: &str,
    output: &RollbackOutput<'_>,
) -> Result<String> {
    let path = layout
        .logs_dir(plan_id)
        .join(format!("rollback-{}.log", stamp()));
    create_parent(&path)?;

    let body = format!(
        "# Rollback Execution\nRecorded at: {}\nCommand: {}\nExit code: {}\n\n## STDOUT\n{}\n\n## STDERR\n{}\n",
        Utc::now().to_rfc3339(),
        output.command,
        output.exit_code,
        output.stdout.trim_end(),
        output.stderr.trim_end(),
    );
    fs::write(&path, body).at_path(&path)?;
    Ok(layout.display_relative(&path))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at_path(parent)?;
    }
    Ok(())
}
