//! State file I/O operations
//!
//! Handles reading and writing plan state files at `_state/{plan_id}.json`.
//! Writes are atomic: the document goes to a temp file in the destination
//! directory, is synced, then renamed over the old file.

use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::error::{IoResultExt, Result, TrackerError};
use crate::fs::migrations;
use crate::models::state::PlanState;

/// A state document together with how it looked on disk.
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: PlanState,
    /// Schema version recorded in the file before migration
    pub stored_version: String,
    /// Migration steps applied while loading
    pub migrated_steps: Vec<&'static str>,
}

impl LoadedState {
    pub fn was_migrated(&self) -> bool {
        !self.migrated_steps.is_empty()
    }
}

/// Read a state file, or return None if it doesn't exist
pub fn read_state(path: &Path) -> Result<Option<PlanState>> {
    Ok(load_state(path)?.map(|loaded| loaded.state))
}

/// Read a state file that must exist
pub fn read_state_required(path: &Path) -> Result<PlanState> {
    read_state(path)?.ok_or_else(|| TrackerError::StateNotFound {
        path: path.to_path_buf(),
    })
}

/// Read a state file, migrating older schema versions in memory.
///
/// # Returns
/// * `Ok(None)` - No file at `path`
/// * `Ok(Some(_))` - Parsed (and possibly migrated) state
/// * `Err(InvalidState)` - File exists but is not a state document
pub fn load_state(path: &Path) -> Result<Option<LoadedState>> {
    if !path.exists() {
        tracing::trace!(path = %path.display(), "state miss");
        return Ok(None);
    }

    let content = fs::read_to_string(path).at_path(path)?;
    let raw: Value = serde_json::from_str(&content).map_err(|e| TrackerError::InvalidState {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let Value::Object(mut doc) = raw else {
        return Err(TrackerError::InvalidState {
            path: path.to_path_buf(),
            reason: "expected a JSON object".to_string(),
        });
    };

    let stored_version = migrations::stored_version(&doc);
    let migrated_steps = migrations::migrate_document(&mut doc);
    if !migrated_steps.is_empty() {
        tracing::warn!(
            path = %path.display(),
            stored_version = %stored_version,
            "state file uses an outdated schema; run `wavekeeper migrate` to update it"
        );
    }

    let state: PlanState =
        serde_json::from_value(Value::Object(doc)).map_err(|e| TrackerError::InvalidState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(Some(LoadedState {
        state,
        stored_version,
        migrated_steps,
    }))
}

/// Write a state file atomically, creating parent directories if needed.
///
/// Refreshes `updated_at` before serializing.
pub fn write_state(path: &Path, state: &mut PlanState) -> Result<()> {
    state.updated_at = Utc::now();
    let mut json = serde_json::to_string_pretty(state).map_err(|e| TrackerError::InvalidState {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    json.push('\n');

    write_atomic(path, json.as_bytes())?;
    tracing::debug!(path = %path.display(), status = %state.status, "state written");
    Ok(())
}

/// Replace `path` with `contents` via temp file + fsync + rename.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).at_path(parent)?;

    let mut staging = NamedTempFile::new_in(parent).at_path(parent)?;
    staging.write_all(contents).at_path(staging.path())?;
    staging.as_file().sync_all().at_path(staging.path())?;
    staging
        .persist(path)
        .map_err(|e| e.error)
        .at_path(path)?;
    Ok(())
}
