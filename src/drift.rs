//! Content hashing and source drift detection

use std::fs;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{IoResultExt, Result};
use crate::fs::layout::PlansLayout;
use crate::fs::state_store::read_state;
use crate::models::state::PlanState;

/// Full SHA-256 of plan content, hex encoded.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Whether the source at `source_path` differs from what `state_path` recorded.
///
/// # Returns
/// * `false` - no state file exists, nothing to compare against
/// * `true` - the source is missing or its hash changed
pub fn check_drift(state_path: &Path, source_path: &Path) -> Result<bool> {
    let Some(state) = read_state(state_path)? else {
        return Ok(false);
    };
    if !source_path.exists() {
        return Ok(true);
    }
    let content = fs::read_to_string(source_path).at_path(source_path)?;
    Ok(content_hash(&content) != state.source_plan_hash)
}

/// Current hash of a plan's source, or `None` when the source is gone.
pub fn current_source_hash(state: &PlanState, layout: &PlansLayout) -> Result<Option<String>> {
    let source = layout.resolve(&state.source_plan_path);
    if !source.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&source).at_path(&source)?;
    Ok(Some(content_hash(&content)))
}

/// Drift that should stop execution: the source still exists and changed.
///
/// A vanished source is not treated as drift here; it is surfaced by
/// reconciliation instead.
pub fn source_changed(state: &PlanState, layout: &PlansLayout) -> Result<bool> {
    Ok(current_source_hash(state, layout)?.is_some_and(|hash| hash != state.source_plan_hash))
}
