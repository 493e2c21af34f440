//! Manifest file I/O

use std::fs;
use std::path::Path;

use crate::error::{Result, TrackerError};
use crate::fs::state_store::write_atomic;
use crate::models::manifest::Manifest;

/// Read `_manifest.json`. A missing or malformed manifest is an input error.
pub fn read_manifest(path: &Path) -> Result<Manifest> {
    let content = fs::read_to_string(path).map_err(|e| TrackerError::InvalidManifest {
        path: path.to_path_buf(),
        reason: format!("unable to read manifest: {e}"),
    })?;
    serde_json::from_str(&content).map_err(|e| TrackerError::InvalidManifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write the manifest atomically.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let mut json =
        serde_json::to_string_pretty(manifest).map_err(|e| TrackerError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    json.push('\n');
    write_atomic(path, json.as_bytes())?;
    tracing::debug!(path = %path.display(), plans = manifest.plans.len(), "manifest written");
    Ok(())
}
