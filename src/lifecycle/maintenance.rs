//! Operator actions and bulk upkeep of a plans directory

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::context::OpContext;
use crate::error::{Result, TrackerError};
use crate::fs::locking::StateMutex;
use crate::fs::manifest_store::{read_manifest, write_manifest};
use crate::fs::state_store::{load_state, read_state, write_state};
use crate::models::manifest::{Manifest, NO_STATE};
use crate::models::state::{PlanState, PlanStatus, CURRENT_SCHEMA_VERSION};
use crate::revision::RevisionProbe;

use super::{ensure_no_drift, run_id_for, Tracker};

/// Failure reason recorded when an operator forces a lease release.
pub const UNLOCK_REASON: &str = "manual unlock: stale lease released";

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MigrationReport {
    pub migrated: usize,
    pub current: usize,
    pub errors: Vec<MigrationFailure>,
    /// Whether the manifest version was bumped
    pub manifest_updated: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigrationFailure {
    pub path: PathBuf,
    pub error: String,
}

impl<M: StateMutex, R: RevisionProbe> Tracker<M, R> {
    /// Release a stuck lease and hand the plan to a fresh run.
    ///
    /// An executing plan is failed first with [`UNLOCK_REASON`]; the plan is
    /// then resumed under a newly generated run id. Both steps happen in one
    /// critical section, so a refused resume leaves the file as it was.
    pub fn force_unlock(&self, ctx: &OpContext, state_path: &Path) -> Result<PlanState> {
        let run_id = run_id_for(None);
        let layout = self.layout_for(state_path);
        self.mutate(ctx, state_path, |state, now| {
            if state.status == PlanStatus::Executing {
                state.mark_failed(UNLOCK_REASON, now)?;
                tracing::warn!(plan_id = %state.plan_id, "executing plan failed by manual unlock");
            }
            let executor = state.executor.clone();
            state.resume(&run_id, executor, self.config.lease_duration, now)?;
            ensure_no_drift(state, &layout)
        })
    }

    /// Re-mirror live statuses into the manifest and rewrite it.
    pub fn refresh(&self, ctx: &OpContext) -> Result<Manifest> {
        let _span = ctx.span().entered();
        let manifest_path = self.layout.manifest_path();
        let mut manifest = read_manifest(&manifest_path)?;

        for entry in &mut manifest.plans {
            entry.status = match read_state(&self.layout.state_path(&entry.plan_id))? {
                Some(state) => state.status.to_string(),
                None => NO_STATE.to_string(),
            };
        }
        manifest.compute_summary();
        write_manifest(&manifest_path, &manifest)?;

        tracing::info!(plans = manifest.plans.len(), "manifest refreshed");
        Ok(manifest)
    }

    /// Rewrite every state file stored at an older schema version.
    ///
    /// Files are handled one at a time under their own lock; a file that
    /// cannot be migrated is reported and the rest continue.
    pub fn migrate(&self, ctx: &OpContext) -> Result<MigrationReport> {
        let _span = ctx.span().entered();
        let state_dir = self.layout.state_dir();
        if !state_dir.is_dir() {
            return Err(TrackerError::invalid_input(
                "plans_dir",
                format!("no state directory at {}", state_dir.display()),
            ));
        }

        let pattern = state_dir.join("*.json");
        let paths: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| TrackerError::invalid_input("plans_dir", format!("invalid state path pattern: {e}")))?
            .filter_map(|entry| entry.ok())
            .collect();

        let mut report = MigrationReport::default();
        for path in paths {
            match self.migrate_one(&path) {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.current += 1,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "state migration failed");
                    report.errors.push(MigrationFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        let manifest_path = self.layout.manifest_path();
        if manifest_path.exists() {
            match read_manifest(&manifest_path) {
                Ok(mut manifest) if manifest.version != CURRENT_SCHEMA_VERSION => {
                    manifest.version = CURRENT_SCHEMA_VERSION.to_string();
                    write_manifest(&manifest_path, &manifest)?;
                    report.manifest_updated = true;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "could not update manifest version"),
            }
        }

        tracing::info!(
            migrated = report.migrated,
            current = report.current,
            errors = report.errors.len(),
            "migration finished"
        );
        Ok(report)
    }

    fn migrate_one(&self, path: &Path) -> Result<bool> {
        let _guard = self.mutex.lock(path)?;
        let Some(loaded) = load_state(path)? else {
            return Ok(false);
        };
        if !loaded.was_migrated() {
            return Ok(false);
        }

        let mut state = loaded.state;
        state.check_invariants()?;
        write_state(path, &mut state)?;
        tracing::debug!(
            path = %path.display(),
            from = %loaded.stored_version,
            steps = ?loaded.migrated_steps,
            "state migrated"
        );
        Ok(true)
    }
}
