//! Lifecycle operations on plan state files
//!
//! Every mutation is one critical section: lock the state file, read it,
//! validate and mutate in memory, write atomically, release. A closure that
//! fails leaves the file untouched.

mod batch;
mod maintenance;


use std::borrow::Cow;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::config::TrackerConfig;
use crate::context::OpContext;
use crate::drift;
use crate::error::{Result, TrackerError};
use crate::export::{export_plans, ParsedPlan};
use crate::fs::artifacts::{self, RollbackOutput};
use crate::fs::layout::PlansLayout;
use crate::fs::locking::{FileLockManager, StateMutex};
use crate::fs::manifest_store::read_manifest;
use crate::fs::state_store::{read_state_required, write_state};
use crate::models::manifest::{Manifest, ManifestEntry};
use crate::models::state::{ExecutorInfo, PlanState, Severity, StatePatch, VerifyTier};
use crate::reconcile::{self as reconciliation, ReconcileReport};
use crate::revision::{GitRevisionProbe, RevisionProbe};
use crate::rollback::{self, RollbackReport, RollbackSpec};
use crate::scheduler::{self, EligibilityFilter};

pub use batch::{BlockedPlan, ExecuteOptions, ExecuteReport};
pub use maintenance::{MigrationFailure, MigrationReport, UNLOCK_REASON};

/// One verification run reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationInput {
    pub tier: VerifyTier,
    pub command: String,
    pub exit_code: i32,
    /// Log written by the executor; one is allocated when absent
    pub log_path: Option<String>,
}

/// Entry point for every state-changing operation on a plans directory.
pub struct Tracker<M = FileLockManager, R = GitRevisionProbe> {
    config: TrackerConfig,
    layout: PlansLayout,
    mutex: M,
    probe: R,
}

impl Tracker {
    /// Tracker backed by lock files and the git CLI.
    pub fn new(config: TrackerConfig) -> Self {
        let mutex = FileLockManager::new(config.lock);
        Self::with_parts(config, mutex, GitRevisionProbe)
    }
}

impl<M: StateMutex, R: RevisionProbe> Tracker<M, R> {
    pub fn with_parts(config: TrackerConfig, mutex: M, probe: R) -> Self {
        let layout = config.layout();
        Self {
            config,
            layout,
            mutex,
            probe,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn layout(&self) -> &PlansLayout {
        &self.layout
    }

    /// Resolve a plan reference: an existing path or anything ending in
    /// `.json` is taken as a state file, everything else as a plan id.
    pub fn state_path(&self, plan: &str) -> PathBuf {
        let candidate = Path::new(plan);
        if candidate.extension().is_some_and(|ext| ext == "json") || candidate.is_file() {
            candidate.to_path_buf()
        } else {
            self.layout.state_path(plan)
        }
    }

    /// Read a state without taking the lock.
    pub fn read(&self, state_path: &Path) -> Result<PlanState> {
        read_state_required(state_path)
    }

    /// Eligible plans in priority order, read against live state.
    pub fn eligible(&self, ctx: &OpContext, filter: &EligibilityFilter) -> Result<Vec<ManifestEntry>> {
        let _span = ctx.span().entered();
        let manifest = read_manifest(&self.layout.manifest_path())?;
        let statuses = scheduler::load_statuses(&manifest, &self.layout)?;
        let eligible = scheduler::eligible_plans(&manifest, &statuses, filter)?;
        Ok(eligible.into_iter().cloned().collect())
    }

    pub fn next_plan(&self, ctx: &OpContext) -> Result<Option<ManifestEntry>> {
        let _span = ctx.span().entered();
        let manifest = read_manifest(&self.layout.manifest_path())?;
        let statuses = scheduler::load_statuses(&manifest, &self.layout)?;
        Ok(scheduler::next_plan(&manifest, &statuses)?.cloned())
    }

    /// Create missing states for parsed plans and write the manifest.
    pub fn export(&self, ctx: &OpContext, plans: &[ParsedPlan]) -> Result<Manifest> {
        let _span = ctx.span().entered();
        export_plans(&self.layout, &self.mutex, plans)
    }

    /// Read-only report using the configured staleness threshold.
    pub fn reconcile(&self, ctx: &OpContext) -> Result<ReconcileReport> {
        let _span = ctx.span().entered();
        reconciliation::reconcile(&self.layout, self.config.stale_execution_after, Utc::now())
    }

    /// Move a pending plan to `executing` under a new lease.
    ///
    /// The run id comes from `executor.run_id` when provided, otherwise a
    /// fresh one is generated.
    pub fn start(
        &self,
        ctx: &OpContext,
        state_path: &Path,
        executor: Option<ExecutorInfo>,
    ) -> Result<PlanState> {
        let run_id = run_id_for(executor.as_ref());
        let layout = self.layout_for(state_path);
        self.mutate(ctx, state_path, |state, now| {
            let revision = self.probe.current_revision(layout.project_root());
            state.start(&run_id, executor, self.config.lease_duration, revision, now)?;
            ensure_no_drift(state, &layout)
        })
    }

    /// Move a blocked or failed plan back to `executing`.
    pub fn resume(
        &self,
        ctx: &OpContext,
        state_path: &Path,
        executor: Option<ExecutorInfo>,
    ) -> Result<PlanState> {
        let run_id = run_id_for(executor.as_ref());
        let layout = self.layout_for(state_path);
        self.mutate(ctx, state_path, |state, now| {
            state.resume(&run_id, executor, self.config.lease_duration, now)?;
            ensure_no_drift(state, &layout)
        })
    }

    pub fn complete_task(&self, ctx: &OpContext, state_path: &Path, task: u32) -> Result<PlanState> {
        self.mutate(ctx, state_path, |state, now| state.complete_task(task, now))
    }

    pub fn advance_step(&self, ctx: &OpContext, state_path: &Path, step: i32) -> Result<PlanState> {
        self.mutate(ctx, state_path, |state, now| state.advance_step(step, now))
    }

    pub fn renew_lease(&self, ctx: &OpContext, state_path: &Path, run_id: &str) -> Result<PlanState> {
        self.mutate(ctx, state_path, |state, now| {
            state.renew_lease(run_id, self.config.lease_duration, now)
        })
    }

    /// Record a verification result and make sure its log exists.
    ///
    /// A failing run also leaves a debug fixture under `_debug/`.
    pub fn record_verification(
        &self,
        ctx: &OpContext,
        state_path: &Path,
        input: VerificationInput,
    ) -> Result<PlanState> {
        let layout = self.layout_for(state_path);
        self.mutate(ctx, state_path, |state, now| {
            state.ensure_executing("record-verification")?;
            let log_path = artifacts::ensure_verification_log(
                &layout,
                &state.plan_id,
                input.tier,
                &input.command,
                input.exit_code,
                input.log_path.as_deref(),
            )?;
            if input.exit_code != 0 {
                artifacts::write_debug_fixture(
                    &layout,
                    &state.plan_id,
                    input.tier,
                    &input.command,
                    &log_path,
                )?;
            }
            tracing::debug!(
                tier = %input.tier,
                exit_code = input.exit_code,
                log_path = %log_path,
                "verification recorded"
            );
            state.record_verification(input.tier, input.command, input.exit_code, log_path, now)
        })
    }

    pub fn mark_verified(&self, ctx: &OpContext, state_path: &Path) -> Result<PlanState> {
        let layout = self.layout_for(state_path);
        self.mutate(ctx, state_path, |state, now| {
            let revision = self.probe.current_revision(layout.project_root());
            state.mark_verified(revision, now)
        })
    }

    pub fn mark_failed(&self, ctx: &OpContext, state_path: &Path, reason: &str) -> Result<PlanState> {
        self.mutate(ctx, state_path, |state, now| state.mark_failed(reason, now))
    }

    /// Block the plan. An unrecognised severity is recorded as `high`.
    pub fn mark_blocked(
        &self,
        ctx: &OpContext,
        state_path: &Path,
        reason: &str,
        severity: &str,
    ) -> Result<PlanState> {
        let severity = severity.parse::<Severity>().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "falling back to default severity");
            Severity::default()
        });
        self.mutate(ctx, state_path, |state, now| {
            state.mark_blocked(reason, severity, now)
        })
    }

    /// Apply a validated patch.
    pub fn update_state(&self, ctx: &OpContext, state_path: &Path, patch: StatePatch) -> Result<PlanState> {
        self.mutate(ctx, state_path, |state, now| patch.apply_to(state, now))
    }

    /// Run a plan's rollback command and record the outcome.
    ///
    /// The command runs outside the state lock; only the bookkeeping
    /// afterwards (`last_run_at`, and `failure_reason` on a non-zero exit
    /// when none is set) is written under it.
    ///
    /// # Arguments
    /// * `override_json` - Contract given by the caller instead of the manifest's
    pub fn rollback(
        &self,
        ctx: &OpContext,
        state_path: &Path,
        override_json: Option<&str>,
    ) -> Result<RollbackReport> {
        let _span = ctx.span().entered();
        let state = read_state_required(state_path)?;
        let plan_id = state.plan_id.as_str();
        let layout = self.layout_for(state_path);

        let manifest = read_manifest(&layout.manifest_path())?;
        let entry = manifest
            .entry(plan_id)
            .ok_or_else(|| TrackerError::invalid_input("plan_id", format!("plan {plan_id} not found in manifest")))?;

        let recorded = entry
            .execution_contract
            .as_ref()
            .and_then(|contract| contract.rollback.as_ref());
        let contract = rollback::select_contract(plan_id, override_json, recorded)?;
        let spec = RollbackSpec::parse(plan_id, &contract, layout.project_root())?;
        spec.ensure_allowed(plan_id, &self.config.rollback_allowlist)?;

        let command = spec.display_command();
        let run = spec.run()?;
        let log_path = artifacts::write_rollback_log(
            &layout,
            plan_id,
            &RollbackOutput {
                command: &command,
                exit_code: run.exit_code,
                stdout: &run.stdout,
                stderr: &run.stderr,
            },
        )?;
        if run.exit_code != 0 {
            tracing::warn!(plan_id, exit_code = run.exit_code, "rollback command failed");
        }

        self.mutate(ctx, state_path, |state, now| {
            state.last_run_at = Some(now);
            if run.exit_code != 0 && state.failure_reason.is_none() {
                state.failure_reason = Some(format!(
                    "Rollback failed with exit code {}",
                    run.exit_code
                ));
            }
            Ok(())
        })?;

        Ok(RollbackReport {
            plan_id: plan_id.to_string(),
            argv: spec.argv,
            command,
            exit_code: run.exit_code,
            log_path,
            stdout: run.stdout,
            stderr: run.stderr,
        })
    }

    /// Lock, read, mutate and write one state file.
    fn mutate<F>(&self, ctx: &OpContext, state_path: &Path, f: F) -> Result<PlanState>
    where
        F: FnOnce(&mut PlanState, DateTime<Utc>) -> Result<()>,
    {
        let _span = ctx.span().entered();
        let _guard = self.mutex.lock(state_path)?;

        let mut state = read_state_required(state_path)?;
        f(&mut state, Utc::now())?;
        write_state(state_path, &mut state)?;

        tracing::info!(
            plan_id = %state.plan_id,
            status = %state.status,
            "state written"
        );
        Ok(state)
    }

    /// Layout owning `state_path`.
    ///
    /// A state file outside the configured plans directory carries its own
    /// plans dir and project root; sources, logs and the manifest are
    /// resolved against those.
    pub fn layout_for(&self, state_path: &Path) -> Cow<'_, PlansLayout> {
        if self.layout.owns_state(state_path) {
            Cow::Borrowed(&self.layout)
        } else {
            let layout = PlansLayout::for_state_path(state_path);
            tracing::debug!(
                plans_dir = %layout.plans_dir().display(),
                project_root = %layout.project_root().display(),
                "state file outside configured plans dir"
            );
            Cow::Owned(layout)
        }
    }
}

/// Refuse to continue when the source still exists and has changed.
fn ensure_no_drift(state: &PlanState, layout: &PlansLayout) -> Result<()> {
    if drift::source_changed(state, layout)? {
        return Err(TrackerError::SourceDrift {
            plan_id: state.plan_id.clone(),
            source_path: state.source_plan_path.clone(),
        });
    }
    Ok(())
}

fn run_id_for(executor: Option<&ExecutorInfo>) -> String {
    executor
        .and_then(|info| info.run_id.as_deref())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}
