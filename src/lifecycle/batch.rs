//! Blocked plan listing and batch starts over the eligible set

use std::fs;

use serde::Serialize;

use crate::context::OpContext;
use crate::error::{IoResultExt, Result};
use crate::fs::locking::StateMutex;
use crate::fs::manifest_store::read_manifest;
use crate::fs::state_store::read_state;
use crate::models::state::{ExecutorInfo, PlanStatus, Severity};
use crate::revision::RevisionProbe;
use crate::scheduler::{self, EligibilityFilter};

use super::Tracker;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BlockedPlan {
    pub plan_id: String,
    pub wave: u32,
    pub severity: Severity,
    pub reason: String,
    /// Contents of `_blockers/<plan_id>.md` when one was rendered
    pub blocker_file: Option<String>,
}

/// How a batch start picks and stops.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub filter: EligibilityFilter,
    pub max_plans: usize,
    /// Only report what would be started
    pub dry_run: bool,
    /// Lift `max_plans` to the whole eligible set and stop at the first
    /// blocked plan instead
    pub until_blocked: bool,
    pub executor: Option<ExecutorInfo>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            filter: EligibilityFilter::default(),
            max_plans: 1,
            dry_run: false,
            until_blocked: false,
            executor: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExecuteReport {
    pub dry_run: bool,
    /// Plans chosen for this batch, in priority order
    pub selected: Vec<String>,
    pub started: Vec<String>,
    /// Blocked plans that stopped the batch
    pub halted_by: Vec<String>,
}

impl<M: StateMutex, R: RevisionProbe> Tracker<M, R> {
    /// Every blocked plan in the manifest, in manifest order.
    pub fn blocked_plans(&self, ctx: &OpContext) -> Result<Vec<BlockedPlan>> {
        let _span = ctx.span().entered();
        let manifest = read_manifest(&self.layout.manifest_path())?;

        let mut blocked = Vec::new();
        for entry in &manifest.plans {
            let Some(state) = read_state(&self.layout.state_path(&entry.plan_id))? else {
                continue;
            };
            if state.status != PlanStatus::Blocked {
                continue;
            }
            let blocker_path = self.layout.blocker_path(&entry.plan_id);
            let blocker_file = if blocker_path.is_file() {
                Some(fs::read_to_string(&blocker_path).at_path(&blocker_path)?)
            } else {
                None
            };
            blocked.push(BlockedPlan {
                plan_id: entry.plan_id.clone(),
                wave: entry.wave,
                severity: state.blocked_severity.unwrap_or_default(),
                reason: state.blocked_reason.unwrap_or_default(),
                blocker_file,
            });
        }
        Ok(blocked)
    }

    /// Start eligible plans in priority order.
    ///
    /// With `until_blocked`, nothing starts while any plan is blocked, and the
    /// batch stops as soon as one becomes blocked. A failed start aborts the
    /// batch; plans started before it stay started.
    pub fn execute(&self, ctx: &OpContext, options: &ExecuteOptions) -> Result<ExecuteReport> {
        let _span = ctx.span().entered();
        let manifest = read_manifest(&self.layout.manifest_path())?;
        let statuses = scheduler::load_statuses(&manifest, &self.layout)?;
        let eligible = scheduler::eligible_plans(&manifest, &statuses, &options.filter)?;

        let limit = if options.until_blocked {
            options.max_plans.max(eligible.len())
        } else {
            options.max_plans
        };
        let mut report = ExecuteReport {
            dry_run: options.dry_run,
            selected: eligible
                .iter()
                .take(limit)
                .map(|entry| entry.plan_id.clone())
                .collect(),
            ..Default::default()
        };
        if options.dry_run || report.selected.is_empty() {
            return Ok(report);
        }

        if options.until_blocked {
            report.halted_by = self.blocked_plan_ids()?;
            if !report.halted_by.is_empty() {
                tracing::warn!(blocked = ?report.halted_by, "execution halted by blocked plans");
                return Ok(report);
            }
        }

        for plan_id in report.selected.clone() {
            let state_path = self.layout.state_path(&plan_id);
            self.start(ctx, &state_path, options.executor.clone())?;
            report.started.push(plan_id);

            if options.until_blocked {
                report.halted_by = self.blocked_plan_ids()?;
                if !report.halted_by.is_empty() {
                    break;
                }
            }
        }

        tracing::info!(started = report.started.len(), "batch execution finished");
        Ok(report)
    }

    fn blocked_plan_ids(&self) -> Result<Vec<String>> {
        let state_dir = self.layout.state_dir();
        if !state_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in fs::read_dir(&state_dir).at_path(&state_dir)? {
            let path = entry.at_path(&state_dir)?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            if let Some(state) = read_state(&path)? {
                if state.status == PlanStatus::Blocked {
                    ids.push(state.plan_id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}
