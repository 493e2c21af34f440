use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, TrackerError};

use super::types::{
    Cursor, ExecutorInfo, PlanState, PlanStatus, Severity, VerificationResult, VerifyTier,
    CURRENT_SCHEMA_VERSION,
};

impl PlanState {
    pub fn new(
        plan_id: impl Into<String>,
        source_plan_path: impl Into<String>,
        source_plan_hash: impl Into<String>,
        total_tasks: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            plan_id: plan_id.into(),
            source_plan_path: source_plan_path.into(),
            source_plan_hash: source_plan_hash.into(),
            status: PlanStatus::Pending,
            completed_tasks: Default::default(),
            total_tasks,
            last_run_at: None,
            verification: Default::default(),
            executor: None,
            blocked_reason: None,
            blocked_severity: None,
            failure_reason: None,
            lease: None,
            recovery_notes: Vec::new(),
            cursor: None,
            verify_quick: None,
            last_error_output_path: None,
            git_sha_before: None,
            git_sha_after: None,
            touched_paths: Vec::new(),
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt to transition the plan to a new status with validation.
    ///
    /// Applies the side effects bound to the target status:
    /// - entering `executing` stamps `last_run_at` and clears the blocked and
    ///   failure explanations
    /// - entering `verified` or `failed` releases the lease
    ///
    /// # Arguments
    /// * `new_status` - The target status to transition to
    /// * `now` - Timestamp used for every field touched by the transition
    pub fn try_transition(&mut self, new_status: PlanStatus, now: DateTime<Utc>) -> Result<()> {
        let validated_status = self.status.try_transition(new_status)?;
        tracing::debug!(
            plan_id = %self.plan_id,
            from = %self.status,
            to = %validated_status,
            "transition"
        );
        self.status = validated_status;
        self.updated_at = now;

        match validated_status {
            PlanStatus::Executing => {
                self.last_run_at = Some(now);
                self.blocked_reason = None;
                self.blocked_severity = None;
                self.failure_reason = None;
            }
            PlanStatus::Verified | PlanStatus::Failed => self.release_lease(now),
            PlanStatus::Pending | PlanStatus::Blocked => {}
        }
        Ok(())
    }

    /// Start a pending plan under a fresh lease.
    ///
    /// # Arguments
    /// * `run_id` - Executor run that will own the lease
    /// * `executor` - Caller-reported executor metadata
    /// * `lease_duration` - How long the lease stays valid without renewal
    /// * `revision` - Pre-execution revision marker, if one could be captured
    ///
    /// # Returns
    /// `Ok(())` once the plan is executing with cursor `{1, 0}`
    pub fn start(
        &mut self,
        run_id: &str,
        executor: Option<ExecutorInfo>,
        lease_duration: Duration,
        revision: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if self.status != PlanStatus::Pending {
            return Err(TrackerError::WrongStatus {
                action: "start",
                expected: PlanStatus::Pending.to_string(),
                actual: self.status,
            });
        }

        self.acquire_lease(run_id, lease_duration, now)?;
        self.try_transition(PlanStatus::Executing, now)?;
        self.executor = Some(with_run_id(executor, run_id));
        self.cursor = Some(Cursor::new(1, 0));
        self.git_sha_before = revision;
        Ok(())
    }

    /// Resume a blocked or failed plan.
    ///
    /// Displaces any active lease held by another run (recording a handoff)
    /// and keeps the cursor where the previous run left it.
    pub fn resume(
        &mut self,
        run_id: &str,
        executor: Option<ExecutorInfo>,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !matches!(self.status, PlanStatus::Blocked | PlanStatus::Failed) {
            return Err(TrackerError::WrongStatus {
                action: "resume",
                expected: "blocked or failed".to_string(),
                actual: self.status,
            });
        }

        self.hand_off_lease(run_id, lease_duration, now)?;
        self.try_transition(PlanStatus::Executing, now)?;
        self.executor = Some(with_run_id(executor, run_id));
        Ok(())
    }

    /// Mark one task complete and move the cursor past it.
    ///
    /// Completing an already completed task is a no-op on the set but still
    /// repositions the cursor.
    pub fn complete_task(&mut self, task: u32, now: DateTime<Utc>) -> Result<()> {
        self.ensure_executing("complete-task")?;
        if task < 1 || task > self.total_tasks {
            return Err(TrackerError::TaskOutOfRange {
                plan_id: self.plan_id.clone(),
                task,
                total_tasks: self.total_tasks,
            });
        }

        self.completed_tasks.insert(task);
        self.cursor = Some(if task < self.total_tasks {
            Cursor::new(task + 1, 0)
        } else {
            Cursor::new(task, Cursor::ALL_DONE)
        });
        self.updated_at = now;
        Ok(())
    }

    pub fn advance_step(&mut self, step: i32, now: DateTime<Utc>) -> Result<()> {
        self.ensure_executing("advance-step")?;
        if step < Cursor::ALL_DONE {
            return Err(TrackerError::invalid_input(
                "step",
                format!("cursor step must be >= -1, got {step}"),
            ));
        }

        match self.cursor.as_mut() {
            Some(cursor) => cursor.step = step,
            None => self.cursor = Some(Cursor::new(1, step)),
        }
        self.updated_at = now;
        Ok(())
    }

    /// Append a verification result to its tier.
    ///
    /// The first passing `quick` command becomes the reproduce command; any
    /// failing result points `last_error_output_path` at its log.
    pub fn record_verification(
        &mut self,
        tier: VerifyTier,
        command: impl Into<String>,
        exit_code: i32,
        log_path: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_executing("record-verification")?;
        let result = VerificationResult {
            command: command.into(),
            exit_code,
            log_path: log_path.into(),
            ran_at: Some(now),
        };

        if tier == VerifyTier::Quick && result.passed() && self.verify_quick.is_none() {
            self.verify_quick = Some(result.command.clone());
        }
        if !result.passed() {
            self.last_error_output_path = Some(result.log_path.clone());
        }

        self.verification.entry(tier).or_default().push(result);
        self.updated_at = now;
        Ok(())
    }

    pub fn has_verification_results(&self) -> bool {
        self.verification.values().any(|results| !results.is_empty())
    }

    pub fn all_tasks_completed(&self) -> bool {
        (1..=self.total_tasks).all(|task| self.completed_tasks.contains(&task))
    }

    /// Finish the plan. Requires every task done and at least one
    /// verification result on any tier.
    pub fn mark_verified(&mut self, revision: Option<String>, now: DateTime<Utc>) -> Result<()> {
        self.ensure_executing("mark-verified")?;
        if !self.all_tasks_completed() {
            return Err(TrackerError::VerificationPrecondition {
                plan_id: self.plan_id.clone(),
                reason: format!(
                    "{} of {} tasks completed",
                    self.completed_tasks.len(),
                    self.total_tasks
                ),
            });
        }
        if !self.has_verification_results() {
            return Err(TrackerError::VerificationPrecondition {
                plan_id: self.plan_id.clone(),
                reason: "verification results are required".to_string(),
            });
        }

        self.try_transition(PlanStatus::Verified, now)?;
        self.git_sha_after = revision;
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        self.try_transition(PlanStatus::Failed, now)?;
        self.failure_reason = Some(reason.into());
        self.blocked_reason = None;
        self.blocked_severity = None;
        Ok(())
    }

    /// Block the plan. The lease is kept so the same run can pick it up again.
    pub fn mark_blocked(
        &mut self,
        reason: impl Into<String>,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.try_transition(PlanStatus::Blocked, now)?;
        self.blocked_reason = Some(reason.into());
        self.blocked_severity = Some(severity);
        self.failure_reason = None;
        Ok(())
    }

    /// Check the structural invariants of a state document.
    ///
    /// Used after patches and migrations, where fields are set wholesale
    /// rather than through the transition methods.
    pub fn check_invariants(&self) -> Result<()> {
        if let Some(task) = self
            .completed_tasks
            .iter()
            .find(|task| **task < 1 || **task > self.total_tasks)
        {
            return Err(TrackerError::TaskOutOfRange {
                plan_id: self.plan_id.clone(),
                task: *task,
                total_tasks: self.total_tasks,
            });
        }
        if let Some(lease) = &self.lease {
            if lease.expires_at <= lease.acquired_at {
                return Err(TrackerError::invalid_input(
                    "lock",
                    "expires_at must be later than acquired_at",
                ));
            }
        }
        if let Some(cursor) = &self.cursor {
            if cursor.step < Cursor::ALL_DONE {
                return Err(TrackerError::invalid_input(
                    "cursor",
                    format!("cursor step must be >= -1, got {}", cursor.step),
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_executing(&self, action: &'static str) -> Result<()> {
        if self.status == PlanStatus::Executing {
            Ok(())
        } else {
            Err(TrackerError::WrongStatus {
                action,
                expected: PlanStatus::Executing.to_string(),
                actual: self.status,
            })
        }
    }
}

fn with_run_id(executor: Option<ExecutorInfo>, run_id: &str) -> ExecutorInfo {
    let mut executor = executor.unwrap_or_default();
    executor.run_id = Some(run_id.to_string());
    executor
}
