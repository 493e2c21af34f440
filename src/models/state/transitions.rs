use crate::error::{Result, TrackerError};

use super::types::PlanStatus;

impl PlanStatus {
    /// Check if transitioning from the current status to the new status is valid.
    ///
    /// Valid transitions:
    /// - `Pending` -> `Executing`
    /// - `Executing` -> `Verified` | `Failed` | `Blocked`
    /// - `Blocked` -> `Executing` (resume)
    /// - `Failed` -> `Executing` (retry)
    /// - `Verified` is a terminal state
    ///
    /// Unlike stage statuses, a same-status "transition" is not a no-op here:
    /// `executing -> executing` would let a second executor start silently.
    pub fn can_transition_to(&self, new_status: &PlanStatus) -> bool {
        self.valid_transitions().contains(new_status)
    }

    /// Attempt to transition to a new status, returning an error if invalid.
    ///
    /// # Returns
    /// `Ok(new_status)` if the transition is valid, `Err` naming the illegal pair otherwise
    pub fn try_transition(&self, new_status: PlanStatus) -> Result<PlanStatus> {
        if self.can_transition_to(&new_status) {
            Ok(new_status)
        } else {
            let allowed = self
                .valid_transitions()
                .iter()
                .map(PlanStatus::as_str)
                .collect::<Vec<_>>();
            Err(TrackerError::IllegalTransition {
                from: *self,
                to: new_status,
                allowed: if allowed.is_empty() {
                    "none".to_string()
                } else {
                    allowed.join(", ")
                },
            })
        }
    }

    /// Returns the list of valid statuses this status can transition to.
    pub fn valid_transitions(&self) -> &'static [PlanStatus] {
        match self {
            PlanStatus::Pending => &[PlanStatus::Executing],
            PlanStatus::Executing => &[
                PlanStatus::Verified,
                PlanStatus::Failed,
                PlanStatus::Blocked,
            ],
            PlanStatus::Blocked => &[PlanStatus::Executing],
            PlanStatus::Failed => &[PlanStatus::Executing],
            PlanStatus::Verified => &[], // Terminal state
        }
    }

    /// Whether the plan is finished and satisfies dependents.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Verified)
    }
}
