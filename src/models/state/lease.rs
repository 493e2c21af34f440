//! Logical lease bookkeeping on a [`PlanState`].
//!
//! The lease records which executor run owns a plan and until when. It lives
//! inside the state document, so every change here happens while the caller
//! holds the per-state file lock.

use chrono::{DateTime, Duration, Utc};

use crate::error::{Result, TrackerError};

use super::types::{Lease, PlanState, RecoveryEvent, RecoveryNote};

/// Shortest lease accepted; zero or negative durations are clamped up to this.
fn min_lease() -> Duration {
    Duration::milliseconds(1)
}

impl Lease {
    pub fn new(run_id: impl Into<String>, duration: Duration, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.into(),
            acquired_at: now,
            expires_at: now + duration.max(min_lease()),
        }
    }

    /// A lease is expired once `now` reaches its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

impl PlanState {
    /// The lease if one exists and has not yet expired.
    pub fn active_lease(&self, now: DateTime<Utc>) -> Option<&Lease> {
        self.lease.as_ref().filter(|lease| !lease.is_expired_at(now))
    }

    /// Acquire the lease for `run_id`.
    ///
    /// - Same run already holding it: the lease is refreshed in place.
    /// - Another run holding an unexpired lease: `LeaseHeld`, nothing changes.
    /// - Another run holding an expired lease: a `lease_expired_takeover`
    ///   recovery note is appended and the lease is replaced.
    pub fn acquire_lease(
        &mut self,
        run_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if let Some(current) = &self.lease {
            if current.run_id != run_id {
                if !current.is_expired_at(now) {
                    return Err(TrackerError::LeaseHeld {
                        plan_id: self.plan_id.clone(),
                        run_id: current.run_id.clone(),
                        expires_at: current.expires_at,
                    });
                }
                let note = RecoveryNote {
                    event: RecoveryEvent::LeaseExpiredTakeover,
                    previous_run_id: current.run_id.clone(),
                    previous_acquired_at: Some(current.acquired_at),
                    previous_expires_at: Some(current.expires_at),
                    taken_over_at: now,
                    new_run_id: run_id.to_string(),
                };
                tracing::warn!(
                    plan_id = %self.plan_id,
                    previous_run_id = %note.previous_run_id,
                    new_run_id = %run_id,
                    "taking over expired lease"
                );
                self.recovery_notes.push(note);
            }
        }

        self.lease = Some(Lease::new(run_id, duration, now));
        self.updated_at = now;
        Ok(())
    }

    /// Acquire the lease on behalf of an operator resume.
    ///
    /// An unexpired lease under a different run is displaced with a
    /// `lease_handoff` note instead of being refused. Expired leases fall
    /// through to the ordinary takeover path.
    pub fn hand_off_lease(
        &mut self,
        run_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let displaced = self
            .active_lease(now)
            .filter(|lease| lease.run_id != run_id)
            .map(|lease| lease.run_id.clone());

        if let Some(previous_run_id) = displaced {
            tracing::info!(
                plan_id = %self.plan_id,
                previous_run_id = %previous_run_id,
                new_run_id = %run_id,
                "handing off active lease"
            );
            self.recovery_notes.push(RecoveryNote {
                event: RecoveryEvent::LeaseHandoff,
                previous_run_id,
                previous_acquired_at: None,
                previous_expires_at: None,
                taken_over_at: now,
                new_run_id: run_id.to_string(),
            });
            self.lease = None;
        }

        self.acquire_lease(run_id, duration, now)
    }

    /// Extend the lease for its current holder.
    ///
    /// # Returns
    /// `NoActiveLease` when no lease is recorded, `LeaseMismatch` when a
    /// different run holds it.
    pub fn renew_lease(
        &mut self,
        run_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let plan_id = self.plan_id.clone();
        let lease = self
            .lease
            .as_mut()
            .ok_or(TrackerError::NoActiveLease { plan_id: plan_id.clone() })?;

        if lease.run_id != run_id {
            return Err(TrackerError::LeaseMismatch {
                plan_id,
                holder: lease.run_id.clone(),
                requested: run_id.to_string(),
            });
        }

        lease.expires_at = now + duration.max(min_lease());
        self.updated_at = now;
        Ok(())
    }

    pub fn release_lease(&mut self, now: DateTime<Utc>) {
        if self.lease.take().is_some() {
            self.updated_at = now;
        }
    }
}
