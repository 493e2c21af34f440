//! Eligibility scheduling: which pending plans may start next
//!
//! A plan is eligible when it is `pending`, every plan in a strictly lower
//! wave is `verified`, and each of its `depends_on` tokens resolves to exactly
//! one `verified` plan. Statuses always come from the state files; the
//! manifest's mirrored status is ignored.

mod lookup;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use crate::error::Result;
use crate::fs::layout::PlansLayout;
use crate::fs::state_store::read_state;
use crate::models::manifest::{Manifest, ManifestEntry};
use crate::models::state::PlanStatus;

pub use lookup::DependencyLookup;

/// Live status per plan id. `None` means the state file is missing.
pub type StatusMap = HashMap<String, Option<PlanStatus>>;

/// Optional narrowing applied after eligibility is computed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EligibilityFilter {
    pub wave: Option<u32>,
    pub plan_id: Option<String>,
}

impl EligibilityFilter {
    fn admits(&self, entry: &ManifestEntry) -> bool {
        self.wave.is_none_or(|wave| entry.wave == wave)
            && self
                .plan_id
                .as_deref()
                .is_none_or(|plan_id| entry.plan_id == plan_id)
    }
}

/// Read the current status of every manifest entry from its state file.
pub fn load_statuses(manifest: &Manifest, layout: &PlansLayout) -> Result<StatusMap> {
    let mut statuses = StatusMap::with_capacity(manifest.plans.len());
    for entry in &manifest.plans {
        let state = read_state(&layout.state_path(&entry.plan_id))?;
        statuses.insert(entry.plan_id.clone(), state.map(|s| s.status));
    }
    Ok(statuses)
}

/// Pending plans that may start now, in ascending priority order.
///
/// Dependency tokens of every pending plan are resolved before any barrier
/// is applied, so an ambiguous token fails the whole computation even when
/// its plan would be held back by the wave barrier anyway.
pub fn eligible_plans<'a>(
    manifest: &'a Manifest,
    statuses: &StatusMap,
    filter: &EligibilityFilter,
) -> Result<Vec<&'a ManifestEntry>> {
    let lookup = DependencyLookup::build(&manifest.plans);
    let status_of = |plan_id: &str| statuses.get(plan_id).copied().flatten();

    let pending: Vec<&ManifestEntry> = manifest
        .plans
        .iter()
        .filter(|entry| status_of(&entry.plan_id) == Some(PlanStatus::Pending))
        .collect();

    let mut resolved: HashMap<&str, Vec<Option<&str>>> = HashMap::new();
    for entry in &pending {
        let deps = entry
            .depends_on
            .iter()
            .map(|token| lookup.resolve(token, &entry.plan_id))
            .collect::<Result<Vec<_>>>()?;
        resolved.insert(entry.plan_id.as_str(), deps);
    }

    // Lowest wave that still has an unverified plan; nothing above it may start.
    let open_wave = manifest
        .plans
        .iter()
        .filter(|entry| status_of(&entry.plan_id) != Some(PlanStatus::Verified))
        .map(|entry| entry.wave)
        .min();

    let mut eligible: Vec<&ManifestEntry> = pending
        .into_iter()
        .filter(|entry| open_wave.is_none_or(|wave| entry.wave <= wave))
        .filter(|entry| {
            resolved
                .get(entry.plan_id.as_str())
                .into_iter()
                .flatten()
                .all(|dep| dep.is_some_and(|id| status_of(id) == Some(PlanStatus::Verified)))
        })
        .filter(|entry| filter.admits(entry))
        .collect();

    eligible.sort_by_key(|entry| entry.priority);
    tracing::debug!(count = eligible.len(), "eligible plans computed");
    Ok(eligible)
}

/// First eligible plan, if any.
pub fn next_plan<'a>(
    manifest: &'a Manifest,
    statuses: &StatusMap,
) -> Result<Option<&'a ManifestEntry>> {
    let next = eligible_plans(manifest, statuses, &EligibilityFilter::default())?
        .into_iter()
        .next();
    match next {
        Some(entry) => tracing::debug!(plan_id = %entry.plan_id, wave = entry.wave, "next plan"),
        None => tracing::debug!("no plan eligible"),
    }
    Ok(next)
}
