//! Tests for eligibility scheduling

use super::*;
use crate::error::TrackerError;
use crate::fs::state_store::write_state;
use crate::models::state::PlanState;
use tempfile::TempDir;

fn make_entry(plan_id: &str, wave: u32, phase: &str, plan_number: u32, deps: Vec<&str>) -> ManifestEntry {
    ManifestEntry {
        plan_id: plan_id.to_string(),
        wave,
        phase: phase.to_string(),
        plan_number,
        priority: ManifestEntry::compute_priority(wave, phase, plan_number),
        plan_path: format!("docs/plans/{plan_id}.md"),
        state_path: format!("docs/plans/_state/{plan_id}.json"),
        source_path: format!(".planning/phases/{phase}/{phase}-{plan_number:02}-PLAN.md"),
        source_hash: "hash".to_string(),
        depends_on: deps.into_iter().map(String::from).collect(),
        batch_size: 3,
        batching: None,
        status: "pending".to_string(),
        execution_contract: None,
    }
}

fn statuses(pairs: &[(&str, Option<PlanStatus>)]) -> StatusMap {
    pairs
        .iter()
        .map(|(id, status)| (id.to_string(), *status))
        .collect()
}

fn ids(entries: &[&ManifestEntry]) -> Vec<String> {
    entries.iter().map(|e| e.plan_id.clone()).collect()
}

#[test]
fn test_wave_barrier_blocks_higher_waves() {
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("a", 1, "01-setup", 1, vec![]),
            make_entry("b", 1, "01-setup", 2, vec![]),
            make_entry("c", 2, "02-api", 1, vec![]),
        ],
    );

    let map = statuses(&[
        ("a", Some(PlanStatus::Verified)),
        ("b", Some(PlanStatus::Executing)),
        ("c", Some(PlanStatus::Pending)),
    ]);
    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert!(eligible.is_empty());

    let map = statuses(&[
        ("a", Some(PlanStatus::Verified)),
        ("b", Some(PlanStatus::Verified)),
        ("c", Some(PlanStatus::Pending)),
    ]);
    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert_eq!(ids(&eligible), vec!["c"]);
}

#[test]
fn test_missing_state_never_satisfies_barrier() {
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("a", 1, "01-setup", 1, vec![]),
            make_entry("b", 2, "02-api", 1, vec![]),
        ],
    );
    let map = statuses(&[("a", None), ("b", Some(PlanStatus::Pending))]);
    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert!(eligible.is_empty());

    // a missing plan is never eligible itself either
    let map = statuses(&[("a", None), ("b", None)]);
    assert!(next_plan(&manifest, &map).unwrap().is_none());
}

#[test]
fn test_dependency_tokens_resolve_case_insensitively() {
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("setup-01-aaaaaaa", 1, "01-setup", 1, vec![]),
            make_entry("setup-02-bbbbbbb", 1, "01-setup", 2, vec!["  01-SETUP-01-plan "]),
            make_entry("setup-03-ccccccc", 1, "01-setup", 3, vec!["01-setup:2"]),
        ],
    );
    let map = statuses(&[
        ("setup-01-aaaaaaa", Some(PlanStatus::Verified)),
        ("setup-02-bbbbbbb", Some(PlanStatus::Pending)),
        ("setup-03-ccccccc", Some(PlanStatus::Pending)),
    ]);

    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert_eq!(ids(&eligible), vec!["setup-02-bbbbbbb"]);
}

#[test]
fn test_lookup_covers_every_token_form() {
    let entry = make_entry("api-04-1234567", 2, "02-api", 4, vec![]);
    let lookup = DependencyLookup::build(std::slice::from_ref(&entry));
    for token in [
        "api-04-1234567",
        "4",
        "02-api:4",
        "02-api-04",
        ".planning/phases/02-api/02-api-04-PLAN.md",
        "02-api-04-PLAN.md",
        "02-api-04-plan",
    ] {
        assert_eq!(
            lookup.resolve(token, "x").unwrap(),
            Some("api-04-1234567"),
            "token {token}"
        );
    }
    assert_eq!(lookup.resolve("nope", "x").unwrap(), None);
    assert_eq!(lookup.resolve("   ", "x").unwrap(), None);
}

#[test]
fn test_unresolved_dependency_is_ineligible() {
    let manifest = Manifest::new(
        "/repo",
        vec![make_entry("a", 1, "01-setup", 1, vec!["does-not-exist"])],
    );
    let map = statuses(&[("a", Some(PlanStatus::Pending))]);
    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert!(eligible.is_empty());
}

#[test]
fn test_ambiguous_dependency_fails_whole_computation() {
    // plan number 1 exists in two phases
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("a", 1, "01-setup", 1, vec![]),
            make_entry("b", 1, "02-api", 1, vec![]),
            make_entry("c", 3, "03-ui", 2, vec!["1"]),
        ],
    );
    let map = statuses(&[
        ("a", Some(PlanStatus::Pending)),
        ("b", Some(PlanStatus::Pending)),
        ("c", Some(PlanStatus::Pending)),
    ]);

    let err = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap_err();
    match err {
        TrackerError::AmbiguousDependency {
            token,
            plan_id,
            matches,
        } => {
            assert_eq!(token, "1");
            assert_eq!(plan_id, "c");
            assert_eq!(matches, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_filters_and_priority_order() {
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("late", 1, "02-api", 1, vec![]),
            make_entry("early", 1, "01-setup", 3, vec![]),
        ],
    );
    let map = statuses(&[
        ("late", Some(PlanStatus::Pending)),
        ("early", Some(PlanStatus::Pending)),
    ]);

    let eligible = eligible_plans(&manifest, &map, &EligibilityFilter::default()).unwrap();
    assert_eq!(ids(&eligible), vec!["early", "late"]);

    let filter = EligibilityFilter {
        wave: None,
        plan_id: Some("late".to_string()),
    };
    assert_eq!(ids(&eligible_plans(&manifest, &map, &filter).unwrap()), vec!["late"]);

    let filter = EligibilityFilter {
        wave: Some(2),
        plan_id: None,
    };
    assert!(eligible_plans(&manifest, &map, &filter).unwrap().is_empty());

    assert_eq!(next_plan(&manifest, &map).unwrap().unwrap().plan_id, "early");
}

#[test]
fn test_load_statuses_reads_state_files() {
    let temp_dir = TempDir::new().unwrap();
    let layout = PlansLayout::new(temp_dir.path().join("docs/plans"), temp_dir.path());
    let manifest = Manifest::new(
        "/repo",
        vec![
            make_entry("a", 1, "01-setup", 1, vec![]),
            make_entry("b", 1, "01-setup", 2, vec![]),
        ],
    );

    let mut state = PlanState::new("a", "a.md", "hash", 1);
    write_state(&layout.state_path("a"), &mut state).unwrap();

    let map = load_statuses(&manifest, &layout).unwrap();
    assert_eq!(map["a"], Some(PlanStatus::Pending));
    assert_eq!(map["b"], None);
}
