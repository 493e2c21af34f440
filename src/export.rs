//! Export of parsed plans into state files and the manifest
//!
//! Parsing plan documents happens elsewhere; this module receives the
//! parser's output as [`ParsedPlan`] values.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::drift::content_hash;
use crate::error::Result;
use crate::fs::layout::PlansLayout;
use crate::fs::locking::StateMutex;
use crate::fs::manifest_store::write_manifest;
use crate::fs::state_store::{read_state, write_state};
use crate::models::manifest::{ExecutionContract, Manifest, ManifestEntry, DEFAULT_BATCH_SIZE};
use crate::models::state::PlanState;

/// `<phase>-<plan>-PLAN.md`, capturing the plan number.
static PLAN_FILE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\d+-(\d+)-PLAN\.md$").ok());

/// Structured output of the plan parser.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ParsedPlan {
    pub source_path: String,
    pub raw_content: String,
    pub task_count: u32,
    pub phase: Option<String>,
    pub plan: Option<u32>,
    pub wave: Option<u32>,
    pub depends_on: Vec<String>,
    pub batch_size: Option<u32>,
    pub batching: Option<Vec<Vec<u32>>>,
    pub execution_contract: Option<ExecutionContract>,
}

/// Stable plan id: `<phase-dir>-<NN>-<sha7>`.
///
/// The phase directory is the one following a `phases` component, or the
/// parent directory otherwise. `NN` comes from a `<phase>-<NN>-PLAN.md`
/// filename and defaults to `00`.
pub fn plan_id_for(source_path: &Path, content: &str) -> String {
    let hash = content_hash(content);
    format!("{}-{}", plan_slug(source_path), &hash[..7])
}

fn plan_slug(source_path: &Path) -> String {
    let components: Vec<&str> = source_path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();

    let phase_dir = components
        .iter()
        .position(|part| *part == "phases")
        .and_then(|i| components.get(i + 1))
        .copied()
        .filter(|dir| Some(*dir) != components.last().copied())
        .or_else(|| {
            source_path
                .parent()
                .and_then(Path::file_name)
                .and_then(|name| name.to_str())
        })
        .unwrap_or_default();

    let file_name = source_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    let plan_number = PLAN_FILE_PATTERN
        .as_ref()
        .and_then(|re| re.captures(file_name))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "00".to_string());

    format!("{phase_dir}-{plan_number}")
}

/// Create missing state files and write a priority-sorted manifest.
///
/// Existing state files are left untouched, so re-exporting never resets
/// progress. Each state file is created under its lock.
pub fn export_plans<M: StateMutex>(
    layout: &PlansLayout,
    mutex: &M,
    plans: &[ParsedPlan],
) -> Result<Manifest> {
    let mut entries = Vec::with_capacity(plans.len());

    for parsed in plans {
        let source = Path::new(&parsed.source_path);
        let absolute_source = layout.resolve(&parsed.source_path);
        let plan_id = plan_id_for(source, &parsed.raw_content);
        let source_hash = content_hash(&parsed.raw_content);
        let source_rel = layout.display_relative(&absolute_source);
        let state_path = layout.state_path(&plan_id);

        let state = {
            let _guard = mutex.lock(&state_path)?;
            match read_state(&state_path)? {
                Some(existing) => existing,
                None => {
                    let mut state = PlanState::new(&plan_id, &source_rel, &source_hash, parsed.task_count);
                    write_state(&state_path, &mut state)?;
                    tracing::debug!(plan_id = %plan_id, "state created");
                    state
                }
            }
        };

        let phase = parsed.phase.clone().unwrap_or_else(|| "unknown".to_string());
        let plan_number = parsed.plan.unwrap_or(0);
        let wave = parsed.wave.unwrap_or(1);

        entries.push(ManifestEntry {
            priority: ManifestEntry::compute_priority(wave, &phase, plan_number),
            plan_path: layout.display_relative(&layout.plan_doc_path(&plan_id)),
            state_path: layout.display_relative(&state_path),
            source_path: source_rel,
            source_hash,
            wave,
            phase,
            plan_number,
            depends_on: parsed.depends_on.clone(),
            batch_size: parsed.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            batching: parsed.batching.clone(),
            status: state.status.to_string(),
            execution_contract: parsed.execution_contract.clone(),
            plan_id,
        });
    }

    let manifest = Manifest::new(layout.project_root().to_string_lossy(), entries);
    write_manifest(&layout.manifest_path(), &manifest)?;
    tracing::info!(plans = manifest.plans.len(), "plans exported");
    Ok(manifest)
}
