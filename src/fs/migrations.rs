//! Schema migrations for state documents
//!
//! Migrations run on the raw JSON before it is deserialized. Every outdated
//! document first gets its shape normalized (result lists, failure reason),
//! then passes through an ordered chain of steps keyed by the version they
//! migrate *to*. Every step is idempotent, so re-running the chain on an
//! already migrated document is harmless. Files are not rewritten here; the
//! next write persists the migrated shape.

use std::cmp::Ordering;
use std::fmt;

use serde_json::{Map, Value};

use crate::models::state::{Severity, CURRENT_SCHEMA_VERSION};

/// Version assumed for documents written before versions were recorded.
pub const UNVERSIONED: &str = "1.0";

/// Dotted numeric version, compared component-wise (`3.10 > 3.9`).
#[derive(Debug, Clone)]
pub struct SchemaVersion(Vec<u32>);

impl SchemaVersion {
    /// Parse `"3.1"`. Anything unparseable sorts before every real version.
    pub fn parse(raw: &str) -> Self {
        let parts: Option<Vec<u32>> = raw.trim().split('.').map(|p| p.parse().ok()).collect();
        Self(parts.unwrap_or_else(|| vec![0]))
    }

    pub fn current() -> Self {
        Self::parse(CURRENT_SCHEMA_VERSION)
    }

    fn component(&self, idx: usize) -> u32 {
        self.0.get(idx).copied().unwrap_or(0)
    }
}

impl Ord for SchemaVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialEq for SchemaVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SchemaVersion {}

impl PartialOrd for SchemaVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

struct MigrationStep {
    target: &'static str,
    apply: fn(&mut Map<String, Value>),
}

/// Label reported for the shape normalization every outdated document gets.
pub const NORMALIZE_STEP: &str = "normalize";

const STEPS: &[MigrationStep] = &[
    MigrationStep {
        target: "3.0",
        apply: empty_collections_and_ran_at,
    },
    MigrationStep {
        target: "3.1",
        apply: audit_defaults,
    },
];

/// Stored schema version of a raw document.
pub fn stored_version(doc: &Map<String, Value>) -> String {
    doc.get("schema_version")
        .and_then(Value::as_str)
        .unwrap_or(UNVERSIONED)
        .to_string()
}

pub fn is_outdated(version: &str) -> bool {
    SchemaVersion::parse(version) < SchemaVersion::current()
}

/// Bring a raw state document up to the current schema.
///
/// # Returns
/// The names of the steps that ran, empty when the document was current
pub fn migrate_document(doc: &mut Map<String, Value>) -> Vec<&'static str> {
    let from = SchemaVersion::parse(&stored_version(doc));
    if from >= SchemaVersion::current() {
        return Vec::new();
    }

    normalize_shape(doc);
    let mut applied = vec![NORMALIZE_STEP];
    for step in STEPS {
        if from < SchemaVersion::parse(step.target) {
            (step.apply)(doc);
            applied.push(step.target);
        }
    }
    doc.insert(
        "schema_version".to_string(),
        Value::String(CURRENT_SCHEMA_VERSION.to_string()),
    );
    applied
}

/// One result list per verification tier, and failed plans carry their
/// explanation in `failure_reason`. Applies whatever the stored version.
fn normalize_shape(doc: &mut Map<String, Value>) {
    if let Some(Value::Object(tiers)) = doc.get_mut("verification") {
        for results in tiers.values_mut() {
            *results = match results.take() {
                Value::Array(list) => Value::Array(list),
                Value::Object(single) => Value::Array(vec![Value::Object(single)]),
                _ => Value::Array(Vec::new()),
            };
        }
    }

    let failed = doc.get("status").and_then(Value::as_str) == Some("failed");
    let has_failure = doc
        .get("failure_reason")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());
    let blocked = doc
        .get("blocked_reason")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if let (true, false, Some(reason)) = (failed, has_failure, blocked) {
        doc.insert("failure_reason".to_string(), Value::String(reason));
        doc.insert("blocked_reason".to_string(), Value::Null);
    }
}

/// 3.0: `null` collections become empty, blank `ran_at` becomes `null`.
fn empty_collections_and_ran_at(doc: &mut Map<String, Value>) {
    for key in ["completed_tasks", "recovery_notes", "touched_paths"] {
        if matches!(doc.get(key), None | Some(Value::Null)) {
            doc.insert(key.to_string(), Value::Array(Vec::new()));
        }
    }
    if matches!(doc.get("verification"), None | Some(Value::Null)) {
        doc.insert("verification".to_string(), Value::Object(Map::new()));
    }

    if let Some(Value::Object(tiers)) = doc.get_mut("verification") {
        for result in tiers.values_mut().filter_map(Value::as_array_mut).flatten() {
            if let Some(entry) = result.as_object_mut() {
                let blank = match entry.get("ran_at") {
                    None => true,
                    Some(Value::String(s)) => s.trim().is_empty(),
                    Some(_) => false,
                };
                if blank {
                    entry.insert("ran_at".to_string(), Value::Null);
                }
            }
        }
    }
}

/// 3.1: audit fields exist, and unknown severities fall back to `high`.
fn audit_defaults(doc: &mut Map<String, Value>) {
    for key in [
        "lock",
        "cursor",
        "blocked_severity",
        "verify_quick",
        "last_error_output_path",
        "git_sha_before",
        "git_sha_after",
    ] {
        doc.entry(key.to_string()).or_insert(Value::Null);
    }

    if let Some(Value::String(raw)) = doc.get("blocked_severity") {
        let severity = Severity::parse_or_default(raw);
        doc.insert(
            "blocked_severity".to_string(),
            Value::String(severity.to_string()),
        );
    }
}
