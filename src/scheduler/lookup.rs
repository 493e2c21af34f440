//! Resolution of free-form `depends_on` tokens to plan ids

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use crate::error::{Result, TrackerError};
use crate::models::manifest::ManifestEntry;

/// Every name a plan can be referred to by in `depends_on`.
///
/// Keys are trimmed and lowercased; one key may map to several plans.
#[derive(Debug, Default)]
pub struct DependencyLookup {
    tokens: HashMap<String, BTreeSet<String>>,
}

impl DependencyLookup {
    pub fn build(entries: &[ManifestEntry]) -> Self {
        let mut tokens: HashMap<String, BTreeSet<String>> = HashMap::new();
        for entry in entries {
            for token in entry_tokens(entry) {
                let key = normalize(&token);
                if key.is_empty() {
                    continue;
                }
                tokens
                    .entry(key)
                    .or_default()
                    .insert(entry.plan_id.clone());
            }
        }
        Self { tokens }
    }

    /// Resolve one dependency token of `dependent`.
    ///
    /// # Returns
    /// * `Ok(Some(id))` - the token names exactly one plan
    /// * `Ok(None)` - nothing matches
    /// * `Err(AmbiguousDependency)` - more than one distinct plan matches
    pub fn resolve(&self, token: &str, dependent: &str) -> Result<Option<&str>> {
        let Some(matches) = self.tokens.get(&normalize(token)) else {
            return Ok(None);
        };
        if matches.len() > 1 {
            return Err(TrackerError::AmbiguousDependency {
                token: token.to_string(),
                plan_id: dependent.to_string(),
                matches: matches.iter().cloned().collect(),
            });
        }
        Ok(matches.iter().next().map(String::as_str))
    }
}

fn entry_tokens(entry: &ManifestEntry) -> Vec<String> {
    let source = Path::new(&entry.source_path);
    let mut tokens = vec![
        entry.plan_id.clone(),
        entry.plan_number.to_string(),
        format!("{}:{}", entry.phase, entry.plan_number),
        format!("{}-{:02}", entry.phase, entry.plan_number),
        entry.source_path.clone(),
    ];
    if let Some(name) = source.file_name() {
        tokens.push(name.to_string_lossy().into_owned());
    }
    if let Some(stem) = source.file_stem() {
        tokens.push(stem.to_string_lossy().into_owned());
    }
    tokens
}

fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}
