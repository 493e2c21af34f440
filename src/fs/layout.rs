//! Plans directory layout
//!
//! ```text
//! <plans_dir>/
//!   _manifest.json
//!   _state/<plan_id>.json
//!   _state/<plan_id>.json.lock
//!   _logs/<plan_id>/<tier>-<stamp>.log
//!   _debug/<plan_id>/<tier>-<stamp>.json
//!   _blockers/<plan_id>.md
//! ```

use std::path::{Path, PathBuf};

pub const STATE_DIR: &str = "_state";
pub const MANIFEST_FILE: &str = "_manifest.json";
pub const LOGS_DIR: &str = "_logs";
pub const DEBUG_DIR: &str = "_debug";
pub const BLOCKERS_DIR: &str = "_blockers";

/// Resolved locations for one plans directory and its project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlansLayout {
    plans_dir: PathBuf,
    project_root: PathBuf,
}

impl PlansLayout {
    pub fn new(plans_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            project_root: project_root.into(),
        }
    }

    /// Layout for a plans directory, discovering the project root above it.
    pub fn for_plans_dir(plans_dir: impl Into<PathBuf>) -> Self {
        let plans_dir = absolutize(&plans_dir.into());
        let project_root = infer_project_root(&plans_dir);
        Self::new(plans_dir, project_root)
    }

    /// Layout for the plans directory that owns `state_path`.
    pub fn for_state_path(state_path: &Path) -> Self {
        Self::for_plans_dir(infer_plans_dir(state_path))
    }

    /// Whether `state_path` lives under this layout's `_state/` directory.
    pub fn owns_state(&self, state_path: &Path) -> bool {
        infer_plans_dir(state_path) == absolutize(&self.plans_dir)
    }

    pub fn plans_dir(&self) -> &Path {
        &self.plans_dir
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn with_project_root(mut self, project_root: impl Into<PathBuf>) -> Self {
        self.project_root = project_root.into();
        self
    }

    pub fn state_dir(&self) -> PathBuf {
        self.plans_dir.join(STATE_DIR)
    }

    pub fn state_path(&self, plan_id: &str) -> PathBuf {
        self.state_dir().join(format!("{plan_id}.json"))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.plans_dir.join(MANIFEST_FILE)
    }

    pub fn plan_doc_path(&self, plan_id: &str) -> PathBuf {
        self.plans_dir.join(format!("{plan_id}.md"))
    }

    pub fn logs_dir(&self, plan_id: &str) -> PathBuf {
        self.plans_dir.join(LOGS_DIR).join(plan_id)
    }

    pub fn debug_dir(&self, plan_id: &str) -> PathBuf {
        self.plans_dir.join(DEBUG_DIR).join(plan_id)
    }

    /// Blocker notes are written by the renderer, never by this crate.
    pub fn blocker_path(&self, plan_id: &str) -> PathBuf {
        self.plans_dir.join(BLOCKERS_DIR).join(format!("{plan_id}.md"))
    }

    /// Resolve a path recorded relative to the project root.
    pub fn resolve(&self, recorded: &str) -> PathBuf {
        let path = Path::new(recorded);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Render a path relative to the project root when it lies inside it.
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
}

/// Walk up from a state file to the directory containing `_state/`.
///
/// Falls back to the file's own directory when no `_state` ancestor exists.
pub fn infer_plans_dir(state_path: &Path) -> PathBuf {
    let resolved = absolutize(state_path);
    resolved
        .ancestors()
        .skip(1)
        .find(|dir| dir.file_name().is_some_and(|name| name == STATE_DIR))
        .and_then(Path::parent)
        .or_else(|| resolved.parent())
        .map(Path::to_path_buf)
        .unwrap_or(resolved)
}

/// Nearest ancestor that contains `.planning/` or `.git`.
///
/// Without a marker, assumes the conventional `<root>/docs/plans` depth.
pub fn infer_project_root(plans_dir: &Path) -> PathBuf {
    let resolved = absolutize(plans_dir);
    if let Some(root) = resolved
        .ancestors()
        .find(|dir| dir.join(".planning").is_dir() || dir.join(".git").exists())
    {
        return root.to_path_buf();
    }
    resolved
        .ancestors()
        .nth(2)
        .or_else(|| resolved.parent())
        .unwrap_or(resolved.as_path())
        .to_path_buf()
}

fn absolutize(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
