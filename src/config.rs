//! Tracker configuration
//!
//! Resolution order, later wins:
//! 1. built-in defaults
//! 2. `<plans_dir>/wavekeeper.toml`
//! 3. `WAVEKEEPER_*` environment variables

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, TrackerError};
use crate::fs::layout::PlansLayout;
use crate::fs::locking::LockSettings;

pub const CONFIG_FILE: &str = "wavekeeper.toml";
pub const DEFAULT_PLANS_DIR: &str = "docs/plans";

pub const ENV_PLANS_DIR: &str = "WAVEKEEPER_PLANS_DIR";
pub const ENV_PROJECT_ROOT: &str = "WAVEKEEPER_PROJECT_ROOT";
pub const ENV_ROLLBACK_ALLOWLIST: &str = "WAVEKEEPER_ROLLBACK_ALLOWLIST";
pub const ENV_LEASE_SECONDS: &str = "WAVEKEEPER_LEASE_SECONDS";

pub const DEFAULT_LEASE_SECONDS: u64 = 3600;
pub const DEFAULT_STALE_EXECUTION_HOURS: u64 = 24;

pub const DEFAULT_ROLLBACK_ALLOWLIST: &[&str] = &[
    "echo", "git", "make", "npm", "npx", "pnpm", "pytest", "python", "python3", "uv", "yarn",
];

/// Optional overrides read from `wavekeeper.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    project_root: Option<PathBuf>,
    lock_timeout_ms: Option<u64>,
    lock_retry_ms: Option<u64>,
    lock_stale_seconds: Option<u64>,
    lease_seconds: Option<u64>,
    stale_execution_hours: Option<u64>,
    rollback_allowlist: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub plans_dir: PathBuf,
    /// Explicit project root; inferred from the plans dir when unset
    pub project_root: Option<PathBuf>,
    pub lock: LockSettings,
    pub lease_duration: chrono::Duration,
    /// `executing` plans untouched for longer are reported as stale
    pub stale_execution_after: chrono::Duration,
    pub rollback_allowlist: BTreeSet<String>,
}

impl TrackerConfig {
    pub fn new(plans_dir: impl Into<PathBuf>) -> Self {
        Self {
            plans_dir: plans_dir.into(),
            project_root: None,
            lock: LockSettings::default(),
            lease_duration: chrono::Duration::seconds(DEFAULT_LEASE_SECONDS as i64),
            stale_execution_after: chrono::Duration::hours(DEFAULT_STALE_EXECUTION_HOURS as i64),
            rollback_allowlist: DEFAULT_ROLLBACK_ALLOWLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Load configuration from the process environment.
    ///
    /// # Arguments
    /// * `plans_dir` - Plans directory given on the command line, if any
    pub fn load(plans_dir: Option<&Path>) -> Result<Self> {
        Self::load_with(plans_dir, |key| std::env::var(key).ok())
    }

    /// Load configuration using `env` to look up variables.
    pub fn load_with<F>(plans_dir: Option<&Path>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let plans_dir = env(ENV_PLANS_DIR)
            .map(PathBuf::from)
            .or_else(|| plans_dir.map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PLANS_DIR));
        let mut config = Self::new(plans_dir);

        let file_path = config.plans_dir.join(CONFIG_FILE);
        if file_path.is_file() {
            let content = fs::read_to_string(&file_path).map_err(|e| TrackerError::Configuration {
                message: format!("failed to read {}: {e}", file_path.display()),
            })?;
            config.apply_file(&content, &file_path)?;
        }

        if let Some(root) = env(ENV_PROJECT_ROOT) {
            config.project_root = Some(PathBuf::from(root));
        }
        if let Some(raw) = env(ENV_ROLLBACK_ALLOWLIST) {
            config.rollback_allowlist = parse_allowlist(&raw);
        }
        if let Some(raw) = env(ENV_LEASE_SECONDS) {
            let seconds: u64 = raw.parse().map_err(|_| TrackerError::Configuration {
                message: format!("{ENV_LEASE_SECONDS} must be a whole number of seconds, got '{raw}'"),
            })?;
            config.lease_duration = chrono::Duration::seconds(seconds as i64);
        }

        tracing::debug!(
            plans_dir = %config.plans_dir.display(),
            lease_secs = config.lease_duration.num_seconds(),
            "configuration loaded"
        );
        Ok(config)
    }

    fn apply_file(&mut self, content: &str, path: &Path) -> Result<()> {
        let file: FileConfig = toml::from_str(content).map_err(|e| TrackerError::Configuration {
            message: format!("failed to parse {}: {e}", path.display()),
        })?;

        if let Some(root) = file.project_root {
            self.project_root = Some(root);
        }
        if let Some(ms) = file.lock_timeout_ms {
            self.lock.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.lock_retry_ms {
            self.lock.retry_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = file.lock_stale_seconds {
            self.lock.stale_after = Duration::from_secs(secs);
        }
        if let Some(secs) = file.lease_seconds {
            self.lease_duration = chrono::Duration::seconds(secs as i64);
        }
        if let Some(hours) = file.stale_execution_hours {
            self.stale_execution_after = chrono::Duration::hours(hours as i64);
        }
        if let Some(allowlist) = file.rollback_allowlist {
            self.rollback_allowlist = allowlist
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Resolved plans layout, honouring an explicit project root.
    pub fn layout(&self) -> PlansLayout {
        let layout = PlansLayout::for_plans_dir(&self.plans_dir);
        match &self.project_root {
            Some(root) => layout.with_project_root(root),
            None => layout,
        }
    }
}

fn parse_allowlist(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
