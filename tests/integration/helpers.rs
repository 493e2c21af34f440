//! Shared fixtures: a temporary project with exported plans

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wavekeeper::config::TrackerConfig;
use wavekeeper::export::ParsedPlan;
use wavekeeper::fs::locking::FileLockManager;
use wavekeeper::models::manifest::Manifest;
use wavekeeper::models::state::ExecutorInfo;
use wavekeeper::revision::NoRevision;
use wavekeeper::{OpContext, Tracker};

pub type TestTracker = Tracker<FileLockManager, NoRevision>;

pub struct Project {
    pub dir: TempDir,
    pub tracker: TestTracker,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let mut config = TrackerConfig::new(dir.path().join("docs/plans"));
        config.project_root = Some(dir.path().to_path_buf());
        let mutex = FileLockManager::new(config.lock);
        let tracker = Tracker::with_parts(config, mutex, NoRevision);
        Self { dir, tracker }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write a source plan under `.planning/phases/<phase>/` and return
    /// its parsed form.
    pub fn source_plan(&self, phase: &str, plan: u32, wave: u32, tasks: u32) -> ParsedPlan {
        let phase_number = phase.split('-').next().unwrap_or("00");
        let rel = format!(".planning/phases/{phase}/{phase_number}-{plan:02}-PLAN.md");
        let content = format!("# {phase} plan {plan}\n");
        let path = self.root().join(&rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, &content).unwrap();

        ParsedPlan {
            source_path: rel,
            raw_content: content,
            task_count: tasks,
            phase: Some(phase.to_string()),
            plan: Some(plan),
            wave: Some(wave),
            ..Default::default()
        }
    }

    pub fn export(&self, plans: &[ParsedPlan]) -> Manifest {
        self.tracker.export(&ctx("export"), plans).unwrap()
    }

    pub fn state_path(&self, manifest: &Manifest, phase: &str) -> PathBuf {
        let entry = manifest
            .plans
            .iter()
            .find(|entry| entry.phase == phase)
            .expect("plan for phase");
        self.tracker.state_path(&entry.plan_id)
    }
}

pub fn ctx(operation: &str) -> OpContext {
    OpContext::new(operation)
}

pub fn executor(run_id: &str) -> Option<ExecutorInfo> {
    Some(ExecutorInfo {
        tool: Some("codex".to_string()),
        run_id: Some(run_id.to_string()),
        ..Default::default()
    })
}
