//! Revision markers recorded around execution
//!
//! `git_sha_before` is captured on start and `git_sha_after` on verification.
//! A project without git (or without commits) simply records nothing.

use std::path::Path;
use std::process::{Command, Output};

use crate::error::{Result, TrackerError};

/// Source of the current revision of a project.
pub trait RevisionProbe {
    fn current_revision(&self, project_root: &Path) -> Option<String>;
}

/// Reads `HEAD` through the `git` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitRevisionProbe;

impl RevisionProbe for GitRevisionProbe {
    fn current_revision(&self, project_root: &Path) -> Option<String> {
        match run_git(&["rev-parse", "HEAD"], project_root) {
            Ok(output) if output.status.success() => {
                let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!sha.is_empty()).then_some(sha)
            }
            Ok(output) => {
                tracing::debug!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git rev-parse HEAD failed"
                );
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "git unavailable");
                None
            }
        }
    }
}

/// Probe that never reports a revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRevision;

impl RevisionProbe for NoRevision {
    fn current_revision(&self, _project_root: &Path) -> Option<String> {
        None
    }
}

/// Run a git command in `repo_root` and return the raw Output.
fn run_git(args: &[&str], repo_root: &Path) -> Result<Output> {
    Command::new("git")
        .args(args)
        .current_dir(repo_root)
        .output()
        .map_err(|source| TrackerError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            source,
        })
}
