//! Structured rollback contracts and their execution
//!
//! A rollback is either a bare argv array or an object
//! `{"argv": [...], "cwd": "...", "env": {...}}`. Raw shell strings are
//! refused and the command never goes through a shell. The executable's
//! basename must be on the configured allowlist.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use serde_json::Value;
use shell_escape::escape;

use crate::error::{Result, TrackerError};

/// Validated rollback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackSpec {
    pub argv: Vec<String>,
    /// Working directory, already resolved against the project root
    pub cwd: Option<PathBuf>,
    /// Variables layered over the inherited environment
    pub env: BTreeMap<String, String>,
}

/// Outcome of a rollback run, as reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    pub plan_id: String,
    pub argv: Vec<String>,
    pub command: String,
    pub exit_code: i32,
    pub log_path: String,
    pub stdout: String,
    pub stderr: String,
}

/// Captured process output before it is logged.
#[derive(Debug, Clone)]
pub struct RollbackRun {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Pick the rollback contract: an explicit JSON override wins over the
/// contract recorded in the manifest.
pub fn select_contract(
    plan_id: &str,
    override_json: Option<&str>,
    recorded: Option<&Value>,
) -> Result<Value> {
    if let Some(raw) = override_json.map(str::trim).filter(|s| !s.is_empty()) {
        return serde_json::from_str(raw).map_err(|_| {
            reject(
                plan_id,
                "rollback override must be JSON (array argv or object with argv)",
            )
        });
    }
    recorded
        .cloned()
        .filter(|value| !value.is_null())
        .ok_or_else(|| reject(plan_id, "no rollback command available for plan"))
}

impl RollbackSpec {
    /// Validate a raw contract value.
    ///
    /// # Arguments
    /// * `plan_id` - Plan the rollback belongs to, used in errors
    /// * `value` - Contract as found in the manifest or given on the command line
    /// * `project_root` - Base for a relative `cwd`
    pub fn parse(plan_id: &str, value: &Value, project_root: &Path) -> Result<Self> {
        match value {
            Value::String(_) => Err(reject(
                plan_id,
                "rollback must be structured JSON with argv (raw shell strings are not allowed)",
            )),
            Value::Array(_) => Ok(Self {
                argv: parse_argv(plan_id, Some(value))?,
                cwd: None,
                env: BTreeMap::new(),
            }),
            Value::Object(map) => Ok(Self {
                argv: parse_argv(plan_id, map.get("argv"))?,
                cwd: parse_cwd(plan_id, map.get("cwd"), project_root)?,
                env: parse_env(plan_id, map.get("env"))?,
            }),
            _ => Err(reject(
                plan_id,
                "rollback spec must be an argv list or object with argv",
            )),
        }
    }

    /// Basename of the program, which is what the allowlist matches.
    pub fn executable(&self) -> &str {
        let program = self.argv.first().map(String::as_str).unwrap_or_default();
        Path::new(program)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(program)
    }

    pub fn ensure_allowed(&self, plan_id: &str, allowlist: &BTreeSet<String>) -> Result<()> {
        let executable = self.executable();
        if allowlist.contains(executable) {
            return Ok(());
        }
        let allowed: Vec<&str> = allowlist.iter().map(String::as_str).collect();
        Err(reject(
            plan_id,
            format!(
                "command '{executable}' is not in allowlist: [{}]",
                allowed.join(", ")
            ),
        ))
    }

    /// Shell-quoted rendering of argv for logs. Never executed.
    pub fn display_command(&self) -> String {
        self.argv
            .iter()
            .map(|arg| escape(Cow::Borrowed(arg.as_str())).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command directly, without a shell, and capture its output.
    ///
    /// A process killed by a signal reports exit code `-1`.
    pub fn run(&self) -> Result<RollbackRun> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| TrackerError::invalid_input("argv", "rollback argv is empty"))?;

        let mut command = Command::new(program);
        command.args(args).envs(&self.env);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        tracing::debug!(argv = ?self.argv, cwd = ?self.cwd, "running rollback");
        let output = command.output().map_err(|source| TrackerError::CommandFailed {
            command: self.display_command(),
            source,
        })?;

        Ok(RollbackRun {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

fn parse_argv(plan_id: &str, value: Option<&Value>) -> Result<Vec<String>> {
    let items = match value {
        Some(Value::Array(items)) if !items.is_empty() => items,
        _ => return Err(reject(plan_id, "rollback argv must be a non-empty array")),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
            _ => Err(reject(plan_id, "rollback argv values must be non-empty strings")),
        })
        .collect()
}

fn parse_cwd(plan_id: &str, value: Option<&Value>, project_root: &Path) -> Result<Option<PathBuf>> {
    let raw = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(_) => return Err(reject(plan_id, "rollback cwd must be a non-empty string")),
    };

    let path = Path::new(raw);
    let cwd = if path.is_absolute() {
        path.to_path_buf()
    } else {
        project_root.join(path)
    };
    if !cwd.is_dir() {
        return Err(reject(
            plan_id,
            format!("rollback cwd does not exist: {}", cwd.display()),
        ));
    }
    Ok(Some(cwd))
}

fn parse_env(plan_id: &str, value: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let map = match value {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::Object(map)) => map,
        Some(_) => return Err(reject(plan_id, "rollback env must be an object")),
    };
    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) => Ok((key.clone(), s.clone())),
            _ => Err(reject(plan_id, format!("rollback env value for '{key}' must be a string"))),
        })
        .collect()
}

fn reject(plan_id: &str, reason: impl Into<String>) -> TrackerError {
    TrackerError::RollbackRejected {
        plan_id: plan_id.to_string(),
        reason: reason.into(),
    }
}
