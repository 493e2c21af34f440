use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "wavekeeper")]
#[command(about = "Execution state tracking for wave-ordered plans", long_about = None)]
#[command(version)]
#[command(subcommand_help_heading = "Commands")]
pub struct Cli {
    /// Plans directory (default: docs/plans, or WAVEKEEPER_PLANS_DIR)
    #[arg(long, global = true)]
    pub plans_dir: Option<PathBuf>,

    /// Correlation id to attach to log lines instead of a generated one
    #[arg(long, global = true)]
    pub correlation_id: Option<String>,

    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// `PLAN` arguments accept a plan id or a path to its state file.
#[derive(Subcommand)]
pub enum Commands {
    /// Print the next eligible plan, or null
    Next,

    /// List every eligible plan in priority order
    Eligible {
        /// Only plans in this wave
        #[arg(long)]
        wave: Option<u32>,

        /// Only this plan id
        #[arg(long)]
        plan_id: Option<String>,
    },

    /// List blocked plans with severity, reason and any blocker note
    Blocked,

    /// Start eligible plans in priority order
    Execute {
        /// Only plans in this wave
        #[arg(long)]
        wave: Option<u32>,

        /// Only this plan id
        #[arg(long)]
        plan_id: Option<String>,

        #[arg(long, default_value_t = 1)]
        max_plans: usize,

        /// Print the selection without starting anything
        #[arg(long)]
        dry_run: bool,

        /// Keep starting until a plan is blocked
        #[arg(long, value_enum)]
        until_status: Option<StopStatus>,

        /// Executor metadata as JSON
        #[arg(long)]
        executor: Option<String>,
    },

    /// Create missing state files and the manifest from parser output
    Export {
        /// JSON file holding an array of parsed plans
        parsed: PathBuf,
    },

    /// Move a pending plan to executing
    Start {
        plan: String,

        /// Executor metadata as JSON, e.g. '{"tool":"codex","run_id":"abc"}'
        #[arg(long)]
        executor: Option<String>,
    },

    /// Move a blocked or failed plan back to executing
    Resume {
        plan: String,

        /// Executor metadata as JSON
        #[arg(long)]
        executor: Option<String>,
    },

    /// Mark a task complete (1-based)
    CompleteTask { plan: String, task: u32 },

    /// Set the cursor step of the current task (-1 = all done)
    AdvanceStep {
        plan: String,
        #[arg(allow_hyphen_values = true)]
        step: i32,
    },

    /// Extend the lease held by RUN_ID
    RenewLease { plan: String, run_id: String },

    /// Record one verification run
    RecordVerification {
        plan: String,

        /// quick, full or smoke
        #[arg(long)]
        tier: String,

        /// Command that was run
        #[arg(long = "command")]
        verify_command: String,

        #[arg(long, allow_hyphen_values = true)]
        exit_code: i32,

        /// Existing log file; one is created when omitted
        #[arg(long)]
        log_path: Option<String>,
    },

    /// Finish an executing plan
    MarkVerified { plan: String },

    /// Fail an executing plan
    MarkFailed {
        plan: String,
        #[arg(long, default_value = "")]
        reason: String,
    },

    /// Block an executing plan
    MarkBlocked {
        plan: String,
        #[arg(long)]
        reason: String,

        /// critical, high, medium or low (anything else is high)
        #[arg(long, default_value = "high")]
        severity: String,
    },

    /// Apply a JSON state patch
    Patch { plan: String, patch: String },

    /// Fail a stuck executing plan and resume it under a fresh run
    Unlock {
        plan: String,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        yes: bool,
    },

    /// Re-mirror live statuses into the manifest
    Refresh,

    /// Rewrite state files stored at an older schema version
    Migrate,

    /// Report drift, stale executions and lease problems
    Reconcile {
        /// Override the stale execution threshold
        #[arg(long)]
        stale_hours: Option<u32>,
    },

    /// Run the plan's allowlisted rollback command
    Rollback {
        plan: String,

        /// Contract override as JSON: an argv array or {"argv", "cwd", "env"}
        #[arg(long = "command")]
        rollback_command: Option<String>,
    },

    /// Check whether the source plan changed since export
    Drift {
        plan: String,

        /// Source to compare against (default: the path recorded in state)
        #[arg(long)]
        source: Option<PathBuf>,
    },
}

/// Status that ends a batch run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StopStatus {
    Blocked,
}

impl Commands {
    /// Operation name used in log spans.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Next => "next",
            Commands::Eligible { .. } => "eligible",
            Commands::Blocked => "blocked",
            Commands::Execute { .. } => "execute",
            Commands::Export { .. } => "export",
            Commands::Start { .. } => "start",
            Commands::Resume { .. } => "resume",
            Commands::CompleteTask { .. } => "complete-task",
            Commands::AdvanceStep { .. } => "advance-step",
            Commands::RenewLease { .. } => "renew-lease",
            Commands::RecordVerification { .. } => "record-verification",
            Commands::MarkVerified { .. } => "mark-verified",
            Commands::MarkFailed { .. } => "mark-failed",
            Commands::MarkBlocked { .. } => "mark-blocked",
            Commands::Patch { .. } => "patch",
            Commands::Unlock { .. } => "unlock",
            Commands::Refresh => "refresh",
            Commands::Migrate => "migrate",
            Commands::Reconcile { .. } => "reconcile",
            Commands::Rollback { .. } => "rollback",
            Commands::Drift { .. } => "drift",
        }
    }
}
