use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::Serialize;
use serde_json::json;
use wavekeeper::config::TrackerConfig;
use wavekeeper::drift::check_drift;
use wavekeeper::export::ParsedPlan;
use wavekeeper::lifecycle::{ExecuteOptions, VerificationInput};
use wavekeeper::models::state::{ExecutorInfo, StatePatch};
use wavekeeper::scheduler::EligibilityFilter;
use wavekeeper::{OpContext, Tracker, TrackerError};

use super::types::{Cli, Commands, StopStatus};

pub fn dispatch(cli: Cli) -> Result<()> {
    let mut config = TrackerConfig::load(cli.plans_dir.as_deref())?;
    if let Commands::Reconcile {
        stale_hours: Some(hours),
    } = &cli.command
    {
        config.stale_execution_after = Duration::hours(i64::from(*hours));
    }

    let ctx = match cli.correlation_id {
        Some(id) => OpContext::with_correlation_id(cli.command.name(), id),
        None => OpContext::new(cli.command.name()),
    };
    let tracker = Tracker::new(config);

    match cli.command {
        Commands::Next => print_json(&tracker.next_plan(&ctx)?),
        Commands::Eligible { wave, plan_id } => {
            let filter = EligibilityFilter { wave, plan_id };
            print_json(&tracker.eligible(&ctx, &filter)?)
        }
        Commands::Blocked => print_json(&tracker.blocked_plans(&ctx)?),
        Commands::Execute {
            wave,
            plan_id,
            max_plans,
            dry_run,
            until_status,
            executor,
        } => {
            let options = ExecuteOptions {
                filter: EligibilityFilter { wave, plan_id },
                max_plans,
                dry_run,
                until_blocked: until_status == Some(StopStatus::Blocked),
                executor: parse_executor(executor.as_deref())?,
            };
            print_json(&tracker.execute(&ctx, &options)?)
        }
        Commands::Export { parsed } => {
            let raw = fs::read_to_string(&parsed)
                .with_context(|| format!("Failed to read {}", parsed.display()))?;
            let plans: Vec<ParsedPlan> = serde_json::from_str(&raw)
                .map_err(|e| TrackerError::invalid_input("parsed", e.to_string()))?;
            print_json(&tracker.export(&ctx, &plans)?)
        }
        Commands::Start { plan, executor } => {
            let executor = parse_executor(executor.as_deref())?;
            print_json(&tracker.start(&ctx, &tracker.state_path(&plan), executor)?)
        }
        Commands::Resume { plan, executor } => {
            let executor = parse_executor(executor.as_deref())?;
            print_json(&tracker.resume(&ctx, &tracker.state_path(&plan), executor)?)
        }
        Commands::CompleteTask { plan, task } => {
            print_json(&tracker.complete_task(&ctx, &tracker.state_path(&plan), task)?)
        }
        Commands::AdvanceStep { plan, step } => {
            print_json(&tracker.advance_step(&ctx, &tracker.state_path(&plan), step)?)
        }
        Commands::RenewLease { plan, run_id } => {
            print_json(&tracker.renew_lease(&ctx, &tracker.state_path(&plan), &run_id)?)
        }
        Commands::RecordVerification {
            plan,
            tier,
            verify_command,
            exit_code,
            log_path,
        } => {
            let input = VerificationInput {
                tier: tier.parse()?,
                command: verify_command,
                exit_code,
                log_path,
            };
            print_json(&tracker.record_verification(&ctx, &tracker.state_path(&plan), input)?)
        }
        Commands::MarkVerified { plan } => {
            print_json(&tracker.mark_verified(&ctx, &tracker.state_path(&plan))?)
        }
        Commands::MarkFailed { plan, reason } => {
            print_json(&tracker.mark_failed(&ctx, &tracker.state_path(&plan), &reason)?)
        }
        Commands::MarkBlocked {
            plan,
            reason,
            severity,
        } => print_json(&tracker.mark_blocked(
            &ctx,
            &tracker.state_path(&plan),
            &reason,
            &severity,
        )?),
        Commands::Patch { plan, patch } => {
            let patch = StatePatch::from_json(&patch)?;
            print_json(&tracker.update_state(&ctx, &tracker.state_path(&plan), patch)?)
        }
        Commands::Unlock { plan, force, yes } => {
            if !(force && yes) {
                return Err(TrackerError::invalid_input(
                    "unlock",
                    "releasing a lease requires both --force and --yes",
                )
                .into());
            }
            print_json(&tracker.force_unlock(&ctx, &tracker.state_path(&plan))?)
        }
        Commands::Refresh => print_json(&tracker.refresh(&ctx)?),
        Commands::Migrate => print_json(&tracker.migrate(&ctx)?),
        Commands::Reconcile { .. } => print_json(&tracker.reconcile(&ctx)?),
        Commands::Rollback {
            plan,
            rollback_command,
        } => print_json(&tracker.rollback(
            &ctx,
            &tracker.state_path(&plan),
            rollback_command.as_deref(),
        )?),
        Commands::Drift { plan, source } => {
            let state_path = tracker.state_path(&plan);
            let source = match source {
                Some(source) => Some(source),
                None if state_path.exists() => {
                    let state = tracker.read(&state_path)?;
                    Some(tracker.layout_for(&state_path).resolve(&state.source_plan_path))
                }
                None => None,
            };
            let drift = match &source {
                Some(source) => check_drift(&state_path, source)?,
                None => false,
            };
            print_json(&json!({
                "state_path": state_path,
                "source_path": source.unwrap_or_else(PathBuf::new),
                "drift": drift,
            }))
        }
    }
}

fn parse_executor(raw: Option<&str>) -> Result<Option<ExecutorInfo>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let executor = serde_json::from_str(raw)
        .map_err(|e| TrackerError::invalid_input("executor", format!("expected a JSON object: {e}")))?;
    Ok(Some(executor))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
