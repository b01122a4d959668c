//! Commands that execute tracked commands.
//!
//! Exit status mirrors the executed command: success when it ended `done`,
//! 1 when it ended `interrupted`, `128 + N` when cancelled by signal N.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;
use std::process::ExitCode;

use gpu_tracker::orchestrator::{ExecutionOutcome, RunSummary, ShutdownSignal, StopReason};

use super::super::Cli;
use super::{open_tracker, target_session};

fn install_shutdown() -> Result<ShutdownSignal> {
    ShutdownSignal::install().context("Failed to install signal handlers")
}

fn signal_exit(signal: i32) -> ExitCode {
    ExitCode::from(u8::try_from(128 + signal).unwrap_or(1))
}

fn outcome_exit(outcome: &ExecutionOutcome) -> ExitCode {
    if let Some(signal) = outcome.cancelled_by {
        return signal_exit(signal);
    }
    if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

pub async fn cmd_run(cli: &Cli, project_dir: &Path, text: &str) -> Result<ExitCode> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let shutdown = install_shutdown()?;

    let outcome = tracker.run_single(&id, text, &shutdown).await?;
    Ok(outcome_exit(&outcome))
}

pub async fn cmd_run_next(cli: &Cli, project_dir: &Path) -> Result<ExitCode> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let shutdown = install_shutdown()?;

    match tracker.run_next(&id, &shutdown).await? {
        Some(outcome) => Ok(outcome_exit(&outcome)),
        None => {
            println!("No pending commands.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub async fn cmd_retry(cli: &Cli, project_dir: &Path) -> Result<ExitCode> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let shutdown = install_shutdown()?;

    match tracker.retry(&id, &shutdown).await? {
        Some(outcome) => Ok(outcome_exit(&outcome)),
        None => {
            println!("No interrupted commands to retry.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub async fn cmd_run_all(cli: &Cli, project_dir: &Path, skip_errors: bool) -> Result<ExitCode> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let skip_errors = skip_errors || tracker.config().skip_errors;
    let shutdown = install_shutdown()?;

    let summary = tracker.run_all(&id, skip_errors, &shutdown).await?;
    print_summary(&summary);

    Ok(match summary.stop {
        None => ExitCode::SUCCESS,
        Some(StopReason::Failed { .. }) => ExitCode::FAILURE,
        Some(StopReason::Cancelled { signal }) => signal_exit(signal),
    })
}

fn print_summary(summary: &RunSummary) {
    if *summary == RunSummary::default() {
        println!("No pending commands.");
        return;
    }

    println!();
    match summary.stop {
        Some(StopReason::Failed { command_id, exit_code }) => {
            println!(
                "{} Command {} failed (exit={}). Use --skip-errors to continue past failures.",
                style("Stopped.").red().bold(),
                command_id,
                exit_code
            );
        }
        Some(StopReason::Cancelled { signal }) => {
            println!("{} Cancelled by signal {}.", style("Stopped.").yellow().bold(), signal);
        }
        None => {}
    }
    println!(
        "Finished: {} ran, {} skipped, {} failed",
        summary.ran, summary.skipped, summary.failed
    );
}
