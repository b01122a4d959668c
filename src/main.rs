use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

mod cmd;

#[derive(Parser)]
#[command(name = "gpu-tracker")]
#[command(version, about = "Crash-safe tracker for long-running shell commands")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Don't echo command output to the terminal
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Target this session instead of the active one
    #[arg(long, global = true)]
    pub session: Option<String>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a session and make it active
    Init {
        /// Session name
        name: String,
    },
    /// Queue a command in the active session
    Add {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Add a command and run it immediately
    Run {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Show the next pending command
    Next {
        /// Run it instead of just showing it
        #[arg(long)]
        run: bool,
    },
    /// Show the session's commands and their state
    Status {
        /// Print the raw session record as JSON
        #[arg(long)]
        json: bool,
    },
    /// List pending and interrupted commands
    Remaining,
    /// Run every pending command in order
    RunAll {
        /// Mark failed commands skipped and keep going
        #[arg(long)]
        skip_errors: bool,
    },
    /// Mark all interrupted commands skipped
    Skip,
    /// Re-run the first interrupted command
    Retry,
    /// List sessions in this directory
    List,
    /// Delete a session
    Delete {
        id: String,
        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

/// Stderr output filtered by `RUST_LOG`, plus `.gpu-tracker/logs/tracker.log`
/// once the store exists.
fn init_logging(project_dir: &Path, verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let stderr_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(stderr_filter);

    let log_dir = gpu_tracker::init::get_tracker_dir(project_dir).join("logs");
    let file_layer = if log_dir.is_dir() {
        tracing_appender::rolling::RollingFileAppender::builder()
            .rotation(tracing_appender::rolling::Rotation::NEVER)
            .filename_prefix("tracker.log")
            .build(&log_dir)
            .ok()
            .map(|appender| {
                let level = if verbose {
                    LevelFilter::DEBUG
                } else {
                    LevelFilter::INFO
                };
                fmt::layer()
                    .with_writer(appender)
                    .with_ansi(false)
                    .with_filter(level)
            })
    } else {
        None
    };

    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}

fn joined(words: &[String]) -> String {
    words.join(" ")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    init_logging(&project_dir, cli.verbose);

    let code = match &cli.command {
        Commands::Init { name } => {
            cmd::cmd_init(&cli, &project_dir, name)?;
            ExitCode::SUCCESS
        }
        Commands::Add { cmd: words } => {
            cmd::cmd_add(&cli, &project_dir, &joined(words))?;
            ExitCode::SUCCESS
        }
        Commands::Run { cmd: words } => cmd::cmd_run(&cli, &project_dir, &joined(words)).await?,
        Commands::Next { run: true } => cmd::cmd_run_next(&cli, &project_dir).await?,
        Commands::Next { run: false } => {
            cmd::cmd_next(&cli, &project_dir)?;
            ExitCode::SUCCESS
        }
        Commands::Status { json } => {
            cmd::cmd_status(&cli, &project_dir, *json)?;
            ExitCode::SUCCESS
        }
        Commands::Remaining => {
            cmd::cmd_remaining(&cli, &project_dir)?;
            ExitCode::SUCCESS
        }
        Commands::RunAll { skip_errors } => {
            cmd::cmd_run_all(&cli, &project_dir, *skip_errors).await?
        }
        Commands::Skip => {
            cmd::cmd_skip(&cli, &project_dir)?;
            ExitCode::SUCCESS
        }
        Commands::Retry => cmd::cmd_retry(&cli, &project_dir).await?,
        Commands::List => {
            cmd::cmd_list(&cli, &project_dir)?;
            ExitCode::SUCCESS
        }
        Commands::Delete { id, force } => {
            cmd::cmd_delete(&cli, &project_dir, id, *force)?;
            ExitCode::SUCCESS
        }
    };

    Ok(code)
}
