//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                  |
//! |------------|---------------------------------------------------|
//! | `session`  | `Init`, `List`, `Delete`                          |
//! | `command`  | `Add`, `Skip`, `Status`, `Remaining`, `Next`      |
//! | `run`      | `Run`, `Next --run`, `Retry`, `RunAll`            |

pub mod command;
pub mod run;
pub mod session;

pub use command::{cmd_add, cmd_next, cmd_remaining, cmd_skip, cmd_status};
pub use run::{cmd_retry, cmd_run, cmd_run_all, cmd_run_next};
pub use session::{cmd_delete, cmd_init, cmd_list};

use anyhow::Result;
use console::style;
use std::path::Path;

use gpu_tracker::config::Config;
use gpu_tracker::tracker::Tracker;
use gpu_tracker::ui::RunReporter;

use super::Cli;

/// Build a tracker for `project_dir` with CLI overrides applied.
pub fn open_tracker(cli: &Cli, project_dir: &Path) -> Result<Tracker> {
    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?.quiet(cli.quiet);
    for warning in &config.warnings {
        eprintln!("{} {}", style("Warning:").yellow(), warning);
    }
    let reporter = RunReporter::new(config.execution.echo_output);
    Ok(Tracker::new(config).with_reporter(reporter))
}

/// The session named by `--session`, or the active one.
pub fn target_session(cli: &Cli, tracker: &Tracker) -> Result<String> {
    Ok(tracker.resolve_session_id(cli.session.as_deref())?)
}
