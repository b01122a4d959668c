use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::init::TRACKER_DIR;
use crate::orchestrator::ExecutionSettings;
use crate::tracker_config::{CONFIG_FILE, TrackerToml};

/// Runtime configuration for the tracker.
///
/// This struct bridges `tracker.toml` with the runtime needs of the store
/// and the execution supervisor. It resolves paths relative to the project
/// directory and applies the environment layer on top of the file.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub tracker_dir: PathBuf,
    pub config_file: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub execution: ExecutionSettings,
    /// Default failure policy for run-all when `--skip-errors` is not given
    pub skip_errors: bool,
    /// Warnings gathered while resolving file and environment values
    pub warnings: Vec<String>,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;

        let tracker_dir = project_dir.join(TRACKER_DIR);
        let mut toml = TrackerToml::load_or_default(&tracker_dir)?;
        let mut warnings = toml.apply_env(|key| std::env::var(key).ok());
        warnings.extend(toml.validate());

        Ok(Self::from_parts(project_dir, tracker_dir, verbose, &toml, warnings))
    }

    fn from_parts(
        project_dir: PathBuf,
        tracker_dir: PathBuf,
        verbose: bool,
        toml: &TrackerToml,
        warnings: Vec<String>,
    ) -> Self {
        let shell = if toml.execution.shell.trim().is_empty() {
            "sh".to_string()
        } else {
            toml.execution.shell.clone()
        };
        let execution = ExecutionSettings {
            shell,
            checkpoint_interval: Duration::from_secs(toml.execution.checkpoint_interval_secs.max(1)),
            kill_grace: Duration::from_secs(toml.execution.kill_grace_secs),
            echo_output: toml.execution.echo_output,
        };

        Self {
            config_file: tracker_dir.join(CONFIG_FILE),
            log_dir: tracker_dir.join("logs"),
            project_dir,
            tracker_dir,
            verbose,
            execution,
            skip_errors: toml.run_all.skip_errors,
            warnings,
        }
    }

    /// CLI override: stop echoing child output to the terminal.
    pub fn quiet(mut self, quiet: bool) -> Self {
        if quiet {
            self.execution.echo_output = false;
        }
        self
    }
}
