//! File-based configuration for the tracker.
//!
//! Settings live in `.gpu-tracker/tracker.toml`. Every key is optional:
//!
//! ```toml
//! [execution]
//! shell = "sh"                  # commands run as `<shell> -c <text>`
//! checkpoint_interval_secs = 5  # how stale the on-disk record may get
//! kill_grace_secs = 10          # SIGTERM -> SIGKILL delay on cancel
//! echo_output = true            # stream child output to the terminal
//!
//! [run_all]
//! skip_errors = false           # default failure policy for run-all
//! ```
//!
//! Values are layered file → environment → CLI. The environment layer is
//! `GPU_TRACKER_SHELL` and `GPU_TRACKER_CHECKPOINT_SECS`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file inside the tracker directory.
pub const CONFIG_FILE: &str = "tracker.toml";

pub const ENV_SHELL: &str = "GPU_TRACKER_SHELL";
pub const ENV_CHECKPOINT_SECS: &str = "GPU_TRACKER_CHECKPOINT_SECS";

/// Template written by `gpu-tracker init`.
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# gpu-tracker configuration. Every key is optional.

[execution]
# shell = "sh"
# checkpoint_interval_secs = 5
# kill_grace_secs = 10
# echo_output = true

[run_all]
# skip_errors = false
"#;

/// How commands are executed and supervised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSection {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    #[serde(default = "default_echo_output")]
    pub echo_output: bool,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_checkpoint_interval_secs() -> u64 {
    5
}

fn default_kill_grace_secs() -> u64 {
    10
}

fn default_echo_output() -> bool {
    true
}

impl Default for ExecutionSection {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            checkpoint_interval_secs: default_checkpoint_interval_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            echo_output: default_echo_output(),
        }
    }
}

/// Defaults for `run-all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunAllSection {
    #[serde(default)]
    pub skip_errors: bool,
}

/// The complete tracker.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackerToml {
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub run_all: RunAllSection,
}

impl TrackerToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse tracker.toml")
    }

    /// Load from `<tracker_dir>/tracker.toml`, or defaults if it doesn't exist.
    pub fn load_or_default(tracker_dir: &Path) -> Result<Self> {
        let config_path = tracker_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Unparseable values leave the file value in place and are reported in
    /// the returned warnings.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut warnings = Vec::new();

        if let Some(shell) = lookup(ENV_SHELL)
            && !shell.trim().is_empty()
        {
            self.execution.shell = shell;
        }

        if let Some(raw) = lookup(ENV_CHECKPOINT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.execution.checkpoint_interval_secs = secs,
                Err(_) => warnings.push(format!(
                    "Ignoring {}='{}': expected a whole number of seconds",
                    ENV_CHECKPOINT_SECS, raw
                )),
            }
        }

        warnings
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.execution.shell.trim().is_empty() {
            warnings.push("execution.shell is empty; falling back to 'sh'".to_string());
        }
        if self.execution.checkpoint_interval_secs == 0 {
            warnings.push(
                "execution.checkpoint_interval_secs is 0; using 1 second instead".to_string(),
            );
        }

        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tracker_toml_parse_empty() {
        let toml = TrackerToml::parse("").unwrap();
        assert_eq!(toml.execution.shell, "sh");
        assert_eq!(toml.execution.checkpoint_interval_secs, 5);
        assert_eq!(toml.execution.kill_grace_secs, 10);
        assert!(toml.execution.echo_output);
        assert!(!toml.run_all.skip_errors);
    }

    #[test]
    fn test_tracker_toml_parse_sections() {
        let content = r#"
[execution]
shell = "bash"
checkpoint_interval_secs = 2
echo_output = false

[run_all]
skip_errors = true
"#;
        let toml = TrackerToml::parse(content).unwrap();
        assert_eq!(toml.execution.shell, "bash");
        assert_eq!(toml.execution.checkpoint_interval_secs, 2);
        assert_eq!(toml.execution.kill_grace_secs, 10);
        assert!(!toml.execution.echo_output);
        assert!(toml.run_all.skip_errors);
    }

    #[test]
    fn test_tracker_toml_ignores_unknown_keys() {
        let content = r#"
[execution]
shell = "zsh"
future_option = 1
"#;
        let toml = TrackerToml::parse(content).unwrap();
        assert_eq!(toml.execution.shell, "zsh");
    }

    #[test]
    fn test_tracker_toml_invalid_type_is_error() {
        let content = r#"
[execution]
checkpoint_interval_secs = "often"
"#;
        assert!(TrackerToml::parse(content).is_err());
    }

    #[test]
    fn test_default_template_parses_to_defaults() {
        let toml = TrackerToml::parse(DEFAULT_CONFIG_TEMPLATE).unwrap();
        assert_eq!(toml, TrackerToml::default());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut toml = TrackerToml::parse("[execution]\nshell = \"bash\"\n").unwrap();
        let warnings = toml.apply_env(|key| match key {
            ENV_SHELL => Some("dash".to_string()),
            ENV_CHECKPOINT_SECS => Some("3".to_string()),
            _ => None,
        });
        assert!(warnings.is_empty());
        assert_eq!(toml.execution.shell, "dash");
        assert_eq!(toml.execution.checkpoint_interval_secs, 3);
    }

    #[test]
    fn test_env_bad_interval_is_reported() {
        let mut toml = TrackerToml::default();
        let warnings = toml.apply_env(|key| (key == ENV_CHECKPOINT_SECS).then(|| "soon".to_string()));
        assert_eq!(warnings.len(), 1);
        assert_eq!(toml.execution.checkpoint_interval_secs, 5);
    }

    #[test]
    fn test_validate_flags_zero_interval_and_empty_shell() {
        let mut toml = TrackerToml::default();
        assert!(toml.validate().is_empty());
        toml.execution.checkpoint_interval_secs = 0;
        toml.execution.shell = " ".to_string();
        assert_eq!(toml.validate().len(), 2);
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempdir().unwrap();
        assert_eq!(TrackerToml::load_or_default(dir.path()).unwrap(), TrackerToml::default());

        std::fs::write(dir.path().join(CONFIG_FILE), "[execution]\nkill_grace_secs = 30\n").unwrap();

        let loaded = TrackerToml::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded.execution.kill_grace_secs, 30);
    }
}
