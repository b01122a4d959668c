//! Bootstrapping of the per-directory tracker store.
//!
//! `gpu-tracker init` creates the `.gpu-tracker/` directory in the working
//! directory:
//!
//! ```text
//! .gpu-tracker/
//! ├── tracker.toml          # Optional configuration (commented defaults)
//! ├── active_session.json   # Pointer to the session commands apply to
//! ├── ses_<...>.json        # One record per session
//! ├── ses_<...>.lock        # Held while an invocation works on a session
//! └── logs/                 # Diagnostic log
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::tracker_config::{CONFIG_FILE, DEFAULT_CONFIG_TEMPLATE};

/// The name of the tracker directory.
pub const TRACKER_DIR: &str = ".gpu-tracker";

/// Result of initializing the tracker directory.
#[derive(Debug)]
pub struct InitResult {
    /// Path to the .gpu-tracker directory
    pub tracker_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Create `.gpu-tracker/` under `project_dir`, filling in anything missing.
pub fn init_store(project_dir: &Path) -> Result<InitResult> {
    let tracker_dir = get_tracker_dir(project_dir);
    let created = !tracker_dir.exists();

    std::fs::create_dir_all(&tracker_dir)
        .with_context(|| format!("Failed to create directory: {}", tracker_dir.display()))?;

    let logs_dir = tracker_dir.join("logs");
    std::fs::create_dir_all(&logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    let config_file = tracker_dir.join(CONFIG_FILE);
    if !config_file.exists() {
        std::fs::write(&config_file, DEFAULT_CONFIG_TEMPLATE)
            .with_context(|| format!("Failed to create {}", config_file.display()))?;
    }

    Ok(InitResult {
        tracker_dir,
        created,
    })
}

pub fn get_tracker_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(TRACKER_DIR)
}
