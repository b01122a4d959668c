//! Session lifecycle commands: init, list, delete.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use super::super::Cli;
use super::open_tracker;

pub fn cmd_init(cli: &Cli, project_dir: &Path, name: &str) -> Result<()> {
    use gpu_tracker::init::init_store;

    let result = init_store(project_dir).context("Failed to initialize tracker store")?;
    if result.created {
        println!("Initialized {}", result.tracker_dir.display());
    }

    let tracker = open_tracker(cli, project_dir)?;
    let id = tracker.create_session(name)?;
    println!(
        "{} session {} ({})",
        style("Created").green().bold(),
        style(name.trim()).bold(),
        id
    );
    Ok(())
}

pub fn cmd_list(cli: &Cli, project_dir: &Path) -> Result<()> {
    use gpu_tracker::ui::render_sessions;

    let tracker = open_tracker(cli, project_dir)?;
    let sessions = tracker.list_sessions()?;
    let active = tracker.active_session_id()?;
    print!("{}", render_sessions(&sessions, active.as_deref()));
    if sessions.is_empty() {
        println!();
    }
    Ok(())
}

pub fn cmd_delete(cli: &Cli, project_dir: &Path, id: &str, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let tracker = open_tracker(cli, project_dir)?;
    let session = tracker.get_status(id)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt(format!(
                "Delete session '{}' ({}) with {} commands?",
                session.name,
                session.id,
                session.commands.len()
            ))
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Delete cancelled");
            return Ok(());
        }
    }

    tracker.delete_session(id)?;
    println!("Deleted session {}", id);
    Ok(())
}
