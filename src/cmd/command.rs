//! Queue management and read-only views.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::Cli;
use super::{open_tracker, target_session};

pub fn cmd_add(cli: &Cli, project_dir: &Path, text: &str) -> Result<()> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let command_id = tracker.add_command(&id, text)?;
    println!("Added [{}]: {}", command_id, text);
    Ok(())
}

pub fn cmd_skip(cli: &Cli, project_dir: &Path) -> Result<()> {
    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let skipped = tracker.skip_all(&id)?;
    if skipped.is_empty() {
        println!("No interrupted commands to skip.");
    } else {
        let ids: Vec<String> = skipped.iter().map(|c| c.to_string()).collect();
        println!("Skipped {} command(s): {}", skipped.len(), ids.join(", "));
    }
    Ok(())
}

pub fn cmd_status(cli: &Cli, project_dir: &Path, json: bool) -> Result<()> {
    use gpu_tracker::ui::render_status;

    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let session = tracker.get_status(&id)?;
    if json {
        let out = serde_json::to_string_pretty(&session).context("Failed to serialize session")?;
        println!("{}", out);
    } else {
        print!("{}", render_status(&session));
    }
    Ok(())
}

pub fn cmd_remaining(cli: &Cli, project_dir: &Path) -> Result<()> {
    use gpu_tracker::ui::render_remaining;

    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let remaining = tracker.remaining(&id)?;
    let refs: Vec<_> = remaining.iter().collect();
    println!("{}", render_remaining(&refs).trim_end());
    Ok(())
}

pub fn cmd_next(cli: &Cli, project_dir: &Path) -> Result<()> {
    use gpu_tracker::ui::render_next;

    let tracker = open_tracker(cli, project_dir)?;
    let id = target_session(cli, &tracker)?;
    let next = tracker.peek_next(&id)?;
    println!("{}", render_next(next.as_ref()));
    Ok(())
}
