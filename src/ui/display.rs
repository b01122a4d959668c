//! Text rendering for status, queue and session listings.
//!
//! Every function returns a `String` so the command layer decides where it
//! goes and tests can inspect it.

use console::style;
use std::fmt::Write;

use super::icons::status_icon;
use crate::session::{Command, CommandStatus, Session};

/// Human-readable duration: `45s`, `3min 20s`, `3min`, `2h 5min`, or `-`.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds else {
        return "-".to_string();
    };
    let total = seconds.max(0.0).round() as u64;
    if total < 60 {
        return format!("{}s", total);
    }
    if total < 3600 {
        let (m, s) = (total / 60, total % 60);
        return if s == 0 {
            format!("{}min", m)
        } else {
            format!("{}min {}s", m, s)
        };
    }
    format!("{}h {}min", total / 3600, (total % 3600) / 60)
}

fn paint(status: CommandStatus, text: String) -> String {
    let styled = style(text);
    let styled = match status {
        CommandStatus::Done => styled.green(),
        CommandStatus::Interrupted => styled.red(),
        CommandStatus::Running => styled.yellow().bold(),
        CommandStatus::Pending | CommandStatus::Skipped => styled.dim(),
    };
    styled.to_string()
}

fn exit_text(command: &Command) -> String {
    command
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// The status table for one session.
pub fn render_status(session: &Session) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} ({})",
        style("Session:").bold(),
        session.name,
        style(&session.id).dim()
    );

    let counts = session.counts();
    let mut line = format!(
        "done={} running={} interrupted={}",
        counts.done, counts.running, counts.interrupted
    );
    if counts.skipped > 0 {
        let _ = write!(line, " skipped={}", counts.skipped);
    }
    let _ = write!(line, " pending={}", counts.pending);
    let _ = writeln!(out, "{}", line);

    if session.commands.is_empty() {
        let _ = writeln!(out, "\nNo commands yet. Add one with 'gpu-tracker add <cmd>'.");
        return out;
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{}",
        style(format!("{:>3}  {:<14} {:<40} {:>10} {:>6}", "#", "STATUS", "COMMAND", "TIME", "EXIT")).bold()
    );
    for command in &session.commands {
        let status = paint(
            command.status,
            format!("{:<14}", format!("{} {}", status_icon(command.status), command.status)),
        );
        let _ = writeln!(
            out,
            "{:>3}  {} {:<40} {:>10} {:>6}",
            command.id,
            status,
            truncate(&command.cmd, 40),
            format_duration(command.display_seconds()),
            exit_text(command)
        );
    }
    out
}

/// Output of `next`.
pub fn render_next(command: Option<&Command>) -> String {
    match command {
        Some(command) => format!("Next: [{}] {}", command.id, command.cmd),
        None => "No pending commands.".to_string(),
    }
}

/// Output of `remaining`.
pub fn render_remaining(commands: &[&Command]) -> String {
    if commands.is_empty() {
        return "Nothing remaining.".to_string();
    }
    let mut out = format!("{} remaining:\n", commands.len());
    for command in commands {
        let _ = writeln!(
            out,
            "  {}. {} [{}] {}",
            command.id,
            paint(command.status, status_icon(command.status).to_string()),
            command.status,
            command.cmd
        );
    }
    out
}

/// Output of `list`, marking the active session.
pub fn render_sessions(sessions: &[Session], active: Option<&str>) -> String {
    if sessions.is_empty() {
        return "No sessions. Create one with 'gpu-tracker init <name>'.".to_string();
    }
    let mut out = String::new();
    for session in sessions {
        let counts = session.counts();
        let marker = if active == Some(session.id.as_str()) { "*" } else { " " };
        let _ = writeln!(
            out,
            "{} {}  {}  {}/{} done  created={}",
            marker,
            session.id,
            style(&session.name).bold(),
            counts.done,
            counts.total(),
            session.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    out
}

fn truncate(text: &str, max: usize) -> String {
    let first_line = text.lines().next().unwrap_or("");
    if first_line.chars().count() <= max && first_line.len() == text.len() {
        return text.to_string();
    }
    let mut short: String = first_line.chars().take(max.saturating_sub(3)).collect();
    short.push_str("...");
    short
}
