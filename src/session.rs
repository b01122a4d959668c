//! Session and command records for the tracker.
//!
//! This module provides:
//! - `Command`, one shell command and its observed outcome
//! - `Session`, an ordered list of commands plus metadata
//! - `CommandStatus` and the transitions between statuses
//! - `TailBuffer`, the bounded capture of a command's most recent output
//!
//! Statuses move only along these edges:
//!
//! ```text
//! pending ──► running ──► done
//!                │
//!                ▼
//!           interrupted ──► skipped
//!                │
//!                └──► running (retry)
//! ```
//!
//! `done` and `skipped` are terminal. Any other move is rejected with
//! [`TrackerError::InvalidTransition`] and leaves the record untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::{Result, TrackerError};

/// Number of output lines kept per command.
pub const TAIL_LINES: usize = 20;

/// Exit code recorded when the command text could not be launched at all.
pub const EXIT_LAUNCH_FAILED: i32 = -1000;

/// Exit code recorded when a `running` record was left behind by an
/// invocation that died before finalizing it.
pub const EXIT_STALE: i32 = -1001;

/// Exit code recorded when a process was ended by signal `signal`.
///
/// Normal exit codes are 0..=255, so a negative value never collides.
pub fn signal_exit_code(signal: i32) -> i32 {
    -signal
}

/// Lifecycle status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Added, never started
    #[default]
    Pending,
    /// Currently executing under a supervisor
    Running,
    /// Exited with code 0
    Done,
    /// Failed, killed, cancelled, or abandoned; can be retried or skipped
    Interrupted,
    /// Interrupted and deliberately given up on
    Skipped,
}

impl CommandStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Interrupted => "interrupted",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The last [`TAIL_LINES`] lines of a command's merged output, newest last.
///
/// Persisted as a plain JSON array. A persisted array longer than the limit
/// keeps only its newest lines when loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct TailBuffer {
    lines: VecDeque<String>,
}

impl TailBuffer {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(TAIL_LINES),
        }
    }

    /// Append a line, evicting the oldest one once the buffer is full.
    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    #[cfg(test)]
    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }
}

impl From<Vec<String>> for TailBuffer {
    fn from(lines: Vec<String>) -> Self {
        let skip = lines.len().saturating_sub(TAIL_LINES);
        let mut buffer = Self::new();
        for line in lines.into_iter().skip(skip) {
            buffer.push(line);
        }
        buffer
    }
}

impl From<TailBuffer> for Vec<String> {
    fn from(buffer: TailBuffer) -> Self {
        buffer.lines.into_iter().collect()
    }
}

/// One tracked shell command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// 1-based position in the session, assigned on add and never changed
    pub id: u32,
    /// Literal command text handed to the shell
    pub cmd: String,
    #[serde(default)]
    pub status: CommandStatus,
    /// Present once an attempt has finished
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Time spent so far, refreshed by every checkpoint while running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub last_output: TailBuffer,
}

/// Round to one decimal place, the precision shown to operators.
fn round_secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 10.0).round() / 10.0
}

impl Command {
    pub fn new(id: u32, cmd: &str) -> Self {
        Self {
            id,
            cmd: cmd.to_string(),
            status: CommandStatus::Pending,
            exit_code: None,
            started_at: None,
            finished_at: None,
            duration_seconds: None,
            elapsed_seconds: None,
            last_output: TailBuffer::new(),
        }
    }

    fn invalid(&self, to: CommandStatus) -> TrackerError {
        TrackerError::InvalidTransition {
            command_id: self.id,
            from: self.status,
            to,
        }
    }

    /// Enter `running` for a new attempt (`pending` or `interrupted` only).
    ///
    /// Output and timing from any earlier attempt are cleared. A retried
    /// command keeps its previous exit code until this attempt finishes.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            CommandStatus::Pending => self.exit_code = None,
            CommandStatus::Interrupted => {}
            _ => return Err(self.invalid(CommandStatus::Running)),
        }
        self.status = CommandStatus::Running;
        self.started_at = Some(now);
        self.finished_at = None;
        self.duration_seconds = None;
        self.elapsed_seconds = Some(0.0);
        self.last_output.clear();
        Ok(())
    }

    pub fn record_output(&mut self, line: impl Into<String>) {
        self.last_output.push(line);
    }

    pub fn record_elapsed(&mut self, elapsed: Duration) {
        if self.status == CommandStatus::Running {
            self.elapsed_seconds = Some(round_secs(elapsed));
        }
    }

    /// Leave `running` after the process exited on its own: `done` for exit
    /// code 0, `interrupted` for anything else.
    pub fn finish(
        &mut self,
        exit_code: i32,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<CommandStatus> {
        let to = if exit_code == 0 {
            CommandStatus::Done
        } else {
            CommandStatus::Interrupted
        };
        self.leave_running(to, exit_code, now, duration)?;
        Ok(to)
    }

    /// Leave `running` as `interrupted` regardless of the exit code.
    pub fn interrupt(&mut self, exit_code: i32, now: DateTime<Utc>, duration: Duration) -> Result<()> {
        self.leave_running(CommandStatus::Interrupted, exit_code, now, duration)
    }

    fn leave_running(
        &mut self,
        to: CommandStatus,
        exit_code: i32,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<()> {
        if self.status != CommandStatus::Running {
            return Err(self.invalid(to));
        }
        self.status = to;
        self.exit_code = Some(exit_code);
        self.finished_at = Some(now);
        self.duration_seconds = Some(round_secs(duration));
        self.elapsed_seconds = None;
        Ok(())
    }

    /// Give up on an interrupted command. The failing exit code is kept.
    pub fn skip(&mut self) -> Result<()> {
        if self.status != CommandStatus::Interrupted {
            return Err(self.invalid(CommandStatus::Skipped));
        }
        self.status = CommandStatus::Skipped;
        Ok(())
    }

    /// Reclassify a `running` record whose supervisor is gone.
    ///
    /// The end time is the last moment the command was known to be alive:
    /// its start plus the elapsed time of the last checkpoint.
    pub fn recover_stale(&mut self) -> Result<()> {
        let elapsed = Duration::from_secs_f64(self.elapsed_seconds.unwrap_or(0.0).max(0.0));
        let started = self.started_at.unwrap_or_else(Utc::now);
        let ended = started
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        self.interrupt(EXIT_STALE, ended, elapsed)
    }

    /// Final duration, or the checkpointed elapsed time while running.
    pub fn display_seconds(&self) -> Option<f64> {
        self.duration_seconds.or(self.elapsed_seconds)
    }
}

/// Reject command text that is empty or whitespace only.
pub fn validate_command_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(TrackerError::InvalidInput(
            "command text must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Per-status command counts for a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub interrupted: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.running + self.done + self.interrupted + self.skipped
    }
}

/// A named, ordered collection of tracked commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// Directory the session was created in; commands run there
    #[serde(default)]
    pub cwd: PathBuf,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl Session {
    pub fn new(id: &str, name: &str, cwd: PathBuf, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            created_at,
            cwd,
            commands: Vec::new(),
        }
    }

    /// Append a `pending` command and return its id.
    pub fn add_command(&mut self, text: &str) -> Result<u32> {
        validate_command_text(text)?;
        let id = self.commands.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        self.commands.push(Command::new(id, text));
        Ok(id)
    }

    pub fn command(&self, id: u32) -> Option<&Command> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn command_mut(&mut self, id: u32) -> Result<&mut Command> {
        let session_id = self.id.clone();
        self.commands
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(TrackerError::CommandNotFound {
                session_id,
                command_id: id,
            })
    }

    fn first_with(&self, status: CommandStatus) -> Option<&Command> {
        self.commands.iter().find(|c| c.status == status)
    }

    pub fn next_pending(&self) -> Option<&Command> {
        self.first_with(CommandStatus::Pending)
    }

    pub fn first_interrupted(&self) -> Option<&Command> {
        self.first_with(CommandStatus::Interrupted)
    }

    pub fn running(&self) -> Option<&Command> {
        self.first_with(CommandStatus::Running)
    }

    /// Commands that still need attention: pending or interrupted.
    pub fn remaining(&self) -> Vec<&Command> {
        self.commands
            .iter()
            .filter(|c| matches!(c.status, CommandStatus::Pending | CommandStatus::Interrupted))
            .collect()
    }

    /// Mark every interrupted command skipped; returns the affected ids.
    pub fn skip_interrupted(&mut self) -> Vec<u32> {
        let mut skipped = Vec::new();
        for command in &mut self.commands {
            if command.skip().is_ok() {
                skipped.push(command.id);
            }
        }
        skipped
    }

    /// Reclassify every `running` record as `interrupted`; returns the
    /// affected ids. Only valid when no live supervisor owns the session.
    pub fn recover_stale(&mut self) -> Vec<u32> {
        let mut recovered = Vec::new();
        for command in &mut self.commands {
            if command.status == CommandStatus::Running && command.recover_stale().is_ok() {
                recovered.push(command.id);
            }
        }
        recovered
    }

    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for command in &self.commands {
            match command.status {
                CommandStatus::Pending => counts.pending += 1,
                CommandStatus::Running => counts.running += 1,
                CommandStatus::Done => counts.done += 1,
                CommandStatus::Interrupted => counts.interrupted += 1,
                CommandStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}
