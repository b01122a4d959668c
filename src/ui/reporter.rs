use console::style;

use super::icons::{DONE, INTERRUPTED, SKIPPED};
use crate::session::CommandStatus;

/// Live terminal output while commands run.
///
/// Headers and results always print; child output lines only when `echo`
/// is on.
#[derive(Debug, Clone)]
pub struct RunReporter {
    echo: bool,
}

impl RunReporter {
    pub fn new(echo: bool) -> Self {
        Self { echo }
    }

    pub fn command_started(&self, id: u32, cmd: &str) {
        println!();
        println!("{} [{}]: {}", style("Running").cyan().bold(), id, cmd);
        println!("{}", style("-".repeat(60)).dim());
    }

    pub fn output_line(&self, line: &str) {
        if self.echo {
            println!("{}", line);
        }
    }

    pub fn command_finished(&self, id: u32, status: CommandStatus, exit_code: i32) {
        println!("{}", style("-".repeat(60)).dim());
        let line = format!("[{}] {} (exit={})", id, status, exit_code);
        if status == CommandStatus::Done {
            println!("{} {}", DONE, style(line).green());
        } else {
            println!("{} {}", INTERRUPTED, style(line).red());
        }
    }

    pub fn command_skipped(&self, id: u32, exit_code: i32) {
        println!("{} [{}] skipped (exit={})", SKIPPED, id, exit_code);
    }
}
