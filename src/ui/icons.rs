//! Shared status icons.
//!
//! Each icon falls back to plain ASCII on terminals that can't show it.

use console::Emoji;

use crate::session::CommandStatus;

pub static DONE: Emoji<'_, '_> = Emoji("✓", "+");
pub static INTERRUPTED: Emoji<'_, '_> = Emoji("✗", "x");
pub static RUNNING: Emoji<'_, '_> = Emoji("►", ">");
pub static PENDING: Emoji<'_, '_> = Emoji("○", "o");
pub static SKIPPED: Emoji<'_, '_> = Emoji("⊘", "-");

pub fn status_icon(status: CommandStatus) -> &'static Emoji<'static, 'static> {
    match status {
        CommandStatus::Done => &DONE,
        CommandStatus::Interrupted => &INTERRUPTED,
        CommandStatus::Running => &RUNNING,
        CommandStatus::Pending => &PENDING,
        CommandStatus::Skipped => &SKIPPED,
    }
}
