//! Typed error hierarchy for the tracker core.
//!
//! `TrackerError` covers the store, the state machine, the execution
//! supervisor and the run orchestrator. The command layer wraps it in
//! `anyhow` for display.

use std::path::PathBuf;

use thiserror::Error;

use crate::session::CommandStatus;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Session {id} not found")]
    SessionNotFound { id: String },

    #[error("Command {command_id} not found in session {session_id}")]
    CommandNotFound { session_id: String, command_id: u32 },

    #[error("No active session. Run 'gpu-tracker init <name>' first.")]
    NoActiveSession,

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session record at {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Failed to launch command '{cmd}': {source}")]
    LaunchFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Session {session_id} is already running {detail}")]
    AlreadyRunning { session_id: String, detail: String },

    #[error("Command {command_id} cannot move from {from} to {to}")]
    InvalidTransition {
        command_id: u32,
        from: CommandStatus,
        to: CommandStatus,
    },
}

impl TrackerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error came from the durable store rather than from the
    /// request itself.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_carries_path_and_kind() {
        let err = TrackerError::io(
            "/tmp/.gpu-tracker/ses_1.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        match &err {
            TrackerError::Io { path, source } => {
                assert_eq!(path, &PathBuf::from("/tmp/.gpu-tracker/ses_1.json"));
                assert_eq!(source.kind(), std::io::ErrorKind::PermissionDenied);
            }
            _ => panic!("Expected Io variant"),
        }
        assert!(err.is_io());
        assert!(err.to_string().contains("ses_1.json"));
    }

    #[test]
    fn session_not_found_mentions_id() {
        let err = TrackerError::SessionNotFound {
            id: "ses_20260101_000000_000_abcd".into(),
        };
        assert!(err.to_string().contains("ses_20260101_000000_000_abcd"));
        assert!(!err.is_io());
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = TrackerError::InvalidTransition {
            command_id: 3,
            from: CommandStatus::Done,
            to: CommandStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("done"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn launch_failed_exposes_source() {
        use std::error::Error as _;
        let err = TrackerError::LaunchFailed {
            cmd: "nope".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.source().is_some());
    }
}
