use tracing::{error, info, warn};

use super::runner::ExecutionSupervisor;
use super::state::SessionStore;
use crate::errors::{Result, TrackerError};
use crate::session::{CommandStatus, Session};

/// Why `run_all` stopped before reaching the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A command ended `interrupted` and errors were not being skipped
    Failed { command_id: u32, exit_code: i32 },
    /// The operator sent a signal; the current command stays `interrupted`
    Cancelled { signal: i32 },
}

/// Tally of one `run_all` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Commands that reached `done`
    pub ran: usize,
    /// Commands marked `skipped` because of the skip-errors policy
    pub skipped: usize,
    /// Commands that ended `interrupted` and stayed that way
    pub failed: usize,
    pub stop: Option<StopReason>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.stop.is_none()
    }
}

/// Runs a session's pending commands one after another.
pub struct RunOrchestrator {
    supervisor: ExecutionSupervisor,
}

impl RunOrchestrator {
    pub fn new(supervisor: ExecutionSupervisor) -> Self {
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &ExecutionSupervisor {
        &self.supervisor
    }

    /// Execute every command that is `pending` when the pass starts, in
    /// session order.
    ///
    /// A command that ends `interrupted` stops the pass unless
    /// `skip_errors` is set, in which case it is marked `skipped` and the
    /// pass continues. An operator signal always stops the pass.
    pub async fn run_all(&self, session: &mut Session, skip_errors: bool) -> Result<RunSummary> {
        let queue: Vec<u32> = session
            .commands
            .iter()
            .filter(|c| c.status == CommandStatus::Pending)
            .map(|c| c.id)
            .collect();
        info!(session = %session.id, queued = queue.len(), skip_errors, "starting run-all");

        let mut summary = RunSummary::default();
        for command_id in queue {
            if let Some(signal) = self.supervisor.shutdown().received() {
                summary.stop = Some(StopReason::Cancelled { signal });
                break;
            }

            let outcome = match self.supervisor.execute(session, command_id).await {
                Ok(outcome) => outcome,
                Err(TrackerError::LaunchFailed { cmd, source }) => {
                    // Already recorded as interrupted; handle like any failure.
                    error!(command = command_id, cmd = %cmd, error = %source, "launch failed");
                    let exit_code = session
                        .command(command_id)
                        .and_then(|c| c.exit_code)
                        .unwrap_or(crate::session::EXIT_LAUNCH_FAILED);
                    if self.handle_failure(session, command_id, exit_code, skip_errors, &mut summary)? {
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(signal) = outcome.cancelled_by {
                summary.failed += 1;
                summary.stop = Some(StopReason::Cancelled { signal });
                break;
            }
            if outcome.succeeded() {
                summary.ran += 1;
                continue;
            }
            if self.handle_failure(session, command_id, outcome.exit_code, skip_errors, &mut summary)? {
                break;
            }
        }

        info!(
            ran = summary.ran,
            skipped = summary.skipped,
            failed = summary.failed,
            stopped = summary.stop.is_some(),
            "run-all finished"
        );
        Ok(summary)
    }

    /// Apply the failure policy to an interrupted command. Returns whether
    /// the pass must stop.
    fn handle_failure(
        &self,
        session: &mut Session,
        command_id: u32,
        exit_code: i32,
        skip_errors: bool,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        if !skip_errors {
            summary.failed += 1;
            summary.stop = Some(StopReason::Failed {
                command_id,
                exit_code,
            });
            return Ok(true);
        }

        session.command_mut(command_id)?.skip()?;
        self.supervisor.store().save(session)?;
        warn!(command = command_id, exit_code, "skipping failed command");
        if let Some(reporter) = self.supervisor.reporter() {
            reporter.command_skipped(command_id, exit_code);
        }
        summary.skipped += 1;
        Ok(false)
    }
}

/// Mark every interrupted command of `session` skipped and persist it.
pub fn skip_all_interrupted(store: &SessionStore, session: &mut Session) -> Result<Vec<u32>> {
    let skipped = session.skip_interrupted();
    if !skipped.is_empty() {
        store.save(session)?;
        info!(session = %session.id, count = skipped.len(), "skipped interrupted commands");
    }
    Ok(skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::shutdown::{SIGINT, ShutdownSignal};
    use crate::orchestrator::ExecutionSettings;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn setup(commands: &[&str]) -> (RunOrchestrator, Session, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join(".gpu-tracker"));
        store.ensure_dir().unwrap();
        let mut session = Session::new("ses_run", "run", dir.path().to_path_buf(), Utc::now());
        for text in commands {
            session.add_command(text).unwrap();
        }
        store.save(&session).unwrap();
        let settings = ExecutionSettings {
            checkpoint_interval: Duration::from_millis(200),
            kill_grace: Duration::from_millis(500),
            echo_output: false,
            ..ExecutionSettings::default()
        };
        let supervisor = ExecutionSupervisor::new(store, settings, ShutdownSignal::new());
        (RunOrchestrator::new(supervisor), session, dir)
    }

    fn statuses(session: &Session) -> Vec<CommandStatus> {
        session.commands.iter().map(|c| c.status).collect()
    }

    #[tokio::test]
    async fn test_run_all_success() {
        let (orchestrator, mut session, _dir) = setup(&["echo hello", "echo world"]);
        let summary = orchestrator.run_all(&mut session, false).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!(summary.ran, 2);
        assert_eq!(statuses(&session), vec![CommandStatus::Done, CommandStatus::Done]);
        assert_eq!(session.commands[0].last_output.last(), Some("hello"));
        assert_eq!(session.commands[1].last_output.last(), Some("world"));
    }

    #[tokio::test]
    async fn test_run_all_stops_at_failure() {
        let (orchestrator, mut session, _dir) = setup(&["echo ok", "exit 1", "echo never"]);
        let summary = orchestrator.run_all(&mut session, false).await.unwrap();

        assert_eq!(
            summary.stop,
            Some(StopReason::Failed {
                command_id: 2,
                exit_code: 1
            })
        );
        assert_eq!((summary.ran, summary.skipped, summary.failed), (1, 0, 1));
        assert_eq!(
            statuses(&session),
            vec![CommandStatus::Done, CommandStatus::Interrupted, CommandStatus::Pending]
        );
    }

    #[tokio::test]
    async fn test_run_all_skip_errors_continues() {
        let (orchestrator, mut session, _dir) = setup(&["echo ok", "exit 1", "echo after"]);
        let summary = orchestrator.run_all(&mut session, true).await.unwrap();

        assert!(summary.succeeded());
        assert_eq!((summary.ran, summary.skipped, summary.failed), (2, 1, 0));
        assert_eq!(
            statuses(&session),
            vec![CommandStatus::Done, CommandStatus::Skipped, CommandStatus::Done]
        );
        assert_eq!(session.commands[1].exit_code, Some(1));

        let saved = orchestrator.supervisor().store().load("ses_run").unwrap();
        assert_eq!(statuses(&saved), statuses(&session));
    }

    #[tokio::test]
    async fn test_run_all_ignores_existing_interrupted() {
        let (orchestrator, mut session, _dir) = setup(&["exit 4", "echo fresh"]);
        session.commands[0].begin_attempt(Utc::now()).unwrap();
        session.commands[0].finish(4, Utc::now(), Duration::ZERO).unwrap();

        let summary = orchestrator.run_all(&mut session, false).await.unwrap();
        assert_eq!(summary.ran, 1);
        assert_eq!(session.commands[0].status, CommandStatus::Interrupted);
        assert_eq!(session.commands[1].status, CommandStatus::Done);
    }

    #[tokio::test]
    async fn test_run_all_with_nothing_pending() {
        let (orchestrator, mut session, _dir) = setup(&[]);
        let summary = orchestrator.run_all(&mut session, false).await.unwrap();
        assert_eq!(summary, RunSummary::default());
    }

    #[tokio::test]
    async fn test_signal_stops_run_all_even_when_skipping() {
        let (orchestrator, mut session, _dir) = setup(&["sleep 30", "echo never"]);
        let shutdown = orchestrator.supervisor().shutdown().clone();

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.trigger(SIGINT);
        };
        let (summary, _) = tokio::join!(orchestrator.run_all(&mut session, true), cancel);
        let summary = summary.unwrap();

        assert_eq!(summary.stop, Some(StopReason::Cancelled { signal: SIGINT }));
        assert_eq!(summary.failed, 1);
        assert_eq!(session.commands[0].status, CommandStatus::Interrupted);
        assert_eq!(session.commands[0].exit_code, Some(-SIGINT));
        assert_eq!(session.commands[1].status, CommandStatus::Pending);
    }

    #[tokio::test]
    async fn test_launch_failure_follows_policy() {
        let (orchestrator, mut session, dir) = setup(&["echo a", "echo b"]);
        session.cwd = dir.path().join("gone");

        let summary = orchestrator.run_all(&mut session, true).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(statuses(&session), vec![CommandStatus::Skipped, CommandStatus::Skipped]);
    }

    #[tokio::test]
    async fn test_skip_all_interrupted() {
        let (orchestrator, mut session, _dir) = setup(&["exit 1", "echo b", "exit 2"]);
        orchestrator.run_all(&mut session, false).await.unwrap();
        session.commands[2].begin_attempt(Utc::now()).unwrap();
        session.commands[2].finish(2, Utc::now(), Duration::ZERO).unwrap();

        let skipped = skip_all_interrupted(orchestrator.supervisor().store(), &mut session).unwrap();
        assert_eq!(skipped, vec![1, 3]);
        let saved = orchestrator.supervisor().store().load("ses_run").unwrap();
        assert_eq!(
            statuses(&saved),
            vec![CommandStatus::Skipped, CommandStatus::Pending, CommandStatus::Skipped]
        );
    }
}
