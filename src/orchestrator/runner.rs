use chrono::Utc;
use std::io::PipeReader;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::shutdown::ShutdownSignal;
use super::state::SessionStore;
use crate::errors::{Result, TrackerError};
use crate::session::{
    CommandStatus, EXIT_LAUNCH_FAILED, Session, signal_exit_code, validate_command_text,
};
use crate::ui::RunReporter;

/// How long output may keep arriving after the child exits before the
/// pipes are abandoned (a backgrounded grandchild can hold them open).
const OUTPUT_DRAIN: Duration = Duration::from_secs(2);

const SIGKILL: i32 = 9;

/// Tunables for running a command.
#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    /// Commands run as `<shell> -c <text>`
    pub shell: String,
    /// Upper bound on how stale the persisted record may get while running
    pub checkpoint_interval: Duration,
    /// Delay between forwarding a cancel signal and SIGKILL
    pub kill_grace: Duration,
    pub echo_output: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            checkpoint_interval: Duration::from_secs(5),
            kill_grace: Duration::from_secs(10),
            echo_output: true,
        }
    }
}

/// What happened to one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub command_id: u32,
    pub status: CommandStatus,
    pub exit_code: i32,
    pub duration: Duration,
    /// Set when the operator cancelled the attempt with this signal
    pub cancelled_by: Option<i32>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Done
    }
}

/// Runs one command of a session as a child process and keeps its record
/// in the store current until the child is gone.
///
/// The record is saved when the attempt starts, at every checkpoint
/// interval while it runs, and once more when it ends. The last save is
/// never skipped, so a clean exit always leaves a terminal record on disk.
#[derive(Clone)]
pub struct ExecutionSupervisor {
    store: SessionStore,
    settings: ExecutionSettings,
    shutdown: ShutdownSignal,
    reporter: Option<Arc<RunReporter>>,
}

impl ExecutionSupervisor {
    pub fn new(store: SessionStore, settings: ExecutionSettings, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            settings,
            shutdown,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<RunReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    pub fn reporter(&self) -> Option<&RunReporter> {
        self.reporter.as_deref()
    }

    /// Run command `command_id` of `session` to completion.
    ///
    /// The command must be `pending` or `interrupted`, and no other command
    /// of the session may be `running`. A launch failure is recorded as an
    /// interrupted attempt before `LaunchFailed` is returned.
    pub async fn execute(&self, session: &mut Session, command_id: u32) -> Result<ExecutionOutcome> {
        let idx = session
            .commands
            .iter()
            .position(|c| c.id == command_id)
            .ok_or_else(|| TrackerError::CommandNotFound {
                session_id: session.id.clone(),
                command_id,
            })?;
        if let Some(running) = session.running() {
            return Err(TrackerError::AlreadyRunning {
                session_id: session.id.clone(),
                detail: format!("command {} ({})", running.id, running.cmd),
            });
        }
        validate_command_text(&session.commands[idx].cmd)?;

        session.commands[idx].begin_attempt(Utc::now())?;
        self.store.save(session)?;

        let cmd_text = session.commands[idx].cmd.clone();
        info!(session = %session.id, command = command_id, cmd = %cmd_text, "starting command");
        if let Some(ref reporter) = self.reporter {
            reporter.command_started(command_id, &cmd_text);
        }

        let start = Instant::now();
        let (mut child, output) = match self.spawn(&cmd_text, &session.cwd) {
            Ok(spawned) => spawned,
            Err(source) => {
                warn!(command = command_id, error = %source, "failed to launch command");
                let command = &mut session.commands[idx];
                command.record_output(format!("failed to launch: {}", source));
                command.interrupt(EXIT_LAUNCH_FAILED, Utc::now(), start.elapsed())?;
                self.store.save(session)?;
                if let Some(ref reporter) = self.reporter {
                    reporter.command_finished(command_id, CommandStatus::Interrupted, EXIT_LAUNCH_FAILED);
                }
                return Err(TrackerError::LaunchFailed {
                    cmd: cmd_text,
                    source,
                });
            }
        };
        debug!(pid = child.id().unwrap_or(0), "process spawned");

        if let Some(pid) = child.id() {
            self.shutdown.track_group(pid as i32);
        }

        let (tx, mut rx) = mpsc::channel::<String>(256);
        let reader = spawn_reader(output, tx);

        let interval = self.settings.checkpoint_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut exit_code: Option<i32> = None;
        let mut cancelled_by: Option<i32> = None;
        let mut output_open = true;
        let mut kill_deadline: Option<tokio::time::Instant> = None;
        let mut drain_deadline: Option<tokio::time::Instant> = None;

        while exit_code.is_none() || output_open {
            tokio::select! {
                line = rx.recv(), if output_open => match line {
                    Some(line) => self.record_line(session, idx, line),
                    None => output_open = false,
                },
                status = child.wait(), if exit_code.is_none() => {
                    exit_code = Some(match status {
                        Ok(status) => exit_code_of(status),
                        Err(e) => {
                            warn!(error = %e, "failed to wait for child; exit status unknown");
                            -1
                        }
                    });
                    drain_deadline = Some(tokio::time::Instant::now() + OUTPUT_DRAIN);
                },
                _ = ticker.tick() => {
                    session.commands[idx].record_elapsed(start.elapsed());
                    if let Err(e) = self.store.save(session) {
                        warn!(error = %e, "checkpoint failed, retrying at next interval");
                    }
                },
                sig = self.shutdown.wait(), if cancelled_by.is_none() && exit_code.is_none() => {
                    info!(signal = sig, command = command_id, "cancelling command");
                    cancelled_by = Some(sig);
                    signal_group(&child, sig);
                    kill_deadline = Some(tokio::time::Instant::now() + self.settings.kill_grace);
                },
                _ = sleep_until_or_never(kill_deadline), if kill_deadline.is_some() && exit_code.is_none() => {
                    warn!(command = command_id, "command ignored cancel signal, sending SIGKILL");
                    signal_group(&child, SIGKILL);
                    if let Err(e) = child.start_kill() {
                        debug!(error = %e, "start_kill failed");
                    }
                    kill_deadline = None;
                },
                _ = sleep_until_or_never(drain_deadline), if drain_deadline.is_some() && output_open => {
                    debug!("output still open after exit, detaching");
                    output_open = false;
                },
            }
        }

        while let Ok(line) = rx.try_recv() {
            self.record_line(session, idx, line);
        }
        reader.abort();
        self.shutdown.clear_group();

        let duration = start.elapsed();
        let now = Utc::now();
        let command = &mut session.commands[idx];
        let status = match cancelled_by {
            Some(sig) => {
                command.interrupt(signal_exit_code(sig), now, duration)?;
                CommandStatus::Interrupted
            }
            None => command.finish(exit_code.unwrap_or(-1), now, duration)?,
        };
        let recorded_exit = command.exit_code.unwrap_or(-1);
        self.store.save(session)?;

        info!(
            command = command_id,
            status = %status,
            exit_code = recorded_exit,
            secs = duration.as_secs_f64(),
            "command finished"
        );
        if let Some(ref reporter) = self.reporter {
            reporter.command_finished(command_id, status, recorded_exit);
        }

        Ok(ExecutionOutcome {
            command_id,
            status,
            exit_code: recorded_exit,
            duration,
            cancelled_by,
        })
    }

    /// Spawn `<shell> -c <text>` with stdout and stderr sharing one pipe, so
    /// the returned reader sees both streams in the order they were written.
    fn spawn(&self, text: &str, cwd: &Path) -> std::io::Result<(Child, PipeReader)> {
        let (output, writer) = std::io::pipe()?;
        let stderr = writer.try_clone()?;
        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg("-c")
            .arg(text)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr)
            .kill_on_drop(true);
        // Own process group so a cancel reaches everything the shell started.
        #[cfg(unix)]
        cmd.process_group(0);
        // The write ends are closed when `cmd` drops, leaving the child as
        // the only writer.
        let child = cmd.spawn()?;
        Ok((child, output))
    }

    fn record_line(&self, session: &mut Session, idx: usize, line: String) {
        if let Some(ref reporter) = self.reporter {
            reporter.output_line(&line);
        }
        session.commands[idx].record_output(line);
    }
}

#[cfg(unix)]
fn spawn_reader(output: PipeReader, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    use std::os::fd::OwnedFd;
    use tokio::net::unix::pipe;

    tokio::spawn(async move {
        match pipe::Receiver::from_owned_fd(OwnedFd::from(output)) {
            Ok(receiver) => forward_lines(receiver, tx).await,
            Err(e) => warn!(error = %e, "failed to watch command output"),
        }
    })
}

#[cfg(not(unix))]
fn spawn_reader(output: PipeReader, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    use std::io::BufRead;

    tokio::task::spawn_blocking(move || {
        for line in std::io::BufReader::new(output).split(b'\n') {
            let Ok(line) = line else { break };
            let line = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    })
}

/// Forward `reader` line by line. Invalid UTF-8 is replaced, not dropped.
async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\n', '\r'])
                    .to_string();
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "output stream closed");
                break;
            }
        }
    }
}

fn sleep_until_or_never(deadline: Option<tokio::time::Instant>) -> tokio::time::Sleep {
    let far = tokio::time::Instant::now() + Duration::from_secs(60 * 60 * 24 * 365);
    tokio::time::sleep_until(deadline.unwrap_or(far))
}

#[cfg(unix)]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(signal_exit_code))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn signal_group(child: &Child, sig: i32) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created at spawn.
    let rc = unsafe { libc::killpg(pid as libc::pid_t, sig) };
    if rc != 0 {
        debug!(pid, signal = sig, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _sig: i32) {}
