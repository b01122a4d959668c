//! The tracker facade used by the command layer.
//!
//! Every operation that changes a session first takes the session's busy
//! lock, then loads the record and repairs any `running` command left
//! behind by an invocation that died. Read-only operations never wait on
//! the lock; they repair in memory only when nobody holds it.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::errors::{Result, TrackerError};
use crate::orchestrator::{
    ExecutionOutcome, ExecutionSupervisor, RunOrchestrator, RunSummary, SessionLock, SessionStore,
    ShutdownSignal, skip_all_interrupted,
};
use crate::session::{Command, Session, validate_command_text};
use crate::ui::RunReporter;

/// A session loaded under its busy lock.
struct LockedSession {
    session: Session,
    _lock: SessionLock,
}

pub struct Tracker {
    config: Config,
    store: SessionStore,
    reporter: Option<Arc<RunReporter>>,
}

impl Tracker {
    pub fn new(config: Config) -> Self {
        let store = SessionStore::new(&config.tracker_dir);
        Self {
            config,
            store,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: RunReporter) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn active_session_id(&self) -> Result<Option<String>> {
        self.store.active_id()
    }

    /// The session to operate on: `explicit` if given, else the active one.
    pub fn resolve_session_id(&self, explicit: Option<&str>) -> Result<String> {
        if let Some(id) = explicit {
            if !self.store.contains(id) {
                return Err(TrackerError::SessionNotFound { id: id.to_string() });
            }
            return Ok(id.to_string());
        }
        self.active_session_id()?.ok_or(TrackerError::NoActiveSession)
    }

    /// Create an empty session in the project directory and make it active.
    pub fn create_session(&self, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TrackerError::InvalidInput(
                "session name must not be empty".to_string(),
            ));
        }
        self.store.ensure_dir()?;

        let id = self.store.new_id();
        let session = Session::new(&id, name, self.config.project_dir.clone(), Utc::now());
        self.store.save(&session)?;
        self.store.set_active(&id)?;
        info!(session = %id, name, "created session");
        Ok(id)
    }

    fn open(&self, id: &str) -> Result<LockedSession> {
        // Surface NotFound before a lock file is created for a bogus id.
        self.store.load(id)?;
        let lock = SessionLock::try_acquire(&self.store, id)?;

        let mut session = self.store.load(id)?;
        let recovered = session.recover_stale();
        if !recovered.is_empty() {
            warn!(
                session = id,
                commands = ?recovered,
                "found running commands with no live supervisor, marked interrupted"
            );
            self.store.save(&session)?;
        }
        Ok(LockedSession {
            session,
            _lock: lock,
        })
    }

    fn supervisor(&self, shutdown: &ShutdownSignal) -> ExecutionSupervisor {
        let supervisor = ExecutionSupervisor::new(
            self.store.clone(),
            self.config.execution.clone(),
            shutdown.clone(),
        );
        match self.reporter {
            Some(ref reporter) => supervisor.with_reporter(Arc::clone(reporter)),
            None => supervisor,
        }
    }

    pub fn add_command(&self, id: &str, text: &str) -> Result<u32> {
        validate_command_text(text)?;
        let mut locked = self.open(id)?;
        let command_id = locked.session.add_command(text)?;
        self.store.save(&locked.session)?;
        info!(session = id, command = command_id, "added command");
        Ok(command_id)
    }

    /// Add `text` to the session and execute it right away.
    pub async fn run_single(
        &self,
        id: &str,
        text: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<ExecutionOutcome> {
        validate_command_text(text)?;
        let mut locked = self.open(id)?;
        let command_id = locked.session.add_command(text)?;
        self.store.save(&locked.session)?;
        self.supervisor(shutdown)
            .execute(&mut locked.session, command_id)
            .await
    }

    /// Execute the first pending command, if any.
    pub async fn run_next(
        &self,
        id: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<ExecutionOutcome>> {
        let mut locked = self.open(id)?;
        let Some(command_id) = locked.session.next_pending().map(|c| c.id) else {
            return Ok(None);
        };
        let outcome = self
            .supervisor(shutdown)
            .execute(&mut locked.session, command_id)
            .await?;
        Ok(Some(outcome))
    }

    /// Execute the first interrupted command again, if any.
    pub async fn retry(
        &self,
        id: &str,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<ExecutionOutcome>> {
        let mut locked = self.open(id)?;
        let Some(command_id) = locked.session.first_interrupted().map(|c| c.id) else {
            return Ok(None);
        };
        let outcome = self
            .supervisor(shutdown)
            .execute(&mut locked.session, command_id)
            .await?;
        Ok(Some(outcome))
    }

    pub async fn run_all(
        &self,
        id: &str,
        skip_errors: bool,
        shutdown: &ShutdownSignal,
    ) -> Result<RunSummary> {
        let mut locked = self.open(id)?;
        RunOrchestrator::new(self.supervisor(shutdown))
            .run_all(&mut locked.session, skip_errors)
            .await
    }

    /// Mark every interrupted command skipped; returns the affected ids.
    pub fn skip_all(&self, id: &str) -> Result<Vec<u32>> {
        let mut locked = self.open(id)?;
        skip_all_interrupted(&self.store, &mut locked.session)
    }

    pub fn peek_next(&self, id: &str) -> Result<Option<Command>> {
        Ok(self.get_status(id)?.next_pending().cloned())
    }

    /// Pending and interrupted commands, in session order.
    pub fn remaining(&self, id: &str) -> Result<Vec<Command>> {
        Ok(self
            .get_status(id)?
            .remaining()
            .into_iter()
            .cloned()
            .collect())
    }

    /// Snapshot of a session.
    ///
    /// While another invocation holds the session, `running` is shown as
    /// is. Otherwise stale `running` records are shown as interrupted
    /// without touching the store.
    pub fn get_status(&self, id: &str) -> Result<Session> {
        let mut session = self.store.load(id)?;
        self.reconcile_if_idle(&mut session)?;
        Ok(session)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = self.store.list()?;
        for session in &mut sessions {
            self.reconcile_if_idle(session)?;
        }
        Ok(sessions)
    }

    fn reconcile_if_idle(&self, session: &mut Session) -> Result<()> {
        if session.running().is_none() {
            return Ok(());
        }
        match SessionLock::try_acquire(&self.store, &session.id) {
            Ok(_lock) => {
                session.recover_stale();
                Ok(())
            }
            Err(TrackerError::AlreadyRunning { .. }) => Ok(()),
            // A read-only store can't be locked; show what's on disk.
            Err(e) if e.is_io() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn delete_session(&self, id: &str) -> Result<()> {
        self.store.load(id)?;
        let lock = SessionLock::try_acquire(&self.store, id)?;
        self.store.delete(id)?;
        drop(lock);

        let lock_path = self.store.lock_path(id);
        match std::fs::remove_file(&lock_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TrackerError::io(&lock_path, e)),
        }
        info!(session = id, "deleted session");
        Ok(())
    }
}
