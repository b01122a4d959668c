use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::errors::{Result, TrackerError};
use crate::session::Session;

/// File holding the id of the session commands apply to by default.
pub const ACTIVE_FILE: &str = "active_session.json";

#[derive(Debug, Serialize, Deserialize)]
struct ActivePointer {
    #[serde(default)]
    active_session: Option<String>,
}

/// Durable storage for session records, one JSON file per session.
///
/// Every write goes to a temporary file in the same directory, is synced,
/// and is then renamed over the target, so a reader sees either the old or
/// the new record and never a partial one.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TrackerError::io(&self.dir, e))
    }

    /// Session ids double as file names, so anything that could escape the
    /// store directory is treated as an unknown session.
    fn checked_id<'a>(&self, id: &'a str) -> Result<&'a str> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(id)
        } else {
            Err(TrackerError::SessionNotFound { id: id.to_string() })
        }
    }

    pub fn session_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn lock_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.checked_id(id).is_ok() && self.session_path(id).is_file()
    }

    /// A fresh id of the form `ses_<date>_<time>_<millis>_<4 hex>`.
    ///
    /// Ids sort in creation order.
    pub fn new_id(&self) -> String {
        loop {
            let now = Local::now();
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            let id = format!("ses_{}_{}", now.format("%Y%m%d_%H%M%S_%3f"), &suffix[..4]);
            if !self.session_path(&id).exists() {
                return id;
            }
        }
    }

    pub fn load(&self, id: &str) -> Result<Session> {
        let id = self.checked_id(id)?;
        let path = self.session_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrackerError::SessionNotFound { id: id.to_string() });
            }
            Err(e) => return Err(TrackerError::io(&path, e)),
        };
        let session: Session = serde_json::from_str(&content)
            .map_err(|source| TrackerError::Corrupt { path: path.clone(), source })?;
        debug!(session = id, commands = session.commands.len(), "loaded session");
        Ok(session)
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        let id = self.checked_id(&session.id)?;
        let bytes = serialize(session)?;
        let path = self.session_path(id);
        write_atomic(&path, &bytes)?;
        debug!(session = id, bytes = bytes.len(), "saved session");
        Ok(())
    }

    /// All sessions in the store, oldest first.
    ///
    /// Records that fail to parse are skipped with a warning so one damaged
    /// file does not hide the rest.
    pub fn list(&self) -> Result<Vec<Session>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let pattern = self.dir.join("ses_*.json").to_string_lossy().to_string();
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| {
                TrackerError::io(
                    &self.dir,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
                )
            })?
            .filter_map(|entry| entry.ok())
            .collect();
        paths.sort();

        let mut sessions = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(id) {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable session"),
            }
        }
        Ok(sessions)
    }

    /// Remove a session record, clearing the active pointer if it named it.
    pub fn delete(&self, id: &str) -> Result<()> {
        let id = self.checked_id(id)?;
        let path = self.session_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TrackerError::SessionNotFound { id: id.to_string() });
            }
            Err(e) => return Err(TrackerError::io(&path, e)),
        }

        if self.active_id()?.as_deref() == Some(id) {
            let active = self.dir.join(ACTIVE_FILE);
            fs::remove_file(&active).map_err(|e| TrackerError::io(&active, e))?;
        }
        debug!(session = id, "deleted session");
        Ok(())
    }

    pub fn active_id(&self) -> Result<Option<String>> {
        let path = self.dir.join(ACTIVE_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrackerError::io(&path, e)),
        };
        let pointer: ActivePointer = serde_json::from_str(&content)
            .map_err(|source| TrackerError::Corrupt { path, source })?;
        Ok(pointer.active_session.filter(|id| !id.is_empty()))
    }

    pub fn set_active(&self, id: &str) -> Result<()> {
        let id = self.checked_id(id)?;
        let pointer = ActivePointer {
            active_session: Some(id.to_string()),
        };
        let bytes = serde_json::to_vec(&pointer).map_err(|source| TrackerError::Corrupt {
            path: self.dir.join(ACTIVE_FILE),
            source,
        })?;
        write_atomic(&self.dir.join(ACTIVE_FILE), &bytes)
    }
}

/// The exact bytes written for a session: pretty JSON plus a trailing newline.
pub fn serialize(session: &Session) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(session).map_err(|source| TrackerError::Corrupt {
        path: PathBuf::from(format!("{}.json", session.id)),
        source,
    })?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| TrackerError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| TrackerError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| TrackerError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| TrackerError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CommandStatus;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join(".gpu-tracker"));
        store.ensure_dir().unwrap();
        (store, dir)
    }

    fn sample_session(store: &SessionStore) -> Session {
        let mut session = Session::new(&store.new_id(), "train", PathBuf::from("/work"), Utc::now());
        session.add_command("python train.py").unwrap();
        session.add_command("python eval.py").unwrap();
        let first = session.command_mut(1).unwrap();
        first.begin_attempt(Utc::now()).unwrap();
        first.record_output("epoch 1 loss=0.5");
        first.finish(0, Utc::now(), Duration::from_secs(90)).unwrap();
        session
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let (store, _dir) = make_store();
        let err = store.load("ses_missing").unwrap_err();
        assert!(matches!(err, TrackerError::SessionNotFound { .. }));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let (store, _dir) = make_store();
        let session = sample_session(&store);
        store.save(&session).unwrap();

        let loaded = store.load(&session.id).unwrap();
        assert_eq!(loaded, session);
        assert_eq!(loaded.commands[0].status, CommandStatus::Done);
        assert_eq!(loaded.commands[0].last_output.last(), Some("epoch 1 loss=0.5"));
    }

    #[test]
    fn test_save_is_byte_stable_across_reload() {
        let (store, _dir) = make_store();
        let session = sample_session(&store);
        store.save(&session).unwrap();
        let first = fs::read(store.session_path(&session.id)).unwrap();

        let reloaded = store.load(&session.id).unwrap();
        store.save(&reloaded).unwrap();
        let second = fs::read(store.session_path(&session.id)).unwrap();

        assert_eq!(first, second);
        assert_eq!(serialize(&reloaded).unwrap(), first);
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let (store, _dir) = make_store();
        let session = sample_session(&store);
        for _ in 0..3 {
            store.save(&session).unwrap();
        }
        let entries: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec![format!("{}.json", session.id)]);
    }

    #[test]
    fn test_save_into_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("does/not/exist"));
        let session = Session::new("ses_a", "a", PathBuf::from("/"), Utc::now());
        let err = store.save(&session).unwrap_err();
        assert!(err.is_io());
    }

    #[test]
    fn test_corrupt_record_is_reported() {
        let (store, _dir) = make_store();
        fs::write(store.session_path("ses_bad"), "{ not json").unwrap();
        assert!(matches!(
            store.load("ses_bad").unwrap_err(),
            TrackerError::Corrupt { .. }
        ));
    }

    #[test]
    fn test_ids_are_unique_and_path_safe() {
        let (store, _dir) = make_store();
        let a = store.new_id();
        let b = store.new_id();
        assert_ne!(a, b);
        assert!(a.starts_with("ses_"));
        assert!(store.checked_id(&a).is_ok());
        assert!(store.load("../etc/passwd").is_err());
        assert!(matches!(
            store.load("a/b").unwrap_err(),
            TrackerError::SessionNotFound { .. }
        ));
    }

    #[test]
    fn test_list_sorted_and_skips_corrupt() {
        let (store, _dir) = make_store();
        let first = Session::new("ses_20260101_000000_000_aaaa", "first", PathBuf::from("/"), Utc::now());
        let second = Session::new("ses_20260102_000000_000_bbbb", "second", PathBuf::from("/"), Utc::now());
        store.save(&second).unwrap();
        store.save(&first).unwrap();
        fs::write(store.session_path("ses_20260103_000000_000_cccc"), "garbage").unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_list_without_directory_is_empty() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join(".gpu-tracker"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_active_pointer_and_delete() {
        let (store, _dir) = make_store();
        assert_eq!(store.active_id().unwrap(), None);

        let session = sample_session(&store);
        store.save(&session).unwrap();
        store.set_active(&session.id).unwrap();
        assert_eq!(store.active_id().unwrap().as_deref(), Some(session.id.as_str()));

        store.delete(&session.id).unwrap();
        assert!(!store.contains(&session.id));
        assert_eq!(store.active_id().unwrap(), None);

        assert!(matches!(
            store.delete(&session.id).unwrap_err(),
            TrackerError::SessionNotFound { .. }
        ));
    }

    #[test]
    fn test_delete_other_session_keeps_active_pointer() {
        let (store, _dir) = make_store();
        let keep = Session::new("ses_keep", "keep", PathBuf::from("/"), Utc::now());
        let drop = Session::new("ses_drop", "drop", PathBuf::from("/"), Utc::now());
        store.save(&keep).unwrap();
        store.save(&drop).unwrap();
        store.set_active("ses_keep").unwrap();

        store.delete("ses_drop").unwrap();
        assert_eq!(store.active_id().unwrap().as_deref(), Some("ses_keep"));
    }
}
