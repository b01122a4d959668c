use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use super::state::SessionStore;
use crate::errors::{Result, TrackerError};

/// Exclusive claim on one session, held for as long as an invocation may
/// modify it.
///
/// Backed by an advisory file lock next to the session record, so the
/// operating system releases it when the holder exits for any reason. The
/// lock file records the holder's pid for diagnostics.
#[derive(Debug)]
pub struct SessionLock {
    file: File,
    path: PathBuf,
}

impl SessionLock {
    /// Claim `session_id`, failing with `AlreadyRunning` when another
    /// invocation holds it.
    pub fn try_acquire(store: &SessionStore, session_id: &str) -> Result<Self> {
        let path = store.lock_path(session_id);
        // Don't truncate before the lock is held; the pid belongs to the holder.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| TrackerError::io(&path, e))?;

        if let Err(e) = fs2::FileExt::try_lock_exclusive(&file) {
            if is_contended(&e) {
                let holder = std::fs::read_to_string(&path).unwrap_or_default();
                let detail = match holder.trim() {
                    "" => "in another gpu-tracker process".to_string(),
                    pid => format!("in gpu-tracker process {}", pid),
                };
                return Err(TrackerError::AlreadyRunning {
                    session_id: session_id.to_string(),
                    detail,
                });
            }
            return Err(TrackerError::io(&path, e));
        }

        file.set_len(0).map_err(|e| TrackerError::io(&path, e))?;
        writeln!(file, "{}", std::process::id()).map_err(|e| TrackerError::io(&path, e))?;
        debug!(session = session_id, "acquired session lock");

        Ok(Self { file, path })
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "released session lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        (store, dir)
    }

    #[test]
    fn test_second_acquire_is_already_running() {
        let (store, _dir) = make_store();
        let held = SessionLock::try_acquire(&store, "ses_a").unwrap();

        let err = SessionLock::try_acquire(&store, "ses_a").unwrap_err();
        match err {
            TrackerError::AlreadyRunning { session_id, detail } => {
                assert_eq!(session_id, "ses_a");
                assert!(detail.contains(&std::process::id().to_string()));
            }
            other => panic!("Expected AlreadyRunning, got {:?}", other),
        }

        drop(held);
        SessionLock::try_acquire(&store, "ses_a").unwrap();
    }

    #[test]
    fn test_locks_are_per_session() {
        let (store, _dir) = make_store();
        let _a = SessionLock::try_acquire(&store, "ses_a").unwrap();
        let _b = SessionLock::try_acquire(&store, "ses_b").unwrap();
    }

    #[test]
    fn test_lock_in_missing_directory_is_io_error() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("missing"));
        assert!(SessionLock::try_acquire(&store, "ses_a").unwrap_err().is_io());
    }
}
