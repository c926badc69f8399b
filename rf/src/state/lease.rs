//! Per-session exclusive leases
//!
//! A lease is held in two places: an in-process set, and an advisory lock on
//! `{lock_dir}/{id}.lock` so that a second `rf` process cannot lease the same
//! session while the first is running it.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use tracing::{debug, warn};

use super::messages::StateError;

type Held = Arc<Mutex<HashSet<String>>>;

fn lock(held: &Held) -> MutexGuard<'_, HashSet<String>> {
    // The set stays consistent even if a holder panicked
    match held.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sessions currently leased by this process
#[derive(Debug, Clone)]
pub(crate) struct LeaseTable {
    held: Held,
    lock_dir: PathBuf,
}

impl LeaseTable {
    pub(crate) fn new(lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            held: Held::default(),
            lock_dir: lock_dir.into(),
        }
    }

    pub(crate) fn try_acquire(&self, session_id: &str) -> Result<SessionLease, StateError> {
        debug!(%session_id, "LeaseTable::try_acquire: called");
        if !lock(&self.held).insert(session_id.to_string()) {
            return Err(StateError::Busy(session_id.to_string()));
        }
        match lock_file(&self.lock_dir, session_id) {
            Ok(file) => Ok(SessionLease {
                session_id: session_id.to_string(),
                held: self.held.clone(),
                file,
            }),
            Err(e) => {
                lock(&self.held).remove(session_id);
                Err(e)
            }
        }
    }

    pub(crate) fn is_held(&self, session_id: &str) -> bool {
        lock(&self.held).contains(session_id)
    }
}

/// Open and exclusively lock a session's lock file without blocking
fn lock_file(lock_dir: &Path, session_id: &str) -> Result<File, StateError> {
    let persistence = |e: io::Error| StateError::Persistence(format!("lock for {}: {}", session_id, e));
    fs::create_dir_all(lock_dir).map_err(persistence)?;
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_dir.join(format!("{}.lock", session_id)))
        .map_err(persistence)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            debug!(%session_id, "lock_file: held by another process");
            Err(StateError::Busy(session_id.to_string()))
        }
        Err(e) => Err(persistence(e)),
    }
}

/// Exclusive right to mutate one session; released on drop
#[derive(Debug)]
pub struct SessionLease {
    session_id: String,
    held: Held,
    file: File,
}

impl SessionLease {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        debug!(session_id = %self.session_id, "SessionLease::drop: released");
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(session_id = %self.session_id, error = %e, "Failed to unlock session lock file");
        }
        lock(&self.held).remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_second_lease_is_busy_until_drop() {
        let temp = tempdir().unwrap();
        let table = LeaseTable::new(temp.path());
        let lease = table.try_acquire("s1").unwrap();
        assert!(matches!(table.try_acquire("s1"), Err(StateError::Busy(id)) if id == "s1"));
        assert!(table.try_acquire("s2").is_ok());
        assert!(table.is_held("s1"));

        drop(lease);
        assert!(!table.is_held("s1"));
        assert!(table.try_acquire("s1").is_ok());
    }

    #[test]
    fn test_lock_file_excludes_other_tables() {
        let temp = tempdir().unwrap();
        let first = LeaseTable::new(temp.path());
        let second = LeaseTable::new(temp.path());

        let lease = first.try_acquire("s1").unwrap();
        assert!(temp.path().join("s1.lock").exists());
        assert!(!second.is_held("s1"));
        assert!(matches!(second.try_acquire("s1"), Err(StateError::Busy(_))));
        assert!(!second.is_held("s1"));

        drop(lease);
        assert!(second.try_acquire("s1").is_ok());
    }
}
