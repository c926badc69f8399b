//! JSON snapshots, one file per session
//!
//! Each snapshot is written to a temporary sibling and renamed over the
//! previous one, so pollers never observe a half-written file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::Session;

const SNAPSHOT_EXT: &str = "json";
const TMP_SUFFIX: &str = ".tmp";

/// Directory of `{id}.json` session snapshots
#[derive(Debug, Clone)]
pub struct SnapshotDir {
    dir: PathBuf,
}

impl SnapshotDir {
    /// Open (and create if needed) the snapshot directory
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!(dir = %dir.display(), "SnapshotDir::open: called");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, SNAPSHOT_EXT))
    }

    /// Atomically replace the snapshot for a session
    pub fn write(&self, session: &Session) -> io::Result<()> {
        debug!(id = %session.id, stage = %session.stage, "SnapshotDir::write: called");
        let path = self.path_for(&session.id);
        let tmp = self.dir.join(format!("{}.{}{}", session.id, SNAPSHOT_EXT, TMP_SUFFIX));

        let json = serde_json::to_vec_pretty(session).map_err(io::Error::other)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)
    }

    /// Read one snapshot
    pub fn read(&self, id: &str) -> io::Result<Session> {
        let content = fs::read_to_string(self.path_for(id))?;
        serde_json::from_str(&content).map_err(io::Error::other)
    }

    /// Load every readable snapshot; unreadable files are skipped with a warning
    pub fn load_all(&self) -> io::Result<Vec<Session>> {
        debug!(dir = %self.dir.display(), "SnapshotDir::load_all: called");
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|c| serde_json::from_str::<Session>(&c).map_err(|e| e.to_string()))
            {
                Ok(session) => sessions.push(session),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable session snapshot"),
            }
        }
        Ok(sessions)
    }
}
