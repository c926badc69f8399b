//! Event Logger - persists events to JSONL files
//!
//! Subscribes to the EventBus and appends every event to
//! `{events_dir}/{session-id}/events.jsonl`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{EventLogEntry, ForgeEvent};

/// Event logger that writes events to per-session JSONL files
pub struct EventLogger {
    events_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(events_dir: impl AsRef<Path>) -> Self {
        let events_dir = events_dir.as_ref().to_path_buf();
        debug!(?events_dir, "EventLogger::new: creating logger");
        Self {
            events_dir,
            writers: HashMap::new(),
        }
    }

    /// Write an event to its session's log file
    pub fn write_event(&mut self, event: &ForgeEvent) -> eyre::Result<()> {
        let session_id = event.session_id();
        debug!(%session_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(session_id) {
            let session_dir = self.events_dir.join(session_id);
            fs::create_dir_all(&session_dir)?;

            let log_path = session_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");

            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(session_id.to_string(), BufWriter::new(file));
        }
        let writer = self
            .writers
            .get_mut(session_id)
            .ok_or_else(|| eyre::eyre!("No writer for session {}", session_id))?;

        let entry = EventLogEntry::new(event.clone());
        let json = serde_json::to_string(&entry)?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Close the writer for a session
    pub fn close_session(&mut self, session_id: &str) {
        debug!(%session_id, "EventLogger::close_session");
        if let Some(mut writer) = self.writers.remove(session_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events from the bus until it closes
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        debug!("EventLogger::run: starting event logger");
        let mut rx = event_bus.subscribe();
        // Holding the bus would keep the channel open forever
        drop(event_bus);

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let session_id = event.session_id().to_string();

                    if let Err(e) = self.write_event(&event) {
                        error!(%session_id, error = %e, "EventLogger: failed to write event");
                    }

                    if event.is_terminal() {
                        self.close_session(&session_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (session_id, mut writer) in self.writers.drain() {
            debug!(%session_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read events from a session's log file
pub fn read_session_events(events_dir: impl AsRef<Path>, session_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    let log_path = events_dir.as_ref().join(session_id).join("events.jsonl");
    debug!(?log_path, "read_session_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                warn!(line, error = %e, "read_session_events: failed to parse line");
            }
        }
    }

    debug!(count = entries.len(), "read_session_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>, events_dir: PathBuf) -> tokio::task::JoinHandle<()> {
    let logger = EventLogger::new(events_dir);
    tokio::spawn(async move {
        logger.run(event_bus).await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionStage;
    use tempfile::tempdir;

    fn progress(session_id: &str, percent: u8) -> ForgeEvent {
        ForgeEvent::ProgressUpdated {
            session_id: session_id.to_string(),
            percent,
            message: "Generating".to_string(),
        }
    }

    #[test]
    fn test_write_and_read_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&progress("s1", 50)).unwrap();
        logger.write_event(&progress("s1", 60)).unwrap();
        logger.write_event(&progress("s2", 10)).unwrap();

        let entries = read_session_events(temp.path(), "s1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "ProgressUpdated");
        assert!(temp.path().join("s2").join("events.jsonl").exists());
    }

    #[test]
    fn test_read_missing_session() {
        let temp = tempdir().unwrap();
        assert!(read_session_events(temp.path(), "missing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_closes_on_terminal_stage() {
        let temp = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(16));
        let handle = spawn_event_logger(bus.clone(), temp.path().to_path_buf());

        // Wait for the logger to subscribe before emitting
        for _ in 0..50 {
            if bus.subscriber_count() > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let emitter = bus.emitter_for("s1");
        emitter.progress_updated(90, "Exporting");
        emitter.stage_changed(SessionStage::Exporting, SessionStage::Complete);
        drop(emitter);
        drop(bus);
        handle.await.unwrap();

        let entries = read_session_events(temp.path(), "s1").unwrap();
        assert_eq!(entries.len(), 2);
    }
}
