//! SessionStore - actor that owns every session
//!
//! Processes commands via channels for thread-safe access to session state.
//! Every create/update persists a snapshot before replying.

use std::collections::HashMap;
use std::path::Path;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::lease::{LeaseTable, SessionLease};
use super::messages::{StateCommand, StateError, StateResponse};
use super::persistence::SnapshotDir;
use crate::domain::{FailureKind, Session, SessionStage, SequenceStatus, resolve_id};

const INTERRUPTED: &str = "Interrupted before completion";
const LOCK_DIR: &str = "locks";

/// Handle to send commands to the SessionStore actor
#[derive(Clone)]
pub struct SessionStore {
    tx: mpsc::Sender<StateCommand>,
    leases: LeaseTable,
}

impl SessionStore {
    /// Spawn the actor over a snapshot directory
    ///
    /// Snapshots found on disk are loaded. Sessions caught mid-task are closed
    /// out first, but only when their lock can be taken: a session whose lock
    /// is held is being run by another process and is left alone.
    pub fn spawn(dir: impl AsRef<Path>) -> StateResponse<Self> {
        debug!(dir = %dir.as_ref().display(), "SessionStore::spawn: called");
        Self::start(dir.as_ref(), false)
    }

    /// Spawn a store that only reads
    ///
    /// No recovery runs and create/update fail with `ReadOnly`, so observing a
    /// directory never rewrites a snapshot another process owns.
    pub fn open_read_only(dir: impl AsRef<Path>) -> StateResponse<Self> {
        debug!(dir = %dir.as_ref().display(), "SessionStore::open_read_only: called");
        Self::start(dir.as_ref(), true)
    }

    fn start(dir: &Path, read_only: bool) -> StateResponse<Self> {
        let snapshots = SnapshotDir::open(dir).map_err(|e| StateError::Persistence(e.to_string()))?;
        let loaded = snapshots
            .load_all()
            .map_err(|e| StateError::Persistence(e.to_string()))?;
        let leases = LeaseTable::new(dir.join(LOCK_DIR));

        let mut sessions = HashMap::new();
        let mut recovered = 0;
        for mut session in loaded {
            if !read_only && session.stage.is_active() && recover_if_abandoned(&leases, &snapshots, &mut session) {
                recovered += 1;
            }
            sessions.insert(session.id.clone(), session);
        }
        info!(session_count = sessions.len(), recovered, read_only, "Loaded session snapshots");

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(sessions, snapshots, read_only, rx));

        info!("SessionStore spawned");
        Ok(Self { tx, leases })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// Store a new session
    pub async fn create(&self, session: Session) -> StateResponse<String> {
        debug!(id = %session.id, "create: called");
        self.request(|reply| StateCommand::Create {
            session: Box::new(session),
            reply,
        })
        .await
    }

    /// Get a session by ID
    pub async fn get(&self, id: &str) -> StateResponse<Option<Session>> {
        debug!(%id, "get: called");
        self.request(|reply| StateCommand::Get {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Get a session that must exist
    pub async fn require(&self, id: &str) -> StateResponse<Session> {
        self.get(id).await?.ok_or_else(|| StateError::NotFound(id.to_string()))
    }

    /// Replace a session; stage changes must follow the stage graph
    pub async fn update(&self, session: Session) -> StateResponse<()> {
        debug!(id = %session.id, stage = %session.stage, "update: called");
        self.request(|reply| StateCommand::Update {
            session: Box::new(session),
            reply,
        })
        .await
    }

    /// All sessions, oldest first
    pub async fn list(&self) -> StateResponse<Vec<Session>> {
        debug!("list: called");
        self.request(|reply| StateCommand::List { reply }).await
    }

    /// Resolve a full or partial session ID
    pub async fn resolve(&self, reference: &str) -> StateResponse<String> {
        debug!(%reference, "resolve: called");
        self.request(|reply| StateCommand::Resolve {
            reference: reference.to_string(),
            reply,
        })
        .await
    }

    /// Take the exclusive lease for a session, or fail with `Busy`
    pub fn try_lease(&self, id: &str) -> StateResponse<SessionLease> {
        debug!(%id, "try_lease: called");
        self.leases.try_acquire(id)
    }

    /// True while some task holds the session's lease
    pub fn is_leased(&self, id: &str) -> bool {
        self.leases.is_held(id)
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// Recover an active session nobody holds; returns true if it changed
fn recover_if_abandoned(leases: &LeaseTable, snapshots: &SnapshotDir, session: &mut Session) -> bool {
    let _lease = match leases.try_acquire(&session.id) {
        Ok(lease) => lease,
        Err(StateError::Busy(_)) => {
            info!(id = %session.id, stage = %session.stage, "Session is running in another process");
            return false;
        }
        Err(e) => {
            warn!(id = %session.id, error = %e, "Cannot lock session, leaving it as is");
            return false;
        }
    };
    if !recover_interrupted(session) {
        return false;
    }
    if let Err(e) = snapshots.write(session) {
        warn!(id = %session.id, error = %e, "Failed to persist recovered session");
    }
    true
}

/// Close out a session left mid-task; returns true if it changed
fn recover_interrupted(session: &mut Session) -> bool {
    if !session.stage.is_active() {
        return false;
    }
    debug!(id = %session.id, stage = %session.stage, "recover_interrupted: called");

    for moment in &mut session.moments {
        let Some(plan) = moment.plan.as_mut() else {
            continue;
        };
        for seq in &mut plan.sequences {
            match seq.status {
                SequenceStatus::Generating => seq.fail(SequenceStatus::Failed, FailureKind::Retryable, INTERRUPTED),
                SequenceStatus::Exporting => {
                    seq.fail(SequenceStatus::ExportFailed, FailureKind::Retryable, INTERRUPTED)
                }
                _ => {}
            }
        }
    }

    // A regeneration only ever touched one sequence; the rest of the output stands
    let next = if session.stage == SessionStage::Regenerating {
        SessionStage::Complete
    } else {
        SessionStage::Failed
    };
    let from = session.stage;
    if let Err(e) = session.transition_to(next) {
        warn!(id = %session.id, error = %e, "recover_interrupted: unexpected stage");
        return false;
    }
    if next == SessionStage::Failed {
        session.set_error(INTERRUPTED);
    }
    warn!(id = %session.id, %from, to = %next, "Recovered interrupted session");
    true
}

/// Pick up a newer snapshot written by another process
fn refresh_from_disk(sessions: &mut HashMap<String, Session>, snapshots: &SnapshotDir, id: &str) {
    let Some(current) = sessions.get_mut(id) else {
        return;
    };
    match snapshots.read(id) {
        Ok(disk) if disk.updated_at > current.updated_at => {
            debug!(%id, stage = %disk.stage, "refresh_from_disk: newer snapshot");
            *current = disk;
        }
        Ok(_) => {}
        Err(e) => debug!(%id, error = %e, "refresh_from_disk: no readable snapshot"),
    }
}

fn persist(snapshots: &SnapshotDir, session: &Session) {
    if let Err(e) = snapshots.write(session) {
        warn!(id = %session.id, error = %e, "Failed to write session snapshot");
    }
}

/// The actor loop that processes commands
async fn actor_loop(
    mut sessions: HashMap<String, Session>,
    snapshots: SnapshotDir,
    read_only: bool,
    mut rx: mpsc::Receiver<StateCommand>,
) {
    debug!(read_only, "actor_loop: called");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::Create { reply, .. } if read_only => {
                let _ = reply.send(Err(StateError::ReadOnly));
            }

            StateCommand::Update { reply, .. } if read_only => {
                let _ = reply.send(Err(StateError::ReadOnly));
            }

            StateCommand::Create { session, reply } => {
                debug!(id = %session.id, "actor_loop: Create command");
                let id = session.id.clone();
                persist(&snapshots, &session);
                sessions.insert(id.clone(), *session);
                let _ = reply.send(Ok(id));
            }

            StateCommand::Get { id, reply } => {
                debug!(%id, "actor_loop: Get command");
                refresh_from_disk(&mut sessions, &snapshots, &id);
                let _ = reply.send(Ok(sessions.get(&id).cloned()));
            }

            StateCommand::Update { session, reply } => {
                debug!(id = %session.id, "actor_loop: Update command");
                let result = match sessions.get_mut(&session.id) {
                    None => Err(StateError::NotFound(session.id.clone())),
                    Some(current) if current.stage != session.stage && !current.stage.can_transition_to(session.stage) => {
                        Err(StateError::InvalidTransition(crate::domain::InvalidTransition {
                            from: current.stage,
                            to: session.stage,
                        }))
                    }
                    Some(current) => {
                        persist(&snapshots, &session);
                        *current = *session;
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }

            StateCommand::List { reply } => {
                debug!("actor_loop: List command");
                let mut all: Vec<Session> = sessions.values().cloned().collect();
                all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                let _ = reply.send(Ok(all));
            }

            StateCommand::Resolve { reference, reply } => {
                debug!(%reference, "actor_loop: Resolve command");
                let result = match resolve_id(sessions.keys().map(String::as_str), &reference) {
                    Ok(Some(id)) => Ok(id),
                    Ok(None) => Err(StateError::NotFound(reference)),
                    Err(candidates) => Err(StateError::Ambiguous { reference, candidates }),
                };
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("SessionStore shutting down");
                break;
            }
        }
    }

    debug!("SessionStore actor stopped");
}
