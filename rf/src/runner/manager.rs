//! SessionManager - one background task per session
//!
//! Each start_* call takes the session's lease synchronously, so a second
//! request against an in-flight session fails with `Busy` before anything is
//! spawned. The lease moves into the task and is released when it ends.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::director::{DirectorError, DirectorPipeline};
use crate::domain::{Highlight, Moment, Session, SessionStage};
use crate::estimate::estimated_minutes;
use crate::events::{EventBus, EventEmitter};
use crate::orchestrator::{GENERATION_START, GenerationError, GenerationOrchestrator, GenerationSettings, UnitProgress};
use crate::retry::RetryPolicy;
use crate::scheduler::RateLimiter;
use crate::services::{MomentContext, Services};
use crate::state::{SessionLease, SessionStore, StateError};

/// Errors from a session task
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Director(#[from] DirectorError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Session {id} is {actual}, expected {expected}")]
    InvalidStage {
        id: String,
        expected: SessionStage,
        actual: SessionStage,
    },

    #[error("Task for session {0} ended abnormally")]
    Join(String),
}

impl RunError {
    /// True if the task stopped because it was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Director(DirectorError::Cancelled) | Self::Generation(GenerationError::Cancelled)
        )
    }
}

/// Handle to a spawned session task
pub type SessionTask = JoinHandle<Result<Session, RunError>>;

/// Token of the task currently running a session, tagged with the spawn that owns it
#[derive(Debug, Clone)]
struct Running {
    generation: u64,
    token: CancellationToken,
}

type Tokens = Arc<Mutex<HashMap<String, Running>>>;

fn lock(tokens: &Tokens) -> MutexGuard<'_, HashMap<String, Running>> {
    match tokens.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Remove a finished task's token unless a newer task has replaced it
fn release(tokens: &Tokens, session_id: &str, generation: u64) {
    let mut running = lock(tokens);
    if running.get(session_id).is_some_and(|r| r.generation == generation) {
        running.remove(session_id);
    }
}

/// Owns the director, the orchestrator and the cancellation tokens
#[derive(Clone)]
pub struct SessionManager {
    store: SessionStore,
    director: Arc<DirectorPipeline>,
    orchestrator: Arc<GenerationOrchestrator>,
    events: Arc<EventBus>,
    tokens: Tokens,
    next_generation: Arc<AtomicU64>,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        services: &Services,
        config: &Config,
        limiter: Arc<dyn RateLimiter>,
        events: Arc<EventBus>,
    ) -> Self {
        debug!("SessionManager::new: called");
        let retry = RetryPolicy::from_config(&config.retry);
        let director = DirectorPipeline::new(
            services,
            config.director.clone(),
            retry.clone(),
            config.generation.call_timeout(),
        );
        let orchestrator = GenerationOrchestrator::new(
            store.clone(),
            services,
            limiter,
            retry,
            GenerationSettings::from_config(&config.generation),
            events.clone(),
        );
        Self {
            store,
            director: Arc::new(director),
            orchestrator: Arc::new(orchestrator),
            events,
            tokens: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Create an `uploaded` session with one moment per highlight
    pub async fn create_session(
        &self,
        title: &str,
        highlights: Vec<Highlight>,
        output_dir: &Path,
    ) -> Result<Session, RunError> {
        debug!(%title, highlight_count = highlights.len(), "create_session: called");
        let mut session = Session::new(title, Vec::new());
        let session_dir = output_dir.join(&session.id);
        session.moments = highlights
            .into_iter()
            .enumerate()
            .map(|(i, h)| Moment::new(i, h, session_dir.join(format!("moment-{:02}", i + 1))))
            .collect();
        self.store.create(session.clone()).await?;
        info!(session_id = %session.id, moment_count = session.moments.len(), "Session created");
        Ok(session)
    }

    /// Plan every moment of an `uploaded` session
    pub async fn analyze(&self, lease: &SessionLease, cancel: &CancellationToken) -> Result<Session, RunError> {
        let id = lease.session_id();
        debug!(session_id = %id, "analyze: called");
        let mut session = self.store.require(id).await?;
        if session.stage != SessionStage::Uploaded {
            return Err(RunError::InvalidStage {
                id: id.to_string(),
                expected: SessionStage::Uploaded,
                actual: session.stage,
            });
        }
        let events = self.events.emitter_for(id);
        self.transition(&mut session, SessionStage::Analyzing, &events).await?;

        let mut progress = UnitProgress::analysis(session.moments.len());
        report(&mut session, &events, progress.percent(), "Analyzing moments");
        self.store.update(session.clone()).await?;

        let contexts: Vec<MomentContext> = session
            .moments
            .iter()
            .map(|m| MomentContext {
                session_id: id.to_string(),
                moment_index: m.index,
                highlight: m.highlight.clone(),
            })
            .collect();

        for context in contexts {
            match self.director.run(&context, cancel, &events).await {
                Ok(outcome) => {
                    if let Some(moment) = session.moment_mut(context.moment_index) {
                        moment.plan = Some(outcome.plan);
                        moment.quality_degraded = outcome.degraded;
                    }
                    let percent = progress.advance();
                    report(
                        &mut session,
                        &events,
                        percent,
                        &format!("Planned moment {} in {} attempt(s)", context.moment_index + 1, outcome.attempts),
                    );
                    self.store.update(session.clone()).await?;
                }
                Err(DirectorError::Cancelled) => {
                    info!(session_id = %id, "Analysis cancelled");
                    self.transition(&mut session, SessionStage::Cancelled, &events).await?;
                    return Err(DirectorError::Cancelled.into());
                }
                Err(e) => {
                    error!(session_id = %id, moment_index = context.moment_index, error = %e, "Analysis failed");
                    session.set_error(format!("Moment {}: {}", context.moment_index + 1, e));
                    self.transition(&mut session, SessionStage::Failed, &events).await?;
                    return Err(e.into());
                }
            }
        }

        session.estimated_minutes = estimated_minutes(session.moments.iter().filter_map(|m| m.plan.as_ref()));
        report(&mut session, &events, GENERATION_START, "Plan ready");
        self.transition(&mut session, SessionStage::PlanReady, &events).await?;
        info!(session_id = %id, estimated_minutes = session.estimated_minutes, "Analysis complete");
        Ok(session)
    }

    /// Analyze then generate, under one lease
    pub async fn run(&self, lease: &SessionLease, cancel: &CancellationToken) -> Result<Session, RunError> {
        debug!(session_id = %lease.session_id(), "run: called");
        let session = self.store.require(lease.session_id()).await?;
        if session.stage == SessionStage::Uploaded {
            self.analyze(lease, cancel).await?;
        }
        Ok(self.orchestrator.generate(lease, cancel).await?)
    }

    pub fn start_analysis(&self, id: &str) -> Result<SessionTask, RunError> {
        debug!(session_id = %id, "start_analysis: called");
        self.spawn(id, |this, lease, token| async move { this.analyze(&lease, &token).await })
    }

    pub fn start_generation(&self, id: &str) -> Result<SessionTask, RunError> {
        debug!(session_id = %id, "start_generation: called");
        self.spawn(id, |this, lease, token| async move {
            this.orchestrator.generate(&lease, &token).await.map_err(RunError::from)
        })
    }

    pub fn start_run(&self, id: &str) -> Result<SessionTask, RunError> {
        debug!(session_id = %id, "start_run: called");
        self.spawn(id, |this, lease, token| async move { this.run(&lease, &token).await })
    }

    pub fn start_regeneration(&self, id: &str, moment_index: usize, order: u32) -> Result<SessionTask, RunError> {
        debug!(session_id = %id, moment_index, order, "start_regeneration: called");
        self.spawn(id, move |this, lease, token| async move {
            this.orchestrator
                .regenerate(&lease, moment_index, order, &token)
                .await
                .map_err(RunError::from)
        })
    }

    /// Request cancellation; the current unit finishes first
    pub fn cancel(&self, id: &str) -> bool {
        debug!(session_id = %id, "cancel: called");
        match lock(&self.tokens).get(id) {
            Some(running) => {
                info!(session_id = %id, "Cancellation requested");
                running.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, id: &str) -> bool {
        lock(&self.tokens).contains_key(id)
    }

    fn spawn<F, Fut>(&self, id: &str, task: F) -> Result<SessionTask, RunError>
    where
        F: FnOnce(SessionManager, SessionLease, CancellationToken) -> Fut,
        Fut: Future<Output = Result<Session, RunError>> + Send + 'static,
    {
        let lease = self.store.try_lease(id)?;
        let token = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        lock(&self.tokens).insert(
            id.to_string(),
            Running {
                generation,
                token: token.clone(),
            },
        );

        let tokens = self.tokens.clone();
        let session_id = id.to_string();
        let fut = task(self.clone(), lease, token);
        Ok(tokio::spawn(async move {
            // The lease is already released here, so a newer task may own the entry
            let result = fut.await;
            release(&tokens, &session_id, generation);
            match &result {
                Ok(session) => debug!(%session_id, stage = %session.stage, "Session task finished"),
                Err(e) if e.is_cancelled() => info!(%session_id, "Session task cancelled"),
                Err(e) => warn!(%session_id, error = %e, "Session task failed"),
            }
            result
        }))
    }

    async fn transition(
        &self,
        session: &mut Session,
        to: SessionStage,
        events: &EventEmitter,
    ) -> Result<(), RunError> {
        let from = session.stage;
        session.transition_to(to).map_err(StateError::from)?;
        events.stage_changed(from, to);
        self.store.update(session.clone()).await?;
        Ok(())
    }
}

fn report(session: &mut Session, events: &EventEmitter, percent: u8, message: &str) {
    session.set_progress(percent, message);
    events.progress_updated(session.progress.percent, message);
}

/// Await a task, folding a panicked or aborted task into `RunError`
pub async fn join(id: &str, task: SessionTask) -> Result<Session, RunError> {
    task.await.map_err(|_| RunError::Join(id.to_string()))?
}
