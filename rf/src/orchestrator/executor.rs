//! GenerationOrchestrator - drives a planned session to completion
//!
//! Sequences are generated strictly in order, one moment at a time, then
//! exported. A failure is recorded on its own sequence and the next one
//! continues. The working copy of the session is written back to the store
//! after every unit.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{DONE, UnitProgress};
use crate::cache::{BackgroundRegistry, CacheLookup, CharacterCache};
use crate::config::GenerationConfig;
use crate::domain::{
    AssetKind, AssetOrigin, AssetRef, FailureKind, Sequence, SequenceKind, SequenceStatus, Session, SessionStage,
};
use crate::events::{EventBus, EventEmitter};
use crate::retry::{FeedbackLog, RetryPolicy, call_with_retry, with_timeout};
use crate::scheduler::RateLimiter;
use crate::services::{
    AssetGenerator, AssetRequest, CompliantGenerator, ExportOptions, ExportService, RenderableUnit, ServiceError,
    Services, VisionQc,
};
use crate::state::{SessionLease, SessionStore, StateError};

/// Errors that stop a generation or regeneration run
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Cancelled")]
    Cancelled,

    #[error("Session {id} is {actual}, expected {expected}")]
    InvalidStage {
        id: String,
        expected: SessionStage,
        actual: SessionStage,
    },

    #[error("Moment {moment_index} has no sequence {order}")]
    UnknownUnit { moment_index: usize, order: u32 },

    #[error(transparent)]
    State(#[from] StateError),
}

/// Generation-phase settings
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub call_timeout: Duration,
    pub auto_regenerate_kinds: Vec<AssetKind>,
    pub vision_attempts: u32,
    pub export: ExportOptions,
}

impl GenerationSettings {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            auto_regenerate_kinds: config.auto_regenerate_kinds.clone(),
            vision_attempts: config.vision_qc_attempts.max(1),
            export: ExportOptions {
                format: config.export_format.clone(),
                ..Default::default()
            },
        }
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

/// Per-moment scope shared by the sequence steps
struct MomentScope<'a> {
    index: usize,
    work_dir: &'a Path,
    events: &'a EventEmitter,
}

/// Executes approved plans
pub struct GenerationOrchestrator {
    store: SessionStore,
    generator: Arc<dyn AssetGenerator>,
    vision: Option<Arc<dyn VisionQc>>,
    exporter: Arc<dyn ExportService>,
    limiter: Arc<dyn RateLimiter>,
    retry: RetryPolicy,
    settings: GenerationSettings,
    events: Arc<EventBus>,
}

impl GenerationOrchestrator {
    /// The raw generator is wrapped with retry and orientation compliance
    pub fn new(
        store: SessionStore,
        services: &Services,
        limiter: Arc<dyn RateLimiter>,
        retry: RetryPolicy,
        settings: GenerationSettings,
        events: Arc<EventBus>,
    ) -> Self {
        debug!(?settings, "GenerationOrchestrator::new: called");
        let generator = Arc::new(CompliantGenerator::new(
            services.generator.clone(),
            retry.clone(),
            settings.call_timeout,
        ));
        Self {
            store,
            generator,
            vision: services.vision.clone(),
            exporter: services.exporter.clone(),
            limiter,
            retry,
            settings,
            events,
        }
    }

    /// Generate and export every sequence of a `plan_ready` session
    pub async fn generate(&self, lease: &SessionLease, cancel: &CancellationToken) -> Result<Session, GenerationError> {
        let id = lease.session_id();
        debug!(session_id = %id, "generate: called");
        let mut session = self.store.require(id).await?;
        expect_stage(&session, SessionStage::PlanReady)?;
        let events = self.events.emitter_for(id);

        self.transition(&mut session, SessionStage::Generating, &events).await?;
        let total = session
            .moments
            .iter()
            .filter_map(|m| m.plan.as_ref())
            .map(|p| p.sequences.len())
            .sum();
        let mut progress = UnitProgress::generation(total);
        report(&mut session, &events, progress.percent(), "Generating assets");
        self.save(&session).await?;
        info!(session_id = %id, sequence_count = total, "Generation started");

        for (index, work_dir, orders) in moment_units(&session) {
            if orders.is_empty() {
                warn!(session_id = %id, moment_index = index, "Moment has no plan, skipping");
                continue;
            }
            let scope = MomentScope {
                index,
                work_dir: &work_dir,
                events: &events,
            };
            let mut cache = CharacterCache::new();
            let mut registry = BackgroundRegistry::new();

            for order in orders {
                if cancel.is_cancelled() {
                    return Err(self.cancelled(&mut session, &events).await);
                }
                let Some(seq) = sequence_mut(&mut session, index, order).cloned() else {
                    continue;
                };
                let seq = self.generate_unit(&scope, seq, &mut cache, &mut registry).await;
                put_sequence(&mut session, index, seq);

                let percent = progress.advance();
                report(
                    &mut session,
                    &events,
                    percent,
                    &format!("Generated moment {} sequence {}", index + 1, order),
                );
                self.save(&session).await?;
            }
            debug!(moment_index = index, cached = cache.len(), backgrounds = registry.len(), "generate: moment done");
        }

        if cancel.is_cancelled() {
            return Err(self.cancelled(&mut session, &events).await);
        }
        self.transition(&mut session, SessionStage::Exporting, &events).await?;
        self.export_all(&mut session, &events, &mut progress, cancel).await?;

        self.transition(&mut session, SessionStage::Complete, &events).await?;
        report(&mut session, &events, DONE, "Complete");
        self.save(&session).await?;
        info!(session_id = %id, spent = session.spent(), "Generation complete");
        Ok(session)
    }

    /// Regenerate exactly one sequence of a completed session
    pub async fn regenerate(
        &self,
        lease: &SessionLease,
        moment_index: usize,
        order: u32,
        cancel: &CancellationToken,
    ) -> Result<Session, GenerationError> {
        let id = lease.session_id();
        debug!(session_id = %id, moment_index, order, "regenerate: called");
        let mut session = self.store.require(id).await?;
        if sequence_mut(&mut session, moment_index, order).is_none() {
            return Err(GenerationError::UnknownUnit { moment_index, order });
        }
        expect_stage(&session, SessionStage::Complete)?;
        let events = self.events.emitter_for(id);

        self.transition(&mut session, SessionStage::Regenerating, &events).await?;
        if cancel.is_cancelled() {
            return Err(self.regeneration_cancelled(&mut session, &events, moment_index, order).await);
        }

        let (work_dir, mut registry) = match session.moment(moment_index) {
            Some(moment) => (
                moment.work_dir.clone(),
                moment
                    .plan
                    .as_ref()
                    .map(|plan| BackgroundRegistry::seeded_from(plan, order))
                    .unwrap_or_default(),
            ),
            None => return Err(GenerationError::UnknownUnit { moment_index, order }),
        };
        let scope = MomentScope {
            index: moment_index,
            work_dir: &work_dir,
            events: &events,
        };

        let Some(mut seq) = sequence_mut(&mut session, moment_index, order).cloned() else {
            return Err(GenerationError::UnknownUnit { moment_index, order });
        };
        seq.reset_for_regeneration();
        let seq = self
            .generate_unit(&scope, seq, &mut CharacterCache::new(), &mut registry)
            .await;
        let generated = seq.status == SequenceStatus::Generated;
        put_sequence(&mut session, moment_index, seq.clone());
        self.save(&session).await?;

        if generated {
            if cancel.is_cancelled() {
                return Err(self.regeneration_cancelled(&mut session, &events, moment_index, order).await);
            }
            let title = moment_title(&session, moment_index);
            let seq = self.export_unit(&scope, &session.id, &title, seq).await;
            put_sequence(&mut session, moment_index, seq);
        }

        self.transition(&mut session, SessionStage::Complete, &events).await?;
        report(
            &mut session,
            &events,
            DONE,
            &format!("Regenerated moment {} sequence {}", moment_index + 1, order),
        );
        self.save(&session).await?;
        info!(session_id = %id, moment_index, order, "Regeneration complete");
        Ok(session)
    }

    /// Generate one sequence; failures stay on the sequence
    async fn generate_unit(
        &self,
        scope: &MomentScope<'_>,
        mut seq: Sequence,
        cache: &mut CharacterCache,
        registry: &mut BackgroundRegistry,
    ) -> Sequence {
        debug!(moment_index = scope.index, order = seq.order, kind = seq.kind.name(), "generate_unit: called");
        if let Err(e) = seq.advance(SequenceStatus::Generating) {
            warn!(moment_index = scope.index, error = %e, "Sequence not pending, skipping");
            return seq;
        }
        scope.events.sequence_started(scope.index, seq.order, seq.kind.name());

        match self.produce_assets(scope, &mut seq, cache, registry).await {
            Ok(()) => {
                seq.status = SequenceStatus::Generated;
                scope.events.sequence_generated(scope.index, seq.order, seq.cost);
            }
            Err(e) => {
                warn!(moment_index = scope.index, order = seq.order, error = %e, "Sequence generation failed");
                seq.fail(SequenceStatus::Failed, e.failure_kind(), e.to_string());
                scope
                    .events
                    .sequence_failed(scope.index, seq.order, &e.to_string(), e.failure_kind());
            }
        }
        seq
    }

    async fn produce_assets(
        &self,
        scope: &MomentScope<'_>,
        seq: &mut Sequence,
        cache: &mut CharacterCache,
        registry: &mut BackgroundRegistry,
    ) -> Result<(), ServiceError> {
        match seq.kind.clone() {
            SequenceKind::Impact { .. } => {
                debug!(order = seq.order, "produce_assets: impact, nothing to generate");
            }

            SequenceKind::EstablishingShot { location, description } => {
                let request = AssetRequest::new(AssetKind::Background, format!("{}. {}", location, description));
                let asset = self.generate_asset(scope, seq, request, AssetOrigin::Fresh).await?;
                registry.register(seq.order, asset.clone());
                seq.assets.background = Some(asset);
            }

            SequenceKind::Dialogue { .. } | SequenceKind::DmDescription { .. } => {
                let background = self.resolve_background(scope, seq, registry).await?;
                registry.register(seq.order, background.clone());
                seq.assets.background = Some(background);

                let speaker = seq.kind.speaker().unwrap_or_default().to_string();
                let expression = seq.kind.expression().unwrap_or_default().to_string();
                let portrait = self.resolve_portrait(scope, seq, cache, &speaker, &expression).await?;
                seq.assets.portrait = Some(portrait);
            }

            SequenceKind::CloseUp {
                subject,
                expression,
                frame_count,
            } => {
                let mut request = AssetRequest::new(
                    AssetKind::CloseUp,
                    format!("{}, {}, close-up", subject, expression),
                )
                .with_frames(frame_count);
                let origin = match cache.base_for(&subject) {
                    Some(base) => {
                        request = request.with_reference(base.clone());
                        AssetOrigin::DerivedVariant
                    }
                    None => AssetOrigin::Fresh,
                };
                let asset = self.generate_asset(scope, seq, request, origin).await?;
                seq.assets.close_up = Some(asset);
            }
        }
        Ok(())
    }

    /// Reuse an earlier background when the reference resolves, else generate
    async fn resolve_background(
        &self,
        scope: &MomentScope<'_>,
        seq: &mut Sequence,
        registry: &BackgroundRegistry,
    ) -> Result<AssetRef, ServiceError> {
        let Some(background) = seq.kind.background().cloned() else {
            return Err(ServiceError::Validation(format!("{} has no background", seq.kind.name())));
        };

        if let Some(reuse_from) = background.reuse_from {
            match registry.resolve(seq.order, reuse_from) {
                Some(asset) => {
                    debug!(order = seq.order, reuse_from, "resolve_background: reusing");
                    return Ok(asset.clone());
                }
                None => {
                    info!(
                        moment_index = scope.index,
                        order = seq.order,
                        reuse_from,
                        "Background reference unresolved, generating fresh"
                    );
                }
            }
        }

        let request = AssetRequest::new(AssetKind::Background, background.description);
        self.generate_asset(scope, seq, request, AssetOrigin::Fresh).await
    }

    /// Portrait from the character cache, a derived variant, or fresh
    async fn resolve_portrait(
        &self,
        scope: &MomentScope<'_>,
        seq: &mut Sequence,
        cache: &mut CharacterCache,
        speaker: &str,
        expression: &str,
    ) -> Result<AssetRef, ServiceError> {
        let descriptor = format!("{}, {}", speaker, expression);
        let asset = match cache.lookup(speaker, expression) {
            CacheLookup::Hit(asset) => {
                debug!(order = seq.order, %speaker, %expression, "resolve_portrait: cache hit");
                return Ok(asset);
            }
            CacheLookup::Variant { base } => {
                let request = AssetRequest::new(AssetKind::Portrait, descriptor).with_reference(base);
                self.generate_asset(scope, seq, request, AssetOrigin::DerivedVariant).await?
            }
            CacheLookup::Miss => {
                let request = AssetRequest::new(AssetKind::Portrait, descriptor);
                self.generate_asset(scope, seq, request, AssetOrigin::Fresh).await?
            }
        };
        cache.insert(speaker, expression, asset.clone());
        Ok(asset)
    }

    /// One rate-gated generation, written to disk, with advisory vision QC
    ///
    /// Kinds listed for auto-regeneration are regenerated with the vision
    /// issues as feedback until coherent or out of attempts. Whatever is left
    /// incoherent is kept with a quality warning.
    async fn generate_asset(
        &self,
        scope: &MomentScope<'_>,
        seq: &mut Sequence,
        mut request: AssetRequest,
        origin: AssetOrigin,
    ) -> Result<AssetRef, ServiceError> {
        let kind = request.kind;
        let auto_regenerate = self.settings.auto_regenerate_kinds.contains(&kind);
        let max_attempts = if auto_regenerate { self.settings.vision_attempts } else { 1 };
        let mut feedback = FeedbackLog::new();
        let mut attempt = 1;

        loop {
            debug!(order = seq.order, %kind, attempt, "generate_asset: called");
            self.limiter.acquire().await;
            let generated = match self.generator.generate(&request).await {
                Ok(generated) => generated,
                Err(e) => {
                    seq.add_cost(e.spent());
                    return Err(e);
                }
            };
            seq.add_cost(generated.cost);
            let asset = write_asset(scope.work_dir, seq.order, kind, generated, origin).await?;

            let Some(vision) = &self.vision else {
                return Ok(asset);
            };
            let verdict = with_timeout(
                self.settings.call_timeout,
                vision.review(std::slice::from_ref(&asset), kind, &request.descriptor),
            )
            .await;

            match verdict {
                Ok(verdict) if verdict.coherent => return Ok(asset),
                Ok(verdict) => {
                    if attempt < max_attempts {
                        info!(order = seq.order, %kind, attempt, issues = ?verdict.issues, "Vision QC incoherent, regenerating");
                        feedback.extend(verdict.issues);
                        request = request.with_feedback(feedback.to_vec());
                        attempt += 1;
                        continue;
                    }
                    let issues = if verdict.issues.is_empty() {
                        "incoherent".to_string()
                    } else {
                        verdict.issues.join("; ")
                    };
                    warn!(order = seq.order, %kind, %issues, "Keeping asset with quality warning");
                    seq.quality_warnings.push(format!("{}: {}", kind, issues));
                    return Ok(asset);
                }
                Err(e) => {
                    warn!(order = seq.order, %kind, error = %e, "Vision QC unavailable, keeping asset");
                    return Ok(asset);
                }
            }
        }
    }

    /// Export every generated sequence
    async fn export_all(
        &self,
        session: &mut Session,
        events: &EventEmitter,
        progress: &mut UnitProgress,
        cancel: &CancellationToken,
    ) -> Result<(), GenerationError> {
        debug!(session_id = %session.id, "export_all: called");
        for (index, work_dir, orders) in moment_units(session) {
            let title = moment_title(session, index);
            let scope = MomentScope {
                index,
                work_dir: &work_dir,
                events,
            };
            for order in orders {
                if cancel.is_cancelled() {
                    return Err(self.cancelled(session, events).await);
                }
                let Some(seq) = sequence_mut(session, index, order).cloned() else {
                    continue;
                };
                if seq.status == SequenceStatus::Generated {
                    let id = session.id.clone();
                    let seq = self.export_unit(&scope, &id, &title, seq).await;
                    put_sequence(session, index, seq);
                }

                let percent = progress.advance();
                report(
                    session,
                    events,
                    percent,
                    &format!("Exported moment {} sequence {}", index + 1, order),
                );
                self.save(session).await?;
            }
        }
        Ok(())
    }

    /// Export one generated sequence; failures stay on the sequence
    async fn export_unit(&self, scope: &MomentScope<'_>, session_id: &str, title: &str, mut seq: Sequence) -> Sequence {
        debug!(moment_index = scope.index, order = seq.order, "export_unit: called");
        if let Err(e) = seq.advance(SequenceStatus::Exporting) {
            warn!(error = %e, "Sequence not ready for export, skipping");
            return seq;
        }

        let unit = RenderableUnit {
            session_id: session_id.to_string(),
            moment_index: scope.index,
            moment_title: title.to_string(),
            sequence: seq.clone(),
        };
        let result = call_with_retry(&self.retry, None, "export", |_| {
            with_timeout(
                self.settings.call_timeout,
                self.exporter.export(&unit, scope.work_dir, &self.settings.export),
            )
        })
        .await;

        match result {
            Ok(exported) => {
                scope
                    .events
                    .sequence_exported(scope.index, seq.order, exported.files.len());
                seq.assets.exported = exported.files;
                seq.status = SequenceStatus::Complete;
            }
            Err(e) => {
                warn!(moment_index = scope.index, order = seq.order, error = %e, "Sequence export failed");
                seq.fail(SequenceStatus::ExportFailed, e.failure_kind(), e.to_string());
                scope
                    .events
                    .sequence_failed(scope.index, seq.order, &e.to_string(), e.failure_kind());
            }
        }
        seq
    }

    async fn transition(
        &self,
        session: &mut Session,
        to: SessionStage,
        events: &EventEmitter,
    ) -> Result<(), GenerationError> {
        let from = session.stage;
        session.transition_to(to).map_err(StateError::from)?;
        events.stage_changed(from, to);
        self.save(session).await
    }

    /// Move to `cancelled` and produce the error to return
    async fn cancelled(&self, session: &mut Session, events: &EventEmitter) -> GenerationError {
        info!(session_id = %session.id, stage = %session.stage, "Generation cancelled");
        let from = session.stage;
        match session.transition_to(SessionStage::Cancelled) {
            Ok(()) => {
                session.progress.message = "Cancelled".to_string();
                events.stage_changed(from, SessionStage::Cancelled);
                if let Err(e) = self.save(session).await {
                    warn!(session_id = %session.id, error = %e, "Failed to record cancellation");
                }
            }
            Err(e) => warn!(session_id = %session.id, error = %e, "Cannot cancel from this stage"),
        }
        GenerationError::Cancelled
    }

    /// The session goes back to complete; only the target unit is left failed and retryable
    async fn regeneration_cancelled(
        &self,
        session: &mut Session,
        events: &EventEmitter,
        moment_index: usize,
        order: u32,
    ) -> GenerationError {
        info!(session_id = %session.id, moment_index, order, "Regeneration cancelled");
        if let Some(seq) = sequence_mut(session, moment_index, order) {
            seq.fail(SequenceStatus::Failed, FailureKind::Retryable, "Cancelled");
            events.sequence_failed(moment_index, order, "Cancelled", FailureKind::Retryable);
        }
        let from = session.stage;
        match session.transition_to(SessionStage::Complete) {
            Ok(()) => {
                session.progress.message = "Regeneration cancelled".to_string();
                events.stage_changed(from, SessionStage::Complete);
                if let Err(e) = self.save(session).await {
                    warn!(session_id = %session.id, error = %e, "Failed to record cancelled regeneration");
                }
            }
            Err(e) => warn!(session_id = %session.id, error = %e, "Cannot leave regeneration"),
        }
        GenerationError::Cancelled
    }

    async fn save(&self, session: &Session) -> Result<(), GenerationError> {
        self.store.update(session.clone()).await?;
        Ok(())
    }
}

fn expect_stage(session: &Session, expected: SessionStage) -> Result<(), GenerationError> {
    if session.stage != expected {
        return Err(GenerationError::InvalidStage {
            id: session.id.clone(),
            expected,
            actual: session.stage,
        });
    }
    Ok(())
}

fn report(session: &mut Session, events: &EventEmitter, percent: u8, message: &str) {
    session.set_progress(percent, message);
    events.progress_updated(session.progress.percent, message);
}

/// Moment index, work dir and sequence orders, in moment order
fn moment_units(session: &Session) -> Vec<(usize, PathBuf, Vec<u32>)> {
    session
        .moments
        .iter()
        .map(|m| {
            let orders = m
                .plan
                .as_ref()
                .map(|p| p.sequences.iter().map(|s| s.order).collect())
                .unwrap_or_default();
            (m.index, m.work_dir.clone(), orders)
        })
        .collect()
}

fn moment_title(session: &Session, index: usize) -> String {
    session
        .moment(index)
        .map(|m| m.highlight.title.clone())
        .unwrap_or_default()
}

fn sequence_mut(session: &mut Session, moment_index: usize, order: u32) -> Option<&mut Sequence> {
    session.moment_mut(moment_index)?.plan.as_mut()?.sequence_mut(order)
}

fn put_sequence(session: &mut Session, moment_index: usize, seq: Sequence) {
    let order = seq.order;
    match sequence_mut(session, moment_index, order) {
        Some(slot) => *slot = seq,
        None => warn!(moment_index, order, "put_sequence: sequence vanished"),
    }
}

/// Write generated bytes as `seq-{order:02}-{role}-{suffix}.{ext}`
///
/// Every write gets a fresh file. Reused backgrounds and cached portraits
/// point at another sequence's file, so an existing path is never replaced.
async fn write_asset(
    work_dir: &Path,
    order: u32,
    kind: AssetKind,
    generated: crate::services::GeneratedAsset,
    origin: AssetOrigin,
) -> Result<AssetRef, ServiceError> {
    let path = work_dir.join(asset_file_name(order, kind, &generated.mime_type));
    debug!(path = %path.display(), bytes = generated.bytes.len(), "write_asset: called");

    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|e| ServiceError::Permanent(format!("cannot create {}: {}", work_dir.display(), e)))?;
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .await
        .map_err(|e| ServiceError::Permanent(format!("cannot create {}: {}", path.display(), e)))?;
    file.write_all(&generated.bytes)
        .await
        .map_err(|e| ServiceError::Permanent(format!("cannot write {}: {}", path.display(), e)))?;
    file.flush()
        .await
        .map_err(|e| ServiceError::Permanent(format!("cannot write {}: {}", path.display(), e)))?;

    Ok(AssetRef {
        kind,
        path,
        mime_type: generated.mime_type,
        byte_len: generated.bytes.len() as u64,
        cost: generated.cost,
        origin,
    })
}

/// Unique file name for one generated asset
fn asset_file_name(order: u32, kind: AssetKind, mime_type: &str) -> String {
    let id = uuid::Uuid::now_v7().simple().to_string();
    // The tail of a v7 id is random; the head is the timestamp
    let suffix = &id[id.len() - 8..];
    format!(
        "seq-{:02}-{}-{}.{}",
        order,
        kind.role(),
        suffix,
        AssetRef::extension_for(mime_type)
    )
}
