//! Plan → technical fix → creative check loop

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fixes::apply_fixes;
use crate::config::DirectorConfig;
use crate::domain::{CreativeQcResult, Plan};
use crate::events::{AttemptOutcome, EventEmitter};
use crate::retry::{FeedbackLog, RetryPolicy, call_with_retry, with_timeout};
use crate::services::{
    CreativeValidator, MomentContext, Planner, PlanningInput, SceneContext, SceneContextBuilder, ServiceError,
    Services, TechnicalValidator,
};

/// Errors that end the director loop for a moment
#[derive(Debug, Error)]
pub enum DirectorError {
    #[error("Scene context unavailable: {0}")]
    SceneContext(ServiceError),

    #[error("No valid plan after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Cancelled")]
    Cancelled,
}

/// An approved (or best-effort) plan for one moment
#[derive(Debug, Clone)]
pub struct DirectorOutcome {
    pub plan: Plan,
    /// Planner calls made
    pub attempts: u32,
    /// The creative gate never passed; this is the last valid plan
    pub degraded: bool,
    pub creative: CreativeQcResult,
    pub scene: SceneContext,
}

/// Runs the bounded plan/QC loop
pub struct DirectorPipeline {
    scene_builder: Arc<dyn SceneContextBuilder>,
    planner: Arc<dyn Planner>,
    technical: Arc<dyn TechnicalValidator>,
    creative: Arc<dyn CreativeValidator>,
    config: DirectorConfig,
    retry: RetryPolicy,
    call_timeout: Duration,
    scene_cache: Mutex<HashMap<(String, usize), SceneContext>>,
}

impl DirectorPipeline {
    pub fn new(services: &Services, config: DirectorConfig, retry: RetryPolicy, call_timeout: Duration) -> Self {
        debug!(?config, "DirectorPipeline::new: called");
        Self {
            scene_builder: services.scene.clone(),
            planner: services.planner.clone(),
            technical: services.technical.clone(),
            creative: services.creative.clone(),
            config,
            retry,
            call_timeout,
            scene_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Produce a plan for one moment
    pub async fn run(
        &self,
        moment: &MomentContext,
        cancel: &CancellationToken,
        events: &EventEmitter,
    ) -> Result<DirectorOutcome, DirectorError> {
        debug!(session_id = %moment.session_id, moment_index = moment.moment_index, "DirectorPipeline::run: called");
        if cancel.is_cancelled() {
            return Err(DirectorError::Cancelled);
        }

        let scene = self.scene_context(moment, cancel).await?;
        let max_attempts = self.config.max_attempts.max(1);
        let mut feedback = FeedbackLog::new();
        let mut last_valid: Option<(Plan, CreativeQcResult, u32)> = None;
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                info!(moment_index = moment.moment_index, attempt, "Director cancelled");
                return Err(DirectorError::Cancelled);
            }

            let input = PlanningInput {
                moment: moment.clone(),
                scene: scene.clone(),
                feedback: feedback.to_vec(),
                attempt,
            };

            let plan = match self.draft(&input, cancel).await {
                Ok(plan) => plan,
                Err(ServiceError::Cancelled) => return Err(DirectorError::Cancelled),
                Err(e) => {
                    warn!(moment_index = moment.moment_index, attempt, error = %e, "Director attempt produced no valid plan");
                    last_error = e.to_string();
                    events.director_attempt(moment.moment_index, attempt, AttemptOutcome::Invalid { error: last_error.clone() });
                    continue;
                }
            };

            let creative = match self
                .call(cancel, "creative_review", || {
                    self.creative.review(&plan, &scene, &scene.characters)
                })
                .await
            {
                Ok(result) => result,
                Err(ServiceError::Cancelled) => return Err(DirectorError::Cancelled),
                Err(e) => {
                    warn!(moment_index = moment.moment_index, attempt, error = %e, "Creative review failed, counting as rejection");
                    CreativeQcResult::all_failed(e.to_string())
                }
            };

            let pass_count = creative.pass_count;
            if pass_count >= self.config.pass_threshold {
                info!(moment_index = moment.moment_index, attempt, pass_count, "Plan approved");
                events.director_attempt(moment.moment_index, attempt, AttemptOutcome::Approved { pass_count });
                return Ok(DirectorOutcome {
                    plan,
                    attempts: attempt,
                    degraded: false,
                    creative,
                    scene,
                });
            }

            debug!(moment_index = moment.moment_index, attempt, pass_count, "DirectorPipeline::run: creative gate rejected");
            events.director_attempt(moment.moment_index, attempt, AttemptOutcome::CreativeRejected { pass_count });
            feedback.extend(creative.failed_feedback());
            last_valid = Some((plan, creative, attempt));
        }

        match last_valid {
            Some((plan, creative, attempt)) => {
                warn!(
                    moment_index = moment.moment_index,
                    attempt,
                    pass_count = creative.pass_count,
                    "Creative gate exhausted, proceeding with last valid plan (quality degraded)"
                );
                Ok(DirectorOutcome {
                    plan,
                    attempts: max_attempts,
                    degraded: true,
                    creative,
                    scene,
                })
            }
            None => Err(DirectorError::Exhausted {
                attempts: max_attempts,
                last_error,
            }),
        }
    }

    /// Planner output with technical fixes applied and structure checked
    async fn draft(&self, input: &PlanningInput, cancel: &CancellationToken) -> Result<Plan, ServiceError> {
        debug!(attempt = input.attempt, feedback_count = input.feedback.len(), "DirectorPipeline::draft: called");
        let mut plan = self.call(cancel, "plan", || self.planner.plan(input)).await?;
        plan.recompute();

        let qc = self.call(cancel, "technical_validate", || self.technical.validate(&plan)).await?;
        if !qc.fixes.is_empty() {
            let report = apply_fixes(&mut plan, &qc.fixes);
            debug!(
                applied = report.applied,
                skipped = report.skipped.len(),
                approved = qc.approved,
                "DirectorPipeline::draft: fixes applied"
            );
        }

        plan.validate().map_err(|e| ServiceError::Validation(e.to_string()))?;
        Ok(plan)
    }

    /// Scene context, built once per moment
    async fn scene_context(
        &self,
        moment: &MomentContext,
        cancel: &CancellationToken,
    ) -> Result<SceneContext, DirectorError> {
        let key = (moment.session_id.clone(), moment.moment_index);
        if let Some(scene) = self.scene_cache.lock().await.get(&key) {
            debug!(moment_index = moment.moment_index, "DirectorPipeline::scene_context: cached");
            return Ok(scene.clone());
        }

        let scene = self
            .call(cancel, "scene_context", || self.scene_builder.build(moment))
            .await
            .map_err(|e| match e {
                ServiceError::Cancelled => DirectorError::Cancelled,
                other => DirectorError::SceneContext(other),
            })?;
        self.scene_cache.lock().await.insert(key, scene.clone());
        Ok(scene)
    }

    /// One collaborator call under the shared retry policy and timeout
    async fn call<T, F, Fut>(&self, cancel: &CancellationToken, what: &str, f: F) -> Result<T, ServiceError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        call_with_retry(&self.retry, Some(cancel), what, |_| with_timeout(self.call_timeout, f())).await
    }
}
