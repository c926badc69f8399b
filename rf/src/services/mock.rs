//! Scriptable collaborators for unit tests

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use super::*;
use crate::domain::{CreativeDimension, DimensionVerdict};

/// Scene builder returning a fixed context
pub struct FixedSceneBuilder {
    context: SceneContext,
    call_count: AtomicUsize,
}

impl FixedSceneBuilder {
    pub fn new() -> Self {
        Self {
            context: SceneContext {
                summary: "A tense standoff on a rope bridge".to_string(),
                setting: "mountain pass".to_string(),
                characters: vec![CharacterRef {
                    name: "Aria".to_string(),
                    description: "elf ranger".to_string(),
                }],
            },
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SceneContextBuilder for FixedSceneBuilder {
    async fn build(&self, _moment: &MomentContext) -> Result<SceneContext, ServiceError> {
        debug!("FixedSceneBuilder::build: called");
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.context.clone())
    }
}

/// Planner replaying scripted results; the last entry repeats
pub struct ScriptedPlanner {
    script: Vec<Result<Plan, ServiceError>>,
    inputs: Mutex<Vec<PlanningInput>>,
}

impl ScriptedPlanner {
    pub fn new(script: Vec<Result<Plan, ServiceError>>) -> Self {
        Self {
            script,
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn always(plan: Plan) -> Self {
        Self::new(vec![Ok(plan)])
    }

    pub fn call_count(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<PlanningInput> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, input: &PlanningInput) -> Result<Plan, ServiceError> {
        let idx = {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.push(input.clone());
            inputs.len() - 1
        };
        debug!(idx, "ScriptedPlanner::plan: called");
        self.script
            .get(idx)
            .or_else(|| self.script.last())
            .cloned()
            .unwrap_or_else(|| Err(ServiceError::Permanent("No more mock plans".to_string())))
    }
}

/// Technical validator replaying scripted results; approves once exhausted
pub struct ScriptedTechnical {
    script: Mutex<VecDeque<QcResult>>,
}

impl ScriptedTechnical {
    pub fn new(script: Vec<QcResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    pub fn approving() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl TechnicalValidator for ScriptedTechnical {
    async fn validate(&self, _plan: &Plan) -> Result<QcResult, ServiceError> {
        debug!("ScriptedTechnical::validate: called");
        Ok(self.script.lock().unwrap().pop_front().unwrap_or_else(QcResult::approved))
    }
}

/// Creative validator returning scripted pass counts; the last entry repeats
pub struct ScriptedCreative {
    pass_counts: Vec<u32>,
    call_count: AtomicUsize,
}

impl ScriptedCreative {
    pub fn new(pass_counts: Vec<u32>) -> Self {
        Self {
            pass_counts,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CreativeValidator for ScriptedCreative {
    async fn review(
        &self,
        _plan: &Plan,
        _scene: &SceneContext,
        _characters: &[CharacterRef],
    ) -> Result<CreativeQcResult, ServiceError> {
        let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
        let passes = self
            .pass_counts
            .get(idx)
            .or_else(|| self.pass_counts.last())
            .copied()
            .unwrap_or(3);
        debug!(idx, passes, "ScriptedCreative::review: called");
        Ok(CreativeQcResult::from_dimensions(
            CreativeDimension::ALL
                .into_iter()
                .enumerate()
                .map(|(i, d)| {
                    let pass = (i as u32) < passes;
                    let feedback = if pass {
                        String::new()
                    } else {
                        format!("attempt {} {} needs work", idx + 1, d)
                    };
                    (d, DimensionVerdict { pass, feedback })
                })
                .collect(),
        ))
    }
}

/// Generator recording every request, with failure injection
pub struct RecordingGenerator {
    requests: Mutex<Vec<AssetRequest>>,
    fail_next: Mutex<VecDeque<ServiceError>>,
    fail_descriptors: Mutex<Vec<(String, ServiceError)>>,
    dimensions: Mutex<VecDeque<(u32, u32)>>,
}

impl RecordingGenerator {
    pub const COST: f64 = 0.01;

    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail_next: Mutex::new(VecDeque::new()),
            fail_descriptors: Mutex::new(Vec::new()),
            dimensions: Mutex::new(VecDeque::new()),
        }
    }

    /// Fail the next `times` calls with `err`
    pub fn fail_next(&self, err: ServiceError, times: usize) {
        let mut queue = self.fail_next.lock().unwrap();
        for _ in 0..times {
            queue.push_back(err.clone());
        }
    }

    /// Fail every call whose descriptor contains `needle`
    pub fn fail_when_descriptor_contains(&self, needle: &str, err: ServiceError) {
        self.fail_descriptors.lock().unwrap().push((needle.to_string(), err));
    }

    /// Dimensions to report for the next calls, in order
    pub fn set_dimensions_sequence(&self, dims: Vec<(u32, u32)>) {
        *self.dimensions.lock().unwrap() = dims.into();
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<AssetRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn default_dimensions(kind: AssetKind) -> (u32, u32) {
        match kind {
            AssetKind::Background => (1920, 1080),
            AssetKind::Portrait => (768, 1024),
            AssetKind::CloseUp => (512, 512),
        }
    }
}

#[async_trait]
impl AssetGenerator for RecordingGenerator {
    async fn generate(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError> {
        debug!(kind = %request.kind, descriptor = %request.descriptor, "RecordingGenerator::generate: called");
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(err) = self.fail_next.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some((_, err)) = self
            .fail_descriptors
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| request.descriptor.contains(needle.as_str()))
        {
            return Err(err.clone());
        }

        let (width, height) = self
            .dimensions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::default_dimensions(request.kind));

        Ok(GeneratedAsset {
            bytes: format!("{}#{}", request.descriptor, call).into_bytes(),
            mime_type: "image/png".to_string(),
            cost: Self::COST,
            width: Some(width),
            height: Some(height),
        })
    }
}

/// Vision QC replaying scripted verdicts; coherent once exhausted
pub struct ScriptedVision {
    script: Mutex<VecDeque<Result<VisionVerdict, ServiceError>>>,
    call_count: AtomicUsize,
}

impl ScriptedVision {
    pub fn new(script: Vec<Result<VisionVerdict, ServiceError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn incoherent(issue: &str) -> VisionVerdict {
        VisionVerdict {
            coherent: false,
            issues: vec![issue.to_string()],
            problematic_frames: vec![1],
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionQc for ScriptedVision {
    async fn review(
        &self,
        _assets: &[AssetRef],
        kind: AssetKind,
        _descriptor: &str,
    ) -> Result<VisionVerdict, ServiceError> {
        debug!(%kind, "ScriptedVision::review: called");
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(VisionVerdict {
                coherent: true,
                ..Default::default()
            })
        })
    }
}

/// Exporter recording calls, failing for chosen orders
pub struct RecordingExporter {
    fail_orders: HashSet<u32>,
    calls: Mutex<Vec<(usize, u32)>>,
}

impl RecordingExporter {
    pub fn new() -> Self {
        Self::failing(&[])
    }

    pub fn failing(orders: &[u32]) -> Self {
        Self {
            fail_orders: orders.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(usize, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportService for RecordingExporter {
    async fn export(
        &self,
        unit: &RenderableUnit,
        work_dir: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, ServiceError> {
        let order = unit.sequence.order;
        debug!(moment_index = unit.moment_index, order, "RecordingExporter::export: called");
        self.calls.lock().unwrap().push((unit.moment_index, order));
        if self.fail_orders.contains(&order) {
            return Err(ServiceError::Permanent(format!("encoder crashed on sequence {}", order)));
        }
        Ok(ExportResult {
            files: vec![work_dir.join(format!("seq-{:02}-export.{}", order, options.format))],
        })
    }
}
