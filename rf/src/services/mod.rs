//! External collaborator boundary
//!
//! Every generative or validation service the orchestrator talks to sits
//! behind one of the async traits here. [`HttpServices`] implements all of
//! them against a JSON HTTP backend; tests swap in the mocks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod compliance;
mod error;
mod http;
#[cfg(test)]
pub mod mock;

pub use compliance::{CompliantGenerator, Orientation};
pub use error::ServiceError;
pub use http::HttpServices;

use crate::domain::{AssetKind, AssetRef, CreativeQcResult, Highlight, Plan, QcResult, Sequence};

/// What the scene builder and planner know about a moment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentContext {
    pub session_id: String,
    pub moment_index: usize,
    pub highlight: Highlight,
}

/// A character known to the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRef {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Scene context shared by planning and creative QC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneContext {
    pub summary: String,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub characters: Vec<CharacterRef>,
}

/// Input to one planner call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanningInput {
    pub moment: MomentContext,
    pub scene: SceneContext,
    /// Accumulated creative feedback from earlier attempts
    #[serde(default)]
    pub feedback: Vec<String>,
    pub attempt: u32,
}

/// One asset generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRequest {
    pub kind: AssetKind,
    pub descriptor: String,
    /// Earlier asset to derive from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<AssetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_count: Option<u32>,
}

impl AssetRequest {
    pub fn new(kind: AssetKind, descriptor: impl Into<String>) -> Self {
        Self {
            kind,
            descriptor: descriptor.into(),
            reference: None,
            feedback: Vec::new(),
            frame_count: None,
        }
    }

    /// Builder method to derive from an earlier asset
    pub fn with_reference(mut self, reference: AssetRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_frames(mut self, frame_count: u32) -> Self {
        self.frame_count = Some(frame_count);
        self
    }

    pub fn with_feedback(mut self, feedback: Vec<String>) -> Self {
        self.feedback = feedback;
        self
    }
}

/// Bytes returned by the generator
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub cost: f64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Advisory verdict from vision QC
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionVerdict {
    pub coherent: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub problematic_frames: Vec<u32>,
}

/// One sequence handed to the exporter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderableUnit {
    pub session_id: String,
    pub moment_index: usize,
    pub moment_title: String,
    pub sequence: Sequence,
}

/// Export settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    pub format: String,
    pub captions: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            captions: true,
        }
    }
}

/// Files written by the exporter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub files: Vec<PathBuf>,
}

/// Builds the scene context for a moment
#[async_trait]
pub trait SceneContextBuilder: Send + Sync {
    async fn build(&self, moment: &MomentContext) -> Result<SceneContext, ServiceError>;
}

/// Drafts a plan of sequences
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, input: &PlanningInput) -> Result<Plan, ServiceError>;
}

/// Deterministic structural/timing checks
#[async_trait]
pub trait TechnicalValidator: Send + Sync {
    async fn validate(&self, plan: &Plan) -> Result<QcResult, ServiceError>;
}

/// Qualitative review over pacing, fidelity and coherence
#[async_trait]
pub trait CreativeValidator: Send + Sync {
    async fn review(
        &self,
        plan: &Plan,
        scene: &SceneContext,
        characters: &[CharacterRef],
    ) -> Result<CreativeQcResult, ServiceError>;
}

/// Generates one media asset per call
#[async_trait]
pub trait AssetGenerator: Send + Sync {
    async fn generate(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError>;
}

/// Advisory frame/asset coherence review
#[async_trait]
pub trait VisionQc: Send + Sync {
    async fn review(&self, assets: &[AssetRef], kind: AssetKind, descriptor: &str)
    -> Result<VisionVerdict, ServiceError>;
}

/// Renders one sequence into output files
#[async_trait]
pub trait ExportService: Send + Sync {
    async fn export(
        &self,
        unit: &RenderableUnit,
        work_dir: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, ServiceError>;
}

/// The full set of collaborators a session needs
#[derive(Clone)]
pub struct Services {
    pub scene: Arc<dyn SceneContextBuilder>,
    pub planner: Arc<dyn Planner>,
    pub technical: Arc<dyn TechnicalValidator>,
    pub creative: Arc<dyn CreativeValidator>,
    pub generator: Arc<dyn AssetGenerator>,
    pub vision: Option<Arc<dyn VisionQc>>,
    pub exporter: Arc<dyn ExportService>,
}

impl Services {
    /// Every collaborator backed by one HTTP adapter
    pub fn from_http(http: Arc<HttpServices>) -> Self {
        Self {
            scene: http.clone(),
            planner: http.clone(),
            technical: http.clone(),
            creative: http.clone(),
            generator: http.clone(),
            vision: Some(http.clone()),
            exporter: http,
        }
    }
}
