//! HTTP JSON adapter for every collaborator
//!
//! One endpoint per collaborator under a configurable base URL. Asset bytes
//! travel base64-encoded in both directions. Retries happen at the call site
//! (director loop, [`super::CompliantGenerator`]), so each method here makes
//! exactly one request.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    AssetGenerator, AssetRequest, CharacterRef, CreativeValidator, ExportOptions, ExportResult, ExportService,
    GeneratedAsset, MomentContext, Planner, PlanningInput, RenderableUnit, SceneContext, SceneContextBuilder,
    ServiceError, TechnicalValidator, VisionQc, VisionVerdict,
};
use crate::config::ServicesConfig;
use crate::domain::{AssetKind, AssetRef, CreativeQcResult, Plan, QcResult};

/// Default retry-after when a 429 carries no usable header
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// Asset payload as it appears on the wire
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAsset {
    data: String,
    mime_type: String,
    #[serde(default)]
    cost: f64,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
}

impl WireAsset {
    fn decode(self) -> Result<GeneratedAsset, ServiceError> {
        let bytes = BASE64
            .decode(self.data.as_bytes())
            .map_err(|e| ServiceError::Validation(format!("invalid base64 asset data: {}", e)))?;
        if bytes.is_empty() {
            return Err(ServiceError::Validation("generator returned an empty asset".to_string()));
        }
        Ok(GeneratedAsset {
            bytes,
            mime_type: self.mime_type,
            cost: self.cost.max(0.0),
            width: self.width,
            height: self.height,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreativeReviewBody<'a> {
    plan: &'a Plan,
    scene: &'a SceneContext,
    characters: &'a [CharacterRef],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisionReviewBody<'a> {
    kind: AssetKind,
    descriptor: &'a str,
    images: Vec<WireAsset>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportBody<'a> {
    unit: &'a RenderableUnit,
    work_dir: &'a Path,
    options: &'a ExportOptions,
}

/// Parse a retry-after header value in seconds
fn parse_retry_after(value: Option<&str>) -> Duration {
    Duration::from_secs(
        value
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
    )
}

/// Reqwest-backed implementation of every collaborator trait
pub struct HttpServices {
    base_url: String,
    api_key: Option<String>,
    http: Client,
}

impl HttpServices {
    /// Create a client from configuration; the API key is optional
    pub fn from_config(config: &ServicesConfig) -> Result<Self, ServiceError> {
        debug!(base_url = %config.base_url, api_key_env = %config.api_key_env, "HttpServices::from_config: called");
        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!("HttpServices::from_config: no API key set, sending unauthenticated requests");
        }

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ServiceError::from)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// POST a JSON body and decode a JSON response
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ServiceError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(%url, "post_json: called");

        let mut request = self.http.post(&url).header("content-type", "application/json").json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = parse_retry_after(response.headers().get("retry-after").and_then(|v| v.to_str().ok()));
            debug!(%url, ?retry_after, "post_json: rate limited (429)");
            return Err(ServiceError::RateLimited {
                retry_after: Some(retry_after),
            });
        }

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            debug!(%url, status, "post_json: error status");
            return Err(ServiceError::from_status(status, text));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl SceneContextBuilder for HttpServices {
    async fn build(&self, moment: &MomentContext) -> Result<SceneContext, ServiceError> {
        debug!(moment_index = moment.moment_index, "HttpServices::build: called");
        self.post_json("scene-context", moment).await
    }
}

#[async_trait]
impl Planner for HttpServices {
    async fn plan(&self, input: &PlanningInput) -> Result<Plan, ServiceError> {
        debug!(attempt = input.attempt, "HttpServices::plan: called");
        self.post_json("plan", input).await
    }
}

#[async_trait]
impl TechnicalValidator for HttpServices {
    async fn validate(&self, plan: &Plan) -> Result<QcResult, ServiceError> {
        debug!(sequence_count = plan.sequences.len(), "HttpServices::validate: called");
        self.post_json("qc/technical", plan).await
    }
}

#[async_trait]
impl CreativeValidator for HttpServices {
    async fn review(
        &self,
        plan: &Plan,
        scene: &SceneContext,
        characters: &[CharacterRef],
    ) -> Result<CreativeQcResult, ServiceError> {
        debug!(character_count = characters.len(), "HttpServices::review (creative): called");
        let result: CreativeQcResult = self
            .post_json(
                "qc/creative",
                &CreativeReviewBody {
                    plan,
                    scene,
                    characters,
                },
            )
            .await?;
        // The pass count is derived locally; a server miscount is not trusted
        Ok(CreativeQcResult::from_dimensions(result.dimensions))
    }
}

#[async_trait]
impl AssetGenerator for HttpServices {
    async fn generate(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError> {
        debug!(kind = %request.kind, "HttpServices::generate: called");
        let wire: WireAsset = self.post_json("assets", request).await?;
        wire.decode()
    }
}

#[async_trait]
impl VisionQc for HttpServices {
    async fn review(
        &self,
        assets: &[AssetRef],
        kind: AssetKind,
        descriptor: &str,
    ) -> Result<VisionVerdict, ServiceError> {
        debug!(asset_count = assets.len(), %kind, "HttpServices::review (vision): called");
        let mut images = Vec::with_capacity(assets.len());
        for asset in assets {
            let bytes = tokio::fs::read(&asset.path)
                .await
                .map_err(|e| ServiceError::Permanent(format!("cannot read {}: {}", asset.path.display(), e)))?;
            images.push(WireAsset {
                data: BASE64.encode(&bytes),
                mime_type: asset.mime_type.clone(),
                cost: 0.0,
                width: None,
                height: None,
            });
        }
        self.post_json(
            "qc/vision",
            &VisionReviewBody {
                kind,
                descriptor,
                images,
            },
        )
        .await
    }
}

#[async_trait]
impl ExportService for HttpServices {
    async fn export(
        &self,
        unit: &RenderableUnit,
        work_dir: &Path,
        options: &ExportOptions,
    ) -> Result<ExportResult, ServiceError> {
        debug!(order = unit.sequence.order, "HttpServices::export: called");
        self.post_json(
            "export",
            &ExportBody {
                unit,
                work_dir,
                options,
            },
        )
        .await
    }
}
