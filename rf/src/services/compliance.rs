//! Generator decorator adding transient retries and an orientation check

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{AssetGenerator, AssetRequest, GeneratedAsset, ServiceError};
use crate::domain::AssetKind;
use crate::retry::{RetryPolicy, call_with_retry, with_timeout};

/// Expected image orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Landscape,
    Portrait,
    Any,
}

impl Orientation {
    /// Orientation the compositor expects for an asset kind
    pub fn for_kind(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Background => Self::Landscape,
            AssetKind::Portrait => Self::Portrait,
            AssetKind::CloseUp => Self::Any,
        }
    }

    /// Unknown dimensions are accepted
    pub fn accepts(&self, width: Option<u32>, height: Option<u32>) -> bool {
        match (self, width, height) {
            (Self::Any, _, _) | (_, None, _) | (_, _, None) => true,
            (Self::Landscape, Some(w), Some(h)) => w >= h,
            (Self::Portrait, Some(w), Some(h)) => h >= w,
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            Self::Landscape => "Output must be landscape orientation (width greater than height)",
            Self::Portrait => "Output must be portrait orientation (height greater than width)",
            Self::Any => "",
        }
    }
}

/// Wraps a raw generator with bounded retry, a per-call timeout and a single
/// orientation auto-retry before declaring the result non-compliant
pub struct CompliantGenerator {
    inner: Arc<dyn AssetGenerator>,
    policy: RetryPolicy,
    call_timeout: Duration,
}

impl CompliantGenerator {
    pub fn new(inner: Arc<dyn AssetGenerator>, policy: RetryPolicy, call_timeout: Duration) -> Self {
        debug!(?policy, ?call_timeout, "CompliantGenerator::new: called");
        Self {
            inner,
            policy,
            call_timeout,
        }
    }

    async fn generate_with_retry(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError> {
        call_with_retry(&self.policy, None, "generate", |_| {
            with_timeout(self.call_timeout, self.inner.generate(request))
        })
        .await
    }
}

#[async_trait]
impl AssetGenerator for CompliantGenerator {
    async fn generate(&self, request: &AssetRequest) -> Result<GeneratedAsset, ServiceError> {
        debug!(kind = %request.kind, "CompliantGenerator::generate: called");
        let orientation = Orientation::for_kind(request.kind);

        let asset = self.generate_with_retry(request).await?;
        if orientation.accepts(asset.width, asset.height) {
            return Ok(asset);
        }

        warn!(
            kind = %request.kind,
            width = ?asset.width,
            height = ?asset.height,
            "CompliantGenerator::generate: wrong orientation, retrying once"
        );
        let mut corrected = request.clone();
        corrected.feedback.push(orientation.instruction().to_string());
        let retried = self.generate_with_retry(&corrected).await?;

        if orientation.accepts(retried.width, retried.height) {
            // Both calls were billed
            Ok(GeneratedAsset {
                cost: asset.cost + retried.cost,
                ..retried
            })
        } else {
            Err(ServiceError::NonCompliant {
                message: format!(
                    "{} asset failed orientation compliance ({}x{})",
                    request.kind,
                    retried.width.unwrap_or(0),
                    retried.height.unwrap_or(0)
                ),
                spent: asset.cost + retried.cost,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;
    use crate::services::mock::RecordingGenerator;

    fn compliant(inner: Arc<RecordingGenerator>) -> CompliantGenerator {
        CompliantGenerator::new(inner, RetryPolicy::immediate(3), Duration::from_secs(5))
    }

    #[test]
    fn test_orientation_accepts() {
        assert!(Orientation::Landscape.accepts(Some(1920), Some(1080)));
        assert!(!Orientation::Landscape.accepts(Some(1080), Some(1920)));
        assert!(Orientation::Portrait.accepts(Some(768), Some(1024)));
        assert!(Orientation::Portrait.accepts(None, Some(10)));
        assert!(Orientation::Any.accepts(Some(1), Some(1000)));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let inner = Arc::new(RecordingGenerator::new());
        inner.fail_next(ServiceError::Transient("503".to_string()), 2);
        let generator = compliant(inner.clone());

        let asset = generator
            .generate(&AssetRequest::new(AssetKind::Background, "forest"))
            .await
            .unwrap();
        assert_eq!(asset.mime_type, "image/png");
        assert_eq!(inner.call_count(), 3);
    }

    #[tokio::test]
    async fn test_orientation_retry_once_then_accept() {
        let inner = Arc::new(RecordingGenerator::new());
        inner.set_dimensions_sequence(vec![(1080, 1920), (1920, 1080)]);
        let generator = compliant(inner.clone());

        let asset = generator
            .generate(&AssetRequest::new(AssetKind::Background, "forest"))
            .await
            .unwrap();
        assert_eq!(asset.width, Some(1920));
        assert_eq!(inner.call_count(), 2);
        let requests = inner.requests();
        assert!(requests[1].feedback.iter().any(|f| f.contains("landscape")));
        assert!((asset.cost - 2.0 * RecordingGenerator::COST).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_orientation_fails_permanently_after_one_retry() {
        let inner = Arc::new(RecordingGenerator::new());
        inner.set_dimensions_sequence(vec![(1080, 1920), (1080, 1920), (1920, 1080)]);
        let generator = compliant(inner.clone());

        let err = generator
            .generate(&AssetRequest::new(AssetKind::Background, "forest"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NonCompliant { .. }));
        assert_eq!(err.failure_kind(), FailureKind::Permanent);
        assert!((err.spent() - 2.0 * RecordingGenerator::COST).abs() < 1e-9);
        assert_eq!(inner.call_count(), 2);
    }

    #[tokio::test]
    async fn test_permanent_error_passes_through() {
        let inner = Arc::new(RecordingGenerator::new());
        inner.fail_next(ServiceError::Permanent("content policy".to_string()), 1);
        let generator = compliant(inner.clone());

        let err = generator
            .generate(&AssetRequest::new(AssetKind::Portrait, "orc"))
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Permanent("content policy".to_string()));
        assert_eq!(inner.call_count(), 1);
    }
}
