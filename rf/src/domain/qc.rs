//! Quality-control results returned by the validators

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One suggested change from technical QC
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcFix {
    pub sequence_order: u32,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_value: Option<Value>,
    pub issue: String,
}

/// Technical QC verdict
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QcResult {
    pub approved: bool,
    #[serde(default)]
    pub fixes: Vec<QcFix>,
}

impl QcResult {
    /// Approved with nothing to fix
    pub fn approved() -> Self {
        Self {
            approved: true,
            fixes: Vec::new(),
        }
    }
}

/// The three creative QC dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeDimension {
    Pacing,
    Fidelity,
    Coherence,
}

impl CreativeDimension {
    pub const ALL: [CreativeDimension; 3] = [Self::Pacing, Self::Fidelity, Self::Coherence];
}

impl std::fmt::Display for CreativeDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pacing => write!(f, "pacing"),
            Self::Fidelity => write!(f, "fidelity"),
            Self::Coherence => write!(f, "coherence"),
        }
    }
}

/// Pass/fail judgement for one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionVerdict {
    pub pass: bool,
    #[serde(default)]
    pub feedback: String,
}

/// Creative QC verdict over all dimensions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreativeQcResult {
    pub dimensions: BTreeMap<CreativeDimension, DimensionVerdict>,
    pub pass_count: u32,
}

impl CreativeQcResult {
    /// Build a result, deriving the pass count from the verdicts
    pub fn from_dimensions(dimensions: BTreeMap<CreativeDimension, DimensionVerdict>) -> Self {
        let pass_count = dimensions.values().filter(|v| v.pass).count() as u32;
        Self { dimensions, pass_count }
    }

    /// Every dimension failed with the same feedback
    pub fn all_failed(feedback: impl Into<String>) -> Self {
        let feedback = feedback.into();
        Self::from_dimensions(
            CreativeDimension::ALL
                .into_iter()
                .map(|d| {
                    (
                        d,
                        DimensionVerdict {
                            pass: false,
                            feedback: feedback.clone(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Feedback lines for the dimensions that failed
    pub fn failed_feedback(&self) -> Vec<String> {
        self.dimensions
            .iter()
            .filter(|(_, v)| !v.pass)
            .map(|(d, v)| format!("{}: {}", d, v.feedback))
            .collect()
    }
}
