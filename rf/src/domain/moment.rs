//! Moment domain type

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::plan::Plan;
use super::sequence::SequenceStatus;

/// Source highlight a moment was selected from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Highlight {
    pub id: String,
    pub start_sec: f64,
    pub end_sec: f64,
    pub title: String,
    #[serde(default)]
    pub transcript: String,
}

impl Highlight {
    pub fn duration_sec(&self) -> f64 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// Aggregate status, derived from the plan's sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentStatus {
    Pending,
    Complete,
    Partial,
    Failed,
}

impl std::fmt::Display for MomentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Complete => write!(f, "complete"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A selected highlight and its generation plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Moment {
    pub index: usize,
    pub highlight: Highlight,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    pub work_dir: PathBuf,
    /// Set when the creative gate was exhausted and the last plan was kept anyway
    #[serde(default)]
    pub quality_degraded: bool,
}

impl Moment {
    pub fn new(index: usize, highlight: Highlight, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            index,
            highlight,
            plan: None,
            work_dir: work_dir.into(),
            quality_degraded: false,
        }
    }

    /// Derived aggregate status
    ///
    /// Sequences that have not reached a terminal status count as not
    /// attempted; once any is terminal the moment is judged on completions.
    pub fn status(&self) -> MomentStatus {
        let Some(plan) = &self.plan else {
            return MomentStatus::Pending;
        };
        let total = plan.sequences.len();
        let complete = plan
            .sequences
            .iter()
            .filter(|s| s.status == SequenceStatus::Complete)
            .count();
        let attempted = plan.sequences.iter().any(|s| s.status != SequenceStatus::Pending);

        if total == 0 || !attempted {
            MomentStatus::Pending
        } else if complete == total {
            MomentStatus::Complete
        } else if complete > 0 {
            MomentStatus::Partial
        } else {
            MomentStatus::Failed
        }
    }

    /// Sum of costs charged for this moment
    pub fn spent(&self) -> f64 {
        self.plan.as_ref().map(Plan::spent).unwrap_or(0.0)
    }
}
