//! Sequence domain type
//!
//! A Sequence is one ordered beat within a Moment's plan. The per-kind payload
//! is a tagged variant so every kind carries exactly the fields it needs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::asset::SequenceAssets;

/// Speaker identity used for narrator-voiced sequences
pub const NARRATOR: &str = "narrator";

/// Background requirement for a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Background {
    /// What the background should show
    pub description: String,

    /// Order of an earlier sequence whose background should be reused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reuse_from: Option<u32>,
}

impl Background {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            reuse_from: None,
        }
    }

    /// Builder method to reuse the background of an earlier sequence
    pub fn reusing(mut self, order: u32) -> Self {
        self.reuse_from = Some(order);
        self
    }
}

/// Per-kind sequence payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SequenceKind {
    /// A character speaks a line
    Dialogue {
        speaker: String,
        line: String,
        expression: String,
        background: Background,
    },
    /// Animated close-up on one subject
    CloseUp {
        subject: String,
        expression: String,
        frame_count: u32,
    },
    /// Wide shot that sets the scene
    EstablishingShot { location: String, description: String },
    /// Full-screen text beat, no generated imagery
    Impact { text: String },
    /// Narrator/DM description over a background
    DmDescription {
        narration: String,
        expression: String,
        background: Background,
    },
}

impl SequenceKind {
    /// Kind name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Dialogue { .. } => "dialogue",
            Self::CloseUp { .. } => "close_up",
            Self::EstablishingShot { .. } => "establishing_shot",
            Self::Impact { .. } => "impact",
            Self::DmDescription { .. } => "dm_description",
        }
    }

    /// Background requirement, for kinds that composite over one
    pub fn background(&self) -> Option<&Background> {
        match self {
            Self::Dialogue { background, .. } | Self::DmDescription { background, .. } => Some(background),
            _ => None,
        }
    }

    /// Raw speaker name for kinds that show a character portrait
    pub fn speaker(&self) -> Option<&str> {
        match self {
            Self::Dialogue { speaker, .. } => Some(speaker),
            Self::DmDescription { .. } => Some(NARRATOR),
            _ => None,
        }
    }

    /// Expression requirement for the portrait or close-up
    pub fn expression(&self) -> Option<&str> {
        match self {
            Self::Dialogue { expression, .. }
            | Self::DmDescription { expression, .. }
            | Self::CloseUp { expression, .. } => Some(expression),
            _ => None,
        }
    }

    /// True if the background references an earlier sequence
    pub fn reuses_background(&self) -> bool {
        self.background().is_some_and(|b| b.reuse_from.is_some())
    }

    /// Required text fields paired with their names, for structural checks
    pub fn required_text(&self) -> Vec<(&'static str, &str)> {
        match self {
            Self::Dialogue {
                speaker,
                line,
                expression,
                background,
            } => vec![
                ("speaker", speaker.as_str()),
                ("line", line.as_str()),
                ("expression", expression.as_str()),
                ("background.description", background.description.as_str()),
            ],
            Self::CloseUp { subject, expression, .. } => {
                vec![("subject", subject.as_str()), ("expression", expression.as_str())]
            }
            Self::EstablishingShot { location, description } => {
                vec![("location", location.as_str()), ("description", description.as_str())]
            }
            Self::Impact { text } => vec![("text", text.as_str())],
            Self::DmDescription {
                narration,
                expression,
                background,
            } => vec![
                ("narration", narration.as_str()),
                ("expression", expression.as_str()),
                ("background.description", background.description.as_str()),
            ],
        }
    }
}

/// Lifecycle of one sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SequenceStatus {
    #[default]
    Pending,
    Generating,
    Generated,
    Exporting,
    Complete,
    Failed,
    ExportFailed,
}

impl SequenceStatus {
    /// Forward-only transitions; regression happens only through [`Sequence::reset_for_regeneration`]
    pub fn can_advance_to(&self, next: SequenceStatus) -> bool {
        use SequenceStatus::*;
        matches!(
            (self, next),
            (Pending, Generating)
                | (Generating, Generated)
                | (Generating, Failed)
                | (Generated, Exporting)
                | (Exporting, Complete)
                | (Exporting, ExportFailed)
        )
    }

    /// True once the sequence can no longer change without regeneration
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::ExportFailed)
    }
}

impl std::fmt::Display for SequenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Generated => "generated",
            Self::Exporting => "exporting",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::ExportFailed => "export_failed",
        };
        write!(f, "{}", s)
    }
}

/// Classification of a recorded unit failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Content or structure was rejected as invalid
    Validation,
    /// Timeout, rate limit or server-side failure; a later regenerate may succeed
    Retryable,
    /// Explicit rejection by the service
    Permanent,
}

/// Rejected status change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Sequence {order}: cannot move from {from} to {to}")]
pub struct InvalidStatusTransition {
    pub order: u32,
    pub from: SequenceStatus,
    pub to: SequenceStatus,
}

/// One ordered beat within a moment's plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sequence {
    /// 1-based position, dense and unique within the moment
    pub order: u32,

    /// Screen time in seconds
    pub duration_sec: f64,

    /// Derived: running sum of earlier durations
    #[serde(default)]
    pub start_offset_sec: f64,

    #[serde(flatten)]
    pub kind: SequenceKind,

    #[serde(default)]
    pub status: SequenceStatus,

    /// Accumulated generation cost (USD)
    #[serde(default)]
    pub cost: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "SequenceAssets::is_empty")]
    pub assets: SequenceAssets,

    /// Advisory quality findings that did not fail the sequence
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quality_warnings: Vec<String>,
}

impl Sequence {
    /// Create a pending sequence
    pub fn new(order: u32, duration_sec: f64, kind: SequenceKind) -> Self {
        debug!(order, duration_sec, kind = kind.name(), "Sequence::new: called");
        Self {
            order,
            duration_sec,
            start_offset_sec: 0.0,
            kind,
            status: SequenceStatus::Pending,
            cost: 0.0,
            error: None,
            error_kind: None,
            assets: SequenceAssets::default(),
            quality_warnings: Vec::new(),
        }
    }

    /// Move to the next status, refusing regressions
    pub fn advance(&mut self, next: SequenceStatus) -> Result<(), InvalidStatusTransition> {
        debug!(order = self.order, from = %self.status, to = %next, "Sequence::advance: called");
        if !self.status.can_advance_to(next) {
            return Err(InvalidStatusTransition {
                order: self.order,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record a failure on this sequence only
    pub fn fail(&mut self, status: SequenceStatus, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        debug!(order = self.order, %status, ?kind, %message, "Sequence::fail: called");
        self.status = status;
        self.error = Some(message);
        self.error_kind = Some(kind);
    }

    /// Add generation cost; cost never decreases
    pub fn add_cost(&mut self, amount: f64) {
        if amount > 0.0 {
            self.cost += amount;
        }
    }

    /// Explicit regeneration reset: status and error only, cost and files stay
    pub fn reset_for_regeneration(&mut self) {
        debug!(order = self.order, status = %self.status, "Sequence::reset_for_regeneration: called");
        self.status = SequenceStatus::Pending;
        self.error = None;
        self.error_kind = None;
        self.quality_warnings.clear();
    }

    /// True if generation finished successfully (export may still be pending)
    pub fn has_generated(&self) -> bool {
        matches!(
            self.status,
            SequenceStatus::Generated
                | SequenceStatus::Exporting
                | SequenceStatus::Complete
                | SequenceStatus::ExportFailed
        )
    }
}
