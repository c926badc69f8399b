//! Session domain type and stage machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::id::generate_id;
use super::moment::Moment;

/// Session lifecycle stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    #[default]
    Uploaded,
    Analyzing,
    PlanReady,
    Generating,
    Exporting,
    Complete,
    Failed,
    Cancelled,
    Regenerating,
}

impl SessionStage {
    /// Check the stage graph
    pub fn can_transition_to(&self, next: SessionStage) -> bool {
        use SessionStage::*;
        matches!(
            (self, next),
            (Uploaded, Analyzing)
                | (Analyzing, PlanReady)
                | (Analyzing, Failed)
                | (Analyzing, Cancelled)
                | (PlanReady, Generating)
                | (Generating, Exporting)
                | (Generating, Failed)
                | (Generating, Cancelled)
                | (Exporting, Complete)
                | (Exporting, Failed)
                | (Exporting, Cancelled)
                | (Complete, Regenerating)
                | (Regenerating, Complete)
        )
    }

    /// True if no background task should be running in this stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Stages that imply an active background task
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Analyzing | Self::Generating | Self::Exporting | Self::Regenerating
        )
    }
}

impl std::fmt::Display for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uploaded => "uploaded",
            Self::Analyzing => "analyzing",
            Self::PlanReady => "plan_ready",
            Self::Generating => "generating",
            Self::Exporting => "exporting",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Regenerating => "regenerating",
        };
        write!(f, "{}", s)
    }
}

/// Rejected stage change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SessionStage,
    pub to: SessionStage,
}

/// User-visible progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub message: String,
    pub percent: u8,
}

/// One generation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub stage: SessionStage,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub moments: Vec<Moment>,
    #[serde(default)]
    pub estimated_minutes: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Create an uploaded session with a generated ID
    pub fn new(title: impl Into<String>, moments: Vec<Moment>) -> Self {
        let title = title.into();
        debug!(%title, moment_count = moments.len(), "Session::new: called");
        let now = Utc::now();
        Self {
            id: generate_id("session", &title),
            title,
            stage: SessionStage::Uploaded,
            progress: Progress {
                message: "Uploaded".to_string(),
                percent: 0,
            },
            error: None,
            moments,
            estimated_minutes: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move along the stage graph
    pub fn transition_to(&mut self, next: SessionStage) -> Result<(), InvalidTransition> {
        debug!(id = %self.id, from = %self.stage, to = %next, "Session::transition_to: called");
        if !self.stage.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        self.touch();
        Ok(())
    }

    /// Update progress; the percentage never goes backwards
    pub fn set_progress(&mut self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100).max(self.progress.percent);
        self.progress = Progress {
            message: message.into(),
            percent,
        };
        self.touch();
    }

    /// Record a session-level failure message
    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(id = %self.id, %message, "Session::set_error: called");
        self.progress.message = message.clone();
        self.error = Some(message);
        self.touch();
    }

    pub fn moment(&self, index: usize) -> Option<&Moment> {
        self.moments.iter().find(|m| m.index == index)
    }

    pub fn moment_mut(&mut self, index: usize) -> Option<&mut Moment> {
        self.moments.iter_mut().find(|m| m.index == index)
    }

    /// Total cost charged across all moments
    pub fn spent(&self) -> f64 {
        self.moments.iter().map(Moment::spent).sum()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
