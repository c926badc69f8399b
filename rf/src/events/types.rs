//! Event types for session activity streaming
//!
//! These events represent observable session activity:
//! - Stage changes
//! - Director attempts during analysis
//! - Per-sequence generation and export
//! - Progress updates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FailureKind, SessionStage};

/// Core event enum
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ForgeEvent {
    /// The session moved to a new stage
    StageChanged {
        session_id: String,
        from: SessionStage,
        to: SessionStage,
    },
    /// One director attempt finished
    DirectorAttempt {
        session_id: String,
        moment_index: usize,
        attempt: u32,
        outcome: AttemptOutcome,
    },
    /// A sequence entered generation
    SequenceStarted {
        session_id: String,
        moment_index: usize,
        order: u32,
        kind: String,
    },
    /// A sequence finished generation
    SequenceGenerated {
        session_id: String,
        moment_index: usize,
        order: u32,
        cost: f64,
    },
    /// A sequence failed generation or export
    SequenceFailed {
        session_id: String,
        moment_index: usize,
        order: u32,
        error: String,
        error_kind: FailureKind,
    },
    /// A sequence was exported
    SequenceExported {
        session_id: String,
        moment_index: usize,
        order: u32,
        file_count: usize,
    },
    /// Progress changed
    ProgressUpdated {
        session_id: String,
        percent: u8,
        message: String,
    },
}

impl ForgeEvent {
    /// Get the session ID for this event
    pub fn session_id(&self) -> &str {
        match self {
            ForgeEvent::StageChanged { session_id, .. }
            | ForgeEvent::DirectorAttempt { session_id, .. }
            | ForgeEvent::SequenceStarted { session_id, .. }
            | ForgeEvent::SequenceGenerated { session_id, .. }
            | ForgeEvent::SequenceFailed { session_id, .. }
            | ForgeEvent::SequenceExported { session_id, .. }
            | ForgeEvent::ProgressUpdated { session_id, .. } => session_id,
        }
    }

    /// Get the event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            ForgeEvent::StageChanged { .. } => "StageChanged",
            ForgeEvent::DirectorAttempt { .. } => "DirectorAttempt",
            ForgeEvent::SequenceStarted { .. } => "SequenceStarted",
            ForgeEvent::SequenceGenerated { .. } => "SequenceGenerated",
            ForgeEvent::SequenceFailed { .. } => "SequenceFailed",
            ForgeEvent::SequenceExported { .. } => "SequenceExported",
            ForgeEvent::ProgressUpdated { .. } => "ProgressUpdated",
        }
    }

    /// True if the event ends a session's background task
    pub fn is_terminal(&self) -> bool {
        matches!(self, ForgeEvent::StageChanged { to, .. } if to.is_terminal())
    }
}

/// Outcome of a single director attempt
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome_type")]
pub enum AttemptOutcome {
    /// Creative gate passed
    Approved { pass_count: u32 },
    /// Plan was valid but the creative gate rejected it
    CreativeRejected { pass_count: u32 },
    /// Planner output or fixed plan was structurally invalid
    Invalid { error: String },
}

/// A timestamped event log entry for file persistence
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventLogEntry {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub event: ForgeEvent,
}

impl EventLogEntry {
    /// Create a new log entry with current timestamp
    pub fn new(event: ForgeEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
