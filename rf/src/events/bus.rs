//! Event Bus - pub/sub for session activity
//!
//! The EventBus uses a tokio broadcast channel to deliver events to all
//! subscribers. Components emit, observers (CLI, event log) subscribe.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{AttemptOutcome, ForgeEvent};
use crate::domain::{FailureKind, SessionStage};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Central event bus
pub struct EventBus {
    tx: broadcast::Sender<ForgeEvent>,
}

impl EventBus {
    /// Create a new event bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// Fire-and-forget: with no subscribers the event is dropped.
    pub fn emit(&self, event: ForgeEvent) {
        debug!(
            event_type = event.event_type(),
            session_id = event.session_id(),
            "EventBus::emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ForgeEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    /// Create an emitter bound to one session
    pub fn emitter_for(&self, session_id: impl Into<String>) -> EventEmitter {
        let session_id = session_id.into();
        debug!(%session_id, "EventBus::emitter_for: creating emitter");
        EventEmitter {
            tx: Some(self.tx.clone()),
            session_id,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for components to emit events without owning the bus
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<broadcast::Sender<ForgeEvent>>,
    session_id: String,
}

impl EventEmitter {
    /// Emitter that drops everything, for callers without a bus
    pub fn disabled(session_id: impl Into<String>) -> Self {
        Self {
            tx: None,
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit a raw event
    pub fn emit(&self, event: ForgeEvent) {
        if let Some(tx) = &self.tx {
            debug!(event_type = event.event_type(), "EventEmitter::emit");
            let _ = tx.send(event);
        }
    }

    // === Convenience methods ===

    pub fn stage_changed(&self, from: SessionStage, to: SessionStage) {
        self.emit(ForgeEvent::StageChanged {
            session_id: self.session_id.clone(),
            from,
            to,
        });
    }

    pub fn director_attempt(&self, moment_index: usize, attempt: u32, outcome: AttemptOutcome) {
        self.emit(ForgeEvent::DirectorAttempt {
            session_id: self.session_id.clone(),
            moment_index,
            attempt,
            outcome,
        });
    }

    pub fn sequence_started(&self, moment_index: usize, order: u32, kind: &str) {
        self.emit(ForgeEvent::SequenceStarted {
            session_id: self.session_id.clone(),
            moment_index,
            order,
            kind: kind.to_string(),
        });
    }

    pub fn sequence_generated(&self, moment_index: usize, order: u32, cost: f64) {
        self.emit(ForgeEvent::SequenceGenerated {
            session_id: self.session_id.clone(),
            moment_index,
            order,
            cost,
        });
    }

    pub fn sequence_failed(&self, moment_index: usize, order: u32, error: &str, error_kind: FailureKind) {
        self.emit(ForgeEvent::SequenceFailed {
            session_id: self.session_id.clone(),
            moment_index,
            order,
            error: error.to_string(),
            error_kind,
        });
    }

    pub fn sequence_exported(&self, moment_index: usize, order: u32, file_count: usize) {
        self.emit(ForgeEvent::SequenceExported {
            session_id: self.session_id.clone(),
            moment_index,
            order,
            file_count,
        });
    }

    pub fn progress_updated(&self, percent: u8, message: &str) {
        self.emit(ForgeEvent::ProgressUpdated {
            session_id: self.session_id.clone(),
            percent,
            message: message.to_string(),
        });
    }
}

/// Create a shared event bus with default capacity
pub fn create_event_bus() -> std::sync::Arc<EventBus> {
    std::sync::Arc::new(EventBus::with_default_capacity())
}
