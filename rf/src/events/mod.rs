//! Session activity events
//!
//! Every stage change, director attempt and per-sequence step emits a
//! [`ForgeEvent`] on a `tokio::sync::broadcast` bus. Observers (the CLI, the
//! JSONL event log) subscribe; emitting never blocks and never fails.
//!
//! ```rust,ignore
//! let bus = create_event_bus();
//! let emitter = bus.emitter_for(&session.id);
//! emitter.sequence_started(0, 1, "dialogue");
//!
//! let mut rx = bus.subscribe();
//! while let Ok(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter, create_event_bus};
pub use logger::{EventLogger, read_session_events, spawn_event_logger};
pub use types::{AttemptOutcome, EventLogEntry, ForgeEvent};
