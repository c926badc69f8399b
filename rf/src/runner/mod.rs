//! Background session tasks
//!
//! The SessionManager spawns at most one task per session (analysis,
//! generation or regeneration), owns its cancellation token and maps the
//! outcome onto the session's stage.

mod manager;

pub use manager::{RunError, SessionManager, SessionTask, join};
