//! Session state with the actor pattern
//!
//! SessionStore owns every session and processes messages via channels,
//! persisting a JSON snapshot after each mutation. Leases give one task at a
//! time the right to mutate a session.

mod lease;
mod manager;
mod messages;
mod persistence;

pub use lease::SessionLease;
pub use manager::SessionStore;
pub use messages::{StateCommand, StateError, StateResponse};
pub use persistence::SnapshotDir;
