//! ReelForge - moment-to-media generation orchestrator
//!
//! A session holds selected highlight moments. Analysis turns each moment
//! into an approved plan through a bounded plan → technical fix → creative
//! check loop. Generation then executes the plans sequence by sequence
//! against external generative services, reusing backgrounds and character
//! portraits where it can, and exports the results.
//!
//! # Modules
//!
//! - [`domain`] - Session, Moment, Plan and Sequence types
//! - [`estimate`] - Static cost/time model
//! - [`director`] - Plan/QC retry loop
//! - [`orchestrator`] - Generation and export phase
//! - [`runner`] - Background task per session
//! - [`state`] - Session store actor, snapshots and leases
//! - [`services`] - External collaborator traits and HTTP adapter
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cache;
pub mod cli;
pub mod config;
pub mod director;
pub mod domain;
pub mod estimate;
pub mod events;
pub mod orchestrator;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod state;

// Re-export commonly used types
pub use config::Config;
pub use director::{DirectorError, DirectorOutcome, DirectorPipeline};
pub use domain::{Moment, Plan, Sequence, SequenceKind, Session, SessionStage};
pub use estimate::{Estimate, estimate_plan};
pub use events::{EventBus, ForgeEvent};
pub use orchestrator::{GenerationError, GenerationOrchestrator, GenerationSettings};
pub use runner::{RunError, SessionManager};
pub use services::{ServiceError, Services};
pub use state::{SessionLease, SessionStore, StateError};
