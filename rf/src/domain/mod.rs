//! Domain types for ReelForge
//!
//! Session → Moment → Plan → Sequence, plus the QC verdict types exchanged
//! with the validators. Everything here serializes to the camelCase JSON used
//! in session snapshots.

mod asset;
mod id;
mod moment;
mod plan;
mod qc;
mod sequence;
mod session;

pub use asset::{AssetKind, AssetOrigin, AssetRef, SequenceAssets};
pub use id::{generate_id, resolve_id};
pub use moment::{Highlight, Moment, MomentStatus};
pub use plan::{Plan, PlanValidationError};
pub use qc::{CreativeDimension, CreativeQcResult, DimensionVerdict, QcFix, QcResult};
pub use sequence::{
    Background, FailureKind, InvalidStatusTransition, NARRATOR, Sequence, SequenceKind, SequenceStatus,
};
pub use session::{InvalidTransition, Progress, Session, SessionStage};
