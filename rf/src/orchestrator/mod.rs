//! Generation phase: plans in, assets and exports out

mod executor;
mod progress;

pub use executor::{GenerationError, GenerationOrchestrator, GenerationSettings};
pub use progress::{ANALYSIS_START, DONE, GENERATION_START, UNITS_PER_SEQUENCE, UnitProgress};
