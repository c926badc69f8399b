//! Director: turns a moment into an executable plan
//!
//! Each attempt drafts a plan, applies technical fixes, and submits it to
//! the creative gate. Rejections feed back into the next attempt.

mod fixes;
mod pipeline;

pub use fixes::{FixReport, apply_fixes};
pub use pipeline::{DirectorError, DirectorOutcome, DirectorPipeline};
