//! Static cost/time model for plans
//!
//! Pure functions over sequences. Amounts are accumulated in integer
//! micro-dollars and whole seconds so the result is identical regardless of
//! the order in which sequences are visited.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Plan, Sequence, SequenceKind};

/// Micro-dollars per USD
const MICROS_PER_USD: f64 = 1_000_000.0;

/// Per-kind price (micro-dollars) and generation time (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitRate {
    pub cost_micros: u64,
    pub seconds: u64,
}

const DIALOGUE: UnitRate = UnitRate {
    cost_micros: 80_000,
    seconds: 40,
};
const DIALOGUE_REUSED_BACKGROUND: UnitRate = UnitRate {
    cost_micros: 50_000,
    seconds: 25,
};
const DM_DESCRIPTION: UnitRate = UnitRate {
    cost_micros: 60_000,
    seconds: 30,
};
const DM_DESCRIPTION_REUSED_BACKGROUND: UnitRate = UnitRate {
    cost_micros: 30_000,
    seconds: 15,
};
const CLOSE_UP_PER_FRAME: UnitRate = UnitRate {
    cost_micros: 20_000,
    seconds: 6,
};
const ESTABLISHING_SHOT: UnitRate = UnitRate {
    cost_micros: 40_000,
    seconds: 20,
};
const IMPACT: UnitRate = UnitRate {
    cost_micros: 0,
    seconds: 0,
};

/// Rate for one sequence kind
pub fn unit_rate(kind: &SequenceKind) -> UnitRate {
    match kind {
        SequenceKind::Dialogue { background, .. } if background.reuse_from.is_some() => DIALOGUE_REUSED_BACKGROUND,
        SequenceKind::Dialogue { .. } => DIALOGUE,
        SequenceKind::DmDescription { background, .. } if background.reuse_from.is_some() => {
            DM_DESCRIPTION_REUSED_BACKGROUND
        }
        SequenceKind::DmDescription { .. } => DM_DESCRIPTION,
        SequenceKind::CloseUp { frame_count, .. } => UnitRate {
            cost_micros: CLOSE_UP_PER_FRAME.cost_micros * u64::from(*frame_count),
            seconds: CLOSE_UP_PER_FRAME.seconds * u64::from(*frame_count),
        },
        SequenceKind::EstablishingShot { .. } => ESTABLISHING_SHOT,
        SequenceKind::Impact { .. } => IMPACT,
    }
}

/// Estimated cost and generation time
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    /// USD
    pub cost: f64,
    /// Seconds of generation time
    pub seconds: f64,
}

impl Estimate {
    /// Whole minutes, rounded up
    pub fn minutes(&self) -> u32 {
        (self.seconds / 60.0).ceil() as u32
    }
}

/// Estimate a list of sequences
pub fn estimate_sequences(sequences: &[Sequence]) -> Estimate {
    debug!(sequence_count = sequences.len(), "estimate_sequences: called");
    let (micros, seconds) = sequences
        .iter()
        .map(|s| unit_rate(&s.kind))
        .fold((0u64, 0u64), |(c, t), r| (c + r.cost_micros, t + r.seconds));

    Estimate {
        cost: micros as f64 / MICROS_PER_USD,
        seconds: seconds as f64,
    }
}

/// Estimate a plan
pub fn estimate_plan(plan: &Plan) -> Estimate {
    estimate_sequences(&plan.sequences)
}

/// Whole-session time estimate across several plans
pub fn estimated_minutes<'a>(plans: impl IntoIterator<Item = &'a Plan>) -> u32 {
    let seconds: u64 = plans
        .into_iter()
        .flat_map(|p| p.sequences.iter())
        .map(|s| unit_rate(&s.kind).seconds)
        .sum();
    debug!(seconds, "estimated_minutes: called");
    seconds.div_ceil(60) as u32
}
