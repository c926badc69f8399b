//! Plan domain type
//!
//! A Plan is the ordered list of Sequences for one Moment plus derived
//! totals. Derived fields are never edited by hand: every change to the
//! sequence list goes through [`Plan::recompute`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::sequence::Sequence;
use crate::estimate::estimate_sequences;

/// Structural problems that make a plan unusable
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanValidationError {
    #[error("Plan has no sequences")]
    Empty,

    #[error("Sequence orders must be dense and 1-based, got {0:?}")]
    NonDenseOrders(Vec<u32>),

    #[error("Sequence {order}: duration must be positive, got {duration_sec}")]
    NonPositiveDuration { order: u32, duration_sec: f64 },

    #[error("Sequence {order}: required field '{field}' is empty")]
    EmptyField { order: u32, field: &'static str },

    #[error("Sequence {order}: close-up needs at least one frame")]
    NoFrames { order: u32 },
}

/// Ordered sequences plus derived totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub sequences: Vec<Sequence>,

    /// Derived: sum of sequence durations
    #[serde(default)]
    pub total_duration_sec: f64,

    /// Derived: cost estimate from the static pricing table
    #[serde(default)]
    pub estimated_cost: f64,

    /// Derived: generation time estimate from the static table
    #[serde(default)]
    pub estimated_seconds: f64,
}

impl Plan {
    /// Build a plan and compute its derived fields
    pub fn new(sequences: Vec<Sequence>) -> Self {
        debug!(sequence_count = sequences.len(), "Plan::new: called");
        let mut plan = Self {
            sequences,
            ..Default::default()
        };
        plan.recompute();
        plan
    }

    /// Recompute every derived field from the sequence list
    ///
    /// Deterministic and idempotent: sequences are ordered by `order`, offsets
    /// are a running sum of durations, totals come from the estimator.
    pub fn recompute(&mut self) {
        debug!(sequence_count = self.sequences.len(), "Plan::recompute: called");
        self.sequences.sort_by_key(|s| s.order);

        let mut offset = 0.0;
        for seq in &mut self.sequences {
            seq.start_offset_sec = offset;
            offset += seq.duration_sec;
        }
        self.total_duration_sec = offset;

        let estimate = estimate_sequences(&self.sequences);
        self.estimated_cost = estimate.cost;
        self.estimated_seconds = estimate.seconds;
    }

    /// Check the structural rules every executable plan must satisfy
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        debug!(sequence_count = self.sequences.len(), "Plan::validate: called");
        if self.sequences.is_empty() {
            return Err(PlanValidationError::Empty);
        }

        let orders: Vec<u32> = self.sequences.iter().map(|s| s.order).collect();
        let unique: HashSet<u32> = orders.iter().copied().collect();
        let dense = unique.len() == orders.len() && (1..=orders.len() as u32).all(|o| unique.contains(&o));
        if !dense {
            debug!(?orders, "Plan::validate: orders not dense");
            return Err(PlanValidationError::NonDenseOrders(orders));
        }

        for seq in &self.sequences {
            if seq.duration_sec.is_nan() || seq.duration_sec <= 0.0 {
                return Err(PlanValidationError::NonPositiveDuration {
                    order: seq.order,
                    duration_sec: seq.duration_sec,
                });
            }
            if let Some((field, _)) = seq.kind.required_text().into_iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(PlanValidationError::EmptyField { order: seq.order, field });
            }
            if let super::SequenceKind::CloseUp { frame_count: 0, .. } = seq.kind {
                return Err(PlanValidationError::NoFrames { order: seq.order });
            }
        }

        Ok(())
    }

    /// Look up a sequence by order
    pub fn sequence(&self, order: u32) -> Option<&Sequence> {
        self.sequences.iter().find(|s| s.order == order)
    }

    /// Mutable lookup by order
    pub fn sequence_mut(&mut self, order: u32) -> Option<&mut Sequence> {
        self.sequences.iter_mut().find(|s| s.order == order)
    }

    /// Sum of costs actually charged so far
    pub fn spent(&self) -> f64 {
        self.sequences.iter().map(|s| s.cost).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Background, SequenceKind};

    fn impact(order: u32, duration: f64) -> Sequence {
        Sequence::new(order, duration, SequenceKind::Impact { text: "BOOM".to_string() })
    }

    fn establishing(order: u32, duration: f64) -> Sequence {
        Sequence::new(
            order,
            duration,
            SequenceKind::EstablishingShot {
                location: "Keep".to_string(),
                description: "ruined keep under storm".to_string(),
            },
        )
    }

    #[test]
    fn test_recompute_offsets_and_totals() {
        let plan = Plan::new(vec![establishing(1, 4.0), impact(2, 3.0), impact(3, 2.0)]);
        let offsets: Vec<f64> = plan.sequences.iter().map(|s| s.start_offset_sec).collect();
        assert_eq!(offsets, vec![0.0, 4.0, 7.0]);
        assert_eq!(plan.total_duration_sec, 9.0);
        assert!((plan.estimated_cost - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_recompute_sorts_and_is_idempotent() {
        let mut plan = Plan::new(vec![impact(2, 3.0), establishing(1, 4.0)]);
        assert_eq!(plan.sequences[0].order, 1);
        let once = plan.clone();
        plan.recompute();
        plan.recompute();
        assert_eq!(plan, once);
    }

    #[test]
    fn test_validate_rejects_gaps_and_duplicates() {
        let plan = Plan::new(vec![impact(1, 1.0), impact(3, 1.0)]);
        assert!(matches!(plan.validate(), Err(PlanValidationError::NonDenseOrders(_))));

        let plan = Plan::new(vec![impact(1, 1.0), impact(1, 1.0)]);
        assert!(matches!(plan.validate(), Err(PlanValidationError::NonDenseOrders(_))));

        assert_eq!(Plan::default().validate(), Err(PlanValidationError::Empty));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        let plan = Plan::new(vec![impact(1, 0.0)]);
        assert!(matches!(
            plan.validate(),
            Err(PlanValidationError::NonPositiveDuration { order: 1, .. })
        ));

        let blank = Sequence::new(
            1,
            2.0,
            SequenceKind::Dialogue {
                speaker: "Aria".to_string(),
                line: "  ".to_string(),
                expression: "calm".to_string(),
                background: Background::new("camp"),
            },
        );
        assert_eq!(
            Plan::new(vec![blank]).validate(),
            Err(PlanValidationError::EmptyField { order: 1, field: "line" })
        );

        let frameless = Sequence::new(
            1,
            2.0,
            SequenceKind::CloseUp {
                subject: "Aria".to_string(),
                expression: "shocked".to_string(),
                frame_count: 0,
            },
        );
        assert_eq!(
            Plan::new(vec![frameless]).validate(),
            Err(PlanValidationError::NoFrames { order: 1 })
        );
    }

    #[test]
    fn test_planner_output_without_derived_fields() {
        let json = serde_json::json!({
            "sequences": [
                {"order": 1, "durationSec": 3, "type": "impact", "text": "NAT 20"}
            ]
        });
        let mut plan: Plan = serde_json::from_value(json).unwrap();
        plan.recompute();
        assert_eq!(plan.total_duration_sec, 3.0);
        assert!(plan.validate().is_ok());
    }
}
