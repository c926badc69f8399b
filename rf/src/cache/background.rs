//! Ordinal → background asset map for reuse references

use std::collections::BTreeMap;

use tracing::debug;

use crate::domain::{AssetRef, Plan};

/// Backgrounds registered by earlier sequences of one moment
#[derive(Debug, Default)]
pub struct BackgroundRegistry {
    by_order: BTreeMap<u32, AssetRef>,
}

impl BackgroundRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded from sequences before `order` that already have a background
    pub fn seeded_from(plan: &Plan, order: u32) -> Self {
        let by_order = plan
            .sequences
            .iter()
            .filter(|s| s.order < order && s.has_generated())
            .filter_map(|s| s.assets.background.clone().map(|bg| (s.order, bg)))
            .collect::<BTreeMap<_, _>>();
        debug!(order, seeded = by_order.len(), "BackgroundRegistry::seeded_from: called");
        Self { by_order }
    }

    pub fn register(&mut self, order: u32, asset: AssetRef) {
        debug!(order, "BackgroundRegistry::register: called");
        self.by_order.insert(order, asset);
    }

    /// Resolve a reuse reference from the sequence at `current`
    ///
    /// Only strictly earlier, already-registered ordinals resolve. Anything
    /// else (self, forward, unknown) yields `None` and the caller generates
    /// fresh.
    pub fn resolve(&self, current: u32, reuse_from: u32) -> Option<&AssetRef> {
        let resolved = if reuse_from < current {
            self.by_order.get(&reuse_from)
        } else {
            None
        };
        debug!(current, reuse_from, resolved = resolved.is_some(), "BackgroundRegistry::resolve: called");
        resolved
    }

    pub fn len(&self) -> usize {
        self.by_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_order.is_empty()
    }
}
