//! Character portrait cache keyed by normalized speaker identity

use std::collections::HashMap;

use tracing::debug;

use super::{normalize_expression, normalize_identity};
use crate::domain::AssetRef;

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    /// Same speaker, same expression: reuse verbatim
    Hit(AssetRef),
    /// Same speaker, new expression: derive a variant from the base
    Variant { base: AssetRef },
    /// Unknown speaker
    Miss,
}

#[derive(Debug, Clone)]
struct CharacterEntry {
    base: AssetRef,
    by_expression: HashMap<String, AssetRef>,
}

/// Portraits generated so far for one moment
#[derive(Debug, Default)]
pub struct CharacterCache {
    entries: HashMap<String, CharacterEntry>,
}

impl CharacterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, speaker: &str, expression: &str) -> CacheLookup {
        let key = normalize_identity(speaker);
        let expression = normalize_expression(expression);
        let result = match self.entries.get(&key) {
            Some(entry) => match entry.by_expression.get(&expression) {
                Some(asset) => CacheLookup::Hit(asset.clone()),
                None => CacheLookup::Variant {
                    base: entry.base.clone(),
                },
            },
            None => CacheLookup::Miss,
        };
        debug!(%key, %expression, hit = matches!(result, CacheLookup::Hit(_)), "CharacterCache::lookup: called");
        result
    }

    /// Record a portrait
    ///
    /// The first portrait stored for a speaker becomes its base reference;
    /// later ones are recorded under their expression only.
    pub fn insert(&mut self, speaker: &str, expression: &str, asset: AssetRef) {
        let key = normalize_identity(speaker);
        let expression = normalize_expression(expression);
        debug!(%key, %expression, "CharacterCache::insert: called");
        self.entries
            .entry(key)
            .or_insert_with(|| CharacterEntry {
                base: asset.clone(),
                by_expression: HashMap::new(),
            })
            .by_expression
            .insert(expression, asset);
    }

    /// Base reference for a speaker, if any portrait exists
    pub fn base_for(&self, speaker: &str) -> Option<&AssetRef> {
        self.entries.get(&normalize_identity(speaker)).map(|e| &e.base)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
