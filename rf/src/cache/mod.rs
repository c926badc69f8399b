//! Per-moment asset caches
//!
//! Both caches live for exactly one moment's generation and are rebuilt
//! from scratch for the next moment (or for a regeneration).

mod background;
mod character;

pub use background::BackgroundRegistry;
pub use character::{CacheLookup, CharacterCache};

use crate::domain::NARRATOR;

/// Roles that all speak with the narrator's voice and face
const NARRATOR_ALIASES: &[&str] = &["narrator", "dm", "dungeon master", "game master", "gm", "storyteller"];

/// Normalize a speaker name into a cache key
///
/// Trims, case-folds and collapses internal whitespace; narrator-like roles
/// collapse to a single identity.
pub fn normalize_identity(name: &str) -> String {
    let folded = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    if NARRATOR_ALIASES.contains(&folded.as_str()) {
        NARRATOR.to_string()
    } else {
        folded
    }
}

/// Normalize an expression for comparison
pub fn normalize_expression(expression: &str) -> String {
    expression.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_identity() {
        assert_eq!(normalize_identity("  Aria   Swiftwind "), "aria swiftwind");
        assert_eq!(normalize_identity("ARIA"), normalize_identity("aria"));
        assert_eq!(normalize_identity("Dungeon   Master"), NARRATOR);
        assert_eq!(normalize_identity("GM"), NARRATOR);
        assert_eq!(normalize_identity("Storyteller"), NARRATOR);
        assert_eq!(normalize_identity("Dungeon Crawler"), "dungeon crawler");
    }

    #[test]
    fn test_normalize_expression() {
        assert_eq!(normalize_expression(" Very  Angry"), "very angry");
    }
}
