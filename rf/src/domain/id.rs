//! Session ID generation and resolution
//!
//! All IDs use the format: `{6-char-hex}-{type}-{slug}`
//! Example: `019430-session-boss-fight`

use tracing::debug;

/// Generate a domain ID from type and title
pub fn generate_id(domain_type: &str, title: &str) -> String {
    debug!(%domain_type, %title, "generate_id: called");
    let uuid = uuid::Uuid::now_v7();
    let simple = uuid.simple().to_string();
    let hex_prefix = &simple[simple.len() - 6..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex_prefix, domain_type)
    } else {
        format!("{}-{}-{}", hex_prefix, domain_type, slug)
    }
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-")
}

/// Resolve a partial reference against known session IDs
///
/// Returns:
/// - Ok(Some(id)) if exactly one match
/// - Ok(None) if no matches
/// - Err with candidates if ambiguous
pub fn resolve_id<'a, I>(ids: I, reference: &str) -> Result<Option<String>, Vec<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    debug!(%reference, "resolve_id: called");
    let ids: Vec<&str> = ids.into_iter().collect();

    // Exact match always wins, even if it is also a prefix of another ID
    if ids.contains(&reference) {
        return Ok(Some(reference.to_string()));
    }

    let matches: Vec<String> = ids
        .into_iter()
        .filter(|id| id.starts_with(reference) || slug_of(id).is_some_and(|slug| slug.contains(reference)))
        .map(String::from)
        .collect();

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.into_iter().next()),
        _ => Err(matches),
    }
}

/// Slug portion of an ID (after `{hex}-{type}-`)
fn slug_of(id: &str) -> Option<&str> {
    id.splitn(3, '-').nth(2)
}
