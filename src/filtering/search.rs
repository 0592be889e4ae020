use crate::filtering::predicate::{Lookup, Predicate};

/// Split a searchable field entry into its name and the lookup its sigil selects.
///
/// - `^field`: case-insensitive starts-with
/// - `=field`: case-insensitive exact
/// - `@field`: full-text search
/// - `field`: case-insensitive contains
#[must_use]
pub fn search_lookup(entry: &str) -> (&str, Lookup) {
    if let Some(name) = entry.strip_prefix('^') {
        (name, Lookup::IStartsWith)
    } else if let Some(name) = entry.strip_prefix('=') {
        (name, Lookup::IExact)
    } else if let Some(name) = entry.strip_prefix('@') {
        (name, Lookup::Search)
    } else {
        (entry, Lookup::IContains)
    }
}

/// Compile a free-text query into an AND over whitespace tokens, each an OR
/// across the searchable fields. Blank queries compile to nothing.
#[must_use]
pub fn compile_search(query: &str, searchable: &[String]) -> Option<Predicate> {
    if searchable.is_empty() {
        return None;
    }

    let mut terms: Vec<Predicate> = query
        .split_whitespace()
        .map(|token| {
            let mut alternatives: Vec<Predicate> = searchable
                .iter()
                .map(|entry| {
                    let (field, lookup) = search_lookup(entry);
                    Predicate::new(field, lookup, token)
                })
                .collect();
            if alternatives.len() == 1 {
                alternatives.remove(0)
            } else {
                Predicate::Any(alternatives)
            }
        })
        .collect();

    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Predicate::All(terms)),
    }
}
