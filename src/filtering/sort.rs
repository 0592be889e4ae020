use std::fmt;

use crate::collection::Collection;
use crate::errors::PredicateError;
use crate::filtering::predicate::normalize_path;

/// One ordering term, rendered `name` or `-name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderField {
    pub path: String,
    pub descending: bool,
}

impl OrderField {
    #[must_use]
    pub fn asc(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            descending: false,
        }
    }

    #[must_use]
    pub fn desc(path: &str) -> Self {
        Self {
            path: normalize_path(path),
            descending: true,
        }
    }

    /// Parse `name` / `-name`.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        raw.strip_prefix('-').map_or_else(|| Self::asc(raw), Self::desc)
    }
}

impl fmt::Display for OrderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            write!(f, "-{}", self.path)
        } else {
            write!(f, "{}", self.path)
        }
    }
}

/// Ordering requested by a client.
#[derive(Debug, Clone, Copy)]
pub enum OrderingSpec<'a> {
    /// Comma separated, optionally wrapped in `[...]`
    Raw(&'a str),
    Fields(&'a [String]),
}

/// What ordering did to a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderOutcome {
    /// Valid client-supplied terms, reported back to the client.
    pub applied: Vec<OrderField>,
    /// Ordering in force afterwards, client or default.
    pub effective: Vec<OrderField>,
}

/// Strip optional brackets and split on commas.
#[must_use]
pub fn split_ordering(raw: &str) -> Vec<&str> {
    let inner = raw
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(raw);
    inner.split(',').map(str::trim).collect()
}

fn is_valid(candidate: &str, orderable: &[String]) -> bool {
    !candidate.is_empty()
        && !candidate.starts_with("--")
        && orderable
            .iter()
            .any(|f| *f == normalize_path(candidate.trim_start_matches('-')))
}

/// Keep only candidates naming an orderable field; the rest are logged and dropped.
pub fn validate_ordering<'a>(
    candidates: impl IntoIterator<Item = &'a str>,
    orderable: &[String],
) -> Vec<OrderField> {
    candidates
        .into_iter()
        .filter(|candidate| {
            let valid = is_valid(candidate, orderable);
            if !valid {
                tracing::debug!(field = %candidate, "invalid ordering field");
            }
            valid
        })
        .map(OrderField::parse)
        .collect()
}

/// Apply client ordering, falling back to `default` when nothing valid was
/// requested and the collection carries no ordering of its own.
///
/// # Errors
///
/// Returns the collection's [`PredicateError`] if an allow-listed or default
/// field cannot be ordered by, which points at a misconfigured controller.
pub fn apply_ordering<C: Collection>(
    collection: &mut C,
    spec: Option<OrderingSpec<'_>>,
    orderable: &[String],
    default: &[OrderField],
) -> Result<OrderOutcome, PredicateError> {
    if orderable.is_empty() {
        tracing::debug!(entity = %collection.schema().name, "no fields for ordering");
    }

    let applied = match spec {
        _ if orderable.is_empty() => Vec::new(),
        None => Vec::new(),
        Some(OrderingSpec::Raw(raw)) => validate_ordering(split_ordering(raw), orderable),
        Some(OrderingSpec::Fields(fields)) => {
            validate_ordering(fields.iter().map(String::as_str), orderable)
        }
    };

    if !applied.is_empty() {
        collection.order_by(&applied)?;
        tracing::debug!(ordering = ?applied, "ordering");
        return Ok(OrderOutcome {
            effective: applied.clone(),
            applied,
        });
    }

    if collection.is_ordered() {
        let stored = collection.ordering().map_or_else(
            || {
                collection
                    .schema()
                    .default_ordering
                    .iter()
                    .map(|f| OrderField::parse(f))
                    .collect()
            },
            <[OrderField]>::to_vec,
        );
        return Ok(OrderOutcome {
            applied,
            effective: stored,
        });
    }

    collection.order_by(default)?;
    tracing::debug!(ordering = ?default, "default ordering");
    Ok(OrderOutcome {
        applied,
        effective: default.to_vec(),
    })
}
