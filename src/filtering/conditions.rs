use serde_json::Map;

use crate::collection::Collection;
use crate::errors::PredicateError;
use crate::filtering::predicate::{Lookup, PATH_SEPARATOR, Predicate, Value, normalize_path, split_lookup};
use crate::filtering::search::compile_search;
use crate::schema::{EntitySchema, FieldType};

/// Reserved key carrying the free-text search query.
pub const SEARCH_KEY: &str = "q";

// Basic safety limits
const MAX_FIELD_VALUE_LENGTH: usize = 10_000;
const MAX_FIELD_NAME_LENGTH: usize = 100;

/// Why a filter entry was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The root field is not in the filterable allow-list
    NotAllowed,
    /// A list value contained no items
    EmptyList,
    /// The collection refused the predicate
    Rejected(PredicateError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Applied(Value),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry {
    /// Parameter key as received, including any leading `-`
    pub key: String,
    pub outcome: FilterOutcome,
}

/// Per-entry result of filter compilation, in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterReport {
    pub entries: Vec<FilterEntry>,
}

impl FilterReport {
    /// Entries that narrowed the collection, with their coerced values.
    pub fn applied(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().filter_map(|entry| match &entry.outcome {
            FilterOutcome::Applied(value) => Some((entry.key.as_str(), value)),
            FilterOutcome::Skipped(_) => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = (&str, &SkipReason)> {
        self.entries.iter().filter_map(|entry| match &entry.outcome {
            FilterOutcome::Skipped(reason) => Some((entry.key.as_str(), reason)),
            FilterOutcome::Applied(_) => None,
        })
    }

    #[must_use]
    pub fn is_applied(&self, key: &str) -> bool {
        self.applied().any(|(k, _)| k == key)
    }

    /// Applied filters as a JSON object, for response metadata.
    #[must_use]
    pub fn to_json(&self) -> Map<String, serde_json::Value> {
        self.applied()
            .map(|(key, value)| {
                (
                    key.to_string(),
                    serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect()
    }

    fn push(&mut self, key: &str, outcome: FilterOutcome) {
        self.entries.push(FilterEntry {
            key: key.to_string(),
            outcome,
        });
    }
}

/// A filter entry ready to be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub predicate: Predicate,
    pub exclude: bool,
    pub value: Value,
}

fn split_items(raw: &str) -> Vec<Value> {
    raw.split(',')
        .filter(|item| !item.is_empty())
        .map(Value::from)
        .collect()
}

fn is_boolean_target(schema: &EntitySchema, path: &str, lookup: Option<Lookup>) -> bool {
    lookup == Some(Lookup::IsNull)
        || (matches!(lookup, None | Some(Lookup::Exact))
            && schema
                .resolve(path)
                .is_ok_and(|field| field.field_type == FieldType::Boolean))
}

/// Turn one raw parameter value into a predicate value.
///
/// Returns `None` when a list value is empty and nothing should be applied.
#[must_use]
pub fn coerce_raw(schema: &EntitySchema, key: &str, raw: &str) -> Option<Value> {
    let (path, lookup) = split_lookup(key);

    if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        let items = split_items(inner);
        return (!items.is_empty()).then_some(Value::List(items));
    }
    if lookup.is_some_and(Lookup::takes_list) {
        let items = split_items(raw);
        return (!items.is_empty()).then_some(Value::List(items));
    }
    if raw == "null" {
        return Some(Value::Null);
    }
    if matches!(raw, "true" | "false") && is_boolean_target(schema, path, lookup) {
        return Some(Value::Bool(raw == "true"));
    }
    Some(Value::from(raw))
}

fn is_valid_field_name(field: &str) -> bool {
    !field.is_empty() && field.len() <= MAX_FIELD_NAME_LENGTH && !field.starts_with('_')
}

/// Compiles client filter parameters against a filterable allow-list.
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler<'a> {
    filterable: &'a [String],
    searchable: &'a [String],
}

impl<'a> FilterCompiler<'a> {
    #[must_use]
    pub const fn new(filterable: &'a [String], searchable: &'a [String]) -> Self {
        Self {
            filterable,
            searchable,
        }
    }

    fn is_filterable(&self, path: &str) -> bool {
        let root = path.split(PATH_SEPARATOR).next().unwrap_or(path);
        self.filterable.iter().any(|f| f == root)
    }

    /// Compile a single non-search entry.
    ///
    /// # Errors
    ///
    /// Returns the [`SkipReason`] when the entry must not be applied.
    pub fn compile(&self, schema: &EntitySchema, key: &str, raw: &str) -> Result<CompiledFilter, SkipReason> {
        let (exclude, field) = key.strip_prefix('-').map_or((false, key), |f| (true, f));
        let field = normalize_path(field);

        if !is_valid_field_name(&field) || !self.is_filterable(&field) {
            return Err(SkipReason::NotAllowed);
        }
        if raw.len() > MAX_FIELD_VALUE_LENGTH {
            return Err(SkipReason::Rejected(PredicateError::InvalidValue {
                field,
                reason: "value too long".to_string(),
            }));
        }

        let value = coerce_raw(schema, &field, raw).ok_or(SkipReason::EmptyList)?;
        Ok(CompiledFilter {
            predicate: Predicate::parse(&field, value.clone()),
            exclude,
            value,
        })
    }

    /// Apply every entry of `params` in order. A failing entry is recorded
    /// and skipped; it never stops the remaining entries.
    pub fn apply<C: Collection>(&self, collection: &mut C, params: &[(String, String)]) -> FilterReport {
        let mut report = FilterReport::default();
        let entity = collection.schema().name.clone();

        for (key, raw) in params {
            if key == SEARCH_KEY {
                let outcome = match compile_search(raw, self.searchable) {
                    Some(predicate) => match collection.filter(&predicate) {
                        Ok(()) => FilterOutcome::Applied(Value::from(raw.as_str())),
                        Err(err) => FilterOutcome::Skipped(SkipReason::Rejected(err)),
                    },
                    None => FilterOutcome::Applied(Value::from(raw.as_str())),
                };
                report.push(key, outcome);
                continue;
            }

            let compiled = self.compile(collection.schema(), key, raw);
            let outcome = match compiled {
                Ok(filter) => {
                    let result = if filter.exclude {
                        collection.exclude(&filter.predicate)
                    } else {
                        collection.filter(&filter.predicate)
                    };
                    match result {
                        Ok(()) => FilterOutcome::Applied(filter.value),
                        Err(err) => FilterOutcome::Skipped(SkipReason::Rejected(err)),
                    }
                }
                Err(reason) => FilterOutcome::Skipped(reason),
            };

            if let FilterOutcome::Skipped(reason) = &outcome {
                tracing::debug!(entity = %entity, field = %key, reason = ?reason, "filter skipped");
            }
            report.push(key, outcome);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCollection;
    use crate::schema::FieldDescriptor;
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<EntitySchema> {
        Arc::new(
            EntitySchema::new("user", "users", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("name", FieldType::Text))
                .field(FieldDescriptor::new("active", FieldType::Boolean))
                .field(FieldDescriptor::new("password", FieldType::Text)),
        )
    }

    fn users() -> MemoryCollection {
        MemoryCollection::new(
            schema(),
            vec![
                json!({"id": 1, "name": "alice", "active": true, "password": "x"}),
                json!({"id": 2, "name": "bob", "active": false, "password": "y"}),
                json!({"id": 3, "name": "carol", "active": false, "password": "z"}),
            ],
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn allow(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_coerce_bracket_list_and_null() {
        let schema = schema();
        assert_eq!(
            coerce_raw(&schema, "name", "[alice,,bob]"),
            Some(Value::List(vec!["alice".into(), "bob".into()]))
        );
        assert_eq!(coerce_raw(&schema, "name", "[]"), None);
        assert_eq!(coerce_raw(&schema, "id__in", ","), None);
        assert_eq!(coerce_raw(&schema, "name", "null"), Some(Value::Null));
    }

    #[test]
    fn test_coerce_booleans_only_for_boolean_targets() {
        let schema = schema();
        assert_eq!(coerce_raw(&schema, "active", "true"), Some(Value::Bool(true)));
        assert_eq!(coerce_raw(&schema, "name__isnull", "false"), Some(Value::Bool(false)));
        assert_eq!(coerce_raw(&schema, "name", "true"), Some(Value::from("true")));
    }

    #[test]
    fn test_exclusion_and_list_scenario() {
        let filterable = allow(&["name", "active"]);
        let compiler = FilterCompiler::new(&filterable, &[]);
        let mut users = users();

        let report = compiler.apply(
            &mut users,
            &params(&[("-active", "true"), ("name", "[alice,bob]")]),
        );

        assert_eq!(users.describe(), "NOT active=true AND name__in=[alice, bob]");
        assert_eq!(report.applied().count(), 2);
        assert_eq!(
            report.applied().next(),
            Some(("-active", &Value::Bool(true)))
        );
    }

    #[test]
    fn test_disallowed_field_is_not_reported() {
        let filterable = allow(&["name", "active"]);
        let compiler = FilterCompiler::new(&filterable, &[]);
        let mut users = users();

        let report = compiler.apply(&mut users, &params(&[("password", "x"), ("password__startswith", "y")]));

        assert!(!report.is_applied("password"));
        assert_eq!(report.applied().count(), 0);
        assert_eq!(users.describe(), "");
    }

    #[test]
    fn test_bad_value_is_dropped_and_processing_continues() {
        let filterable = allow(&["id", "name"]);
        let compiler = FilterCompiler::new(&filterable, &[]);
        let mut users = users();

        let report = compiler.apply(&mut users, &params(&[("id", "abc"), ("name__nope", "x"), ("name", "bob")]));

        assert!(matches!(
            report.skipped().next(),
            Some(("id", SkipReason::Rejected(PredicateError::InvalidValue { .. })))
        ));
        assert!(report.is_applied("name"));
        assert!(!report.is_applied("name__nope"));
    }

    #[test]
    fn test_search_key_is_recorded() {
        let filterable = allow(&["name"]);
        let searchable = allow(&["name"]);
        let compiler = FilterCompiler::new(&filterable, &searchable);
        let mut users = users();

        let report = compiler.apply(&mut users, &params(&[("q", "ali")]));

        assert!(report.is_applied("q"));
        assert_eq!(users.describe(), "name__icontains=ali");
        assert_eq!(report.to_json(), json!({"q": "ali"}).as_object().cloned().unwrap());
    }
}
