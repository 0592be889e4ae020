//! # Lazy Filters
//!
//! Row-level scoping whose values are only known once a request is served.
//!
//! A [`LazyFilters`] template is built once, typically when routes are
//! registered, and may reference [`CURRENT_CALLER`]. Every
//! [`apply`](LazyFilters::apply) substitutes the caller's id into a fresh copy
//! of the predicates, so one template can be shared by concurrent requests.
//!
//! ```rust,ignore
//! let scope = LazyFilters::new()
//!     .filter(Predicate::exact("owner", CURRENT_CALLER) | Predicate::exact("public", true))
//!     .filter_by("group__name", "members")
//!     .exclude_by("active", false);
//!
//! scope.apply(Some(&CallerId::new(7)), &mut collection)?;
//! ```

use std::fmt;

use crate::collection::Collection;
use crate::errors::ApiError;
use crate::filtering::predicate::{Predicate, Value};

/// Whoever a request is being served for.
pub trait Caller: Send + Sync {
    /// Identity substituted for [`CURRENT_CALLER`](crate::CURRENT_CALLER).
    /// `None` means anonymous.
    fn caller_id(&self) -> Option<Value>;
}

/// A caller known only by its id.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerId(pub Value);

impl Caller for CallerId {
    fn caller_id(&self) -> Option<Value> {
        (!self.0.is_null()).then(|| self.0.clone())
    }
}

impl CallerId {
    #[must_use]
    pub fn new(id: impl Into<Value>) -> Self {
        Self(id.into())
    }
}

/// Deferred filter specification. `Clone` gives an independent deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LazyFilters {
    filter_args: Vec<Predicate>,
    filter_kwargs: Vec<(String, Value)>,
    exclude_args: Vec<Predicate>,
    exclude_kwargs: Vec<(String, Value)>,
}

fn set_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str, value: Value) {
    match kwargs.iter_mut().find(|(k, _)| k == key) {
        Some((_, existing)) => *existing = value,
        None => kwargs.push((key.to_string(), value)),
    }
}

fn conjunction(mut predicates: Vec<Predicate>) -> Predicate {
    if predicates.len() == 1 {
        predicates.remove(0)
    } else {
        Predicate::All(predicates)
    }
}

impl LazyFilters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `predicate`.
    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter_args.push(predicate);
        self
    }

    /// Require `key == value`. A repeated key replaces the earlier value.
    #[must_use]
    pub fn filter_by(mut self, key: &str, value: impl Into<Value>) -> Self {
        set_kwarg(&mut self.filter_kwargs, key, value.into());
        self
    }

    /// Drop rows matching all exclusion predicates together.
    #[must_use]
    pub fn exclude(mut self, predicate: Predicate) -> Self {
        self.exclude_args.push(predicate);
        self
    }

    #[must_use]
    pub fn exclude_by(mut self, key: &str, value: impl Into<Value>) -> Self {
        set_kwarg(&mut self.exclude_kwargs, key, value.into());
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filter_args.is_empty()
            && self.filter_kwargs.is_empty()
            && self.exclude_args.is_empty()
            && self.exclude_kwargs.is_empty()
    }

    /// Whether any value still refers to the current caller.
    #[must_use]
    pub fn contains_caller(&self) -> bool {
        self.filter_args.iter().chain(&self.exclude_args).any(Predicate::contains_caller)
            || self
                .filter_kwargs
                .iter()
                .chain(&self.exclude_kwargs)
                .any(|(_, v)| v.contains_caller())
    }

    /// The `(exclude, predicate)` steps for `caller`, in application order:
    /// filter args, filter kwargs, exclude args, exclude kwargs.
    #[must_use]
    pub fn resolve(&self, caller: Option<&dyn Caller>) -> Vec<(bool, Predicate)> {
        let id = caller.and_then(|c| c.caller_id()).unwrap_or(Value::Null);
        let args = |args: &[Predicate]| conjunction(args.iter().map(|p| p.resolve_caller(&id)).collect());
        let kwargs = |kwargs: &[(String, Value)]| {
            conjunction(
                kwargs
                    .iter()
                    .map(|(key, value)| Predicate::parse(key, value.resolve_caller(&id)))
                    .collect(),
            )
        };

        let mut steps = Vec::new();
        if !self.filter_args.is_empty() {
            steps.push((false, args(&self.filter_args)));
        }
        if !self.filter_kwargs.is_empty() {
            steps.push((false, kwargs(&self.filter_kwargs)));
        }
        if !self.exclude_args.is_empty() {
            steps.push((true, args(&self.exclude_args)));
        }
        if !self.exclude_kwargs.is_empty() {
            steps.push((true, kwargs(&self.exclude_kwargs)));
        }
        steps
    }

    /// Scope `collection` to `caller`. The template is not modified.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if a predicate does not fit the
    /// collection's entity; a mandatory scope that cannot be applied must not
    /// be skipped.
    pub fn apply<C: Collection>(&self, caller: Option<&dyn Caller>, collection: &mut C) -> Result<(), ApiError> {
        for (exclude, predicate) in self.resolve(caller) {
            let result = if exclude {
                collection.exclude(&predicate)
            } else {
                collection.filter(&predicate)
            };
            result.map_err(|err| {
                ApiError::configuration(format!(
                    "lazy filter {predicate} cannot be applied to {}: {err}",
                    collection.schema().name
                ))
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for LazyFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let render = |args: &[Predicate], kwargs: &[(String, Value)]| -> Vec<String> {
            args.iter()
                .map(ToString::to_string)
                .chain(kwargs.iter().map(|(k, v)| format!("{k}={v}")))
                .collect()
        };
        let include = render(&self.filter_args, &self.filter_kwargs);
        let exclude = render(&self.exclude_args, &self.exclude_kwargs);

        let mut parts = Vec::new();
        if !include.is_empty() {
            parts.push(format!("(AND: {})", include.join(", ")));
        }
        if !exclude.is_empty() {
            parts.push(format!("~(AND: {})", exclude.join(", ")));
        }
        write!(f, "{}", parts.join(" & "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filtering::predicate::CURRENT_CALLER;
    use crate::memory::MemoryCollection;
    use crate::schema::{EntitySchema, FieldDescriptor, FieldType};
    use serde_json::json;
    use std::sync::Arc;

    fn documents() -> MemoryCollection {
        let schema = EntitySchema::new("document", "documents", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .field(FieldDescriptor::new("owner", FieldType::Integer))
            .field(FieldDescriptor::new("archived", FieldType::Boolean));
        MemoryCollection::new(
            Arc::new(schema),
            vec![
                json!({"id": 1, "owner": 7, "archived": false}),
                json!({"id": 2, "owner": 42, "archived": false}),
                json!({"id": 3, "owner": 7, "archived": true}),
                json!({"id": 4, "owner": null, "archived": false}),
            ],
        )
    }

    async fn ids(collection: &MemoryCollection) -> Vec<i64> {
        collection
            .slice(0, 10)
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r["id"].as_i64())
            .collect()
    }

    #[tokio::test]
    async fn test_apply_per_caller_keeps_template_unbound() {
        let template = LazyFilters::new()
            .filter(Predicate::exact("owner", CURRENT_CALLER))
            .exclude_by("archived", true);

        let mut for_seven = documents();
        template.apply(Some(&CallerId::new(7)), &mut for_seven).unwrap();
        let mut for_forty_two = documents();
        template.apply(Some(&CallerId::new(42)), &mut for_forty_two).unwrap();

        assert_eq!(ids(&for_seven).await, vec![1]);
        assert_eq!(ids(&for_forty_two).await, vec![2]);
        assert!(template.contains_caller());
        assert_eq!(template.to_string(), "(AND: owner=CURRENT_CALLER) & ~(AND: archived=true)");
    }

    #[tokio::test]
    async fn test_anonymous_caller_resolves_to_null() {
        let template = LazyFilters::new().filter_by("owner", CURRENT_CALLER);
        let mut anonymous = documents();
        template.apply(None, &mut anonymous).unwrap();
        assert_eq!(ids(&anonymous).await, vec![4]);
    }

    #[tokio::test]
    async fn test_anonymous_caller_in_list_matches_nothing() {
        let template = LazyFilters::new().filter_by("owner__in", vec![CURRENT_CALLER]);
        let mut anonymous = documents();
        template.apply(None, &mut anonymous).unwrap();
        assert!(ids(&anonymous).await.is_empty());

        let template = LazyFilters::new().exclude_by("owner__in", vec![CURRENT_CALLER]);
        let mut anonymous = documents();
        template.apply(None, &mut anonymous).unwrap();
        assert_eq!(ids(&anonymous).await, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_later_kwargs_override_earlier() {
        let template = LazyFilters::new()
            .filter_by("owner", 1)
            .filter_by("archived", false)
            .filter_by("owner", 2);
        assert_eq!(template.to_string(), "(AND: owner=2, archived=false)");
    }

    #[test]
    fn test_clone_is_independent() {
        let template = LazyFilters::new().filter_by("owner", CURRENT_CALLER);
        let extended = template.clone().exclude_by("archived", true);
        assert_ne!(template, extended);
        assert!(template.to_string().starts_with("(AND"));
        assert!(!template.to_string().contains('~'));
    }

    #[test]
    fn test_resolve_order_and_nesting() {
        let template = LazyFilters::new()
            .exclude(Predicate::exact("owner", CURRENT_CALLER) | Predicate::exact("archived", true))
            .filter_by("owner__in", vec![CURRENT_CALLER, Value::Int(1)]);
        let steps = template.resolve(Some(&CallerId::new(9)));

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0], (false, Predicate::parse("owner__in", vec![9_i64, 1])));
        assert_eq!(steps[1].1.to_string(), "(owner=9 OR archived=true)");
        assert!(steps[1].0);
    }

    #[test]
    fn test_unfit_scope_is_a_configuration_error() {
        let template = LazyFilters::new().filter_by("tenant", CURRENT_CALLER);
        let mut documents = documents();
        let err = template.apply(Some(&CallerId::new(1)), &mut documents).unwrap_err();
        assert!(matches!(err, ApiError::Configuration { .. }));
        assert_eq!(documents.describe(), "");
    }
}
