use async_trait::async_trait;
use sea_orm::DbErr;

use crate::errors::PredicateError;
use crate::filtering::predicate::{Lookup, Predicate, Value};
use crate::filtering::sort::OrderField;
use crate::schema::{EntitySchema, FieldType};

/// A queryable set of records of one entity type.
///
/// Predicate and ordering methods narrow the collection in place. They either
/// apply fully or return an error and leave the collection as it was, so a
/// caller can drop a bad entry and carry on with the rest of the request.
/// Only `count` and `slice` touch the backing store.
#[async_trait]
pub trait Collection: Send + Sync {
    type Record: Send;

    fn schema(&self) -> &EntitySchema;

    /// Keep records matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns a [`PredicateError`] if the predicate cannot be expressed
    /// against this entity.
    fn filter(&mut self, predicate: &Predicate) -> Result<(), PredicateError>;

    /// Drop records matching `predicate`.
    ///
    /// # Errors
    ///
    /// Same as [`Collection::filter`].
    fn exclude(&mut self, predicate: &Predicate) -> Result<(), PredicateError>;

    /// Replace any ordering with `fields`.
    ///
    /// # Errors
    ///
    /// Returns a [`PredicateError`] if a field cannot be ordered by.
    fn order_by(&mut self, fields: &[OrderField]) -> Result<(), PredicateError>;

    /// Remove duplicate rows, keyed on `fields`.
    fn distinct(&mut self, fields: &[String]);

    /// Whether an explicit ordering has been applied.
    fn is_ordered(&self) -> bool;

    /// The explicit ordering, when the collection knows it.
    fn ordering(&self) -> Option<&[OrderField]> {
        None
    }

    /// Human readable form of the pending query, for debug logs.
    fn describe(&self) -> String {
        String::new()
    }

    /// # Errors
    ///
    /// Propagates the backing store's error.
    async fn count(&self) -> Result<u64, DbErr>;

    /// # Errors
    ///
    /// Propagates the backing store's error.
    async fn slice(&self, offset: u64, limit: u64) -> Result<Vec<Self::Record>, DbErr>;
}

/// Check a predicate against `schema` and coerce every leaf value to the type
/// of the field it names. Both providers run this before translating a tree,
/// so they agree on what is rejected.
///
/// # Errors
///
/// - [`PredicateError::UnknownField`] for a path that does not resolve
/// - [`PredicateError::UnresolvedCaller`] for a leftover `CURRENT_CALLER`
/// - [`PredicateError::InvalidValue`] when a value does not fit its lookup or field
/// - [`PredicateError::UnsupportedLookup`] for text lookups on booleans, or
///   full-text search on non-text fields
pub fn bind_predicate(schema: &EntitySchema, predicate: &Predicate) -> Result<Predicate, PredicateError> {
    match predicate {
        Predicate::Leaf { path, lookup, value } => {
            let field = schema.resolve(path)?;
            if value.contains_caller() {
                return Err(PredicateError::UnresolvedCaller);
            }
            let invalid = |reason: &str| PredicateError::InvalidValue {
                field: path.clone(),
                reason: reason.to_string(),
            };
            let unsupported = || PredicateError::UnsupportedLookup {
                field: path.clone(),
                lookup: *lookup,
            };

            let value = match lookup {
                Lookup::IsNull if value.is_null() => return Err(invalid("isnull needs true or false")),
                Lookup::IsNull => FieldType::Boolean.coerce(path, value)?,
                Lookup::Exact if value.is_null() => Value::Null,
                _ if value.is_null() => return Err(invalid("null is only allowed with exact")),
                Lookup::Search if field.field_type != FieldType::Text => return Err(unsupported()),
                l if l.is_pattern() => {
                    if field.field_type == FieldType::Boolean {
                        return Err(unsupported());
                    }
                    match value {
                        Value::List(_) => return Err(invalid("expected a single value")),
                        other => Value::String(other.to_string()),
                    }
                }
                // Null never equals anything, so it drops out of the list.
                Lookup::In => {
                    let items = match value {
                        Value::List(items) => items.iter().filter(|v| !v.is_null()).cloned().collect(),
                        scalar => vec![scalar.clone()],
                    };
                    field.field_type.coerce(path, &Value::List(items))?
                }
                Lookup::Range => match value {
                    Value::List(items) if items.len() == 2 => field.field_type.coerce(path, value)?,
                    _ => return Err(invalid("range needs exactly two values")),
                },
                _ => match value {
                    Value::List(_) => return Err(invalid("expected a single value")),
                    scalar => field.field_type.coerce(path, scalar)?,
                },
            };

            Ok(Predicate::Leaf {
                path: path.clone(),
                lookup: *lookup,
                value,
            })
        }
        Predicate::All(children) => children
            .iter()
            .map(|c| bind_predicate(schema, c))
            .collect::<Result<Vec<_>, _>>()
            .map(Predicate::All),
        Predicate::Any(children) => children
            .iter()
            .map(|c| bind_predicate(schema, c))
            .collect::<Result<Vec<_>, _>>()
            .map(Predicate::Any),
        Predicate::Not(inner) => Ok(Predicate::Not(Box::new(bind_predicate(schema, inner)?))),
    }
}

/// Check that every ordering path resolves to a field.
///
/// # Errors
///
/// Returns [`PredicateError::UnknownField`] for the first path that does not.
pub fn check_ordering(schema: &EntitySchema, fields: &[OrderField]) -> Result<(), PredicateError> {
    for field in fields {
        schema.resolve(&field.path)?;
    }
    Ok(())
}
