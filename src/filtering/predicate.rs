//! Predicate trees.
//!
//! Every condition the crate issues against a [`Collection`](crate::Collection)
//! is expressed as a [`Predicate`]: leaves of `(field path, lookup, value)`
//! combined with AND / OR / NOT. Client parameters, free-text search and
//! [`LazyFilters`](crate::LazyFilters) all compile down to this one shape, so a
//! collection provider only has to understand a single tree.

use serde::{Serialize, Serializer, ser::SerializeSeq};
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use uuid::Uuid;

/// Separator used for relation traversal in field paths (`group__name`).
pub const PATH_SEPARATOR: &str = "__";

/// A literal value carried by a predicate leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Uuid(Uuid),
    List(Vec<Value>),
    /// Placeholder for the identity of whoever is being served. Substituted by
    /// [`Predicate::resolve_caller`] before the predicate reaches a collection.
    CurrentCaller,
}

/// Sentinel standing in for the current caller's id inside lazy filters.
pub const CURRENT_CALLER: Value = Value::CurrentCaller;

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn contains_caller(&self) -> bool {
        match self {
            Self::CurrentCaller => true,
            Self::List(items) => items.iter().any(Self::contains_caller),
            _ => false,
        }
    }

    #[must_use]
    pub fn resolve_caller(&self, id: &Value) -> Value {
        match self {
            Self::CurrentCaller => id.clone(),
            Self::List(items) => Self::List(items.iter().map(|v| v.resolve_caller(id)).collect()),
            other => other.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::CurrentCaller => write!(f, "CURRENT_CALLER"),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_none(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(x) => serializer.serialize_f64(*x),
            Self::String(s) => serializer.serialize_str(s),
            Self::Uuid(u) => serializer.collect_str(u),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::CurrentCaller => serializer.serialize_str("CURRENT_CALLER"),
        }
    }
}

/// Comparison applied by a predicate leaf, named after its key suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lookup {
    Exact,
    IExact,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    /// Full-text search
    Search,
    In,
    Range,
    IsNull,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Lookup {
    /// Parse a lookup from a key suffix such as `icontains` or `in`.
    #[must_use]
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "exact" => Self::Exact,
            "iexact" => Self::IExact,
            "contains" => Self::Contains,
            "icontains" => Self::IContains,
            "startswith" => Self::StartsWith,
            "istartswith" => Self::IStartsWith,
            "endswith" => Self::EndsWith,
            "iendswith" => Self::IEndsWith,
            "search" => Self::Search,
            "in" => Self::In,
            "range" => Self::Range,
            "isnull" => Self::IsNull,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn suffix(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::IExact => "iexact",
            Self::Contains => "contains",
            Self::IContains => "icontains",
            Self::StartsWith => "startswith",
            Self::IStartsWith => "istartswith",
            Self::EndsWith => "endswith",
            Self::IEndsWith => "iendswith",
            Self::Search => "search",
            Self::In => "in",
            Self::Range => "range",
            Self::IsNull => "isnull",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
        }
    }

    /// Lookups matching text patterns; their value is always used as a string.
    #[must_use]
    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::IExact
                | Self::Contains
                | Self::IContains
                | Self::StartsWith
                | Self::IStartsWith
                | Self::EndsWith
                | Self::IEndsWith
                | Self::Search
        )
    }

    /// Lookups whose raw value is a comma separated list.
    #[must_use]
    pub const fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::Range)
    }
}

/// Normalise dot notation (`group.name`) to the `__` separator.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    path.replace('.', PATH_SEPARATOR)
}

/// Split a filter key into its field path and an explicit lookup suffix.
///
/// `group__name__icontains` gives `("group__name", Some(IContains))`, while
/// `group__name` gives `("group__name", None)`.
#[must_use]
pub fn split_lookup(key: &str) -> (&str, Option<Lookup>) {
    if let Some((path, suffix)) = key.rsplit_once(PATH_SEPARATOR)
        && let Some(lookup) = Lookup::from_suffix(suffix)
    {
        return (path, Some(lookup));
    }
    (key, None)
}

/// Boolean expression over field lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Leaf {
        path: String,
        lookup: Lookup,
        value: Value,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Build a leaf. A list compared with `exact` becomes an `in` lookup.
    #[must_use]
    pub fn new(path: &str, lookup: Lookup, value: impl Into<Value>) -> Self {
        let value = value.into();
        let lookup = match (&value, lookup) {
            (Value::List(_), Lookup::Exact) => Lookup::In,
            _ => lookup,
        };
        Self::Leaf {
            path: normalize_path(path),
            lookup,
            value,
        }
    }

    /// Build a leaf from a keyword such as `group__name__icontains`.
    #[must_use]
    pub fn parse(key: &str, value: impl Into<Value>) -> Self {
        let key = normalize_path(key);
        let (path, lookup) = split_lookup(&key);
        Self::new(path, lookup.unwrap_or(Lookup::Exact), value)
    }

    #[must_use]
    pub fn exact(path: &str, value: impl Into<Value>) -> Self {
        Self::new(path, Lookup::Exact, value)
    }

    #[must_use]
    pub fn all(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::All(predicates.into_iter().collect())
    }

    #[must_use]
    pub fn any(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self::Any(predicates.into_iter().collect())
    }

    #[must_use]
    pub fn contains_caller(&self) -> bool {
        match self {
            Self::Leaf { value, .. } => value.contains_caller(),
            Self::All(children) | Self::Any(children) => children.iter().any(Self::contains_caller),
            Self::Not(inner) => inner.contains_caller(),
        }
    }

    /// Return a copy of the tree with every [`CURRENT_CALLER`] replaced by `id`.
    /// The receiver is left untouched.
    #[must_use]
    pub fn resolve_caller(&self, id: &Value) -> Self {
        match self {
            Self::Leaf {
                path,
                lookup,
                value,
            } => Self::Leaf {
                path: path.clone(),
                lookup: *lookup,
                value: value.resolve_caller(id),
            },
            Self::All(children) => Self::All(children.iter().map(|c| c.resolve_caller(id)).collect()),
            Self::Any(children) => Self::Any(children.iter().map(|c| c.resolve_caller(id)).collect()),
            Self::Not(inner) => Self::Not(Box::new(inner.resolve_caller(id))),
        }
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Self) -> Self::Output {
        match self {
            Self::All(mut children) => {
                children.push(rhs);
                Self::All(children)
            }
            lhs => Self::All(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Self) -> Self::Output {
        match self {
            Self::Any(mut children) => {
                children.push(rhs);
                Self::Any(children)
            }
            lhs => Self::Any(vec![lhs, rhs]),
        }
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        Self::Not(Box::new(self))
    }
}

fn join(f: &mut fmt::Formatter<'_>, children: &[Predicate], op: &str) -> fmt::Result {
    let rendered: Vec<String> = children.iter().map(ToString::to_string).collect();
    write!(f, "({})", rendered.join(op))
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Leaf {
                path,
                lookup: Lookup::Exact,
                value,
            } => write!(f, "{path}={value}"),
            Self::Leaf {
                path,
                lookup,
                value,
            } => write!(f, "{path}{PATH_SEPARATOR}{}={value}", lookup.suffix()),
            Self::All(children) => join(f, children, " AND "),
            Self::Any(children) => join(f, children, " OR "),
            Self::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lookup_with_suffix() {
        assert_eq!(
            split_lookup("group__name__icontains"),
            ("group__name", Some(Lookup::IContains))
        );
        assert_eq!(split_lookup("created__gte"), ("created", Some(Lookup::Gte)));
    }

    #[test]
    fn test_split_lookup_without_suffix() {
        assert_eq!(split_lookup("group__name"), ("group__name", None));
        assert_eq!(split_lookup("name"), ("name", None));
    }

    #[test]
    fn test_parse_normalizes_dot_notation() {
        let p = Predicate::parse("group.name__istartswith", "adm");
        assert_eq!(p, Predicate::new("group__name", Lookup::IStartsWith, "adm"));
    }

    #[test]
    fn test_list_with_exact_becomes_in() {
        let p = Predicate::exact("name", vec!["alice", "bob"]);
        assert_eq!(p.to_string(), "name__in=[alice, bob]");
    }

    #[test]
    fn test_operators_compose() {
        let p = (Predicate::exact("a", 1) | Predicate::exact("b", 2)) & !Predicate::exact("c", true);
        assert_eq!(p.to_string(), "((a=1 OR b=2) AND NOT c=true)");
    }

    #[test]
    fn test_resolve_caller_leaves_template_intact() {
        let template = Predicate::exact("owner", CURRENT_CALLER)
            | Predicate::new("editors__id", Lookup::In, vec![CURRENT_CALLER, Value::Int(1)]);
        let resolved = template.resolve_caller(&Value::Int(7));

        assert!(template.contains_caller());
        assert!(!resolved.contains_caller());
        assert_eq!(resolved.to_string(), "(owner=7 OR editors__id__in=[7, 1])");
    }

    #[test]
    fn test_value_serializes_as_json() {
        let v = Value::List(vec![Value::Null, Value::Bool(true), "x".into()]);
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"[null,true,"x"]"#);
        assert_eq!(
            serde_json::to_string(&CURRENT_CALLER).unwrap(),
            r#""CURRENT_CALLER""#
        );
    }
}
