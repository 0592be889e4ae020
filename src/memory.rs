//! In-process [`Collection`] over JSON records.
//!
//! Records are `serde_json::Value` objects keyed by field name. A foreign key
//! field holds the related object (or just its primary key, or `null`), and a
//! reverse relation holds an array of related objects. A predicate on a path
//! that crosses a to-many relation matches when any related record matches.

use async_trait::async_trait;
use sea_orm::DbErr;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::sync::Arc;
use uuid::Uuid;

use crate::collection::{Collection, bind_predicate, check_ordering};
use crate::errors::PredicateError;
use crate::filtering::predicate::{Lookup, PATH_SEPARATOR, Predicate, Value};
use crate::filtering::sort::OrderField;
use crate::schema::EntitySchema;

static NULL: Json = Json::Null;

#[derive(Debug, Clone)]
enum Condition {
    Include(Predicate),
    Exclude(Predicate),
}

/// A collection held in memory, cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    schema: Arc<EntitySchema>,
    records: Arc<Vec<Json>>,
    conditions: Vec<Condition>,
    ordering: Option<Vec<OrderField>>,
    distinct: Option<Vec<String>>,
}

impl MemoryCollection {
    #[must_use]
    pub fn new(schema: Arc<EntitySchema>, records: Vec<Json>) -> Self {
        Self {
            schema,
            records: Arc::new(records),
            conditions: Vec::new(),
            ordering: None,
            distinct: None,
        }
    }

    /// Records matching the current conditions, ordered and deduplicated.
    fn evaluate(&self) -> Vec<&Json> {
        let mut rows: Vec<&Json> = self
            .records
            .iter()
            .filter(|record| {
                self.conditions.iter().all(|condition| match condition {
                    Condition::Include(p) => matches(&self.schema, record, p),
                    Condition::Exclude(p) => !matches(&self.schema, record, p),
                })
            })
            .collect();

        let ordering = self.ordering.clone().unwrap_or_else(|| {
            self.schema
                .default_ordering
                .iter()
                .map(|f| OrderField::parse(f))
                .collect()
        });
        if !ordering.is_empty() {
            rows.sort_by(|a, b| {
                ordering
                    .iter()
                    .map(|field| {
                        let ord = compare_json(first_at(&self.schema, a, &field.path), first_at(&self.schema, b, &field.path));
                        if field.descending { ord.reverse() } else { ord }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if let Some(fields) = &self.distinct {
            let mut seen: Vec<Vec<&Json>> = Vec::new();
            rows.retain(|row| {
                let key: Vec<&Json> = fields.iter().map(|f| first_at(&self.schema, row, f)).collect();
                if seen.contains(&key) {
                    false
                } else {
                    seen.push(key);
                    true
                }
            });
        }

        rows
    }
}

fn values_at<'a>(schema: &EntitySchema, record: &'a Json, segments: &[&str], out: &mut Vec<&'a Json>) {
    let Some((first, rest)) = segments.split_first() else {
        out.push(record);
        return;
    };
    let Some(field) = schema.get(first) else {
        return;
    };
    let value = record
        .get(&field.name)
        .or_else(|| record.get(&field.column))
        .unwrap_or(&NULL);

    let Some(relation) = &field.relation else {
        out.push(value);
        return;
    };

    let related: Vec<&Json> = match value {
        Json::Array(items) => items.iter().collect(),
        Json::Null => Vec::new(),
        other => vec![other],
    };
    if related.is_empty() {
        out.push(&NULL);
        return;
    }
    for item in related {
        match item {
            Json::Object(_) if !rest.is_empty() => values_at(&relation.target, item, rest, out),
            Json::Object(map) => out.push(map.get(&relation.target.primary_key).unwrap_or(&NULL)),
            scalar if rest.is_empty() => out.push(scalar),
            _ => out.push(&NULL),
        }
    }
}

fn first_at<'a>(schema: &EntitySchema, record: &'a Json, path: &str) -> &'a Json {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    let mut out = Vec::new();
    values_at(schema, record, &segments, &mut out);
    out.first().copied().unwrap_or(&NULL)
}

fn matches(schema: &EntitySchema, record: &Json, predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Leaf { path, lookup, value } => {
            let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
            let mut values = Vec::new();
            values_at(schema, record, &segments, &mut values);
            values.iter().any(|candidate| leaf_matches(candidate, *lookup, value))
        }
        Predicate::All(children) => children.iter().all(|c| matches(schema, record, c)),
        Predicate::Any(children) => children.iter().any(|c| matches(schema, record, c)),
        Predicate::Not(inner) => !matches(schema, record, inner),
    }
}

fn text_of(json: &Json) -> Option<String> {
    match json {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[allow(clippy::cast_precision_loss)]
fn compare(json: &Json, value: &Value) -> Option<Ordering> {
    match (json, value) {
        (Json::Number(n), Value::Int(i)) => n
            .as_i64()
            .map(|x| x.cmp(i))
            .or_else(|| n.as_f64().and_then(|x| x.partial_cmp(&(*i as f64)))),
        (Json::Number(n), Value::Float(f)) => n.as_f64().and_then(|x| x.partial_cmp(f)),
        (Json::Bool(b), Value::Bool(v)) => Some(b.cmp(v)),
        (Json::String(s), Value::String(v)) => Some(s.as_str().cmp(v.as_str())),
        (Json::String(s), Value::Uuid(u)) => Uuid::parse_str(s).ok().map(|x| x.cmp(u)),
        _ => None,
    }
}

fn leaf_matches(candidate: &Json, lookup: Lookup, value: &Value) -> bool {
    let eq = |v: &Value| compare(candidate, v) == Some(Ordering::Equal);
    let pattern = |test: fn(&str, &str) -> bool, fold: bool| {
        let (Some(text), Some(needle)) = (text_of(candidate), value.as_str()) else {
            return false;
        };
        if fold {
            test(&text.to_lowercase(), &needle.to_lowercase())
        } else {
            test(&text, needle)
        }
    };

    match lookup {
        Lookup::Exact if value.is_null() => candidate.is_null(),
        Lookup::Exact => eq(value),
        Lookup::IsNull => value == &Value::Bool(candidate.is_null()),
        Lookup::IExact => pattern(|a, b| a == b, true),
        Lookup::Contains => pattern(|a, b| a.contains(b), false),
        Lookup::IContains => pattern(|a, b| a.contains(b), true),
        Lookup::StartsWith => pattern(|a, b| a.starts_with(b), false),
        Lookup::IStartsWith => pattern(|a, b| a.starts_with(b), true),
        Lookup::EndsWith => pattern(|a, b| a.ends_with(b), false),
        Lookup::IEndsWith => pattern(|a, b| a.ends_with(b), true),
        Lookup::Search => pattern(|text, query| query.split_whitespace().all(|word| text.contains(word)), true),
        Lookup::In => match value {
            Value::List(items) => items.iter().any(eq),
            _ => false,
        },
        Lookup::Range => match value {
            Value::List(bounds) if bounds.len() == 2 => {
                matches!(compare(candidate, &bounds[0]), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(candidate, &bounds[1]), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
        Lookup::Gt => compare(candidate, value) == Some(Ordering::Greater),
        Lookup::Gte => matches!(compare(candidate, value), Some(Ordering::Greater | Ordering::Equal)),
        Lookup::Lt => compare(candidate, value) == Some(Ordering::Less),
        Lookup::Lte => matches!(compare(candidate, value), Some(Ordering::Less | Ordering::Equal)),
    }
}

const fn type_rank(json: &Json) -> u8 {
    match json {
        Json::Null => 0,
        Json::Bool(_) => 1,
        Json::Number(_) => 2,
        Json::String(_) => 3,
        Json::Array(_) => 4,
        Json::Object(_) => 5,
    }
}

/// Total order used for sorting; nulls sort first.
fn compare_json(a: &Json, b: &Json) -> Ordering {
    match (a, b) {
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .zip(y.as_f64())
                .and_then(|(x, y)| x.partial_cmp(&y))
                .unwrap_or(Ordering::Equal),
        },
        (Json::String(x), Json::String(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    type Record = Json;

    fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn filter(&mut self, predicate: &Predicate) -> Result<(), PredicateError> {
        let bound = bind_predicate(&self.schema, predicate)?;
        self.conditions.push(Condition::Include(bound));
        Ok(())
    }

    fn exclude(&mut self, predicate: &Predicate) -> Result<(), PredicateError> {
        let bound = bind_predicate(&self.schema, predicate)?;
        self.conditions.push(Condition::Exclude(bound));
        Ok(())
    }

    fn order_by(&mut self, fields: &[OrderField]) -> Result<(), PredicateError> {
        check_ordering(&self.schema, fields)?;
        self.ordering = Some(fields.to_vec());
        Ok(())
    }

    fn distinct(&mut self, fields: &[String]) {
        self.distinct = Some(fields.to_vec());
    }

    fn is_ordered(&self) -> bool {
        self.ordering.is_some() || !self.schema.default_ordering.is_empty()
    }

    fn ordering(&self) -> Option<&[OrderField]> {
        self.ordering.as_deref()
    }

    fn describe(&self) -> String {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|condition| match condition {
                Condition::Include(p) => p.to_string(),
                Condition::Exclude(p) => format!("NOT {p}"),
            })
            .collect();
        let mut description = parts.join(" AND ");
        if let Some(ordering) = self.ordering.as_ref().filter(|o| !o.is_empty()) {
            let rendered: Vec<String> = ordering.iter().map(ToString::to_string).collect();
            if !description.is_empty() {
                description.push(' ');
            }
            description.push_str(&format!("ORDER BY {}", rendered.join(", ")));
        }
        description
    }

    async fn count(&self) -> Result<u64, DbErr> {
        Ok(self.evaluate().len() as u64)
    }

    async fn slice(&self, offset: u64, limit: u64) -> Result<Vec<Json>, DbErr> {
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(self
            .evaluate()
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
