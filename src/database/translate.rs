//! Predicate trees to sea-query conditions.
//!
//! Paths crossing a relation become `IN (SELECT ...)` subqueries so the outer
//! query never joins and never returns duplicate rows for to-many relations.
//! Predicates must already be bound with
//! [`bind_predicate`](crate::collection::bind_predicate).

use sea_orm::{
    Condition, DatabaseBackend,
    sea_query::{Alias, ConditionalStatement, Expr, Func, LikeExpr, Query, SelectStatement, SimpleExpr},
};

use crate::errors::PredicateError;
use crate::filtering::predicate::{Lookup, PATH_SEPARATOR, Predicate, Value};
use crate::schema::{EntitySchema, FieldType, Relation, RelationKind};

const LIKE_ESCAPE: char = '\\';

/// Escape LIKE wildcards so client text is matched literally
fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            out.push(LIKE_ESCAPE);
        }
        out.push(ch);
    }
    out
}

fn column(table: &str, column: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(column)))
}

fn to_sql(field: &str, value: &Value) -> Result<sea_orm::Value, PredicateError> {
    Ok(match value {
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(x) => (*x).into(),
        Value::String(s) => s.clone().into(),
        Value::Uuid(u) => (*u).into(),
        Value::Null | Value::List(_) | Value::CurrentCaller => {
            return Err(PredicateError::InvalidValue {
                field: field.to_string(),
                reason: format!("{value} is not a scalar"),
            });
        }
    })
}

fn to_sql_list(field: &str, value: &Value) -> Result<Vec<sea_orm::Value>, PredicateError> {
    match value {
        Value::List(items) => items.iter().map(|item| to_sql(field, item)).collect(),
        scalar => Ok(vec![to_sql(field, scalar)?]),
    }
}

/// Compiles bound predicates against one entity schema.
#[derive(Debug, Clone, Copy)]
pub struct Translator<'a> {
    schema: &'a EntitySchema,
    backend: DatabaseBackend,
}

impl<'a> Translator<'a> {
    #[must_use]
    pub const fn new(schema: &'a EntitySchema, backend: DatabaseBackend) -> Self {
        Self { schema, backend }
    }

    /// # Errors
    ///
    /// Returns a [`PredicateError`] for paths or values the database cannot
    /// express.
    pub fn condition(&self, predicate: &Predicate) -> Result<Condition, PredicateError> {
        Ok(match predicate {
            Predicate::Leaf { path, lookup, value } => {
                let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
                Condition::all().add(self.leaf(self.schema, path, &segments, *lookup, value)?)
            }
            Predicate::All(children) => children
                .iter()
                .try_fold(Condition::all(), |acc, child| Ok::<_, PredicateError>(acc.add(self.condition(child)?)))?,
            Predicate::Any(children) => children
                .iter()
                .try_fold(Condition::any(), |acc, child| Ok::<_, PredicateError>(acc.add(self.condition(child)?)))?,
            Predicate::Not(inner) => Condition::all().add(self.condition(inner)?).not(),
        })
    }

    fn leaf(
        &self,
        schema: &EntitySchema,
        path: &str,
        segments: &[&str],
        lookup: Lookup,
        value: &Value,
    ) -> Result<SimpleExpr, PredicateError> {
        let unknown = || PredicateError::UnknownField(path.to_string());
        let (first, rest) = segments.split_first().ok_or_else(unknown)?;
        let field = schema.get(first).ok_or_else(unknown)?;

        let Some(relation) = &field.relation else {
            if !rest.is_empty() {
                return Err(unknown());
            }
            return self.compare(&schema.table, &field.column, field.field_type, path, lookup, value);
        };

        let wants_null = matches!(
            (lookup, value),
            (Lookup::IsNull, Value::Bool(true)) | (Lookup::Exact, Value::Null)
        );

        // Direct comparison on a foreign key column needs no subquery
        if rest.is_empty() && relation.kind == RelationKind::ForeignKey {
            return self.compare(&schema.table, &relation.local_column, field.field_type, path, lookup, value);
        }

        let local = column(&schema.table, &relation.local_column);
        let target = &relation.target;

        if rest.is_empty() && (wants_null || lookup == Lookup::IsNull) {
            return Ok(if wants_null {
                self.no_related(&schema.table, relation)
            } else {
                local.in_subquery(related_keys(relation, None))
            });
        }

        let inner = if rest.is_empty() {
            self.compare(&target.table, target.primary_key_column(), field.field_type, path, lookup, value)?
        } else {
            self.leaf(target, path, rest, lookup, value)?
        };
        // A NULL foreign key never matches, also under NOT
        let matched = local
            .in_subquery(related_keys(relation, Some(inner)))
            .and(column(&schema.table, &relation.local_column).is_not_null());

        Ok(if wants_null {
            matched.or(self.no_related(&schema.table, relation))
        } else {
            matched
        })
    }

    /// Rows of `table` with nothing on the other side of `relation`.
    fn no_related(&self, table: &str, relation: &Relation) -> SimpleExpr {
        let local = column(table, &relation.local_column);
        match relation.kind {
            RelationKind::ForeignKey => local.is_null(),
            RelationKind::Reverse => local.not_in_subquery(related_keys(relation, None)),
        }
    }

    fn text(&self, table: &str, col: &str, field_type: FieldType) -> SimpleExpr {
        if field_type == FieldType::Text {
            return column(table, col).into();
        }
        let text_type = match self.backend {
            DatabaseBackend::MySql => "CHAR",
            _ => "TEXT",
        };
        column(table, col).cast_as(Alias::new(text_type))
    }

    fn compare(
        &self,
        table: &str,
        col: &str,
        field_type: FieldType,
        path: &str,
        lookup: Lookup,
        value: &Value,
    ) -> Result<SimpleExpr, PredicateError> {
        let target = column(table, col);
        let not_null = || column(table, col).is_not_null();
        let pattern = |template: fn(&str) -> String, fold: bool| -> Result<SimpleExpr, PredicateError> {
            let needle = value.as_str().ok_or_else(|| PredicateError::InvalidValue {
                field: path.to_string(),
                reason: "expected text".to_string(),
            })?;
            let text = self.text(table, col, field_type);
            Ok(if fold {
                Expr::expr(Func::upper(text))
                    .like(LikeExpr::new(template(&like_escape(&needle.to_uppercase()))).escape(LIKE_ESCAPE))
            } else {
                Expr::expr(text).like(LikeExpr::new(template(&like_escape(needle))).escape(LIKE_ESCAPE))
            })
        };

        let expr = match (lookup, value) {
            (Lookup::Exact, Value::Null) | (Lookup::IsNull, Value::Bool(true)) => return Ok(target.is_null()),
            (Lookup::IsNull, _) => return Ok(target.is_not_null()),
            (Lookup::Exact, _) => target.eq(to_sql(path, value)?),
            (Lookup::IExact, _) => {
                let needle = to_sql(path, value)?;
                Expr::expr(Func::upper(self.text(table, col, field_type))).eq(Func::upper(Expr::val(needle)))
            }
            (Lookup::Contains, _) => pattern(|s| format!("%{s}%"), false)?,
            (Lookup::IContains, _) => pattern(|s| format!("%{s}%"), true)?,
            (Lookup::StartsWith, _) => pattern(|s| format!("{s}%"), false)?,
            (Lookup::IStartsWith, _) => pattern(|s| format!("{s}%"), true)?,
            (Lookup::EndsWith, _) => pattern(|s| format!("%{s}"), false)?,
            (Lookup::IEndsWith, _) => pattern(|s| format!("%{s}"), true)?,
            (Lookup::Search, _) => match self.backend {
                DatabaseBackend::Postgres => {
                    let query = to_sql(path, value)?;
                    Expr::cust_with_values(
                        format!(r#"to_tsvector("{table}"."{col}") @@ plainto_tsquery(?)"#),
                        [query],
                    )
                }
                _ => pattern(|s| format!("%{s}%"), true)?,
            },
            (Lookup::In, Value::List(items)) if items.is_empty() => return Ok(Expr::val(1).eq(0)),
            (Lookup::In, _) => target.is_in(to_sql_list(path, value)?),
            (Lookup::Range, Value::List(bounds)) if bounds.len() == 2 => {
                target.between(to_sql(path, &bounds[0])?, to_sql(path, &bounds[1])?)
            }
            (Lookup::Range, _) => {
                return Err(PredicateError::InvalidValue {
                    field: path.to_string(),
                    reason: "range needs exactly two values".to_string(),
                });
            }
            (Lookup::Gt, _) => target.gt(to_sql(path, value)?),
            (Lookup::Gte, _) => target.gte(to_sql(path, value)?),
            (Lookup::Lt, _) => target.lt(to_sql(path, value)?),
            (Lookup::Lte, _) => target.lte(to_sql(path, value)?),
        };

        // A NULL column never matches, also under NOT
        Ok(expr.and(not_null()))
    }
}

/// `SELECT target.remote FROM target WHERE target.remote IS NOT NULL [AND inner]`
///
/// NULL keys are left out so `NOT IN` over the result stays two-valued.
fn related_keys(relation: &Relation, inner: Option<SimpleExpr>) -> SelectStatement {
    let target = &relation.target;
    let mut select = Query::select();
    select
        .column((Alias::new(&target.table), Alias::new(&relation.remote_column)))
        .from(Alias::new(&target.table))
        .cond_where(column(&target.table, &relation.remote_column).is_not_null());
    if let Some(inner) = inner {
        select.cond_where(inner);
    }
    select
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::bind_predicate;
    use crate::schema::FieldDescriptor;
    use sea_orm::sea_query::{QueryStatementWriter, SqliteQueryBuilder};
    use std::sync::Arc;

    fn schemas() -> (Arc<EntitySchema>, EntitySchema) {
        let groups = Arc::new(
            EntitySchema::new("group", "groups", "id")
                .field(FieldDescriptor::new("id", FieldType::Integer))
                .field(FieldDescriptor::new("name", FieldType::Text)),
        );
        let users = EntitySchema::new("user", "users", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .field(FieldDescriptor::new("name", FieldType::Text))
            .field(FieldDescriptor::new("active", FieldType::Boolean))
            .field(FieldDescriptor::foreign_key("group", "group_id", &groups));
        (groups, users)
    }

    fn render(schema: &EntitySchema, predicate: &Predicate) -> String {
        let bound = bind_predicate(schema, predicate).unwrap();
        let condition = Translator::new(schema, DatabaseBackend::Sqlite)
            .condition(&bound)
            .unwrap();
        Query::select()
            .column(Alias::new("id"))
            .from(Alias::new(&schema.table))
            .cond_where(condition)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn test_like_escape() {
        assert_eq!(like_escape(r"50%_off\"), r"50\%\_off\\");
    }

    #[test]
    fn test_relation_becomes_subquery() {
        let (_, users) = schemas();
        let sql = render(&users, &Predicate::exact("group__name", "admins"));
        assert!(sql.contains(r#""users"."group_id" IN (SELECT "groups"."id" FROM "groups""#), "{sql}");
        assert!(!sql.contains("JOIN"));
    }

    #[test]
    fn test_foreign_key_compares_local_column() {
        let (_, users) = schemas();
        let sql = render(&users, &Predicate::exact("group", "3"));
        assert!(sql.contains(r#""users"."group_id" = 3"#), "{sql}");
        let sql = render(&users, &Predicate::new("group", Lookup::IsNull, true));
        assert!(sql.contains(r#""users"."group_id" IS NULL"#), "{sql}");
    }

    #[test]
    fn test_renamed_field_uses_its_column() {
        let schema = EntitySchema::new("user", "users", "id")
            .field(FieldDescriptor::new("id", FieldType::Integer))
            .field(FieldDescriptor::new("handle", FieldType::Text).with_column("login"));
        let sql = render(&schema, &Predicate::exact("handle", "al"));
        assert!(sql.contains(r#""users"."login" = 'al'"#), "{sql}");
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let (_, users) = schemas();
        let sql = render(&users, &Predicate::new("group", Lookup::In, vec![Value::Null]));
        assert!(sql.contains("1 = 0"), "{sql}");
        assert!(!sql.contains(" IN ("), "{sql}");
    }

    #[test]
    fn test_case_insensitive_pattern_is_escaped() {
        let (_, users) = schemas();
        let sql = render(&users, &Predicate::new("name", Lookup::IContains, "50%"));
        assert!(sql.contains("UPPER("), "{sql}");
        assert!(sql.contains("%50"), "{sql}");
        assert!(sql.contains("ESCAPE"), "{sql}");
    }

    #[test]
    fn test_reverse_relation_isnull() {
        let (groups, users) = schemas();
        let users = Arc::new(users);
        let groups = EntitySchema::clone(&groups).reverse_relation("members", &users, "group_id");
        let sql = render(&groups, &Predicate::new("members", Lookup::IsNull, true));
        assert!(
            sql.contains(r#""groups"."id" NOT IN (SELECT "users"."group_id" FROM "users""#),
            "{sql}"
        );
    }
}
