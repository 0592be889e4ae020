//! # Database Collections
//!
//! [`SeaOrmCollection`] runs the list engine against any sea-orm entity.
//! Predicates are bound against the entity's [`EntitySchema`], translated to
//! sea-query conditions and added to a `Select<E>`; nothing touches the
//! database until [`count`](Collection::count) or [`slice`](Collection::slice).
//!
//! ## Backend differences
//!
//! - `PostgreSQL`: `search` lookups use `to_tsvector @@ plainto_tsquery`,
//!   `distinct` uses `DISTINCT ON`.
//! - `SQLite` / `MySQL`: `search` falls back to case-insensitive `LIKE`,
//!   `distinct` uses plain `DISTINCT`.
//!
//! ```rust,ignore
//! let schema = Arc::new(EntitySchema::from_entity::<user::Entity>().ordering(&["name"]));
//! let mut users = SeaOrmCollection::<user::Entity>::new(db.clone(), schema);
//! users.filter(&Predicate::parse("name__istartswith", "al"))?;
//! let first = users.slice(0, 10).await?;
//! ```

pub mod translate;

use async_trait::async_trait;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    PaginatorTrait, QuerySelect, QueryTrait, Select,
    sea_query::{Alias, ConditionalStatement, Order, OrderedStatement},
};
use std::sync::Arc;

use crate::collection::{Collection, bind_predicate};
use crate::errors::PredicateError;
use crate::filtering::predicate::{PATH_SEPARATOR, Predicate};
use crate::filtering::sort::OrderField;
use crate::schema::EntitySchema;

pub use translate::Translator;

/// A lazily evaluated `Select<E>` narrowed by predicates.
#[derive(Debug, Clone)]
pub struct SeaOrmCollection<E: EntityTrait> {
    select: Select<E>,
    db: DatabaseConnection,
    schema: Arc<EntitySchema>,
    ordering: Option<Vec<OrderField>>,
    ordered: bool,
}

impl<E: EntityTrait> SeaOrmCollection<E> {
    /// All rows of `E`.
    #[must_use]
    pub fn new(db: DatabaseConnection, schema: Arc<EntitySchema>) -> Self {
        Self::from_select(E::find(), db, schema)
    }

    /// Start from an existing select, e.g. one already narrowed by the caller.
    #[must_use]
    pub fn from_select(select: Select<E>, db: DatabaseConnection, schema: Arc<EntitySchema>) -> Self {
        Self {
            select,
            db,
            schema,
            ordering: None,
            ordered: false,
        }
    }

    /// Declare that `select` already carries an ORDER BY.
    #[must_use]
    pub fn assume_ordered(mut self, ordering: Vec<OrderField>) -> Self {
        self.ordering = Some(ordering);
        self.ordered = true;
        self
    }

    fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    /// Local column for a single-segment path.
    fn local_column(&self, path: &str) -> Result<&str, PredicateError> {
        if path.contains(PATH_SEPARATOR) {
            return Err(PredicateError::Unsupported(format!("ordering across relations ({path})")));
        }
        let field = self.schema.resolve(path)?;
        if field.relation.as_ref().is_some_and(|r| r.local_column != field.column) {
            return Err(PredicateError::Unsupported(format!("ordering by reverse relation ({path})")));
        }
        Ok(&field.column)
    }

    fn condition(&self, predicate: &Predicate) -> Result<sea_orm::Condition, PredicateError> {
        let bound = bind_predicate(&self.schema, predicate)?;
        Translator::new(&self.schema, self.backend()).condition(&bound)
    }

    fn order_terms(&self, fields: &[OrderField]) -> Result<Vec<(String, Order)>, PredicateError> {
        fields
            .iter()
            .map(|field| {
                let column = self.local_column(&field.path)?.to_string();
                let order = if field.descending { Order::Desc } else { Order::Asc };
                Ok((column, order))
            })
            .collect()
    }

    /// The select to execute, with the stored default ordering when nothing
    /// else orders it.
    fn prepared(&self) -> Select<E> {
        let mut select = self.select.clone();
        if !self.ordered {
            let default: Vec<OrderField> = self
                .schema
                .default_ordering
                .iter()
                .map(|f| OrderField::parse(f))
                .collect();
            match self.order_terms(&default) {
                Ok(terms) => {
                    for (column, order) in terms {
                        QueryTrait::query(&mut select)
                            .order_by((Alias::new(&self.schema.table), Alias::new(column)), order);
                    }
                }
                Err(err) => tracing::debug!(entity = %self.schema.name, error = %err, "stored ordering ignored"),
            }
        }
        select
    }
}

#[async_trait]
impl<E> Collection for SeaOrmCollection<E>
where
    E: EntityTrait,
    E::Model: FromQueryResult + Send + Sync,
{
    type Record = E::Model;

    fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn filter(&mut self, predicate: &Predicate) -> Result<(), PredicateError> {
        let condition = self.condition(predicate)?;
        QueryTrait::query(&mut self.select).cond_where(condition);
        Ok(())
    }

    fn exclude(&mut self, predicate: &Predicate) -> Result<(), PredicateError> {
        let condition = self.condition(predicate)?;
        QueryTrait::query(&mut self.select).cond_where(condition.not());
        Ok(())
    }

    fn order_by(&mut self, fields: &[OrderField]) -> Result<(), PredicateError> {
        let terms = self.order_terms(fields)?;
        let table = self.schema.table.clone();
        let query = QueryTrait::query(&mut self.select);
        query.clear_order_by();
        for (column, order) in terms {
            query.order_by((Alias::new(&table), Alias::new(column)), order);
        }
        self.ordering = Some(fields.to_vec());
        self.ordered = true;
        Ok(())
    }

    fn distinct(&mut self, fields: &[String]) {
        let columns: Vec<(Alias, Alias)> = fields
            .iter()
            .filter_map(|f| match self.local_column(f) {
                Ok(column) => Some((Alias::new(&self.schema.table), Alias::new(column))),
                Err(err) => {
                    tracing::debug!(entity = %self.schema.name, field = %f, error = %err, "distinct field ignored");
                    None
                }
            })
            .collect();

        match self.backend() {
            DatabaseBackend::Postgres => {
                QueryTrait::query(&mut self.select).distinct_on(columns);
            }
            _ => {
                QueryTrait::query(&mut self.select).distinct();
            }
        }
    }

    fn is_ordered(&self) -> bool {
        self.ordered || !self.schema.default_ordering.is_empty()
    }

    fn ordering(&self) -> Option<&[OrderField]> {
        self.ordering.as_deref()
    }

    fn describe(&self) -> String {
        self.prepared().build(self.backend()).to_string()
    }

    async fn count(&self) -> Result<u64, DbErr> {
        self.select.clone().count(&self.db).await
    }

    async fn slice(&self, offset: u64, limit: u64) -> Result<Vec<E::Model>, DbErr> {
        self.prepared().offset(offset).limit(limit).all(&self.db).await
    }
}
