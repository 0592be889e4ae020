//! # List Controller
//!
//! A [`Controller`] owns everything that is fixed for one list endpoint: the
//! entity schema, the allow-lists, the default ordering, the pagination mode
//! and an optional mandatory scope. Each request then runs, in this order:
//!
//! 1. the mandatory [`LazyFilters`] scope, bound to the caller
//! 2. ordering from `o`, or the default ordering
//! 3. `DISTINCT` on the ordering fields plus the primary key, when enabled
//! 4. filters and `q` search from the remaining parameters
//! 5. pagination from `p` and `l`
//!
//! Client mistakes in steps 2 to 5 never fail the request; the offending
//! entry is dropped and logged at debug level.
//!
//! ```rust,ignore
//! let config: ControllerConfig = serde_json::from_value(json!({
//!     "maximum_limit": 200,
//!     "search_fields": ["^name", "bio"],
//! }))?;
//! let users = Controller::new(schema, config)?
//!     .with_force_filter(LazyFilters::new().filter_by("owner", CURRENT_CALLER));
//!
//! async fn list(State(state): State<AppState>, params: QueryParams) -> Result<PageResponse, ApiError> {
//!     let base = SeaOrmCollection::<user::Entity>::new(state.db.clone(), state.schema.clone());
//!     state.users.get_serialized(None, params, base).await
//! }
//! ```

use axum::{
    extract::{FromRequestParts, Query},
    http::request::Parts,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::collection::{Collection, check_ordering};
use crate::errors::ApiError;
use crate::filtering::conditions::{FilterCompiler, FilterReport};
use crate::filtering::pagination::{Page, PaginationMode, Paginator, QuickPaginator};
use crate::filtering::predicate::{PATH_SEPARATOR, Predicate, Value};
use crate::filtering::search::search_lookup;
use crate::filtering::sort::{OrderField, OrderingSpec, apply_ordering};
use crate::lazy::{Caller, LazyFilters};
use crate::models::PageResponse;
use crate::schema::{Allowlist, EntitySchema};
use crate::serializer::{ObjectSerializer, RecordSerializer};

/// Page number parameter.
pub const PAGE_KEY: &str = "p";
/// Page size parameter.
pub const LIMIT_KEY: &str = "l";
/// Ordering parameter.
pub const ORDERING_KEY: &str = "o";

/// Runtime settings of a [`Controller`]. Every field has a default, so an
/// empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub default_limit: u64,
    pub maximum_limit: u64,
    /// Deduplicate rows, for filters over relations that fan out
    pub use_distinct: bool,
    pub pagination: PaginationMode,
    /// Falls back to the schema's ordering, then the primary key
    pub default_ordering: Option<Vec<String>>,
    /// Never searched, ordered, filtered or serialized
    pub exclude_fields: Vec<String>,
    pub search_fields: Option<Vec<String>>,
    pub ordering_fields: Option<Vec<String>>,
    pub filtering_fields: Option<Vec<String>>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            maximum_limit: 1000,
            use_distinct: false,
            pagination: PaginationMode::Classic,
            default_ordering: None,
            exclude_fields: vec!["password".to_string()],
            search_fields: None,
            ordering_fields: None,
            filtering_fields: None,
        }
    }
}

/// Request parameters in the order they arrived.
///
/// A repeated key keeps its first position and its last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.0.push((key, value)),
        }
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Remove `key` and return its value.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let index = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(index).1)
    }

    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

impl<S: Send + Sync> FromRequestParts<S> for QueryParams {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(pairs) = Query::<Vec<(String, String)>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Ok(pairs.into_iter().collect())
    }
}

/// Result of a list request.
#[derive(Debug)]
pub struct Listing<R> {
    pub page: Page<R>,
    /// Client ordering that was applied; empty when the default was used
    pub orders: Vec<OrderField>,
    pub filters: FilterReport,
}

/// Serializable summary of the ordering and filters a listing applied.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AppliedQuery {
    pub orders: Vec<String>,
    pub filters: serde_json::Map<String, serde_json::Value>,
}

impl<R> Listing<R> {
    #[must_use]
    pub fn applied(&self) -> AppliedQuery {
        AppliedQuery {
            orders: self.orders.iter().map(ToString::to_string).collect(),
            filters: self.filters.to_json(),
        }
    }
}

/// List endpoint over one entity.
#[derive(Debug, Clone)]
pub struct Controller {
    schema: Arc<EntitySchema>,
    config: ControllerConfig,
    allowlist: Allowlist,
    default_ordering: Vec<OrderField>,
    force_filter: Option<LazyFilters>,
    serializer: ObjectSerializer,
}

fn check_fields<'a>(
    schema: &EntitySchema,
    kind: &str,
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), ApiError> {
    for name in names {
        schema.resolve(name).map_err(|err| {
            ApiError::configuration(format!("{kind} field '{name}' of {}: {err}", schema.name))
        })?;
    }
    Ok(())
}

impl Controller {
    /// Build a controller, computing its allow-lists and default ordering.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if a limit is zero, a configured
    /// field does not exist on `schema`, or a filtering field is a path.
    pub fn new(schema: Arc<EntitySchema>, config: ControllerConfig) -> Result<Self, ApiError> {
        if config.default_limit == 0 || config.maximum_limit == 0 {
            return Err(ApiError::configuration(format!(
                "limits of {} must be at least 1",
                schema.name
            )));
        }

        let mut allowlist = Allowlist::derive(&schema, &config.exclude_fields);
        if let Some(fields) = &config.search_fields {
            check_fields(&schema, "search", fields.iter().map(|f| search_lookup(f).0))?;
            allowlist.searchable.clone_from(fields);
        }
        if let Some(fields) = &config.ordering_fields {
            check_fields(&schema, "ordering", fields.iter().map(String::as_str))?;
            allowlist.orderable.clone_from(fields);
        }
        if let Some(fields) = &config.filtering_fields {
            // Allow-listing is per root field; a relation grants its whole path.
            if let Some(path) = fields.iter().find(|f| f.contains(PATH_SEPARATOR) || f.contains('.')) {
                return Err(ApiError::configuration(format!(
                    "filtering field '{path}' of {} must be a root field",
                    schema.name
                )));
            }
            check_fields(&schema, "filtering", fields.iter().map(String::as_str))?;
            allowlist.filterable.clone_from(fields);
        }

        let default_ordering: Vec<OrderField> = match &config.default_ordering {
            Some(fields) if !fields.is_empty() => fields.iter().map(|f| OrderField::parse(f)).collect(),
            _ if !schema.default_ordering.is_empty() => {
                schema.default_ordering.iter().map(|f| OrderField::parse(f)).collect()
            }
            _ => vec![OrderField::asc(&schema.primary_key)],
        };
        check_ordering(&schema, &default_ordering)
            .map_err(|err| ApiError::configuration(format!("default ordering of {}: {err}", schema.name)))?;

        tracing::debug!(
            entity = %schema.name,
            searchable = ?allowlist.searchable,
            orderable = ?allowlist.orderable,
            filterable = ?allowlist.filterable,
            "controller ready"
        );

        let serializer = ObjectSerializer::exclude(&config.exclude_fields);
        Ok(Self {
            schema,
            config,
            allowlist,
            default_ordering,
            force_filter: None,
            serializer,
        })
    }

    /// Scope every request with `filters`, applied before any client filter.
    #[must_use]
    pub fn with_force_filter(mut self, filters: LazyFilters) -> Self {
        self.force_filter = (!filters.is_empty()).then_some(filters);
        self
    }

    /// Serialize records with `serializer` instead of the default one.
    #[must_use]
    pub fn with_serializer(mut self, serializer: ObjectSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    #[must_use]
    pub const fn config(&self) -> &ControllerConfig {
        &self.config
    }

    #[must_use]
    pub const fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    #[must_use]
    pub fn default_ordering(&self) -> &[OrderField] {
        &self.default_ordering
    }

    #[must_use]
    pub const fn serializer(&self) -> &ObjectSerializer {
        &self.serializer
    }

    fn check_entity<C: Collection>(&self, base: &C) -> Result<(), ApiError> {
        let entity = &base.schema().name;
        if *entity == self.schema.name {
            Ok(())
        } else {
            Err(ApiError::configuration(format!(
                "controller for {} was given a collection of {entity}",
                self.schema.name
            )))
        }
    }

    /// `base` narrowed by the mandatory scope for `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Configuration`] if `base` holds another entity or
    /// the scope does not fit it.
    pub fn queryset<C: Collection>(&self, caller: Option<&dyn Caller>, mut base: C) -> Result<C, ApiError> {
        self.check_entity(&base)?;
        if let Some(filters) = &self.force_filter {
            filters.apply(caller, &mut base)?;
            tracing::debug!(entity = %self.schema.name, scope = %filters, "force filter applied");
        }
        Ok(base)
    }

    /// Serve one page of `base` for `params`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::Configuration`] for a misconfigured controller or scope
    /// - [`ApiError::Database`] when the collection fails to load
    pub async fn get<C: Collection>(
        &self,
        caller: Option<&dyn Caller>,
        mut params: QueryParams,
        base: C,
    ) -> Result<Listing<C::Record>, ApiError> {
        let entity = self.schema.name.as_str();
        let mut collection = self.queryset(caller, base)?;

        let number = self.numeric_param(&mut params, PAGE_KEY, 1);
        let limit = self.numeric_param(
            &mut params,
            LIMIT_KEY,
            i64::try_from(self.config.default_limit).unwrap_or(i64::MAX),
        );
        let ordering = params.take(ORDERING_KEY);

        let outcome = apply_ordering(
            &mut collection,
            ordering.as_deref().map(OrderingSpec::Raw),
            &self.allowlist.orderable,
            &self.default_ordering,
        )
        .map_err(|err| ApiError::configuration(format!("ordering of {entity}: {err}")))?;

        if self.config.use_distinct {
            let fields = self.distinct_fields(&outcome.effective);
            tracing::debug!(entity, fields = ?fields, "distinct");
            collection.distinct(&fields);
        }

        let filters = FilterCompiler::new(&self.allowlist.filterable, &self.allowlist.searchable)
            .apply(&mut collection, params.pairs());

        tracing::debug!(entity, query = %collection.describe(), "list query");

        let page = match self.config.pagination {
            PaginationMode::Classic => {
                Paginator::new(limit, self.config.maximum_limit)
                    .page(&collection, number)
                    .await?
            }
            PaginationMode::Quick => {
                QuickPaginator::new(limit, self.config.maximum_limit)
                    .page(&collection, number)
                    .await?
            }
        };

        Ok(Listing {
            page,
            orders: outcome.applied,
            filters,
        })
    }

    /// [`get`](Self::get), with records serialized by the controller's
    /// serializer.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get), plus [`ApiError::Internal`] if a record
    /// cannot be serialized.
    pub async fn get_serialized<C>(
        &self,
        caller: Option<&dyn Caller>,
        params: QueryParams,
        base: C,
    ) -> Result<PageResponse, ApiError>
    where
        C: Collection,
        C::Record: Serialize,
    {
        self.get_serialized_with(caller, params, base, &self.serializer).await
    }

    /// # Errors
    ///
    /// Same as [`get_serialized`](Self::get_serialized).
    pub async fn get_serialized_with<C, S>(
        &self,
        caller: Option<&dyn Caller>,
        params: QueryParams,
        base: C,
        serializer: &S,
    ) -> Result<PageResponse, ApiError>
    where
        C: Collection,
        S: RecordSerializer<C::Record> + Sync,
    {
        let listing = self.get(caller, params, base).await?;
        let objects = listing
            .page
            .objects
            .iter()
            .map(|record| serializer.serialize(record))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageResponse::from(Page {
            objects,
            number: listing.page.number,
            limit: listing.page.limit,
            count: listing.page.count,
            pages: listing.page.pages,
            has_next: listing.page.has_next,
        }))
    }

    /// The record of `base` with primary key `pk`, within the caller's scope.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if no such record is visible to `caller`,
    /// or any error of [`queryset`](Self::queryset).
    pub async fn find_one<C: Collection>(
        &self,
        caller: Option<&dyn Caller>,
        base: C,
        pk: impl Into<Value>,
    ) -> Result<C::Record, ApiError> {
        let pk = pk.into();
        let not_found = || ApiError::not_found(self.schema.name.clone(), Some(pk.to_string()));

        let mut collection = self.queryset(caller, base)?;
        if let Err(err) = collection.filter(&Predicate::exact(&self.schema.primary_key, pk.clone())) {
            tracing::debug!(entity = %self.schema.name, pk = %pk, error = %err, "invalid primary key");
            return Err(not_found());
        }
        collection.slice(0, 1).await?.into_iter().next().ok_or_else(not_found)
    }

    /// Distinct projection: the effective ordering fields, then the primary key.
    fn distinct_fields(&self, ordering: &[OrderField]) -> Vec<String> {
        let pk = &self.schema.primary_key;
        let mut fields: Vec<String> = Vec::new();
        for field in ordering {
            if field.path != *pk && !fields.contains(&field.path) {
                fields.push(field.path.clone());
            }
        }
        fields.push(pk.clone());
        fields
    }

    fn numeric_param(&self, params: &mut QueryParams, key: &str, default: i64) -> i64 {
        match params.take(key) {
            None => default,
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::debug!(entity = %self.schema.name, param = key, value = %raw, "invalid numeric parameter");
                default
            }),
        }
    }
}
