//! # querycrate
//!
//! List endpoints for sea-orm entities driven by plain query parameters:
//! allow-listed filtering, free-text search, ordering and pagination, with an
//! optional per-caller scope that clients cannot bypass.
//!
//! ```rust,ignore
//! use querycrate::{Controller, ControllerConfig, EntitySchema, QueryParams, SeaOrmCollection};
//!
//! let schema = Arc::new(EntitySchema::from_entity::<user::Entity>());
//! let users = Controller::new(schema.clone(), ControllerConfig::default())?;
//!
//! // GET /users?q=alice&o=-id&p=2&l=20&active=true
//! let base = SeaOrmCollection::<user::Entity>::new(db.clone(), schema);
//! let listing = users.get(None, params, base).await?;
//! ```
//!
//! Any backend implementing [`Collection`] can be listed;
//! [`MemoryCollection`] evaluates the same rules over JSON records.

pub mod collection;
pub mod controller;
pub mod database;
pub mod errors;
pub mod filtering;
pub mod lazy;
pub mod memory;
pub mod models;
pub mod schema;
pub mod serializer;

pub use collection::Collection;
pub use controller::{AppliedQuery, Controller, ControllerConfig, Listing, QueryParams};
pub use database::SeaOrmCollection;
pub use errors::{ApiError, PredicateError};
pub use filtering::{
    CURRENT_CALLER, FilterOutcome, FilterReport, Lookup, OrderField, Page, PaginationMode, Predicate,
    SkipReason, Value,
};
pub use lazy::{Caller, CallerId, LazyFilters};
pub use memory::MemoryCollection;
pub use models::{ListParams, PageResponse};
pub use schema::{Allowlist, EntitySchema, FieldDescriptor, FieldType, Relation, RelationKind};
pub use serializer::{ObjectSerializer, RecordSerializer};
