//! # Query Compilation
//!
//! Turns untrusted request parameters into [`Predicate`] trees and orderings,
//! touching only allow-listed fields.
//!
//! ## Query Parameter Examples
//!
//! ```text
//! // Free-text search over the searchable fields
//! GET /users?q=alice bob
//!
//! // Ordering, `-` for descending, optional brackets
//! GET /users?o=-created,name
//! GET /users?o=[name]
//!
//! // Pagination
//! GET /users?p=2&l=50
//!
//! // Filters: lookups, relation traversal, lists, exclusion
//! GET /users?name__istartswith=al
//! GET /users?group__name=admins
//! GET /users?id=[1,2,3]
//! GET /users?created__range=2024-01-01,2024-12-31
//! GET /users?-active=true
//! GET /users?bio=null
//! ```
//!
//! Entries that name a field outside the allow-list, or whose value does not
//! fit the field, are skipped individually and reported in a
//! [`FilterReport`]. They never fail the request.

pub mod conditions;
pub mod pagination;
pub mod predicate;
pub mod search;
pub mod sort;

pub use conditions::{
    CompiledFilter, FilterCompiler, FilterEntry, FilterOutcome, FilterReport, SEARCH_KEY, SkipReason,
    coerce_raw,
};
pub use pagination::{Page, PaginationMode, Paginator, QuickPaginator, clamp_limit};
pub use predicate::{CURRENT_CALLER, Lookup, PATH_SEPARATOR, Predicate, Value};
pub use search::{compile_search, search_lookup};
pub use sort::{OrderField, OrderOutcome, OrderingSpec, apply_ordering, split_ordering, validate_ordering};
