//! Core types for the local persistence layer.
//!
//! - [`StoredResource`] and [`RecordKey`] - a record with its store metadata
//! - [`SearchQuery`], [`SearchFilter`] - the typed query accepted by the store
//! - [`SearchParamType`], [`DatePrecision`], [`DateRange`] - shared by indexing and search
//! - [`RemoteResource`], [`SyncedResource`] - downloaded records and per-type sync marks
//!
//! # Examples
//!
//! ```
//! use helios_local_persistence::types::{
//!     SearchFilter, SearchPrefix, SearchQuery, SortDirective,
//! };
//!
//! let query = SearchQuery::new("Patient")
//!     .with_filter(SearchFilter::string("family", "Do"))
//!     .with_filter(SearchFilter::date("birthdate", SearchPrefix::Ge, "1980"))
//!     .with_sort(SortDirective::parse("-_lastUpdated"))
//!     .with_count(20);
//!
//! assert_eq!(query.filters.len(), 2);
//! ```

mod search_params;
mod stored_resource;
mod sync;

pub use search_params::{
    DatePrecision, DateRange, SearchFilter, SearchParamType, SearchPrefix, SearchQuery,
    SortDirection, SortDirective, StringMatch,
};

pub use stored_resource::{RecordKey, StoredResource};
pub use sync::{RemoteResource, SyncedResource};
