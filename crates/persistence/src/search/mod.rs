//! Search parameter management and index construction.
//!
//! - [`registry`] - In-memory registry of active SearchParameters
//! - [`loader`] - Embedded parameters and SearchParameter resource parsing
//! - [`extractor`] - Expression evaluation against JSON resources
//! - [`converters`] - Conversion of reached values into typed index values
//! - [`indexer`] - Assembly of the per-record index row set
//! - [`errors`] - Search-specific error types
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use parking_lot::RwLock;
//! use helios_local_persistence::search::{ResourceIndexer, SearchParameterRegistry};
//! use serde_json::json;
//!
//! let registry = Arc::new(RwLock::new(SearchParameterRegistry::with_embedded()));
//! let indexer = ResourceIndexer::new(registry);
//!
//! let patient = json!({"resourceType": "Patient", "id": "p1", "name": [{"family": "Smith"}]});
//! let indices = indexer.index(&patient, "Patient").unwrap();
//! assert!(indices.string.iter().any(|row| row.name == "family" && row.value == "Smith"));
//! ```

pub mod converters;
pub mod errors;
pub mod extractor;
pub mod indexer;
pub mod loader;
pub mod registry;

pub use converters::{IndexValue, ValueConverter};
pub use errors::{ExtractionError, LoaderError, RegistryError};
pub use extractor::{ExtractedValue, SearchParameterExtractor};
pub use indexer::{
    DayRange, IndexEntry, LAST_UPDATED, LOCAL_LAST_UPDATED, MillisRange, Position, QuantityValue,
    ResourceIndexer, ResourceIndices, TokenValue,
};
pub use loader::SearchParameterLoader;
pub use registry::{
    SearchParameterDefinition, SearchParameterRegistry, SearchParameterSource,
    SearchParameterStatus,
};
