//! Helios Local Persistence Layer
//!
//! This crate provides the on-device store for FHIR resources edited offline.
//! It keeps three artifacts consistent for every record:
//!
//! - the current snapshot,
//! - an append-only journal of local changes to be uploaded later,
//! - typed search index rows derived from the snapshot.
//!
//! # Features
//!
//! - **Change journal**: Insert snapshots, RFC 6902 update patches, deletes,
//!   and deterministic squashing of a record's pending changes
//! - **Identifier rewrite**: when the server assigns a new id, journal history
//!   and referencing records are rewritten in one transaction
//! - **Typed indices**: string, token, reference, quantity, uri, date,
//!   dateTime, number and position rows, rebuilt wholesale on every write
//! - **Search**: typed filters, sorting and paging over the index tables
//!
//! # Backend Features
//!
//! - `sqlite` (default) - SQLite with in-memory and file modes
//!
//! # Architecture
//!
//! - [`types`] - Stored records, record keys and the typed search query
//! - [`error`] - Error types for all operations
//! - [`journal`] - Journal entries, JSON patches, squashing and references
//! - [`search`] - Search parameter registry, value extraction and indexing
//! - [`core`] - Storage traits
//! - [`backends`] - Backend implementations
//!
//! # Quick Start
//!
//! ```no_run
//! use helios_local_persistence::backends::sqlite::SqliteBackend;
//! use helios_local_persistence::core::{LocalChangeStorage, ResourceStorage};
//! use helios_local_persistence::journal::LocalChangeKind;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! backend
//!     .insert(json!({
//!         "resourceType": "Patient",
//!         "id": "local-1",
//!         "name": [{"family": "Smith"}]
//!     }))
//!     .await?;
//! backend
//!     .update(json!({
//!         "resourceType": "Patient",
//!         "id": "local-1",
//!         "name": [{"family": "Doe"}]
//!     }))
//!     .await?;
//!
//! // One squashed change per record, ready for upload
//! let pending = backend.get_all_squashed().await?;
//! assert_eq!(pending[0].kind, LocalChangeKind::Insert);
//!
//! // The server accepted the record under a new id
//! backend
//!     .update_after_sync("Patient", "local-1", "srv-42", Some("W/\"1\"".into()), None)
//!     .await?;
//! backend.discard(pending[0].token.ids()).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Search
//!
//! ```
//! use helios_local_persistence::types::{SearchFilter, SearchQuery, SortDirective};
//!
//! let query = SearchQuery::new("Observation")
//!     .with_filter(SearchFilter::reference("subject", "Patient/srv-42"))
//!     .with_filter(SearchFilter::token("status", "final"))
//!     .with_sort(SortDirective::parse("-_localLastUpdated"))
//!     .with_count(20);
//! assert_eq!(query.filters.len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod core;
pub mod error;
pub mod journal;
pub mod search;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{StorageError, StorageResult};
pub use journal::{JournalConfig, LocalChange, LocalChangeKind, LocalChangeToken};
pub use types::{RecordKey, RemoteResource, SearchQuery, StoredResource, SyncedResource};

// Re-export core traits
pub use core::{LocalChangeStorage, ResourceStorage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
