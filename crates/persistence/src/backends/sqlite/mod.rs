//! SQLite backend implementation.
//!
//! This module provides the SQLite implementation of [`ResourceStorage`] and
//! [`LocalChangeStorage`]. It supports both in-memory databases (for tests)
//! and file-based databases (for on-device storage).
//!
//! # Features
//!
//! - In-memory and file-based modes
//! - One immediate transaction per mutation: snapshot, index rows and journal
//!   entry commit together or not at all
//! - Identifier rewrite with paged reference lookups
//! - Typed search over nine index tables
//!
//! [`ResourceStorage`]: crate::core::ResourceStorage
//! [`LocalChangeStorage`]: crate::core::LocalChangeStorage
//!
//! # Example
//!
//! ```no_run
//! use helios_local_persistence::backends::sqlite::SqliteBackend;
//! use helios_local_persistence::core::{LocalChangeStorage, ResourceStorage};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SqliteBackend::in_memory()?;
//! backend.init_schema()?;
//!
//! backend
//!     .insert(json!({"resourceType": "Patient", "id": "local-1"}))
//!     .await?;
//! assert_eq!(backend.get_all_local_changes().await?.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Schema
//!
//! ```sql
//! -- Current snapshot of every live record
//! CREATE TABLE resources (
//!     record_key TEXT PRIMARY KEY,
//!     resource_type TEXT NOT NULL,
//!     logical_id TEXT NOT NULL,
//!     content TEXT NOT NULL,
//!     version_token TEXT,
//!     remote_last_updated TEXT,
//!     local_last_updated TEXT,
//!     UNIQUE (resource_type, logical_id)
//! );
//!
//! -- Append-only journal of local mutations
//! CREATE TABLE local_changes (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     record_key TEXT NOT NULL,
//!     resource_type TEXT NOT NULL,
//!     logical_id TEXT NOT NULL,
//!     kind TEXT NOT NULL,       -- insert | update | delete | noop
//!     payload TEXT NOT NULL,    -- snapshot, RFC 6902 patch, or empty
//!     version_token TEXT,
//!     timestamp TEXT NOT NULL   -- RFC 3339, microseconds, UTC
//! );
//!
//! -- Outgoing references of each journal entry
//! CREATE TABLE local_change_references (
//!     entry_id INTEGER NOT NULL REFERENCES local_changes(id),
//!     path TEXT NOT NULL,
//!     target TEXT NOT NULL
//! );
//! ```
//!
//! Plus one index table per value kind (`string_index`, `token_index`,
//! `reference_index`, `quantity_index`, `uri_index`, `date_index`,
//! `datetime_index`, `number_index`, `position_index`), each keyed by
//! `record_key`.

mod backend;
mod index_writer;
mod local_changes;
mod schema;
mod search_impl;
mod storage;

pub use backend::{SqliteBackend, SqliteBackendConfig};
pub use schema::SCHEMA_VERSION;
