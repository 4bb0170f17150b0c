//! Test infrastructure for the local persistence layer.
//!
//! Fixtures for common records, assertion helpers for storage errors and
//! search results, and backend constructors.

#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

use helios_local_persistence::backends::sqlite::{SqliteBackend, SqliteBackendConfig};
use helios_local_persistence::journal::JournalConfig;

/// Creates an in-memory backend with an initialized schema.
pub fn create_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    backend
}

/// Creates an in-memory backend whose reference lookups page by `max_sql_params`.
pub fn create_backend_with_page_size(max_sql_params: usize) -> SqliteBackend {
    let config = SqliteBackendConfig {
        journal: JournalConfig::default().with_max_sql_params(max_sql_params),
        ..Default::default()
    };
    let backend =
        SqliteBackend::with_config(":memory:", config).expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    backend
}
