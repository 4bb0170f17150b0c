//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::{BackendError, StorageError, StorageResult};
use crate::journal::{
    JournalConfig, JsonReferenceExtractor, JsonResourceSerializer, ReferenceExtractor,
    ResourceSerializer,
};
use crate::search::{ResourceIndexer, SearchParameterRegistry};

use super::schema;

/// SQLite backend for the local record store and change journal.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
    /// Search parameter registry shared with the indexer.
    search_registry: Arc<RwLock<SearchParameterRegistry>>,
    indexer: Arc<ResourceIndexer>,
    serializer: Arc<dyn ResourceSerializer>,
    reference_extractor: Arc<dyn ReferenceExtractor>,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("search_registry_len", &self.search_registry.read().len())
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool. In-memory databases always use one.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,

    /// Change journal settings.
    #[serde(default)]
    pub journal: JournalConfig,
}

fn default_max_connections() -> u32 {
    4
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
            journal: JournalConfig::default(),
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_config(":memory:", SqliteBackendConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom configuration.
    ///
    /// The backend starts with the embedded search parameters, the JSON
    /// serializer and the JSON reference extractor; each can be replaced with
    /// the `with_*` methods.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout = Duration::from_millis(u64::from(config.busy_timeout_ms));
        let foreign_keys = config.enable_foreign_keys;
        let manager = if is_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(path.as_ref())
        }
        .with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            if foreign_keys {
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            }
            Ok(())
        });

        // Every connection to ":memory:" would open a separate database
        let (max_size, min_idle) = if is_memory {
            (1, 1)
        } else {
            (config.max_connections.max(1), config.min_connections)
        };

        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(min_idle))
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        let search_registry = Arc::new(RwLock::new(SearchParameterRegistry::with_embedded()));
        tracing::info!(
            params = search_registry.read().len(),
            "Loaded embedded search parameters"
        );

        let backend = Self {
            pool,
            config,
            is_memory,
            indexer: Arc::new(ResourceIndexer::new(Arc::clone(&search_registry))),
            search_registry,
            serializer: Arc::new(JsonResourceSerializer::new()),
            reference_extractor: Arc::new(JsonReferenceExtractor::new()),
        };

        backend.configure_connection()?;

        Ok(backend)
    }

    /// Replaces the search parameter registry.
    pub fn with_search_registry(mut self, registry: Arc<RwLock<SearchParameterRegistry>>) -> Self {
        self.indexer = Arc::new(ResourceIndexer::new(Arc::clone(&registry)));
        self.search_registry = registry;
        self
    }

    /// Replaces the record serializer.
    pub fn with_serializer(mut self, serializer: Arc<dyn ResourceSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Replaces the reference extractor.
    pub fn with_reference_extractor(mut self, extractor: Arc<dyn ReferenceExtractor>) -> Self {
        self.reference_extractor = extractor;
        self
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Checks that a pooled connection answers a trivial query.
    pub fn health_check(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| internal_error(format!("Health check failed: {}", e)))
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Runs `f` inside an immediate transaction, committing on success.
    ///
    /// Dropping the transaction on error rolls every effect back.
    pub(crate) fn with_transaction<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StorageResult<T>,
    {
        let mut conn = self.get_connection()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| internal_error(format!("Failed to begin transaction: {}", e)))?;
        let result = f(&tx)?;
        tx.commit()
            .map_err(|e| internal_error(format!("Failed to commit transaction: {}", e)))?;
        Ok(result)
    }

    fn configure_connection(&self) -> StorageResult<()> {
        if self.config.enable_wal && !self.is_memory {
            let conn = self.get_connection()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
                .map_err(|e| internal_error(format!("Failed to enable WAL mode: {}", e)))?;
        }
        Ok(())
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the backend configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Returns the change journal configuration.
    pub fn journal_config(&self) -> &JournalConfig {
        &self.config.journal
    }

    /// Returns a reference to the search parameter registry.
    pub fn search_registry(&self) -> &Arc<RwLock<SearchParameterRegistry>> {
        &self.search_registry
    }

    pub(crate) fn indexer(&self) -> &ResourceIndexer {
        &self.indexer
    }

    pub(crate) fn serializer(&self) -> &dyn ResourceSerializer {
        self.serializer.as_ref()
    }

    pub(crate) fn reference_extractor(&self) -> &dyn ReferenceExtractor {
        self.reference_extractor.as_ref()
    }
}

pub(crate) fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_backend() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.is_memory());
        assert_eq!(backend.config().max_connections, 4);
    }

    #[test]
    fn test_config_defaults() {
        let config = SqliteBackendConfig::default();
        assert_eq!(config.busy_timeout_ms, 5000);
        assert!(config.enable_foreign_keys);
        assert_eq!(config.journal.max_sql_params, 999);
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: SqliteBackendConfig = serde_json::from_str(
            r#"{"busy_timeout_ms": 100, "journal": {"ignored_paths": ["/meta"]}}"#,
        )
        .unwrap();
        assert_eq!(config.busy_timeout_ms, 100);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.journal.ignored_paths, vec!["/meta".to_string()]);
        assert_eq!(config.journal.max_sql_params, 999);
    }

    #[test]
    fn test_registry_is_loaded() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.search_registry().read().get_param("Patient", "family").is_some());
    }

    #[test]
    fn test_health_check_and_repeated_init() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();
        backend.init_schema().unwrap();
        backend.health_check().unwrap();
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.init_schema().unwrap();

        let result: StorageResult<()> = backend.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO resources (record_key, resource_type, logical_id, content)
                 VALUES ('k', 'Patient', 'p1', '{}')",
                [],
            )?;
            Err(internal_error("abort".to_string()))
        });
        assert!(result.is_err());

        let conn = backend.get_connection().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
