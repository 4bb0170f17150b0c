//! SQLite schema definitions and migrations.

use rusqlite::Connection;

use crate::error::{BackendError, StorageError, StorageResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 2;

/// The nine typed index tables, each keyed by `record_key`.
pub const INDEX_TABLES: [&str; 9] = [
    "string_index",
    "token_index",
    "reference_index",
    "quantity_index",
    "uri_index",
    "date_index",
    "datetime_index",
    "number_index",
    "position_index",
];

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> StorageResult<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, 1)?;
        migrate_schema(conn, 1)?;
        tracing::debug!(version = SCHEMA_VERSION, "Created local store schema");
    } else if current_version < SCHEMA_VERSION {
        migrate_schema(conn, current_version)?;
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrated local store schema"
        );
    } else if current_version > SCHEMA_VERSION {
        return Err(StorageError::Backend(BackendError::MigrationError {
            message: format!(
                "database schema version {} is newer than supported version {}",
                current_version, SCHEMA_VERSION
            ),
        }));
    }

    Ok(())
}

/// Get the current schema version, 0 for a fresh database.
pub fn get_schema_version(conn: &Connection) -> StorageResult<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("create schema_version table", e))?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> StorageResult<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| schema_error("clear schema_version", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])
        .map_err(|e| schema_error("set schema_version", e))?;
    Ok(())
}

fn create_schema_v1(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS resources (
            record_key TEXT PRIMARY KEY NOT NULL,
            resource_type TEXT NOT NULL,
            logical_id TEXT NOT NULL,
            content TEXT NOT NULL,
            version_token TEXT,
            remote_last_updated TEXT,
            local_last_updated TEXT,
            UNIQUE (resource_type, logical_id)
        );

        CREATE TABLE IF NOT EXISTS local_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            record_key TEXT NOT NULL,
            resource_type TEXT NOT NULL,
            logical_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            version_token TEXT,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS local_change_references (
            entry_id INTEGER NOT NULL REFERENCES local_changes(id),
            path TEXT NOT NULL,
            target TEXT NOT NULL
        );",
    )
    .map_err(|e| schema_error("create core tables", e))?;

    create_index_tables(conn)?;
    create_indexes(conn)?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> StorageResult<()> {
    let mut version = from_version;

    while version < SCHEMA_VERSION {
        match version {
            1 => migrate_v1_to_v2(conn)?,
            _ => {
                return Err(StorageError::Backend(BackendError::MigrationError {
                    message: format!("unknown schema version {}", version),
                }));
            }
        }
        version += 1;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

/// v2: per-type sync bookkeeping.
fn migrate_v1_to_v2(conn: &Connection) -> StorageResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS synced_resources (
            resource_type TEXT PRIMARY KEY NOT NULL,
            last_update TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| schema_error("create synced_resources table", e))?;
    Ok(())
}

fn create_index_tables(conn: &Connection) -> StorageResult<()> {
    let value_columns = [
        ("string_index", "value TEXT NOT NULL"),
        ("token_index", "system TEXT, code TEXT NOT NULL"),
        ("reference_index", "value TEXT NOT NULL"),
        ("quantity_index", "system TEXT, code TEXT, value REAL NOT NULL"),
        ("uri_index", "value TEXT NOT NULL"),
        ("date_index", "from_day INTEGER NOT NULL, to_day INTEGER NOT NULL"),
        ("datetime_index", "from_ms INTEGER NOT NULL, to_ms INTEGER NOT NULL"),
        ("number_index", "value REAL NOT NULL"),
        ("position_index", "latitude REAL NOT NULL, longitude REAL NOT NULL"),
    ];

    for (table, columns) in value_columns {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                record_key TEXT NOT NULL REFERENCES resources(record_key),
                resource_type TEXT NOT NULL,
                name TEXT NOT NULL,
                path TEXT NOT NULL,
                {columns}
            )"
        );
        conn.execute(&sql, [])
            .map_err(|e| schema_error(&format!("create {} table", table), e))?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_record ON {table}(record_key)"
            ),
            [],
        )
        .map_err(|e| schema_error(&format!("index {} table", table), e))?;
    }

    Ok(())
}

fn create_indexes(conn: &Connection) -> StorageResult<()> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type)",
        "CREATE INDEX IF NOT EXISTS idx_local_changes_record ON local_changes(record_key, timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_local_changes_timestamp ON local_changes(timestamp)",
        "CREATE INDEX IF NOT EXISTS idx_change_references_target ON local_change_references(target)",
        "CREATE INDEX IF NOT EXISTS idx_change_references_entry ON local_change_references(entry_id)",
        "CREATE INDEX IF NOT EXISTS idx_string_lookup ON string_index(resource_type, name, value)",
        "CREATE INDEX IF NOT EXISTS idx_token_lookup ON token_index(resource_type, name, code, system)",
        "CREATE INDEX IF NOT EXISTS idx_reference_lookup ON reference_index(resource_type, name, value)",
        "CREATE INDEX IF NOT EXISTS idx_quantity_lookup ON quantity_index(resource_type, name, value)",
        "CREATE INDEX IF NOT EXISTS idx_uri_lookup ON uri_index(resource_type, name, value)",
        "CREATE INDEX IF NOT EXISTS idx_date_lookup ON date_index(resource_type, name, from_day, to_day)",
        "CREATE INDEX IF NOT EXISTS idx_datetime_lookup ON datetime_index(resource_type, name, from_ms, to_ms)",
        "CREATE INDEX IF NOT EXISTS idx_number_lookup ON number_index(resource_type, name, value)",
        "CREATE INDEX IF NOT EXISTS idx_position_lookup ON position_index(resource_type, name, latitude, longitude)",
    ];

    for index_sql in &indexes {
        conn.execute(index_sql, [])
            .map_err(|e| schema_error("create index", e))?;
    }

    Ok(())
}

fn schema_error(action: &str, e: rusqlite::Error) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message: format!("Failed to {}: {}", action, e),
        source: None,
    })
}
