//! Index row persistence.
//!
//! The rows of a record are replaced wholesale: every prior row in each of
//! the nine tables is deleted, then the fresh set is inserted. Callers run
//! this inside the transaction that writes the snapshot.

use rusqlite::{Connection, params};

use crate::error::StorageResult;
use crate::search::{IndexEntry, ResourceIndices};
use crate::types::RecordKey;

use super::schema::INDEX_TABLES;

/// Deletes every index row of a record. Returns the number of rows removed.
pub(crate) fn delete_indices(conn: &Connection, record_key: RecordKey) -> StorageResult<usize> {
    let key = record_key.to_string();
    let mut removed = 0;
    for table in INDEX_TABLES {
        removed += conn.execute(
            &format!("DELETE FROM {} WHERE record_key = ?1", table),
            params![key],
        )?;
    }
    Ok(removed)
}

/// Replaces the index rows of a record with `indices`.
pub(crate) fn replace_indices(
    conn: &Connection,
    record_key: RecordKey,
    resource_type: &str,
    indices: &ResourceIndices,
) -> StorageResult<()> {
    let removed = delete_indices(conn, record_key)?;
    let key = record_key.to_string();

    let base = |table: &str, columns: &str, placeholders: &str| {
        format!(
            "INSERT INTO {table} (record_key, resource_type, name, path, {columns})
             VALUES (?1, ?2, ?3, ?4, {placeholders})"
        )
    };

    insert_rows(
        conn,
        &base("string_index", "value", "?5"),
        &indices.string,
        |stmt, row| stmt.execute(params![key, resource_type, row.name, row.path, row.value]),
    )?;
    insert_rows(
        conn,
        &base("token_index", "system, code", "?5, ?6"),
        &indices.token,
        |stmt, row| {
            stmt.execute(params![
                key,
                resource_type,
                row.name,
                row.path,
                row.value.system,
                row.value.code
            ])
        },
    )?;
    insert_rows(
        conn,
        &base("reference_index", "value", "?5"),
        &indices.reference,
        |stmt, row| stmt.execute(params![key, resource_type, row.name, row.path, row.value]),
    )?;
    insert_rows(
        conn,
        &base("quantity_index", "system, code, value", "?5, ?6, ?7"),
        &indices.quantity,
        |stmt, row| {
            stmt.execute(params![
                key,
                resource_type,
                row.name,
                row.path,
                row.value.system,
                row.value.code,
                row.value.value
            ])
        },
    )?;
    insert_rows(
        conn,
        &base("uri_index", "value", "?5"),
        &indices.uri,
        |stmt, row| stmt.execute(params![key, resource_type, row.name, row.path, row.value]),
    )?;
    insert_rows(
        conn,
        &base("date_index", "from_day, to_day", "?5, ?6"),
        &indices.date,
        |stmt, row| {
            stmt.execute(params![
                key,
                resource_type,
                row.name,
                row.path,
                row.value.from_day,
                row.value.to_day
            ])
        },
    )?;
    insert_rows(
        conn,
        &base("datetime_index", "from_ms, to_ms", "?5, ?6"),
        &indices.date_time,
        |stmt, row| {
            stmt.execute(params![
                key,
                resource_type,
                row.name,
                row.path,
                row.value.from_ms,
                row.value.to_ms
            ])
        },
    )?;
    insert_rows(
        conn,
        &base("number_index", "value", "?5"),
        &indices.number,
        |stmt, row| stmt.execute(params![key, resource_type, row.name, row.path, row.value]),
    )?;
    insert_rows(
        conn,
        &base("position_index", "latitude, longitude", "?5, ?6"),
        &indices.position,
        |stmt, row| {
            stmt.execute(params![
                key,
                resource_type,
                row.name,
                row.path,
                row.value.latitude,
                row.value.longitude
            ])
        },
    )?;

    tracing::debug!(
        record_key = %record_key,
        removed,
        inserted = indices.len(),
        "Rebuilt index rows"
    );
    Ok(())
}

fn insert_rows<V, F>(
    conn: &Connection,
    sql: &str,
    rows: &[IndexEntry<V>],
    mut insert: F,
) -> StorageResult<()>
where
    F: FnMut(&mut rusqlite::Statement<'_>, &IndexEntry<V>) -> rusqlite::Result<usize>,
{
    if rows.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare_cached(sql)?;
    for row in rows {
        insert(&mut stmt, row)?;
    }
    Ok(())
}
