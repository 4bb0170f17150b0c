//! ResourceStorage implementation for SQLite.
//!
//! Every mutation writes the snapshot, rebuilds the record's index rows and
//! appends a journal entry inside one immediate transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use uuid::Uuid;

use crate::core::ResourceStorage;
use crate::error::{ResourceError, StorageError, StorageResult, ValidationError};
use crate::journal::references::replace_reference_values;
use crate::journal::serializer::validate_resource;
use crate::types::{RecordKey, RemoteResource, SearchQuery, StoredResource, SyncedResource};

use super::SqliteBackend;
use super::backend::internal_error;
use super::index_writer::{delete_indices, replace_indices};
use super::local_changes::{format_timestamp, parse_timestamp, pending_delete_key};

pub(crate) const RECORD_COLUMNS: &str = "r.record_key, r.resource_type, r.logical_id, r.content, \
     r.version_token, r.remote_last_updated, r.local_last_updated";

fn not_found(resource_type: &str, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    })
}

fn already_exists(resource_type: &str, id: &str) -> StorageError {
    StorageError::Resource(ResourceError::AlreadyExists {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    })
}

fn required_id(resource: &Value) -> Result<String, ValidationError> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ValidationError::MissingRequiredField {
            field: "id".to_string(),
        })
}

fn set_id(resource: &mut Value, id: &str) {
    if let Some(obj) = resource.as_object_mut() {
        obj.insert("id".to_string(), Value::String(id.to_string()));
    }
}

/// Column values of a `resources` row.
pub(crate) struct RawRecord {
    record_key: String,
    resource_type: String,
    logical_id: String,
    content: String,
    version_token: Option<String>,
    remote_last_updated: Option<String>,
    local_last_updated: Option<String>,
}

impl RawRecord {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_key: row.get(0)?,
            resource_type: row.get(1)?,
            logical_id: row.get(2)?,
            content: row.get(3)?,
            version_token: row.get(4)?,
            remote_last_updated: row.get(5)?,
            local_last_updated: row.get(6)?,
        })
    }
}

impl SqliteBackend {
    pub(crate) fn to_stored(&self, raw: RawRecord) -> StorageResult<StoredResource> {
        let record_key: RecordKey = raw.record_key.parse().map_err(|e| {
            internal_error(format!("Invalid record key '{}': {}", raw.record_key, e))
        })?;
        let content = self.serializer().parse(&raw.content)?;

        Ok(StoredResource::from_storage(
            record_key,
            raw.resource_type,
            raw.logical_id,
            content,
            raw.version_token,
            raw.remote_last_updated
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            raw.local_last_updated
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
        ))
    }

    pub(crate) fn load_record(
        &self,
        conn: &Connection,
        resource_type: &str,
        logical_id: &str,
    ) -> StorageResult<Option<StoredResource>> {
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM resources r WHERE r.resource_type = ?1 AND r.logical_id = ?2",
                    RECORD_COLUMNS
                ),
                params![resource_type, logical_id],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(|r| self.to_stored(r)).transpose()
    }

    pub(crate) fn load_record_by_key(
        &self,
        conn: &Connection,
        record_key: RecordKey,
    ) -> StorageResult<Option<StoredResource>> {
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM resources r WHERE r.record_key = ?1", RECORD_COLUMNS),
                params![record_key.to_string()],
                RawRecord::from_row,
            )
            .optional()?;
        raw.map(|r| self.to_stored(r)).transpose()
    }

    /// Writes the snapshot row, replacing any row with the same record key.
    fn write_record(&self, conn: &Connection, record: &StoredResource) -> StorageResult<()> {
        let content = self.serializer().serialize(record.content())?;
        conn.execute(
            "INSERT INTO resources
                (record_key, resource_type, logical_id, content, version_token,
                 remote_last_updated, local_last_updated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(record_key) DO UPDATE SET
                resource_type = excluded.resource_type,
                logical_id = excluded.logical_id,
                content = excluded.content,
                version_token = excluded.version_token,
                remote_last_updated = excluded.remote_last_updated,
                local_last_updated = excluded.local_last_updated",
            params![
                record.record_key().to_string(),
                record.resource_type(),
                record.logical_id(),
                content,
                record.version_token(),
                record.remote_last_updated().map(format_timestamp),
                record.local_last_updated().map(format_timestamp),
            ],
        )
        .map_err(|e| internal_error(format!("Failed to write resource: {}", e)))?;
        Ok(())
    }

    /// Rebuilds every index row of a record from its current snapshot.
    fn reindex(&self, conn: &Connection, record: &StoredResource) -> StorageResult<()> {
        let mut indices = self
            .indexer()
            .index(record.content(), record.resource_type())?;
        indices.add_last_updated(record.remote_last_updated(), record.local_last_updated());
        replace_indices(conn, record.record_key(), record.resource_type(), &indices)
    }

    fn store(&self, conn: &Connection, record: &StoredResource) -> StorageResult<()> {
        self.write_record(conn, record)?;
        self.reindex(conn, record)
    }

    /// Inserts one local record inside an open transaction.
    fn insert_local(&self, tx: &Connection, mut resource: Value) -> StorageResult<RecordKey> {
        let resource_type = validate_resource(&resource)?.to_string();
        let logical_id = match resource.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                set_id(&mut resource, &id);
                id
            }
        };

        if self.load_record(tx, &resource_type, &logical_id)?.is_some() {
            return Err(already_exists(&resource_type, &logical_id));
        }

        let record_key = pending_delete_key(tx, &resource_type, &logical_id)?.unwrap_or_default();
        let journal = self.journal();
        let timestamp = journal.next_timestamp(tx, record_key)?;

        let record = StoredResource::from_storage(
            record_key,
            resource_type.as_str(),
            logical_id.as_str(),
            resource,
            None,
            None,
            Some(timestamp),
        );
        self.store(tx, &record)?;
        journal.record_insert(tx, &record, timestamp)?;

        tracing::debug!(
            record_key = %record_key,
            resource_type = %resource_type,
            id = %logical_id,
            "Inserted local resource"
        );
        Ok(record_key)
    }

    /// Upserts one server record inside an open transaction, unjournaled.
    fn store_remote(&self, tx: &Connection, remote: RemoteResource) -> StorageResult<RecordKey> {
        let RemoteResource {
            resource,
            version_token,
            remote_last_updated,
        } = remote;
        let resource_type = validate_resource(&resource)?.to_string();
        let logical_id = required_id(&resource)?;

        let existing = self.load_record(tx, &resource_type, &logical_id)?;
        let record_key = match &existing {
            Some(record) => record.record_key(),
            None => pending_delete_key(tx, &resource_type, &logical_id)?.unwrap_or_default(),
        };
        let local_last_updated = existing.and_then(|r| r.local_last_updated());

        let record = StoredResource::from_storage(
            record_key,
            resource_type.as_str(),
            logical_id.as_str(),
            resource,
            version_token,
            remote_last_updated,
            local_last_updated,
        );
        self.store(tx, &record)?;

        tracing::debug!(
            record_key = %record_key,
            resource_type = %resource_type,
            id = %logical_id,
            "Stored remote resource"
        );
        Ok(record_key)
    }
}

#[async_trait]
impl ResourceStorage for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn insert(&self, resource: Value) -> StorageResult<RecordKey> {
        self.with_transaction(|tx| self.insert_local(tx, resource))
    }

    async fn insert_all(&self, resources: Vec<Value>) -> StorageResult<Vec<RecordKey>> {
        let count = resources.len();
        let keys = self.with_transaction(|tx| {
            resources
                .into_iter()
                .map(|resource| self.insert_local(tx, resource))
                .collect::<StorageResult<Vec<_>>>()
        })?;
        tracing::debug!(count, "Inserted local resource batch");
        Ok(keys)
    }

    async fn insert_remote(
        &self,
        resource: Value,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
    ) -> StorageResult<RecordKey> {
        let remote = RemoteResource::new(resource, version_token, remote_last_updated);
        self.with_transaction(|tx| self.store_remote(tx, remote))
    }

    async fn insert_remote_all(
        &self,
        resources: Vec<RemoteResource>,
    ) -> StorageResult<Vec<RecordKey>> {
        self.with_transaction(|tx| {
            resources
                .into_iter()
                .map(|remote| self.store_remote(tx, remote))
                .collect()
        })
    }

    async fn last_update(&self, resource_type: &str) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.get_connection()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT last_update FROM synced_resources WHERE resource_type = ?1",
                params![resource_type],
                |row| row.get(0),
            )
            .optional()?;
        value.as_deref().map(parse_timestamp).transpose()
    }

    async fn insert_synced(
        &self,
        synced: Vec<SyncedResource>,
        resources: Vec<RemoteResource>,
    ) -> StorageResult<Vec<RecordKey>> {
        self.with_transaction(|tx| {
            for mark in &synced {
                tx.execute(
                    "INSERT INTO synced_resources (resource_type, last_update) VALUES (?1, ?2)
                     ON CONFLICT(resource_type) DO UPDATE SET last_update = excluded.last_update",
                    params![mark.resource_type, format_timestamp(mark.last_update)],
                )
                .map_err(|e| internal_error(format!("Failed to write sync mark: {}", e)))?;
            }
            let keys = resources
                .into_iter()
                .map(|remote| self.store_remote(tx, remote))
                .collect::<StorageResult<Vec<_>>>()?;

            tracing::debug!(
                types = synced.len(),
                resources = keys.len(),
                "Stored synced resources"
            );
            Ok(keys)
        })
    }

    async fn update(&self, resource: Value) -> StorageResult<()> {
        let resource_type = validate_resource(&resource)?.to_string();
        let logical_id = required_id(&resource)?;

        self.with_transaction(|tx| {
            let old = self
                .load_record(tx, &resource_type, &logical_id)?
                .ok_or_else(|| not_found(&resource_type, &logical_id))?;

            let journal = self.journal();
            let timestamp = journal.next_timestamp(tx, old.record_key())?;
            let appended = journal.record_update(tx, &old, &resource, timestamp)?;
            let local_last_updated = match appended {
                Some(_) => Some(timestamp),
                None => old.local_last_updated(),
            };

            let record = StoredResource::from_storage(
                old.record_key(),
                resource_type.as_str(),
                logical_id.as_str(),
                resource,
                old.version_token().map(str::to_string),
                old.remote_last_updated(),
                local_last_updated,
            );
            self.store(tx, &record)
        })
    }

    async fn delete(&self, resource_type: &str, logical_id: &str) -> StorageResult<()> {
        self.with_transaction(|tx| {
            let record = self
                .load_record(tx, resource_type, logical_id)?
                .ok_or_else(|| not_found(resource_type, logical_id))?;

            delete_indices(tx, record.record_key())?;
            tx.execute(
                "DELETE FROM resources WHERE record_key = ?1",
                params![record.record_key().to_string()],
            )
            .map_err(|e| internal_error(format!("Failed to delete resource: {}", e)))?;

            let journal = self.journal();
            let timestamp = journal.next_timestamp(tx, record.record_key())?;
            journal.record_delete(tx, &record, timestamp)?;
            Ok(())
        })
    }

    async fn read(&self, resource_type: &str, logical_id: &str) -> StorageResult<StoredResource> {
        let conn = self.get_connection()?;
        self.load_record(&conn, resource_type, logical_id)?
            .ok_or_else(|| not_found(resource_type, logical_id))
    }

    async fn read_by_key(&self, record_key: RecordKey) -> StorageResult<StoredResource> {
        let conn = self.get_connection()?;
        self.load_record_by_key(&conn, record_key)?.ok_or_else(|| {
            StorageError::Resource(ResourceError::RecordKeyNotFound {
                record_key: record_key.to_string(),
            })
        })
    }

    async fn search(&self, query: &SearchQuery) -> StorageResult<Vec<StoredResource>> {
        let conn = self.get_connection()?;
        self.search_records(&conn, query)
    }

    async fn count(&self, query: &SearchQuery) -> StorageResult<u64> {
        let conn = self.get_connection()?;
        self.count_records(&conn, query)
    }

    async fn update_after_sync(
        &self,
        resource_type: &str,
        logical_id: &str,
        new_logical_id: &str,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<RecordKey>> {
        self.with_transaction(|tx| {
            let record = self
                .load_record(tx, resource_type, logical_id)?
                .ok_or_else(|| not_found(resource_type, logical_id))?;
            let mut content = record.content().clone();
            let mut refreshed = Vec::new();

            if new_logical_id != logical_id {
                if self.load_record(tx, resource_type, new_logical_id)?.is_some() {
                    return Err(already_exists(resource_type, new_logical_id));
                }

                let old_ref = record.reference();
                let new_ref = format!("{}/{}", resource_type, new_logical_id);
                set_id(&mut content, new_logical_id);
                replace_reference_values(&mut content, &old_ref, &new_ref);

                refreshed = self.journal().rewrite_identifier(
                    tx,
                    record.record_key(),
                    &record,
                    new_logical_id,
                )?;

                for key in &refreshed {
                    let Some(other) = self.load_record_by_key(tx, *key)? else {
                        continue;
                    };
                    let mut other_content = other.content().clone();
                    if !replace_reference_values(&mut other_content, &old_ref, &new_ref) {
                        continue;
                    }
                    let updated = StoredResource::from_storage(
                        other.record_key(),
                        other.resource_type(),
                        other.logical_id(),
                        other_content,
                        other.version_token().map(str::to_string),
                        other.remote_last_updated(),
                        other.local_last_updated(),
                    );
                    self.store(tx, &updated)?;
                }

                tracing::info!(
                    record_key = %record.record_key(),
                    resource_type = %resource_type,
                    old_id = %logical_id,
                    new_id = %new_logical_id,
                    refreshed = refreshed.len(),
                    "Renamed resource after sync"
                );
            }

            let synced = StoredResource::from_storage(
                record.record_key(),
                resource_type,
                new_logical_id,
                content,
                version_token.or_else(|| record.version_token().map(str::to_string)),
                remote_last_updated.or(record.remote_last_updated()),
                record.local_last_updated(),
            );
            self.store(tx, &synced)?;
            Ok(refreshed)
        })
    }
}
