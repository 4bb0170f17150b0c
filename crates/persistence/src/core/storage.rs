//! Core resource storage trait.
//!
//! This module defines the [`ResourceStorage`] trait: the record store that
//! owns the current snapshot of every record, keeps its index rows in step
//! and appends to the change journal on every local write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::StorageResult;
use crate::types::{RecordKey, RemoteResource, SearchQuery, StoredResource, SyncedResource};

/// Core storage trait for local records.
///
/// Local writes (`insert`, `update`, `delete`) are journaled; remote writes
/// (`insert_remote`, `update_after_sync`) are not. Every write rebuilds the
/// record's index rows in the same transaction as the snapshot change.
///
/// # Example
///
/// ```ignore
/// use helios_local_persistence::core::ResourceStorage;
///
/// async fn example<S: ResourceStorage>(storage: &S) -> StorageResult<()> {
///     let patient = serde_json::json!({
///         "resourceType": "Patient",
///         "id": "local-1",
///         "name": [{"family": "Smith"}]
///     });
///     let key = storage.insert(patient).await?;
///
///     let mut stored = storage.read("Patient", "local-1").await?.into_content();
///     stored["name"][0]["family"] = serde_json::json!("Doe");
///     storage.update(stored).await?;
///
///     let read = storage.read_by_key(key).await?;
///     assert_eq!(read.content()["name"][0]["family"], "Doe");
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait ResourceStorage: Send + Sync {
    /// Returns a human-readable name for this storage backend.
    fn backend_name(&self) -> &'static str;

    /// Inserts a new record created on this device.
    ///
    /// A missing `id` is assigned a random one. Appends an Insert entry.
    ///
    /// # Errors
    ///
    /// * `StorageError::Validation` - If the resource has no `resourceType`
    /// * `StorageError::Resource(AlreadyExists)` - If a live record with the same
    ///   type and id exists
    async fn insert(&self, resource: Value) -> StorageResult<RecordKey>;

    /// Inserts several local records in one transaction.
    ///
    /// Keys are returned in input order. If any record fails, none are stored
    /// and no journal entries are written.
    ///
    /// # Errors
    ///
    /// The same as [`insert`](Self::insert), for the first failing record.
    async fn insert_all(&self, resources: Vec<Value>) -> StorageResult<Vec<RecordKey>>;

    /// Inserts or replaces a record received from the server.
    ///
    /// No journal entry is written. A record with no live row but a pending
    /// local Delete keeps that record key.
    ///
    /// # Errors
    ///
    /// * `StorageError::Validation` - If the resource has no `resourceType` or `id`
    async fn insert_remote(
        &self,
        resource: Value,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
    ) -> StorageResult<RecordKey>;

    /// Inserts or replaces several server records in one transaction.
    ///
    /// If any record fails, none are stored.
    async fn insert_remote_all(
        &self,
        resources: Vec<RemoteResource>,
    ) -> StorageResult<Vec<RecordKey>>;

    /// Returns the last download time recorded for a resource type.
    async fn last_update(&self, resource_type: &str) -> StorageResult<Option<DateTime<Utc>>>;

    /// Stores downloaded records together with the new per-type sync marks.
    ///
    /// Marks replace any earlier mark for the same type. Marks and records
    /// are written in one transaction, so a failing record leaves the marks
    /// untouched.
    async fn insert_synced(
        &self,
        synced: Vec<SyncedResource>,
        resources: Vec<RemoteResource>,
    ) -> StorageResult<Vec<RecordKey>>;

    /// Replaces the snapshot of an existing record and journals the diff.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no live record matches
    /// * `StorageError::LocalChange(InvalidLocalChange)` - If the record's
    ///   latest journal entry is a Delete
    async fn update(&self, resource: Value) -> StorageResult<()>;

    /// Deletes a record and journals a Delete entry.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no live record matches
    async fn delete(&self, resource_type: &str, logical_id: &str) -> StorageResult<()>;

    /// Reads a record by type and logical id.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(NotFound)` - If no live record matches
    async fn read(&self, resource_type: &str, logical_id: &str) -> StorageResult<StoredResource>;

    /// Reads a record by its immutable record key.
    ///
    /// # Errors
    ///
    /// * `StorageError::Resource(RecordKeyNotFound)` - If no live record matches
    async fn read_by_key(&self, record_key: RecordKey) -> StorageResult<StoredResource>;

    /// Returns the records matching a query.
    async fn search(&self, query: &SearchQuery) -> StorageResult<Vec<StoredResource>>;

    /// Counts the records matching a query, ignoring count and offset.
    async fn count(&self, query: &SearchQuery) -> StorageResult<u64>;

    /// Applies the server's acknowledgment of an uploaded record.
    ///
    /// Stores the version token and remote timestamp. When the server
    /// assigned a different id, the record is renamed, journal history that
    /// mentions the old id is rewritten and every record whose pending
    /// changes referenced it has its snapshot and index rows refreshed.
    ///
    /// Returns the keys of the refreshed records.
    async fn update_after_sync(
        &self,
        resource_type: &str,
        logical_id: &str,
        new_logical_id: &str,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
    ) -> StorageResult<Vec<RecordKey>>;
}
