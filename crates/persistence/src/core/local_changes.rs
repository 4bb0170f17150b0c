//! Change journal access.
//!
//! The journal is pull-based: a sync collaborator reads pending changes,
//! squashes them per record, uploads the result, and finally discards the
//! entries it uploaded. Nothing in the store schedules work on its own.

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::journal::LocalChange;
use crate::types::{RecordKey, StoredResource};

/// Read, squash and discard access to the local change journal.
#[async_trait]
pub trait LocalChangeStorage: Send + Sync {
    /// Returns every pending entry in timestamp order.
    async fn get_all_local_changes(&self) -> StorageResult<Vec<LocalChange>>;

    /// Returns the pending entries of one record in timestamp order.
    async fn get_local_changes(&self, record_key: RecordKey) -> StorageResult<Vec<LocalChange>>;

    /// Squashes the given entries into one change.
    ///
    /// The entries must all belong to the same record.
    ///
    /// # Errors
    ///
    /// * `StorageError::LocalChange(EntriesNotFound)` - If an id is unknown
    /// * `StorageError::LocalChange(InvalidLocalChange)` - For an illegal sequence
    async fn squash(&self, entry_ids: &[i64]) -> StorageResult<LocalChange>;

    /// Returns one squashed change per record with pending entries, ordered
    /// by the timestamp of each record's earliest entry.
    async fn get_all_squashed(&self) -> StorageResult<Vec<LocalChange>>;

    /// Deletes the given entries and their reference rows.
    ///
    /// Unknown ids are ignored. Returns the number of entries deleted.
    async fn discard(&self, entry_ids: &[i64]) -> StorageResult<usize>;

    /// Rewrites journal history after `old_record` was renamed to
    /// `new_logical_id`.
    ///
    /// Returns the distinct keys of the records whose entries referenced the
    /// old identifier, in first-seen order.
    async fn rewrite_identifier(
        &self,
        record_key: RecordKey,
        old_record: &StoredResource,
        new_logical_id: &str,
    ) -> StorageResult<Vec<RecordKey>>;

    /// Returns the number of pending entries.
    async fn count_local_changes(&self) -> StorageResult<u64>;
}
