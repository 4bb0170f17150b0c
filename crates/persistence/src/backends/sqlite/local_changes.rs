//! Change journal persistence and the `LocalChangeStorage` implementation.
//!
//! Journal rows live in `local_changes`; the outgoing references of each
//! row live in `local_change_references`. Both are only ever modified
//! together, inside the caller's transaction.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use crate::core::LocalChangeStorage;
use crate::error::{LocalChangeError, StorageResult};
use crate::journal::references::replace_reference_values;
use crate::journal::{
    ChangeReference, ExtractedReference, JournalConfig, JsonPatch, LocalChange, LocalChangeKind,
    LocalChangeToken, ReferenceExtractor, ResourceSerializer, squash,
};
use crate::types::{RecordKey, StoredResource};

use super::SqliteBackend;
use super::backend::internal_error;

const ENTRY_COLUMNS: &str =
    "id, record_key, resource_type, logical_id, kind, payload, version_token, timestamp";

/// Formats a journal timestamp. Fixed width, so text order is time order.
pub(crate) fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| internal_error(format!("Failed to parse timestamp '{}': {}", value, e)))
}

/// A journal row before it has been assigned an id.
struct NewEntry<'a> {
    record_key: RecordKey,
    resource_type: &'a str,
    logical_id: &'a str,
    kind: LocalChangeKind,
    payload: String,
    version_token: Option<&'a str>,
    timestamp: DateTime<Utc>,
}

/// Appends, reads and rewrites journal rows on a borrowed connection.
pub(crate) struct ChangeJournal<'a> {
    serializer: &'a dyn ResourceSerializer,
    extractor: &'a dyn ReferenceExtractor,
    config: &'a JournalConfig,
}

impl<'a> ChangeJournal<'a> {
    pub(crate) fn new(
        serializer: &'a dyn ResourceSerializer,
        extractor: &'a dyn ReferenceExtractor,
        config: &'a JournalConfig,
    ) -> Self {
        Self {
            serializer,
            extractor,
            config,
        }
    }

    fn page_size(&self) -> usize {
        self.config.max_sql_params.max(1)
    }

    /// Returns the timestamp for the next entry of a record.
    ///
    /// Strictly greater than every existing entry timestamp of the record.
    pub(crate) fn next_timestamp(
        &self,
        conn: &Connection,
        record_key: RecordKey,
    ) -> StorageResult<DateTime<Utc>> {
        let now = Utc::now().trunc_subsecs(6);

        let latest: Option<String> = conn.query_row(
            "SELECT MAX(timestamp) FROM local_changes WHERE record_key = ?1",
            params![record_key.to_string()],
            |row| row.get(0),
        )?;

        match latest.as_deref().map(parse_timestamp).transpose()? {
            Some(latest) if now <= latest => Ok(latest + Duration::microseconds(1)),
            _ => Ok(now),
        }
    }

    /// Appends an `Insert` entry carrying the full snapshot of `record`.
    pub(crate) fn record_insert(
        &self,
        conn: &Connection,
        record: &StoredResource,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let payload = self.serializer.serialize(record.content())?;
        let references = self.extractor.extract(record.content());

        let entry_id = append_entry(
            conn,
            &NewEntry {
                record_key: record.record_key(),
                resource_type: record.resource_type(),
                logical_id: record.logical_id(),
                kind: LocalChangeKind::Insert,
                payload,
                version_token: record.version_token(),
                timestamp,
            },
        )?;
        insert_references(conn, entry_id, &references)?;

        tracing::debug!(
            record_key = %record.record_key(),
            entry_id,
            references = references.len(),
            "Recorded local insert"
        );
        Ok(entry_id)
    }

    /// Appends an `Update` entry with the patch from `old` to `new_content`.
    ///
    /// Returns `None` when nothing outside the ignored paths changed.
    pub(crate) fn record_update(
        &self,
        conn: &Connection,
        old: &StoredResource,
        new_content: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<Option<i64>> {
        if latest_kind(conn, old.record_key())? == Some(LocalChangeKind::Delete) {
            return Err(LocalChangeError::invalid(format!(
                "Cannot update {}: the record has a pending delete",
                old.reference()
            ))
            .into());
        }

        let patch = JsonPatch::diff(old.content(), new_content, self.config)?;
        if patch.is_empty() {
            tracing::debug!(
                record_key = %old.record_key(),
                "Update produced an empty patch, no local change recorded"
            );
            return Ok(None);
        }

        let references = self.extractor.diff(old.content(), new_content);
        let entry_id = append_entry(
            conn,
            &NewEntry {
                record_key: old.record_key(),
                resource_type: old.resource_type(),
                logical_id: old.logical_id(),
                kind: LocalChangeKind::Update,
                payload: patch.to_json_string()?,
                version_token: old.version_token(),
                timestamp,
            },
        )?;
        insert_references(conn, entry_id, &references)?;

        tracing::debug!(
            record_key = %old.record_key(),
            entry_id,
            operations = patch.len(),
            "Recorded local update"
        );
        Ok(Some(entry_id))
    }

    /// Appends a `Delete` entry with an empty payload.
    pub(crate) fn record_delete(
        &self,
        conn: &Connection,
        record: &StoredResource,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<i64> {
        let entry_id = append_entry(
            conn,
            &NewEntry {
                record_key: record.record_key(),
                resource_type: record.resource_type(),
                logical_id: record.logical_id(),
                kind: LocalChangeKind::Delete,
                payload: String::new(),
                version_token: record.version_token(),
                timestamp,
            },
        )?;

        tracing::debug!(record_key = %record.record_key(), entry_id, "Recorded local delete");
        Ok(entry_id)
    }

    /// Loads entries by id, paging the id list.
    ///
    /// Fails with `EntriesNotFound` naming every unknown id.
    pub(crate) fn load_by_ids(
        &self,
        conn: &Connection,
        entry_ids: &[i64],
    ) -> StorageResult<Vec<LocalChange>> {
        let wanted: BTreeSet<i64> = entry_ids.iter().copied().collect();
        let ids: Vec<i64> = wanted.iter().copied().collect();

        let mut changes = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(self.page_size()) {
            let sql = format!(
                "SELECT {} FROM local_changes WHERE id IN ({})",
                ENTRY_COLUMNS,
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), RawEntry::from_row)?;
            for row in rows {
                changes.push(row?.into_change()?);
            }
        }

        if changes.len() != wanted.len() {
            let found: BTreeSet<i64> = changes.iter().flat_map(|c| c.token.ids()).copied().collect();
            let missing: Vec<i64> = wanted.difference(&found).copied().collect();
            return Err(LocalChangeError::EntriesNotFound { entry_ids: missing }.into());
        }

        sort_entries(&mut changes);
        Ok(changes)
    }

    /// Deletes entries and their reference rows, paging the id list.
    pub(crate) fn discard(&self, conn: &Connection, entry_ids: &[i64]) -> StorageResult<usize> {
        let ids: Vec<i64> = entry_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut removed = 0;
        for chunk in ids.chunks(self.page_size()) {
            let marks = placeholders(chunk.len());
            conn.execute(
                &format!("DELETE FROM local_change_references WHERE entry_id IN ({})", marks),
                params_from_iter(chunk.iter()),
            )?;
            removed += conn.execute(
                &format!("DELETE FROM local_changes WHERE id IN ({})", marks),
                params_from_iter(chunk.iter()),
            )?;
        }

        tracing::debug!(requested = ids.len(), removed, "Discarded local changes");
        Ok(removed)
    }

    /// Rewrites journal history after a record was renamed.
    ///
    /// Returns the keys of other records whose entries referenced the old
    /// identifier, deduplicated in first-seen order.
    pub(crate) fn rewrite_identifier(
        &self,
        conn: &Connection,
        record_key: RecordKey,
        old_record: &StoredResource,
        new_logical_id: &str,
    ) -> StorageResult<Vec<RecordKey>> {
        let renamed = conn.execute(
            "UPDATE local_changes SET logical_id = ?1 WHERE record_key = ?2",
            params![new_logical_id, record_key.to_string()],
        )?;

        let old_ref = old_record.reference();
        let new_ref = format!("{}/{}", old_record.resource_type(), new_logical_id);

        let entry_ids = entry_ids_referencing(conn, &old_ref)?;
        let entries = self.load_by_ids(conn, &entry_ids)?;

        let mut touched: Vec<RecordKey> = Vec::new();
        for entry in entries {
            let owner = entry.record_key;
            self.rewrite_entry(conn, entry, &old_ref, &new_ref)?;
            if owner != record_key && !touched.contains(&owner) {
                touched.push(owner);
            }
        }

        tracing::debug!(
            record_key = %record_key,
            old_reference = %old_ref,
            new_reference = %new_ref,
            renamed,
            rewritten = entry_ids.len(),
            referencing_records = touched.len(),
            "Rewrote local change history"
        );
        Ok(touched)
    }

    /// Replaces one entry with a rewritten copy that keeps its timestamp.
    fn rewrite_entry(
        &self,
        conn: &Connection,
        entry: LocalChange,
        old_ref: &str,
        new_ref: &str,
    ) -> StorageResult<i64> {
        let entry_id = entry
            .token
            .ids()
            .first()
            .copied()
            .ok_or_else(|| internal_error("Journal entry without an id".to_string()))?;
        let existing = load_references(conn, entry_id)?;

        let retargeted = || -> BTreeSet<ExtractedReference> {
            existing
                .iter()
                .map(|r| {
                    let target = if r.target == old_ref { new_ref } else { r.target.as_str() };
                    ExtractedReference::new(r.path.clone(), target)
                })
                .collect()
        };

        let (payload, references) = match entry.kind {
            LocalChangeKind::Insert => {
                let mut snapshot = self.serializer.parse(&entry.payload)?;
                replace_reference_values(&mut snapshot, old_ref, new_ref);
                let references = self.extractor.extract(&snapshot);
                (self.serializer.serialize(&snapshot)?, references)
            }
            LocalChangeKind::Update => {
                let mut patch = entry.patch()?;
                patch.rewrite_references(old_ref, new_ref);
                (patch.to_json_string()?, retargeted())
            }
            LocalChangeKind::Delete | LocalChangeKind::NoOp => (entry.payload.clone(), retargeted()),
        };

        conn.execute(
            "DELETE FROM local_change_references WHERE entry_id = ?1",
            params![entry_id],
        )?;
        conn.execute("DELETE FROM local_changes WHERE id = ?1", params![entry_id])?;

        let replacement = append_entry(
            conn,
            &NewEntry {
                record_key: entry.record_key,
                resource_type: &entry.resource_type,
                logical_id: &entry.logical_id,
                kind: entry.kind,
                payload,
                version_token: entry.version_token.as_deref(),
                timestamp: entry.timestamp,
            },
        )?;
        insert_references(conn, replacement, &references)?;
        Ok(replacement)
    }
}

/// Returns the kind of the most recent entry of a record.
pub(crate) fn latest_kind(
    conn: &Connection,
    record_key: RecordKey,
) -> StorageResult<Option<LocalChangeKind>> {
    let kind: Option<String> = conn
        .query_row(
            "SELECT kind FROM local_changes WHERE record_key = ?1
             ORDER BY timestamp DESC LIMIT 1",
            params![record_key.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    kind.map(|k| k.parse::<LocalChangeKind>().map_err(internal_error))
        .transpose()
}

/// Finds the record key of a deleted `(type, id)` whose latest entry is a
/// pending `Delete`, so a re-insert continues the same journal.
pub(crate) fn pending_delete_key(
    conn: &Connection,
    resource_type: &str,
    logical_id: &str,
) -> StorageResult<Option<RecordKey>> {
    let key: Option<String> = conn
        .query_row(
            "SELECT record_key, kind FROM local_changes
             WHERE resource_type = ?1 AND logical_id = ?2
             ORDER BY timestamp DESC, record_key DESC LIMIT 1",
            params![resource_type, logical_id],
            |row| {
                let key: String = row.get(0)?;
                let kind: String = row.get(1)?;
                Ok((kind == LocalChangeKind::Delete.as_str()).then_some(key))
            },
        )
        .optional()?
        .flatten();

    key.map(|k| parse_record_key(&k)).transpose()
}

/// Loads every entry, or the entries of one record, in timestamp order.
pub(crate) fn load_entries(
    conn: &Connection,
    record_key: Option<RecordKey>,
) -> StorageResult<Vec<LocalChange>> {
    let mut changes = Vec::new();
    match record_key {
        Some(key) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM local_changes WHERE record_key = ?1
                 ORDER BY timestamp, record_key",
                ENTRY_COLUMNS
            ))?;
            let rows = stmt.query_map(params![key.to_string()], RawEntry::from_row)?;
            for row in rows {
                changes.push(row?.into_change()?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM local_changes ORDER BY timestamp, record_key",
                ENTRY_COLUMNS
            ))?;
            let rows = stmt.query_map([], RawEntry::from_row)?;
            for row in rows {
                changes.push(row?.into_change()?);
            }
        }
    }
    Ok(changes)
}

/// Loads the reference rows of one entry.
pub(crate) fn load_references(
    conn: &Connection,
    entry_id: i64,
) -> StorageResult<Vec<ChangeReference>> {
    let mut stmt = conn.prepare_cached(
        "SELECT entry_id, path, target FROM local_change_references
         WHERE entry_id = ?1 ORDER BY path",
    )?;
    let rows = stmt.query_map(params![entry_id], |row| {
        Ok(ChangeReference {
            entry_id: row.get(0)?,
            path: row.get(1)?,
            target: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

fn entry_ids_referencing(conn: &Connection, target: &str) -> StorageResult<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT DISTINCT entry_id FROM local_change_references WHERE target = ?1",
    )?;
    let rows = stmt.query_map(params![target], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<i64>, _>>()?)
}

fn append_entry(conn: &Connection, entry: &NewEntry<'_>) -> StorageResult<i64> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO local_changes
            (record_key, resource_type, logical_id, kind, payload, version_token, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    stmt.execute(params![
        entry.record_key.to_string(),
        entry.resource_type,
        entry.logical_id,
        entry.kind.as_str(),
        entry.payload,
        entry.version_token,
        format_timestamp(entry.timestamp),
    ])?;
    Ok(conn.last_insert_rowid())
}

fn insert_references(
    conn: &Connection,
    entry_id: i64,
    references: &BTreeSet<ExtractedReference>,
) -> StorageResult<()> {
    if references.is_empty() {
        return Ok(());
    }
    let mut stmt = conn.prepare_cached(
        "INSERT INTO local_change_references (entry_id, path, target) VALUES (?1, ?2, ?3)",
    )?;
    for reference in references {
        stmt.execute(params![entry_id, reference.path, reference.target])?;
    }
    Ok(())
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn sort_entries(changes: &mut [LocalChange]) {
    changes.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.record_key.to_string().cmp(&b.record_key.to_string()))
    });
}

fn parse_record_key(value: &str) -> StorageResult<RecordKey> {
    value
        .parse()
        .map_err(|e| internal_error(format!("Invalid record key '{}': {}", value, e)))
}

/// Column values of a `local_changes` row.
struct RawEntry {
    id: i64,
    record_key: String,
    resource_type: String,
    logical_id: String,
    kind: String,
    payload: String,
    version_token: Option<String>,
    timestamp: String,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            record_key: row.get(1)?,
            resource_type: row.get(2)?,
            logical_id: row.get(3)?,
            kind: row.get(4)?,
            payload: row.get(5)?,
            version_token: row.get(6)?,
            timestamp: row.get(7)?,
        })
    }

    fn into_change(self) -> StorageResult<LocalChange> {
        Ok(LocalChange {
            token: LocalChangeToken::new(vec![self.id]),
            record_key: parse_record_key(&self.record_key)?,
            resource_type: self.resource_type,
            logical_id: self.logical_id,
            kind: self.kind.parse().map_err(internal_error)?,
            payload: self.payload,
            version_token: self.version_token,
            timestamp: parse_timestamp(&self.timestamp)?,
        })
    }
}

impl SqliteBackend {
    pub(crate) fn journal(&self) -> ChangeJournal<'_> {
        ChangeJournal::new(
            self.serializer(),
            self.reference_extractor(),
            self.journal_config(),
        )
    }
}

#[async_trait]
impl LocalChangeStorage for SqliteBackend {
    async fn get_all_local_changes(&self) -> StorageResult<Vec<LocalChange>> {
        let conn = self.get_connection()?;
        load_entries(&conn, None)
    }

    async fn get_local_changes(&self, record_key: RecordKey) -> StorageResult<Vec<LocalChange>> {
        let conn = self.get_connection()?;
        load_entries(&conn, Some(record_key))
    }

    async fn squash(&self, entry_ids: &[i64]) -> StorageResult<LocalChange> {
        if entry_ids.is_empty() {
            return Err(LocalChangeError::invalid("Cannot squash an empty list of local changes").into());
        }
        let conn = self.get_connection()?;
        let entries = self.journal().load_by_ids(&conn, entry_ids)?;
        squash::squash(entries, self.serializer())
    }

    async fn get_all_squashed(&self) -> StorageResult<Vec<LocalChange>> {
        let entries = {
            let conn = self.get_connection()?;
            load_entries(&conn, None)?
        };

        let mut order: Vec<RecordKey> = Vec::new();
        let mut groups: HashMap<RecordKey, Vec<LocalChange>> = HashMap::new();
        for entry in entries {
            if !groups.contains_key(&entry.record_key) {
                order.push(entry.record_key);
            }
            groups.entry(entry.record_key).or_default().push(entry);
        }

        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .map(|group| squash::squash(group, self.serializer()))
            .collect()
    }

    async fn discard(&self, entry_ids: &[i64]) -> StorageResult<usize> {
        if entry_ids.is_empty() {
            return Ok(0);
        }
        self.with_transaction(|tx| self.journal().discard(tx, entry_ids))
    }

    async fn rewrite_identifier(
        &self,
        record_key: RecordKey,
        old_record: &StoredResource,
        new_logical_id: &str,
    ) -> StorageResult<Vec<RecordKey>> {
        self.with_transaction(|tx| {
            self.journal()
                .rewrite_identifier(tx, record_key, old_record, new_logical_id)
        })
    }

    async fn count_local_changes(&self) -> StorageResult<u64> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM local_changes", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sqlite::schema::initialize_schema;
    use crate::journal::{JsonReferenceExtractor, JsonResourceSerializer};
    use serde_json::json;

    struct Fixture {
        conn: Connection,
        serializer: JsonResourceSerializer,
        extractor: JsonReferenceExtractor,
        config: JournalConfig,
    }

    impl Fixture {
        fn new(config: JournalConfig) -> Self {
            let conn = Connection::open_in_memory().unwrap();
            initialize_schema(&conn).unwrap();
            Self {
                conn,
                serializer: JsonResourceSerializer::new(),
                extractor: JsonReferenceExtractor::new(),
                config,
            }
        }

        fn journal(&self) -> ChangeJournal<'_> {
            ChangeJournal::new(&self.serializer, &self.extractor, &self.config)
        }

        fn insert(&self, record: &StoredResource) -> i64 {
            let ts = self
                .journal()
                .next_timestamp(&self.conn, record.record_key())
                .unwrap();
            self.journal().record_insert(&self.conn, record, ts).unwrap()
        }

        fn reference_targets(&self) -> Vec<String> {
            let mut stmt = self
                .conn
                .prepare("SELECT target FROM local_change_references ORDER BY target")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .collect::<Result<Vec<String>, _>>()
                .unwrap()
        }
    }

    fn observation(id: &str, patient: &str) -> StoredResource {
        StoredResource::new(
            "Observation",
            id,
            json!({
                "resourceType": "Observation",
                "id": id,
                "status": "final",
                "subject": {"reference": patient}
            }),
        )
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let fx = Fixture::new(JournalConfig::default());
        let record = observation("o1", "Patient/p1");
        fx.insert(&record);

        let first = load_entries(&fx.conn, Some(record.record_key())).unwrap()[0].timestamp;
        let next = fx
            .journal()
            .next_timestamp(&fx.conn, record.record_key())
            .unwrap();
        assert!(next > first);
        assert_eq!(format_timestamp(next).len(), format_timestamp(first).len());
    }

    #[test]
    fn test_update_after_pending_delete_is_rejected() {
        let fx = Fixture::new(JournalConfig::default());
        let record = observation("o1", "Patient/p1");
        fx.insert(&record);
        let ts = fx.journal().next_timestamp(&fx.conn, record.record_key()).unwrap();
        fx.journal().record_delete(&fx.conn, &record, ts).unwrap();

        let ts = fx.journal().next_timestamp(&fx.conn, record.record_key()).unwrap();
        let result = fx.journal().record_update(
            &fx.conn,
            &record,
            &json!({"resourceType": "Observation", "id": "o1", "status": "amended"}),
            ts,
        );
        assert!(matches!(
            result,
            Err(crate::error::StorageError::LocalChange(
                LocalChangeError::InvalidLocalChange { .. }
            ))
        ));
    }

    #[test]
    fn test_pending_delete_key() {
        let fx = Fixture::new(JournalConfig::default());
        let record = observation("o1", "Patient/p1");
        fx.insert(&record);
        assert_eq!(pending_delete_key(&fx.conn, "Observation", "o1").unwrap(), None);

        let ts = fx.journal().next_timestamp(&fx.conn, record.record_key()).unwrap();
        fx.journal().record_delete(&fx.conn, &record, ts).unwrap();
        assert_eq!(
            pending_delete_key(&fx.conn, "Observation", "o1").unwrap(),
            Some(record.record_key())
        );
    }

    #[test]
    fn test_pending_delete_key_ties_follow_record_key() {
        let fx = Fixture::new(JournalConfig::default());
        let key = |n: &str| {
            RecordKey::from_uuid(
                uuid::Uuid::parse_str(&format!("00000000-0000-0000-0000-00000000000{}", n))
                    .unwrap(),
            )
        };
        let record = |record_key: RecordKey| {
            StoredResource::from_storage(
                record_key,
                "Observation",
                "o1",
                json!({"resourceType": "Observation", "id": "o1", "status": "final"}),
                None,
                None,
                None,
            )
        };
        let ts = parse_timestamp("2024-03-01T12:00:00.000000Z").unwrap();

        // The later-written entry has the higher id but the lower record key
        let later_key = record(key("2"));
        fx.journal().record_delete(&fx.conn, &later_key, ts).unwrap();
        fx.journal().record_insert(&fx.conn, &record(key("1")), ts).unwrap();

        assert_eq!(
            pending_delete_key(&fx.conn, "Observation", "o1").unwrap(),
            Some(key("2"))
        );
    }

    #[test]
    fn test_load_by_ids_reports_missing() {
        let fx = Fixture::new(JournalConfig::default());
        let id = fx.insert(&observation("o1", "Patient/p1"));

        let err = fx.journal().load_by_ids(&fx.conn, &[id, 4242, 4243]).unwrap_err();
        match err {
            crate::error::StorageError::LocalChange(LocalChangeError::EntriesNotFound {
                entry_ids,
            }) => assert_eq!(entry_ids, vec![4242, 4243]),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_paged_rewrite_matches_unpaged() {
        let small = Fixture::new(JournalConfig::default().with_max_sql_params(3));
        let patient = StoredResource::new(
            "Patient",
            "local-1",
            json!({"resourceType": "Patient", "id": "local-1"}),
        );
        for i in 0..10 {
            small.insert(&observation(&format!("o{}", i), "Patient/local-1"));
        }
        small.insert(&observation("other", "Patient/unrelated"));

        let touched = small
            .journal()
            .rewrite_identifier(&small.conn, patient.record_key(), &patient, "srv-42")
            .unwrap();
        assert_eq!(touched.len(), 10);

        let targets = small.reference_targets();
        assert_eq!(targets.iter().filter(|t| *t == "Patient/srv-42").count(), 10);
        assert!(targets.iter().all(|t| t != "Patient/local-1"));

        for change in load_entries(&small.conn, None).unwrap() {
            let snapshot = change.snapshot().unwrap();
            assert_ne!(snapshot["subject"]["reference"], "Patient/local-1");
        }
    }

    #[test]
    fn test_rewrite_preserves_timestamp_and_issues_fresh_id() {
        let fx = Fixture::new(JournalConfig::default());
        let patient = StoredResource::new(
            "Patient",
            "local-1",
            json!({"resourceType": "Patient", "id": "local-1"}),
        );
        let obs = observation("o1", "Patient/local-1");
        let old_id = fx.insert(&obs);
        let before = load_entries(&fx.conn, Some(obs.record_key())).unwrap();

        fx.journal()
            .rewrite_identifier(&fx.conn, patient.record_key(), &patient, "srv-42")
            .unwrap();

        let after = load_entries(&fx.conn, Some(obs.record_key())).unwrap();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].token.ids()[0], old_id);
        assert_eq!(after[0].timestamp, before[0].timestamp);
        assert_eq!(after[0].snapshot().unwrap()["subject"]["reference"], "Patient/srv-42");
    }

    #[test]
    fn test_discard_removes_references() {
        let fx = Fixture::new(JournalConfig::default().with_max_sql_params(1));
        let a = fx.insert(&observation("o1", "Patient/p1"));
        let b = fx.insert(&observation("o2", "Patient/p2"));

        assert_eq!(fx.journal().discard(&fx.conn, &[a, b, 999]).unwrap(), 2);
        assert!(fx.reference_targets().is_empty());
        assert!(load_entries(&fx.conn, None).unwrap().is_empty());
    }
}
