//! SQLite backend integration tests.
//!
//! These tests exercise record storage, index maintenance and file-backed
//! persistence through the public storage traits.

mod common;

use chrono::{TimeZone, Utc};
use rusqlite::Connection;
use serde_json::json;

use helios_local_persistence::backends::sqlite::SqliteBackend;
use helios_local_persistence::core::{LocalChangeStorage, ResourceStorage};
use helios_local_persistence::error::{ResourceError, StorageError, ValidationError};
use helios_local_persistence::journal::LocalChangeKind;
use helios_local_persistence::types::{
    RecordKey, RemoteResource, SearchFilter, SearchQuery, SyncedResource,
};

use common::*;

fn index_rows(path: &std::path::Path, table: &str, key: RecordKey) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE record_key = ?1", table),
        [key.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}

// ============================================================================
// Insert Tests
// ============================================================================

#[tokio::test]
async fn test_insert_and_read() {
    let backend = create_backend();
    let patient = PatientFixture::new("local-1", "Smith").with_given(vec!["John"]);

    let key = backend.insert(patient.to_json()).await.unwrap();

    let stored = backend.read("Patient", "local-1").await.unwrap();
    assert_eq!(stored.record_key(), key);
    assert_eq!(stored.resource_type(), "Patient");
    assert_eq!(stored.logical_id(), "local-1");
    assert_content_path(&stored, "/name/0/family", &json!("Smith"));
    assert!(stored.version_token().is_none());
    assert!(stored.remote_last_updated().is_none());
    assert!(stored.local_last_updated().is_some());

    let by_key = backend.read_by_key(key).await.unwrap();
    assert_eq!(by_key, stored);
}

#[tokio::test]
async fn test_insert_without_id_generates_one() {
    let backend = create_backend();

    let key = backend
        .insert(json!({"resourceType": "Patient", "gender": "other"}))
        .await
        .unwrap();

    let stored = backend.read_by_key(key).await.unwrap();
    assert_eq!(stored.logical_id().len(), 36);
    assert_eq!(stored.content()["id"], json!(stored.logical_id()));
}

#[tokio::test]
async fn test_insert_duplicate_fails() {
    let backend = create_backend();
    let patient = PatientFixture::new("dup", "Smith").to_json();

    backend.insert(patient.clone()).await.unwrap();
    assert_already_exists(backend.insert(patient).await);
    assert_eq!(backend.count_local_changes().await.unwrap(), 1);
}

#[tokio::test]
async fn test_insert_rejects_non_resources() {
    let backend = create_backend();

    let result = backend.insert(json!({"id": "x"})).await;
    assert!(matches!(
        result,
        Err(StorageError::Validation(
            ValidationError::MissingRequiredField { .. }
        ))
    ));

    let result = backend.insert(json!(["not", "an", "object"])).await;
    assert!(matches!(
        result,
        Err(StorageError::Validation(ValidationError::InvalidResource { .. }))
    ));
}

#[tokio::test]
async fn test_insert_remote_keeps_record_key() {
    let backend = create_backend();
    let synced_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

    let first = backend
        .insert_remote(
            PatientFixture::new("srv-1", "Smith").to_json(),
            Some("1".to_string()),
            Some(synced_at),
        )
        .await
        .unwrap();
    let second = backend
        .insert_remote(
            PatientFixture::new("srv-1", "Smythe").to_json(),
            Some("2".to_string()),
            Some(synced_at),
        )
        .await
        .unwrap();

    assert_eq!(first, second);
    let stored = backend.read("Patient", "srv-1").await.unwrap();
    assert_eq!(stored.version_token(), Some("2"));
    assert_eq!(stored.remote_last_updated(), Some(synced_at));
    assert_content_path(&stored, "/name/0/family", &json!("Smythe"));
    assert_eq!(backend.count_local_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_redownload_after_local_delete_keeps_record_key() {
    let backend = create_backend();
    let key = backend
        .insert_remote(PatientFixture::new("srv-1", "Smith").to_json(), None, None)
        .await
        .unwrap();
    backend.delete("Patient", "srv-1").await.unwrap();

    let redownloaded = backend
        .insert_remote(
            PatientFixture::new("srv-1", "Smith").to_json(),
            Some("2".to_string()),
            None,
        )
        .await
        .unwrap();

    assert_eq!(redownloaded, key);
    assert_eq!(backend.read("Patient", "srv-1").await.unwrap().record_key(), key);
    let squashed = backend.get_all_squashed().await.unwrap();
    assert_eq!(squashed.len(), 1);
    assert_eq!(squashed[0].record_key, key);
    assert_eq!(squashed[0].kind, LocalChangeKind::Delete);

    // The pending Delete still blocks local edits
    assert_invalid_local_change(
        backend
            .update(PatientFixture::new("srv-1", "Smythe").to_json())
            .await,
    );
}

// ============================================================================
// Update Tests
// ============================================================================

#[tokio::test]
async fn test_update_replaces_snapshot() {
    let backend = create_backend();
    backend
        .insert(PatientFixture::new("p1", "Smith").to_json())
        .await
        .unwrap();

    backend
        .update(PatientFixture::new("p1", "Doe").to_json())
        .await
        .unwrap();

    let stored = backend.read("Patient", "p1").await.unwrap();
    assert_content_path(&stored, "/name/0/family", &json!("Doe"));
}

#[tokio::test]
async fn test_update_missing_fails() {
    let backend = create_backend();
    assert_not_found(
        backend
            .update(PatientFixture::new("ghost", "Nobody").to_json())
            .await,
    );
}

#[tokio::test]
async fn test_update_requires_id() {
    let backend = create_backend();
    let result = backend.update(json!({"resourceType": "Patient"})).await;
    assert!(matches!(
        result,
        Err(StorageError::Validation(
            ValidationError::MissingRequiredField { .. }
        ))
    ));
}

#[tokio::test]
async fn test_update_of_remote_record_keeps_version_token() {
    let backend = create_backend();
    backend
        .insert_remote(
            PatientFixture::new("srv-1", "Smith").to_json(),
            Some("7".to_string()),
            None,
        )
        .await
        .unwrap();

    backend
        .update(PatientFixture::new("srv-1", "Doe").to_json())
        .await
        .unwrap();

    let stored = backend.read("Patient", "srv-1").await.unwrap();
    assert_eq!(stored.version_token(), Some("7"));

    let changes = backend.get_all_local_changes().await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, LocalChangeKind::Update);
    assert_eq!(changes[0].version_token.as_deref(), Some("7"));
}

// ============================================================================
// Delete Tests
// ============================================================================

#[tokio::test]
async fn test_delete_record() {
    let backend = create_backend();
    backend
        .insert(PatientFixture::new("p1", "Smith").to_json())
        .await
        .unwrap();

    backend.delete("Patient", "p1").await.unwrap();

    assert_not_found(backend.read("Patient", "p1").await);
    assert_not_found(backend.delete("Patient", "p1").await);
    assert_eq!(
        backend.count(&SearchQuery::new("Patient")).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_read_by_unknown_key() {
    let backend = create_backend();
    let result = backend.read_by_key(RecordKey::new()).await;
    assert!(matches!(
        result,
        Err(StorageError::Resource(ResourceError::RecordKeyNotFound { .. }))
    ));
}

// ============================================================================
// Index Maintenance Tests
// ============================================================================

#[tokio::test]
async fn test_index_rows_follow_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();

    let key = backend
        .insert(
            PatientFixture::new("p1", "Smith")
                .with_given(vec!["John", "Jacob"])
                .with_gender("male")
                .to_json(),
        )
        .await
        .unwrap();
    // name, family, given x2
    assert_eq!(index_rows(&path, "string_index", key), 4);
    // _localLastUpdated only
    assert_eq!(index_rows(&path, "datetime_index", key), 1);

    backend
        .update(PatientFixture::new("p1", "Smith").with_birth_date("1980-05-01").to_json())
        .await
        .unwrap();
    // name, family
    assert_eq!(index_rows(&path, "string_index", key), 2);
    assert_eq!(index_rows(&path, "date_index", key), 1);
    // _id only, gender is gone
    assert_eq!(index_rows(&path, "token_index", key), 1);

    backend.delete("Patient", "p1").await.unwrap();
    for table in ["string_index", "token_index", "date_index", "datetime_index"] {
        assert_eq!(index_rows(&path, table, key), 0, "rows left in {}", table);
    }
}

#[tokio::test]
async fn test_last_updated_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");
    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();

    let key = backend
        .insert_remote(
            PatientFixture::new("srv-1", "Smith").to_json(),
            Some("1".to_string()),
            Some(Utc::now()),
        )
        .await
        .unwrap();
    assert_eq!(index_rows(&path, "datetime_index", key), 1);

    backend
        .update(PatientFixture::new("srv-1", "Doe").to_json())
        .await
        .unwrap();
    // _lastUpdated and _localLastUpdated
    assert_eq!(index_rows(&path, "datetime_index", key), 2);
}

// ============================================================================
// Batch and Sync Tests
// ============================================================================

fn remote_patient(id: &str, family: &str, updated: Option<chrono::DateTime<Utc>>) -> RemoteResource {
    RemoteResource::new(PatientFixture::new(id, family).to_json(), None, updated)
}

#[tokio::test]
async fn test_insert_all() {
    let backend = create_backend();
    let keys = backend
        .insert_all(vec![
            PatientFixture::new("p1", "Smith").to_json(),
            PatientFixture::new("p2", "Jones").to_json(),
            json!({"resourceType": "Patient"}),
        ])
        .await
        .unwrap();

    assert_eq!(keys.len(), 3);
    assert_eq!(backend.read("Patient", "p1").await.unwrap().record_key(), keys[0]);
    assert_eq!(backend.read("Patient", "p2").await.unwrap().record_key(), keys[1]);
    assert!(!backend.read_by_key(keys[2]).await.unwrap().logical_id().is_empty());
    assert_eq!(backend.count_local_changes().await.unwrap(), 3);
}

#[tokio::test]
async fn test_insert_all_rolls_back_on_invalid_record() {
    let backend = create_backend();
    let result = backend
        .insert_all(vec![
            PatientFixture::new("p1", "Smith").to_json(),
            json!({"id": "no-type"}),
            PatientFixture::new("p2", "Jones").to_json(),
        ])
        .await;

    assert!(matches!(
        result,
        Err(StorageError::Validation(
            ValidationError::MissingRequiredField { .. }
        ))
    ));
    assert_not_found(backend.read("Patient", "p1").await);
    assert_eq!(backend.count(&SearchQuery::new("Patient")).await.unwrap(), 0);
    assert_eq!(backend.count_local_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_all_rolls_back_on_duplicate_in_batch() {
    let backend = create_backend();
    let result = backend
        .insert_all(vec![
            PatientFixture::new("p1", "Smith").to_json(),
            PatientFixture::new("p1", "Smythe").to_json(),
        ])
        .await;

    assert_already_exists(result);
    assert_eq!(backend.count_local_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_remote_all() {
    let backend = create_backend();
    let updated = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let keys = backend
        .insert_remote_all(vec![
            remote_patient("srv-1", "Smith", Some(updated)),
            RemoteResource::from_resource(json!({
                "resourceType": "Patient",
                "id": "srv-2",
                "meta": {"versionId": "7", "lastUpdated": "2024-03-02T00:00:00Z"}
            })),
        ])
        .await
        .unwrap();

    assert_eq!(keys.len(), 2);
    assert_eq!(
        backend.read("Patient", "srv-1").await.unwrap().remote_last_updated(),
        Some(updated)
    );
    let second = backend.read_by_key(keys[1]).await.unwrap();
    assert_eq!(second.version_token(), Some("7"));
    assert_eq!(
        second.remote_last_updated(),
        Some(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap())
    );
    assert_eq!(backend.count_local_changes().await.unwrap(), 0);
}

#[tokio::test]
async fn test_insert_remote_all_rolls_back_on_missing_id() {
    let backend = create_backend();
    let result = backend
        .insert_remote_all(vec![
            remote_patient("srv-1", "Smith", None),
            RemoteResource::new(json!({"resourceType": "Patient"}), None, None),
        ])
        .await;

    assert!(matches!(
        result,
        Err(StorageError::Validation(
            ValidationError::MissingRequiredField { .. }
        ))
    ));
    assert_not_found(backend.read("Patient", "srv-1").await);
}

#[tokio::test]
async fn test_last_update_follows_synced_marks() {
    let backend = create_backend();
    assert_eq!(backend.last_update("Patient").await.unwrap(), None);

    let first = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 3, 2, 8, 30, 0).unwrap();
    let batch = vec![
        remote_patient("srv-1", "Smith", Some(first)),
        remote_patient("srv-2", "Jones", Some(second)),
    ];
    let marks = SyncedResource::latest_per_type(&batch);
    let keys = backend.insert_synced(marks, batch).await.unwrap();

    assert_eq!(keys.len(), 2);
    assert_eq!(backend.last_update("Patient").await.unwrap(), Some(second));
    assert_eq!(backend.last_update("Observation").await.unwrap(), None);
    assert!(backend.read("Patient", "srv-2").await.is_ok());

    // A later mark replaces the earlier one
    let third = Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap();
    backend
        .insert_synced(vec![SyncedResource::new("Patient", third)], Vec::new())
        .await
        .unwrap();
    assert_eq!(backend.last_update("Patient").await.unwrap(), Some(third));
}

#[tokio::test]
async fn test_insert_synced_rolls_back_marks_with_records() {
    let backend = create_backend();
    let updated = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let result = backend
        .insert_synced(
            vec![SyncedResource::new("Patient", updated)],
            vec![
                remote_patient("srv-1", "Smith", Some(updated)),
                RemoteResource::new(json!({"id": "no-type"}), None, None),
            ],
        )
        .await;

    assert!(result.is_err());
    assert_eq!(backend.last_update("Patient").await.unwrap(), None);
    assert_not_found(backend.read("Patient", "srv-1").await);
}

// ============================================================================
// File-backed Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_file_backend_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.db");

    let key = {
        let backend = SqliteBackend::open(&path).unwrap();
        backend.init_schema().unwrap();
        backend
            .insert(PatientFixture::new("p1", "Smith").to_json())
            .await
            .unwrap()
    };

    let backend = SqliteBackend::open(&path).unwrap();
    backend.init_schema().unwrap();

    let stored = backend.read("Patient", "p1").await.unwrap();
    assert_eq!(stored.record_key(), key);
    let changes = backend.get_local_changes(key).await.unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, LocalChangeKind::Insert);
}

#[tokio::test]
async fn test_search_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let backend = SqliteBackend::open(dir.path().join("local.db")).unwrap();
    backend.init_schema().unwrap();

    for (id, family) in [("p1", "Smith"), ("p2", "Smythe"), ("p3", "Jones")] {
        backend
            .insert(PatientFixture::new(id, family).to_json())
            .await
            .unwrap();
    }

    let results = backend
        .search(&SearchQuery::new("Patient").with_filter(SearchFilter::string("family", "Sm")))
        .await
        .unwrap();
    assert_search_id_set(&results, &["p1", "p2"]);
}

// ============================================================================
// Backend Tests
// ============================================================================

#[test]
fn test_backend_health_and_schema_init() {
    let backend = SqliteBackend::in_memory().unwrap();
    backend.init_schema().unwrap();
    backend.init_schema().unwrap();
    backend.health_check().unwrap();

    assert_eq!(backend.backend_name(), "sqlite");
    assert!(backend.is_memory());
}
