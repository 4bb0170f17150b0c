//! Assertion helpers for storage results.

use serde_json::Value;

use helios_local_persistence::error::{LocalChangeError, ResourceError, StorageError};
use helios_local_persistence::types::StoredResource;

/// Asserts that a result is a ResourceError::NotFound.
pub fn assert_not_found<T>(result: Result<T, StorageError>) {
    match result {
        Ok(_) => panic!("Expected NotFound error, but got Ok"),
        Err(StorageError::Resource(ResourceError::NotFound { .. })) => {}
        Err(e) => panic!("Expected NotFound error, got {:?}", e),
    }
}

/// Asserts that a result is a ResourceError::AlreadyExists.
pub fn assert_already_exists<T>(result: Result<T, StorageError>) {
    match result {
        Ok(_) => panic!("Expected AlreadyExists error, but got Ok"),
        Err(StorageError::Resource(ResourceError::AlreadyExists { .. })) => {}
        Err(e) => panic!("Expected AlreadyExists error, got {:?}", e),
    }
}

/// Asserts that a result is a LocalChangeError::InvalidLocalChange.
pub fn assert_invalid_local_change<T>(result: Result<T, StorageError>) {
    match result {
        Ok(_) => panic!("Expected InvalidLocalChange error, but got Ok"),
        Err(StorageError::LocalChange(LocalChangeError::InvalidLocalChange { .. })) => {}
        Err(e) => panic!("Expected InvalidLocalChange error, got {:?}", e),
    }
}

/// Asserts that a result is a LocalChangeError::EntriesNotFound naming `ids`.
pub fn assert_entries_not_found<T>(result: Result<T, StorageError>, ids: &[i64]) {
    match result {
        Ok(_) => panic!("Expected EntriesNotFound error, but got Ok"),
        Err(StorageError::LocalChange(LocalChangeError::EntriesNotFound { entry_ids })) => {
            assert_eq!(entry_ids, ids);
        }
        Err(e) => panic!("Expected EntriesNotFound error, got {:?}", e),
    }
}

/// Asserts that a value inside a resource's content matches, by JSON Pointer.
pub fn assert_content_path(resource: &StoredResource, pointer: &str, expected: &Value) {
    let actual = resource.content().pointer(pointer);
    assert_eq!(
        actual,
        Some(expected),
        "Content at {} mismatch: expected {:?}, got {:?}",
        pointer,
        expected,
        actual
    );
}

/// Asserts that search results contain exactly the given logical ids, in order.
pub fn assert_search_ids(resources: &[StoredResource], expected: &[&str]) {
    let ids: Vec<&str> = resources.iter().map(|r| r.logical_id()).collect();
    assert_eq!(ids, expected, "Unexpected search results");
}

/// Asserts that search results contain the given logical ids, in any order.
pub fn assert_search_id_set(resources: &[StoredResource], expected: &[&str]) {
    let mut ids: Vec<&str> = resources.iter().map(|r| r.logical_id()).collect();
    ids.sort_unstable();
    let mut expected = expected.to_vec();
    expected.sort_unstable();
    assert_eq!(ids, expected, "Unexpected search results");
}
