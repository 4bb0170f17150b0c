//! Stored resource types.
//!
//! This module defines the [`StoredResource`] type, which wraps a record's
//! canonical JSON snapshot with the metadata the local store keeps for it, and
//! the [`RecordKey`] identity that survives logical id renames.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Store-internal identity of a record.
///
/// Assigned once when the record is first inserted and never changed, even
/// when the server later assigns a different logical id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(Uuid);

impl RecordKey {
    /// Generates a fresh random record key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A record as held by the local store.
///
/// # Examples
///
/// ```
/// use helios_local_persistence::types::StoredResource;
/// use serde_json::json;
///
/// let resource = StoredResource::new(
///     "Patient",
///     "local-1",
///     json!({"resourceType": "Patient", "id": "local-1"}),
/// );
///
/// assert_eq!(resource.reference(), "Patient/local-1");
/// assert!(resource.version_token().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResource {
    record_key: RecordKey,
    resource_type: String,
    logical_id: String,
    content: Value,
    /// Version token last reported by the server.
    version_token: Option<String>,
    /// Last-modified time reported by the server.
    remote_last_updated: Option<DateTime<Utc>>,
    /// Time of the most recent local write.
    local_last_updated: Option<DateTime<Utc>>,
}

impl StoredResource {
    /// Creates a record that has not been written yet, with a fresh record key.
    pub fn new(
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            record_key: RecordKey::new(),
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            content,
            version_token: None,
            remote_last_updated: None,
            local_last_updated: None,
        }
    }

    /// Recreates a record from its stored columns.
    pub fn from_storage(
        record_key: RecordKey,
        resource_type: impl Into<String>,
        logical_id: impl Into<String>,
        content: Value,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
        local_last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            record_key,
            resource_type: resource_type.into(),
            logical_id: logical_id.into(),
            content,
            version_token,
            remote_last_updated,
            local_last_updated,
        }
    }

    /// Returns the record key.
    pub fn record_key(&self) -> RecordKey {
        self.record_key
    }

    /// Returns the resource type.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the logical id.
    pub fn logical_id(&self) -> &str {
        &self.logical_id
    }

    /// Returns the canonical snapshot.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Consumes the record and returns its snapshot.
    pub fn into_content(self) -> Value {
        self.content
    }

    /// Returns the server version token, if the record has been synced.
    pub fn version_token(&self) -> Option<&str> {
        self.version_token.as_deref()
    }

    /// Returns the server's last-modified time.
    pub fn remote_last_updated(&self) -> Option<DateTime<Utc>> {
        self.remote_last_updated
    }

    /// Returns the time of the last local write.
    pub fn local_last_updated(&self) -> Option<DateTime<Utc>> {
        self.local_last_updated
    }

    /// Returns the relative literal reference `Type/id` for this record.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.logical_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_key_roundtrip() {
        let key = RecordKey::new();
        let parsed: RecordKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn test_record_keys_are_unique() {
        assert_ne!(RecordKey::new(), RecordKey::new());
    }

    #[test]
    fn test_stored_resource_accessors() {
        let resource = StoredResource::new(
            "Observation",
            "obs-1",
            json!({"resourceType": "Observation", "id": "obs-1"}),
        );
        assert_eq!(resource.resource_type(), "Observation");
        assert_eq!(resource.logical_id(), "obs-1");
        assert_eq!(resource.reference(), "Observation/obs-1");
        assert!(resource.local_last_updated().is_none());
    }
}
