//! Types exchanged with the sync collaborator.
//!
//! [`RemoteResource`] is a record as downloaded from the server, and
//! [`SyncedResource`] is the per-type high-water mark of the last download.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A record received from the server, with its server-side metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// The record as sent by the server.
    pub resource: Value,
    /// Opaque server version token.
    pub version_token: Option<String>,
    /// Server-side last-modified time.
    pub remote_last_updated: Option<DateTime<Utc>>,
}

impl RemoteResource {
    /// Creates a remote resource with explicit metadata.
    pub fn new(
        resource: Value,
        version_token: Option<String>,
        remote_last_updated: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            resource,
            version_token,
            remote_last_updated,
        }
    }

    /// Takes the version token and timestamp from `meta.versionId` and
    /// `meta.lastUpdated`.
    ///
    /// An unparseable `meta.lastUpdated` is treated as absent.
    pub fn from_resource(resource: Value) -> Self {
        let meta = resource.get("meta");
        let version_token = meta
            .and_then(|m| m.get("versionId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let remote_last_updated = meta
            .and_then(|m| m.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Self {
            resource,
            version_token,
            remote_last_updated,
        }
    }

    /// Returns the `resourceType` member, if present.
    pub fn resource_type(&self) -> Option<&str> {
        self.resource.get("resourceType").and_then(Value::as_str)
    }
}

/// The time up to which records of one type have been downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedResource {
    /// The FHIR resource type.
    pub resource_type: String,
    /// Latest server timestamp seen for the type.
    pub last_update: DateTime<Utc>,
}

impl SyncedResource {
    /// Creates a new sync mark.
    pub fn new(resource_type: impl Into<String>, last_update: DateTime<Utc>) -> Self {
        Self {
            resource_type: resource_type.into(),
            last_update,
        }
    }

    /// Computes the latest `remote_last_updated` per resource type.
    ///
    /// Records without a type or a timestamp do not contribute. Results are
    /// ordered by resource type.
    pub fn latest_per_type(resources: &[RemoteResource]) -> Vec<SyncedResource> {
        let mut latest: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
        for remote in resources {
            let (Some(resource_type), Some(updated)) =
                (remote.resource_type(), remote.remote_last_updated)
            else {
                continue;
            };
            latest
                .entry(resource_type)
                .and_modify(|current| *current = (*current).max(updated))
                .or_insert(updated);
        }
        latest
            .into_iter()
            .map(|(resource_type, last_update)| SyncedResource::new(resource_type, last_update))
            .collect()
    }
}
