//! Journal entry types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PatchError, StorageResult};
use crate::types::RecordKey;

use super::patch::JsonPatch;

/// Kind of a local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalChangeKind {
    /// The record was created locally. Payload is the full snapshot.
    Insert,
    /// The record was modified. Payload is an RFC 6902 patch.
    Update,
    /// The record was deleted. Payload is empty.
    Delete,
    /// An insert and delete cancelled out. Payload is empty.
    NoOp,
}

impl LocalChangeKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LocalChangeKind::Insert => "insert",
            LocalChangeKind::Update => "update",
            LocalChangeKind::Delete => "delete",
            LocalChangeKind::NoOp => "noop",
        }
    }
}

impl fmt::Display for LocalChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocalChangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(LocalChangeKind::Insert),
            "update" => Ok(LocalChangeKind::Update),
            "delete" => Ok(LocalChangeKind::Delete),
            "noop" => Ok(LocalChangeKind::NoOp),
            _ => Err(format!("unknown local change kind: {}", s)),
        }
    }
}

/// The journal entry ids a (possibly squashed) change was built from.
///
/// Discarding a token removes every underlying row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalChangeToken(Vec<i64>);

impl LocalChangeToken {
    /// Creates a token from entry ids.
    pub fn new(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    /// Returns the entry ids.
    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    /// Appends the ids of another token, skipping ids already present.
    pub fn extend(&mut self, other: &LocalChangeToken) {
        for id in &other.0 {
            if !self.0.contains(id) {
                self.0.push(*id);
            }
        }
    }
}

/// One row of the local change journal, or the result of squashing several.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalChange {
    /// Entry ids this change stands for.
    pub token: LocalChangeToken,
    /// Identity of the changed record.
    pub record_key: RecordKey,
    /// Resource type of the changed record.
    pub resource_type: String,
    /// Logical id of the record at the time of reading.
    pub logical_id: String,
    /// Change kind.
    pub kind: LocalChangeKind,
    /// Full snapshot for inserts, patch array for updates, empty otherwise.
    pub payload: String,
    /// Server version the change was made against.
    pub version_token: Option<String>,
    /// When the change was recorded.
    pub timestamp: DateTime<Utc>,
}

impl LocalChange {
    /// Parses an insert payload.
    pub fn snapshot(&self) -> StorageResult<Value> {
        Ok(serde_json::from_str(&self.payload)?)
    }

    /// Parses an update payload.
    pub fn patch(&self) -> Result<JsonPatch, PatchError> {
        JsonPatch::parse(&self.payload)
    }

    /// Returns the relative reference `Type/id` of the changed record.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.logical_id)
    }
}

/// Secondary index row linking a journal entry to a reference it mentions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeReference {
    /// Owning journal entry.
    pub entry_id: i64,
    /// JSON Pointer of the reference inside the record.
    pub path: String,
    /// Referenced `Type/id`.
    pub target: String,
}
