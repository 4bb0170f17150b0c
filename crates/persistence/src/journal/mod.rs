//! Local change journal.
//!
//! Every local mutation of a record appends one entry to the journal:
//!
//! - **Insert** entries carry the full canonical snapshot
//! - **Update** entries carry an RFC 6902 JSON Patch against the prior snapshot
//! - **Delete** entries carry no payload
//!
//! A sync collaborator reads pending entries, [squashes](squash::squash) them
//! per record, uploads the result and then discards the underlying entries.
//! This module holds the storage-independent parts of the journal; the SQLite
//! backend persists entries and their [`ChangeReference`] rows.
//!
//! # Example
//!
//! ```
//! use helios_local_persistence::journal::{JournalConfig, JsonPatch};
//! use serde_json::json;
//!
//! let old = json!({"resourceType": "Patient", "name": [{"family": "Smith"}]});
//! let new = json!({"resourceType": "Patient", "name": [{"family": "Doe"}], "meta": {"versionId": "2"}});
//!
//! let patch = JsonPatch::diff(&old, &new, &JournalConfig::default()).unwrap();
//! assert_eq!(patch.len(), 1);
//! assert_eq!(patch.apply(&old).unwrap()["name"][0]["family"], "Doe");
//! ```

mod config;
mod entry;
pub mod patch;
pub mod references;
pub mod serializer;
pub mod squash;

pub use config::JournalConfig;
pub use entry::{ChangeReference, LocalChange, LocalChangeKind, LocalChangeToken};
pub use patch::{JsonPatch, PatchOpKind, PatchOperation};
pub use references::{ExtractedReference, JsonReferenceExtractor, ReferenceExtractor};
pub use serializer::{JsonResourceSerializer, ResourceSerializer};
