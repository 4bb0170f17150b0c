//! Core storage traits and abstractions.
//!
//! - [`ResourceStorage`] - Record snapshots, index maintenance and search
//! - [`LocalChangeStorage`] - Change journal reads, squash, discard and rewrite
//!
//! ```text
//! ResourceStorage ──writes──▶ journal entries ◀──reads/discards── LocalChangeStorage
//!        │                                                              │
//!        └──────── update_after_sync ──▶ rewrite_identifier ◀──────────┘
//! ```

pub mod local_changes;
pub mod storage;

pub use local_changes::LocalChangeStorage;
pub use storage::ResourceStorage;
