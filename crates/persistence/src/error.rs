//! Error types for the local persistence layer.
//!
//! This module defines all error types used by the record store and the change
//! journal, following a hierarchy that separates record state errors, journal
//! errors, patch errors, validation errors and backend errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::search::errors::{ExtractionError, LoaderError, RegistryError};

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Record state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Change journal errors
    #[error(transparent)]
    LocalChange(#[from] LocalChangeError),

    /// JSON Patch errors
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Search parameter errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to record state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No live record matches the given type and logical id.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// No live record has the given record key.
    #[error("record not found: {record_key}")]
    RecordKeyNotFound { record_key: String },

    /// A live record with the given type and logical id already exists.
    #[error("resource already exists: {resource_type}/{id}")]
    AlreadyExists { resource_type: String, id: String },
}

/// Errors raised by the change journal.
#[derive(Error, Debug)]
pub enum LocalChangeError {
    /// The requested change sequence is not legal.
    #[error("invalid local change: {message}")]
    InvalidLocalChange { message: String },

    /// One or more journal entries could not be found.
    #[error("local change entries not found: {entry_ids:?}")]
    EntriesNotFound { entry_ids: Vec<i64> },
}

impl LocalChangeError {
    /// Shorthand for an [`LocalChangeError::InvalidLocalChange`].
    pub fn invalid(message: impl Into<String>) -> Self {
        LocalChangeError::InvalidLocalChange {
            message: message.into(),
        }
    }
}

/// Errors while parsing, computing or applying RFC 6902 patches.
#[derive(Error, Debug)]
pub enum PatchError {
    /// The stored payload is not a valid JSON Patch document.
    #[error("malformed patch: {message}")]
    Malformed { message: String },

    /// The patch could not be applied to the target document.
    #[error("failed to apply patch: {message}")]
    ApplyFailed { message: String },
}

/// Errors related to record validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The record failed validation.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },

    /// Missing required field.
    #[error("missing required field: {field}")]
    MissingRequiredField { field: String },

    /// Invalid reference format.
    #[error("invalid reference: {reference}")]
    InvalidReference { reference: String },
}

/// Errors raised by the search parameter machinery.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The query named a parameter the registry does not know.
    #[error("unknown search parameter '{code}' for {resource_type}")]
    UnknownParameter { resource_type: String, code: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Schema migration error.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

impl From<ExtractionError> for StorageError {
    fn from(err: ExtractionError) -> Self {
        StorageError::Search(SearchError::Extraction(err))
    }
}

impl From<LoaderError> for StorageError {
    fn from(err: LoaderError) -> Self {
        StorageError::Search(SearchError::Loader(err))
    }
}

impl From<RegistryError> for StorageError {
    fn from(err: RegistryError) -> Self {
        StorageError::Search(SearchError::Registry(err))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}
