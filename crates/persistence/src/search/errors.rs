//! Search-specific error types.
//!
//! This module provides error types for search parameter operations:
//! - Loading and parsing SearchParameter resources
//! - Registry operations
//! - Value extraction and conversion during indexing

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error during SearchParameter loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoaderError {
    /// Invalid SearchParameter resource structure.
    InvalidResource {
        /// Description of what was invalid.
        message: String,
        /// URL of the problematic parameter, if known.
        url: Option<String>,
    },

    /// Missing required field in SearchParameter.
    MissingField {
        /// Name of the missing field.
        field: String,
        /// URL of the parameter.
        url: Option<String>,
    },
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::InvalidResource { message, url } => {
                if let Some(url) = url {
                    write!(f, "Invalid SearchParameter '{}': {}", url, message)
                } else {
                    write!(f, "Invalid SearchParameter: {}", message)
                }
            }
            LoaderError::MissingField { field, url } => {
                if let Some(url) = url {
                    write!(
                        f,
                        "SearchParameter '{}' missing required field '{}'",
                        url, field
                    )
                } else {
                    write!(f, "SearchParameter missing required field '{}'", field)
                }
            }
        }
    }
}

impl std::error::Error for LoaderError {}

/// Error during registry operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryError {
    /// Parameter with this URL already exists.
    DuplicateUrl {
        /// The duplicate URL.
        url: String,
    },

    /// Parameter not found in registry.
    NotFound {
        /// The URL or code that was not found.
        identifier: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateUrl { url } => {
                write!(f, "SearchParameter with URL '{}' already exists", url)
            }
            RegistryError::NotFound { identifier } => {
                write!(f, "SearchParameter '{}' not found", identifier)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Error during value extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The expression uses a construct the path navigator cannot evaluate.
    UnsupportedExpression {
        /// The parameter name.
        param_name: String,
        /// The expression.
        expression: String,
    },

    /// Value conversion failed.
    ConversionFailed {
        /// The parameter name.
        param_name: String,
        /// The expected type.
        expected_type: String,
        /// What was actually found.
        actual_value: String,
    },

    /// Resource is not a valid JSON object.
    InvalidResource {
        /// Description of the problem.
        message: String,
    },
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionError::UnsupportedExpression {
                param_name,
                expression,
            } => {
                write!(
                    f,
                    "Unsupported expression '{}' for parameter '{}'",
                    expression, param_name
                )
            }
            ExtractionError::ConversionFailed {
                param_name,
                expected_type,
                actual_value,
            } => {
                write!(
                    f,
                    "Cannot convert '{}' to {} for parameter '{}'",
                    actual_value, expected_type, param_name
                )
            }
            ExtractionError::InvalidResource { message } => {
                write!(f, "Invalid resource: {}", message)
            }
        }
    }
}

impl std::error::Error for ExtractionError {}
