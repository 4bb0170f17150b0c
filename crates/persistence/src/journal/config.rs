//! Change journal configuration.

use serde::{Deserialize, Serialize};

/// Configuration for the local change journal.
///
/// Deserializable so it can be embedded in the backend configuration.
///
/// ```
/// use helios_local_persistence::journal::JournalConfig;
///
/// let config: JournalConfig = serde_json::from_str(r#"{"ignored_paths": ["/meta"]}"#).unwrap();
/// assert!(config.is_ignored("/meta/lastUpdated"));
/// assert!(!config.is_ignored("/text/div"));
/// assert_eq!(config.max_sql_params, 999);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalConfig {
    /// JSON Pointer prefixes that never produce local changes when diffing.
    #[serde(default = "default_ignored_paths")]
    pub ignored_paths: Vec<String>,

    /// Maximum number of bound parameters in a single `IN (...)` lookup.
    #[serde(default = "default_max_sql_params")]
    pub max_sql_params: usize,
}

fn default_ignored_paths() -> Vec<String> {
    vec!["/meta".to_string(), "/text".to_string()]
}

fn default_max_sql_params() -> usize {
    999
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            ignored_paths: default_ignored_paths(),
            max_sql_params: default_max_sql_params(),
        }
    }
}

impl JournalConfig {
    /// Replaces the administrative path list.
    pub fn with_ignored_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the lookup page size.
    pub fn with_max_sql_params(mut self, max: usize) -> Self {
        self.max_sql_params = max.max(1);
        self
    }

    /// Returns true if `path` is one of the ignored prefixes or lies below one.
    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths.iter().any(|ignored| {
            path == ignored
                || path
                    .strip_prefix(ignored.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}
