//! Outgoing reference extraction.
//!
//! The journal keeps a [`ChangeReference`](super::ChangeReference) row for
//! every `Type/id` reference a journal entry mentions, so that entries can be
//! found and rewritten when the referenced record is renamed.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Relative literal reference: a resource type followed by a FHIR id.
static RELATIVE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z][A-Za-z]*/[A-Za-z0-9\-\.]{1,64}$").expect("pattern is a valid regex")
});

/// An outgoing reference found in a record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExtractedReference {
    /// JSON Pointer of the `reference` member.
    pub path: String,
    /// Referenced `Type/id`.
    pub target: String,
}

impl ExtractedReference {
    /// Creates a new extracted reference.
    pub fn new(path: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            target: target.into(),
        }
    }
}

/// Finds outgoing references in a record.
pub trait ReferenceExtractor: Send + Sync {
    /// Returns every outgoing `(path, Type/id)` pair of `resource`.
    fn extract(&self, resource: &Value) -> BTreeSet<ExtractedReference>;

    /// Returns references present in exactly one of the two versions.
    fn diff(&self, old: &Value, new: &Value) -> BTreeSet<ExtractedReference> {
        let old_refs = self.extract(old);
        let new_refs = self.extract(new);
        old_refs.symmetric_difference(&new_refs).cloned().collect()
    }
}

/// Default extractor for JSON records.
///
/// Reports every `reference` string member holding a relative literal
/// reference, at any depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReferenceExtractor;

impl JsonReferenceExtractor {
    /// Creates a new extractor.
    pub fn new() -> Self {
        Self
    }

    fn walk(value: &Value, pointer: &mut String, out: &mut BTreeSet<ExtractedReference>) {
        match value {
            Value::Object(obj) => {
                for (key, child) in obj {
                    let len = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&escape_pointer_token(key));
                    match child {
                        Value::String(target) if key == "reference" && is_relative_reference(target) => {
                            out.insert(ExtractedReference::new(pointer.clone(), target.clone()));
                        }
                        _ => Self::walk(child, pointer, out),
                    }
                    pointer.truncate(len);
                }
            }
            Value::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    let len = pointer.len();
                    pointer.push('/');
                    pointer.push_str(&index.to_string());
                    Self::walk(child, pointer, out);
                    pointer.truncate(len);
                }
            }
            _ => {}
        }
    }
}

impl ReferenceExtractor for JsonReferenceExtractor {
    fn extract(&self, resource: &Value) -> BTreeSet<ExtractedReference> {
        let mut out = BTreeSet::new();
        let mut pointer = String::new();
        Self::walk(resource, &mut pointer, &mut out);
        out
    }
}

/// Returns true for `Type/id` style references.
pub fn is_relative_reference(reference: &str) -> bool {
    RELATIVE_REFERENCE.is_match(reference)
}

/// Replaces every `reference` member equal to `old_reference`, at any depth.
///
/// Returns true if anything changed.
pub fn replace_reference_values(value: &mut Value, old_reference: &str, new_reference: &str) -> bool {
    match value {
        Value::Object(obj) => {
            let mut changed = false;
            for (key, child) in obj.iter_mut() {
                match child {
                    Value::String(s) if key == "reference" && s == old_reference => {
                        *s = new_reference.to_string();
                        changed = true;
                    }
                    _ => changed |= replace_reference_values(child, old_reference, new_reference),
                }
            }
            changed
        }
        Value::Array(items) => items.iter_mut().fold(false, |changed, item| {
            replace_reference_values(item, old_reference, new_reference) | changed
        }),
        _ => false,
    }
}

fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
