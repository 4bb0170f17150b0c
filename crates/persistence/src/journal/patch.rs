//! RFC 6902 JSON Patch payloads.
//!
//! Update entries store their payload as a plain JSON Patch array. Operations
//! are modelled as an explicit tagged enum so that merging and reference
//! rewriting can inspect them; computing and applying patches is delegated to
//! the `json-patch` crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PatchError;

use super::config::JournalConfig;
use super::references::replace_reference_values;

/// A single JSON Patch operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOperation {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
    Move { from: String, path: String },
    Copy { from: String, path: String },
    Test { path: String, value: Value },
}

/// Operation name without its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatchOpKind {
    Add,
    Remove,
    Replace,
    Move,
    Copy,
    Test,
}

impl PatchOperation {
    /// Returns the operation name.
    pub fn kind(&self) -> PatchOpKind {
        match self {
            PatchOperation::Add { .. } => PatchOpKind::Add,
            PatchOperation::Remove { .. } => PatchOpKind::Remove,
            PatchOperation::Replace { .. } => PatchOpKind::Replace,
            PatchOperation::Move { .. } => PatchOpKind::Move,
            PatchOperation::Copy { .. } => PatchOpKind::Copy,
            PatchOperation::Test { .. } => PatchOpKind::Test,
        }
    }

    /// Returns the target path.
    pub fn path(&self) -> &str {
        match self {
            PatchOperation::Add { path, .. }
            | PatchOperation::Remove { path }
            | PatchOperation::Replace { path, .. }
            | PatchOperation::Move { path, .. }
            | PatchOperation::Copy { path, .. }
            | PatchOperation::Test { path, .. } => path,
        }
    }

    /// Returns the source path of `move` and `copy`.
    pub fn from(&self) -> Option<&str> {
        match self {
            PatchOperation::Move { from, .. } | PatchOperation::Copy { from, .. } => Some(from),
            _ => None,
        }
    }

    /// Returns the operation value, if it carries one.
    pub fn value(&self) -> Option<&Value> {
        match self {
            PatchOperation::Add { value, .. }
            | PatchOperation::Replace { value, .. }
            | PatchOperation::Test { value, .. } => Some(value),
            _ => None,
        }
    }

    fn value_mut(&mut self) -> Option<&mut Value> {
        match self {
            PatchOperation::Add { value, .. }
            | PatchOperation::Replace { value, .. }
            | PatchOperation::Test { value, .. } => Some(value),
            _ => None,
        }
    }

    fn merge_key(&self) -> (PatchOpKind, &str) {
        (self.kind(), self.path())
    }
}

/// An ordered JSON Patch document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonPatch(Vec<PatchOperation>);

impl JsonPatch {
    /// Wraps a list of operations.
    pub fn new(operations: Vec<PatchOperation>) -> Self {
        Self(operations)
    }

    /// Parses a stored update payload.
    pub fn parse(payload: &str) -> Result<Self, PatchError> {
        serde_json::from_str(payload).map_err(|e| PatchError::Malformed {
            message: e.to_string(),
        })
    }

    /// Serializes the patch as a JSON array.
    pub fn to_json_string(&self) -> Result<String, PatchError> {
        serde_json::to_string(&self.0).map_err(|e| PatchError::Malformed {
            message: e.to_string(),
        })
    }

    /// Returns the operations.
    pub fn operations(&self) -> &[PatchOperation] {
        &self.0
    }

    /// Returns true if the patch has no operations.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Computes the patch turning `old` into `new`, dropping every operation
    /// that touches an ignored path of `config`.
    pub fn diff(old: &Value, new: &Value, config: &JournalConfig) -> Result<Self, PatchError> {
        let raw = json_patch::diff(old, new);
        let operations: Vec<PatchOperation> = serde_json::to_value(&raw)
            .and_then(serde_json::from_value)
            .map_err(|e| PatchError::Malformed {
                message: format!("Unexpected diff output: {}", e),
            })?;

        Ok(Self(
            operations
                .into_iter()
                .filter(|op| {
                    !config.is_ignored(op.path()) && !op.from().is_some_and(|f| config.is_ignored(f))
                })
                .collect(),
        ))
    }

    /// Applies the patch to a copy of `document`.
    pub fn apply(&self, document: &Value) -> Result<Value, PatchError> {
        let operations: json_patch::Patch = serde_json::to_value(&self.0)
            .and_then(serde_json::from_value)
            .map_err(|e| PatchError::Malformed {
                message: e.to_string(),
            })?;

        let mut patched = document.clone();
        json_patch::patch(&mut patched, &operations).map_err(|e| PatchError::ApplyFailed {
            message: e.to_string(),
        })?;
        Ok(patched)
    }

    /// Merges a later patch into this one.
    ///
    /// Operations are keyed by `(kind, path)`. A later operation replaces an
    /// earlier one with the same key in place; operations with new keys are
    /// appended in their original order.
    pub fn merge(mut self, later: JsonPatch) -> JsonPatch {
        for op in later.0 {
            match self
                .0
                .iter()
                .position(|existing| existing.merge_key() == op.merge_key())
            {
                Some(index) => self.0[index] = op,
                None => self.0.push(op),
            }
        }
        self
    }

    /// Replaces operation values that refer to `old_reference`.
    ///
    /// Returns true if anything changed.
    pub fn rewrite_references(&mut self, old_reference: &str, new_reference: &str) -> bool {
        let mut changed = false;
        for value in self.0.iter_mut().filter_map(PatchOperation::value_mut) {
            match value {
                Value::String(s) if s == old_reference => {
                    *s = new_reference.to_string();
                    changed = true;
                }
                other => changed |= replace_reference_values(other, old_reference, new_reference),
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strip(mut doc: Value, config: &JournalConfig) -> Value {
        if let Some(obj) = doc.as_object_mut() {
            obj.retain(|k, _| !config.is_ignored(&format!("/{}", k)));
        }
        doc
    }

    #[test]
    fn test_wire_shape() {
        let patch = JsonPatch::new(vec![PatchOperation::Replace {
            path: "/name/0/family".to_string(),
            value: json!("Doe"),
        }]);
        let value: Value = serde_json::from_str(&patch.to_json_string().unwrap()).unwrap();
        assert_eq!(
            value,
            json!([{"op": "replace", "path": "/name/0/family", "value": "Doe"}])
        );
    }

    #[test]
    fn test_parse_all_operations() {
        let patch = JsonPatch::parse(
            r#"[
                {"op": "add", "path": "/a", "value": 1},
                {"op": "remove", "path": "/b"},
                {"op": "replace", "path": "/c", "value": true},
                {"op": "move", "from": "/d", "path": "/e"},
                {"op": "copy", "from": "/f", "path": "/g"},
                {"op": "test", "path": "/h", "value": null}
            ]"#,
        )
        .unwrap();
        let kinds: Vec<_> = patch.operations().iter().map(|op| op.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                PatchOpKind::Add,
                PatchOpKind::Remove,
                PatchOpKind::Replace,
                PatchOpKind::Move,
                PatchOpKind::Copy,
                PatchOpKind::Test
            ]
        );
        assert_eq!(patch.operations()[3].from(), Some("/d"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!(
            JsonPatch::parse(r#"[{"op": "frobnicate", "path": "/a"}]"#),
            Err(PatchError::Malformed { .. })
        ));
        assert!(matches!(
            JsonPatch::parse("{}"),
            Err(PatchError::Malformed { .. })
        ));
    }

    #[test]
    fn test_diff_single_replace() {
        let old = json!({"resourceType": "Patient", "id": "local-1", "name": [{"family": "Smith"}]});
        let new = json!({"resourceType": "Patient", "id": "local-1", "name": [{"family": "Doe"}]});
        let patch = JsonPatch::diff(&old, &new, &JournalConfig::default()).unwrap();
        assert_eq!(
            patch.operations(),
            &[PatchOperation::Replace {
                path: "/name/0/family".to_string(),
                value: json!("Doe")
            }]
        );
    }

    #[test]
    fn test_diff_ignores_administrative_paths() {
        let old = json!({"resourceType": "Patient", "meta": {"versionId": "1"}});
        let new = json!({
            "resourceType": "Patient",
            "meta": {"versionId": "2"},
            "text": {"status": "generated", "div": "<div/>"}
        });
        let patch = JsonPatch::diff(&old, &new, &JournalConfig::default()).unwrap();
        assert!(patch.is_empty());

        let custom = JournalConfig::default().with_ignored_paths(Vec::<String>::new());
        assert!(!JsonPatch::diff(&old, &new, &custom).unwrap().is_empty());
    }

    #[test]
    fn test_diff_then_apply_reproduces_target() {
        let config = JournalConfig::default();
        let pairs = [
            (
                json!({"resourceType": "Patient", "active": true, "name": [{"given": ["A", "B"]}]}),
                json!({"resourceType": "Patient", "gender": "female", "name": [{"given": ["B"]}, {"family": "X"}]}),
            ),
            (
                json!({"resourceType": "Observation", "status": "final", "meta": {"tag": []}}),
                json!({"resourceType": "Observation", "status": "amended", "valueQuantity": {"value": 3.5}}),
            ),
        ];

        for (a, b) in pairs {
            let patch = JsonPatch::diff(&a, &b, &config).unwrap();
            let applied = patch.apply(&a).unwrap();
            assert_eq!(strip(applied, &config), strip(b, &config));
        }
    }

    #[test]
    fn test_apply_failure() {
        let patch = JsonPatch::new(vec![PatchOperation::Remove {
            path: "/name/3".to_string(),
        }]);
        let result = patch.apply(&json!({"name": []}));
        assert!(matches!(result, Err(PatchError::ApplyFailed { .. })));
    }

    #[test]
    fn test_merge_replaces_matching_keys_in_place() {
        let first = JsonPatch::new(vec![
            PatchOperation::Replace {
                path: "/a".to_string(),
                value: json!(1),
            },
            PatchOperation::Add {
                path: "/b".to_string(),
                value: json!(2),
            },
        ]);
        let second = JsonPatch::new(vec![
            PatchOperation::Add {
                path: "/c".to_string(),
                value: json!(3),
            },
            PatchOperation::Replace {
                path: "/a".to_string(),
                value: json!(10),
            },
        ]);

        let merged = first.merge(second);
        assert_eq!(
            merged.operations(),
            &[
                PatchOperation::Replace {
                    path: "/a".to_string(),
                    value: json!(10)
                },
                PatchOperation::Add {
                    path: "/b".to_string(),
                    value: json!(2)
                },
                PatchOperation::Add {
                    path: "/c".to_string(),
                    value: json!(3)
                },
            ]
        );
    }

    #[test]
    fn test_merge_keeps_distinct_kinds_on_same_path() {
        let first = JsonPatch::new(vec![PatchOperation::Replace {
            path: "/a".to_string(),
            value: json!(1),
        }]);
        let second = JsonPatch::new(vec![PatchOperation::Remove {
            path: "/a".to_string(),
        }]);
        assert_eq!(first.merge(second).len(), 2);
    }

    #[test]
    fn test_rewrite_references() {
        let mut patch = JsonPatch::new(vec![
            PatchOperation::Replace {
                path: "/subject/reference".to_string(),
                value: json!("Patient/local-1"),
            },
            PatchOperation::Add {
                path: "/performer/0".to_string(),
                value: json!({"reference": "Patient/local-1", "display": "Patient/local-1"}),
            },
            PatchOperation::Remove {
                path: "/note".to_string(),
            },
        ]);

        assert!(patch.rewrite_references("Patient/local-1", "Patient/srv-42"));
        assert_eq!(
            patch.operations()[0].value(),
            Some(&json!("Patient/srv-42"))
        );
        assert_eq!(
            patch.operations()[1].value(),
            Some(&json!({"reference": "Patient/srv-42", "display": "Patient/local-1"}))
        );
        assert!(!patch.rewrite_references("Patient/other", "Patient/x"));
    }
}
