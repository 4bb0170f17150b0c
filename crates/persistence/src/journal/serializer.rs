//! Canonical record serialization.

use serde_json::Value;

use crate::error::{StorageResult, ValidationError};

/// Turns records into their canonical wire form and back.
///
/// Implementations must be deterministic: serializing the same document twice
/// yields the same string.
pub trait ResourceSerializer: Send + Sync {
    /// Serializes a record.
    fn serialize(&self, resource: &Value) -> StorageResult<String>;

    /// Parses a serialized record.
    fn parse(&self, payload: &str) -> StorageResult<Value>;
}

/// Compact JSON serializer.
///
/// Object members are emitted in key order, which makes the output canonical.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResourceSerializer;

impl JsonResourceSerializer {
    /// Creates a new serializer.
    pub fn new() -> Self {
        Self
    }
}

impl ResourceSerializer for JsonResourceSerializer {
    fn serialize(&self, resource: &Value) -> StorageResult<String> {
        validate_resource(resource)?;
        Ok(serde_json::to_string(resource)?)
    }

    fn parse(&self, payload: &str) -> StorageResult<Value> {
        let resource: Value = serde_json::from_str(payload)?;
        validate_resource(&resource)?;
        Ok(resource)
    }
}

/// Checks that a record is an object with a `resourceType`.
pub fn validate_resource(resource: &Value) -> Result<&str, ValidationError> {
    let obj = resource
        .as_object()
        .ok_or_else(|| ValidationError::InvalidResource {
            message: "Resource must be a JSON object".to_string(),
        })?;

    obj.get("resourceType")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ValidationError::MissingRequiredField {
            field: "resourceType".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use serde_json::json;

    #[test]
    fn test_serialize_is_key_ordered() {
        let serializer = JsonResourceSerializer::new();
        let a = serializer
            .serialize(&json!({"resourceType": "Patient", "id": "1", "active": true}))
            .unwrap();
        let b = serializer
            .serialize(&json!({"active": true, "id": "1", "resourceType": "Patient"}))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let serializer = JsonResourceSerializer::new();
        let patient = json!({"resourceType": "Patient", "name": [{"family": "Smith"}]});
        let text = serializer.serialize(&patient).unwrap();
        assert_eq!(serializer.parse(&text).unwrap(), patient);
    }

    #[test]
    fn test_rejects_non_resources() {
        let serializer = JsonResourceSerializer::new();
        assert!(matches!(
            serializer.serialize(&json!([1, 2])),
            Err(StorageError::Validation(ValidationError::InvalidResource { .. }))
        ));
        assert!(matches!(
            serializer.parse(r#"{"id": "1"}"#),
            Err(StorageError::Validation(
                ValidationError::MissingRequiredField { .. }
            ))
        ));
    }
}
