//! SearchParameter Value Extractor.
//!
//! Evaluates the simple FHIRPath expressions used by search parameters
//! against JSON resources. Supported forms:
//!
//! - dotted paths with a leading type segment (`Patient.name.family`)
//! - unions (`Condition.onset.ofType(dateTime) | Condition.onset.ofType(Period)`)
//!   of which only branches for the indexed type are evaluated
//! - type selection with `.ofType(T)` or `(X.value as T)`
//! - `.where(...)` and `.resolve()`, which do not narrow the result
//!
//! Anything else is reported as [`ExtractionError::UnsupportedExpression`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SearchParamType;

use super::converters::{IndexValue, ValueConverter};
use super::errors::ExtractionError;
use super::registry::{SearchParameterDefinition, SearchParameterRegistry};

/// A value extracted from a resource for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedValue {
    /// The parameter name (e.g., "name", "identifier").
    pub param_name: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// The expression the value was reached through.
    pub path: String,

    /// The extracted and converted value.
    pub value: IndexValue,
}

/// Extracts searchable values from resources.
pub struct SearchParameterExtractor {
    registry: Arc<RwLock<SearchParameterRegistry>>,
}

impl SearchParameterExtractor {
    /// Creates a new extractor with the given registry.
    pub fn new(registry: Arc<RwLock<SearchParameterRegistry>>) -> Self {
        Self { registry }
    }

    /// Extracts all searchable values from a resource.
    ///
    /// Parameters whose expression cannot be evaluated are skipped with a
    /// warning; the remaining parameters are still extracted.
    pub fn extract(
        &self,
        resource: &Value,
        resource_type: &str,
    ) -> Result<Vec<ExtractedValue>, ExtractionError> {
        let obj = resource
            .as_object()
            .ok_or_else(|| ExtractionError::InvalidResource {
                message: "Resource must be a JSON object".to_string(),
            })?;

        if let Some(rt) = obj.get("resourceType").and_then(|v| v.as_str()) {
            if rt != resource_type {
                return Err(ExtractionError::InvalidResource {
                    message: format!(
                        "Resource type mismatch: expected {}, got {}",
                        resource_type, rt
                    ),
                });
            }
        }

        let params = self.registry.read().params_for(resource_type);

        let mut results = Vec::new();
        for param in &params {
            match self.extract_for_param(resource, resource_type, param) {
                Ok(values) => results.extend(values),
                Err(e) => {
                    tracing::warn!(
                        resource_type = %resource_type,
                        param = %param.code,
                        "Skipping search parameter: {}",
                        e
                    );
                }
            }
        }

        Ok(results)
    }

    /// Extracts values for a specific parameter from a resource.
    pub fn extract_for_param(
        &self,
        resource: &Value,
        resource_type: &str,
        param: &SearchParameterDefinition,
    ) -> Result<Vec<ExtractedValue>, ExtractionError> {
        if param.expression.is_empty() || param.param_type == SearchParamType::Composite {
            return Ok(Vec::new());
        }

        let mut results = Vec::new();
        for value in evaluate(resource, resource_type, &param.code, &param.expression)? {
            for converted in ValueConverter::convert(value, param.param_type, &param.code)? {
                results.push(ExtractedValue {
                    param_name: param.code.clone(),
                    param_type: param.param_type,
                    path: param.expression.clone(),
                    value: converted,
                });
            }
        }

        Ok(results)
    }
}

/// Evaluates an expression, returning every value it reaches.
pub fn evaluate<'a>(
    resource: &'a Value,
    resource_type: &str,
    param_name: &str,
    expression: &str,
) -> Result<Vec<&'a Value>, ExtractionError> {
    let mut results = Vec::new();
    for branch in split_top_level(expression, '|') {
        let Some(segments) = parse_branch(branch, resource_type).map_err(|_| {
            ExtractionError::UnsupportedExpression {
                param_name: param_name.to_string(),
                expression: expression.to_string(),
            }
        })?
        else {
            continue;
        };
        navigate(resource, &segments, &mut results);
    }
    Ok(results)
}

/// Parses one union branch into field names.
///
/// Returns `Ok(None)` when the branch targets another resource type.
fn parse_branch(branch: &str, resource_type: &str) -> Result<Option<Vec<String>>, ()> {
    let branch = strip_outer_parens(branch.trim());

    let (path, cast) = match branch.rsplit_once(" as ") {
        Some((path, type_name)) => (path.trim(), Some(type_name.trim())),
        None => (branch, None),
    };

    let mut parts = split_top_level(path, '.').into_iter();
    let head = parts.next().ok_or(())?.trim();
    if head != resource_type && head != "Resource" && head != "DomainResource" {
        return Ok(None);
    }

    let mut segments: Vec<String> = Vec::new();
    for part in parts {
        let part = part.trim();
        match part.split_once('(') {
            None if !part.is_empty() => segments.push(part.to_string()),
            Some(("where", _)) | Some(("resolve", _)) => {}
            Some(("ofType", arg)) => {
                let type_name = arg.strip_suffix(')').ok_or(())?.trim();
                select_type(&mut segments, type_name)?;
            }
            _ => return Err(()),
        }
    }

    if let Some(type_name) = cast {
        select_type(&mut segments, type_name)?;
    }

    Ok(Some(segments))
}

/// Turns the trailing choice element `value` into `valueQuantity` for `Quantity`.
fn select_type(segments: &mut [String], type_name: &str) -> Result<(), ()> {
    let last = segments.last_mut().ok_or(())?;
    let mut chars = type_name.chars();
    let first = chars.next().ok_or(())?;
    last.push(first.to_ascii_uppercase());
    last.push_str(chars.as_str());
    Ok(())
}

fn navigate<'a>(value: &'a Value, segments: &[String], out: &mut Vec<&'a Value>) {
    let Some((name, rest)) = segments.split_first() else {
        match value {
            Value::Array(items) => out.extend(items.iter()),
            other => out.push(other),
        }
        return;
    };

    match value {
        Value::Object(obj) => {
            if let Some(child) = obj.get(name) {
                navigate(child, rest, out);
                return;
            }
            // Choice elements: "effective" matches "effectiveDateTime"
            for (key, child) in obj {
                let is_choice = key
                    .strip_prefix(name.as_str())
                    .and_then(|suffix| suffix.chars().next())
                    .is_some_and(|c| c.is_ascii_uppercase());
                if is_choice {
                    navigate(child, rest, out);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                navigate(item, segments, out);
            }
        }
        _ => {}
    }
}

fn split_top_level(expression: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in expression.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(&expression[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&expression[start..]);
    parts
}

fn strip_outer_parens(expression: &str) -> &str {
    let Some(inner) = expression
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
    else {
        return expression;
    };

    // "(a).b(c)" must not lose its parentheses
    let mut depth = 0i32;
    for c in inner.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return expression;
        }
    }
    inner.trim()
}
