//! Value Converters for Search Index.
//!
//! Converts values reached by a search parameter expression into typed
//! index values. Each FHIR data type is mapped to one index kind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{DateRange, SearchParamType};

use super::errors::ExtractionError;

/// Coding system used for Money amounts.
pub const CURRENCY_SYSTEM: &str = "urn:iso:std:iso:4217";

/// A value extracted and converted for the search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexValue {
    /// Free text for string parameters.
    String(String),

    /// Token value (code with optional system).
    Token {
        /// Code system URI (e.g., "http://loinc.org").
        system: Option<String>,
        /// Code value.
        code: String,
    },

    /// Reference to another resource ("Type/id" or absolute URL).
    Reference(String),

    /// Quantity or Money value.
    Quantity {
        /// Unit system URI.
        system: Option<String>,
        /// Unit or currency code.
        code: Option<String>,
        /// Numeric value.
        value: f64,
    },

    /// URI value.
    Uri(String),

    /// A date without a time part, as an inclusive epoch-day range.
    Date {
        /// First covered day.
        from_day: i64,
        /// Last covered day.
        to_day: i64,
    },

    /// A dateTime, instant, Period or Timing as an inclusive epoch-millisecond range.
    DateTime {
        /// First covered millisecond.
        from_ms: i64,
        /// Last covered millisecond.
        to_ms: i64,
    },

    /// Numeric value.
    Number(f64),

    /// Geographic position in decimal degrees.
    Position {
        /// Latitude.
        latitude: f64,
        /// Longitude.
        longitude: f64,
    },
}

impl IndexValue {
    /// Creates a token index value.
    pub fn token(system: Option<String>, code: impl Into<String>) -> Self {
        IndexValue::Token {
            system,
            code: code.into(),
        }
    }

    /// Creates a date or dateTime index value from a partial date string.
    ///
    /// Values without a time part become [`IndexValue::Date`].
    pub fn date(value: &str) -> Option<Self> {
        let range = DateRange::parse(value)?;
        if value.contains('T') {
            Some(IndexValue::DateTime {
                from_ms: range.start_millis(),
                to_ms: range.end_millis(),
            })
        } else {
            Some(IndexValue::Date {
                from_day: range.start_epoch_day(),
                to_day: range.end_epoch_day(),
            })
        }
    }

    /// Returns the parameter type this value is appropriate for.
    pub fn param_type(&self) -> SearchParamType {
        match self {
            IndexValue::String(_) => SearchParamType::String,
            IndexValue::Token { .. } => SearchParamType::Token,
            IndexValue::Reference(_) => SearchParamType::Reference,
            IndexValue::Quantity { .. } => SearchParamType::Quantity,
            IndexValue::Uri(_) => SearchParamType::Uri,
            IndexValue::Date { .. } | IndexValue::DateTime { .. } => SearchParamType::Date,
            IndexValue::Number(_) => SearchParamType::Number,
            IndexValue::Position { .. } => SearchParamType::Special,
        }
    }
}

const NAME_PARTS: &[&str] = &["prefix", "given", "family", "suffix"];
const ADDRESS_PARTS: &[&str] = &["line", "city", "district", "state", "postalCode", "country"];

/// Converter for transforming JSON values to index values.
pub struct ValueConverter;

impl ValueConverter {
    /// Converts a JSON value to index values based on the target parameter type.
    ///
    /// May return multiple values for arrays or complex types.
    pub fn convert(
        value: &Value,
        target_type: SearchParamType,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match value {
            Value::Array(arr) => {
                let mut results = Vec::new();
                for item in arr {
                    results.extend(Self::convert_single(item, target_type, param_name)?);
                }
                Ok(results)
            }
            _ => Self::convert_single(value, target_type, param_name),
        }
    }

    fn convert_single(
        value: &Value,
        target_type: SearchParamType,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match target_type {
            SearchParamType::String => Ok(Self::convert_to_string(value)),
            SearchParamType::Token => Ok(Self::convert_to_token(value)),
            SearchParamType::Reference => Ok(Self::convert_to_reference(value)),
            SearchParamType::Quantity => Ok(Self::convert_to_quantity(value)),
            SearchParamType::Uri => Ok(value
                .as_str()
                .map(|s| vec![IndexValue::Uri(s.to_string())])
                .unwrap_or_default()),
            SearchParamType::Date => Self::convert_to_date(value, param_name),
            SearchParamType::Number => Self::convert_to_number(value, param_name),
            SearchParamType::Special => Self::convert_to_position(value, param_name),
            SearchParamType::Composite => Ok(Vec::new()),
        }
    }

    fn convert_to_string(value: &Value) -> Vec<IndexValue> {
        match value {
            Value::String(s) if !s.is_empty() => vec![IndexValue::String(s.clone())],
            Value::Object(obj) => {
                // HumanName or Address: the text rendering wins over parts
                if let Some(text) = obj.get("text").and_then(|v| v.as_str()) {
                    return vec![IndexValue::String(text.to_string())];
                }
                let parts: Vec<&str> = NAME_PARTS
                    .iter()
                    .chain(ADDRESS_PARTS)
                    .flat_map(|field| string_values(obj, field))
                    .collect();
                if parts.is_empty() {
                    Vec::new()
                } else {
                    vec![IndexValue::String(parts.join(" "))]
                }
            }
            _ => Vec::new(),
        }
    }

    fn convert_to_token(value: &Value) -> Vec<IndexValue> {
        match value {
            Value::String(s) => vec![IndexValue::token(None, s.clone())],
            Value::Bool(b) => vec![IndexValue::token(None, b.to_string())],
            Value::Object(obj) => {
                // CodeableConcept
                if let Some(coding) = obj.get("coding").and_then(|v| v.as_array()) {
                    return coding
                        .iter()
                        .filter_map(|c| c.as_object())
                        .filter_map(|c| coding_token(c, "code"))
                        .collect();
                }
                // Coding, then Identifier / ContactPoint
                coding_token(obj, "code")
                    .or_else(|| coding_token(obj, "value"))
                    .into_iter()
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn convert_to_reference(value: &Value) -> Vec<IndexValue> {
        let reference = match value {
            Value::String(s) => Some(s.as_str()),
            Value::Object(obj) => obj.get("reference").and_then(|v| v.as_str()),
            _ => None,
        };
        reference
            .map(|r| vec![IndexValue::Reference(r.to_string())])
            .unwrap_or_default()
    }

    fn convert_to_quantity(value: &Value) -> Vec<IndexValue> {
        let Some(obj) = value.as_object() else {
            return Vec::new();
        };
        let Some(amount) = obj.get("value").and_then(|v| v.as_f64()) else {
            return Vec::new();
        };

        // Money
        if let Some(currency) = obj.get("currency").and_then(|v| v.as_str()) {
            return vec![IndexValue::Quantity {
                system: Some(CURRENCY_SYSTEM.to_string()),
                code: Some(currency.to_string()),
                value: amount,
            }];
        }

        let code = obj
            .get("code")
            .or_else(|| obj.get("unit"))
            .and_then(|v| v.as_str())
            .map(String::from);
        vec![IndexValue::Quantity {
            system: obj.get("system").and_then(|v| v.as_str()).map(String::from),
            code,
            value: amount,
        }]
    }

    fn convert_to_date(
        value: &Value,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match value {
            Value::String(s) => IndexValue::date(s)
                .map(|v| vec![v])
                .ok_or_else(|| conversion_failed(param_name, "date", s)),
            Value::Object(obj) if obj.contains_key("event") || obj.contains_key("repeat") => {
                Ok(timing_range(obj).into_iter().collect())
            }
            Value::Object(obj) => Ok(period_range(obj).into_iter().collect()),
            _ => Ok(Vec::new()),
        }
    }

    fn convert_to_number(
        value: &Value,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match value {
            Value::Number(n) => n
                .as_f64()
                .map(|f| vec![IndexValue::Number(f)])
                .ok_or_else(|| conversion_failed(param_name, "number", &n.to_string())),
            Value::String(s) => s
                .parse::<f64>()
                .map(|f| vec![IndexValue::Number(f)])
                .map_err(|_| conversion_failed(param_name, "number", s)),
            _ => Ok(Vec::new()),
        }
    }

    /// Special parameters are indexed as positions (`Location.position`).
    fn convert_to_position(
        value: &Value,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        let Some(obj) = value.as_object() else {
            return Ok(Vec::new());
        };
        let latitude = obj.get("latitude").and_then(|v| v.as_f64());
        let longitude = obj.get("longitude").and_then(|v| v.as_f64());
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => Ok(vec![IndexValue::Position {
                latitude,
                longitude,
            }]),
            (None, None) => Ok(Vec::new()),
            _ => Err(conversion_failed(param_name, "position", &value.to_string())),
        }
    }
}

fn string_values<'a>(obj: &'a Map<String, Value>, field: &str) -> Vec<&'a str> {
    match obj.get(field) {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str()).collect(),
        _ => Vec::new(),
    }
}

fn coding_token(obj: &Map<String, Value>, code_field: &str) -> Option<IndexValue> {
    let code = obj.get(code_field).and_then(|v| v.as_str())?;
    let system = obj.get("system").and_then(|v| v.as_str()).map(String::from);
    Some(IndexValue::token(system, code))
}

/// Period bounds; a missing start is open to 0 and a missing end to `i64::MAX`.
fn period_range(obj: &Map<String, Value>) -> Option<IndexValue> {
    let start = obj
        .get("start")
        .and_then(|v| v.as_str())
        .and_then(DateRange::parse);
    let end = obj
        .get("end")
        .and_then(|v| v.as_str())
        .and_then(DateRange::parse);
    if start.is_none() && end.is_none() {
        return None;
    }
    Some(IndexValue::DateTime {
        from_ms: start.map(|r| r.start_millis()).unwrap_or(0),
        to_ms: end.map(|r| r.end_millis()).unwrap_or(i64::MAX),
    })
}

/// Timing spans its earliest to latest event, falling back to `repeat.boundsPeriod`.
fn timing_range(obj: &Map<String, Value>) -> Option<IndexValue> {
    let events: Vec<DateRange> = obj
        .get("event")
        .and_then(|v| v.as_array())
        .map(|events| {
            events
                .iter()
                .filter_map(|e| e.as_str())
                .filter_map(DateRange::parse)
                .collect()
        })
        .unwrap_or_default();

    if let (Some(from_ms), Some(to_ms)) = (
        events.iter().map(DateRange::start_millis).min(),
        events.iter().map(DateRange::end_millis).max(),
    ) {
        return Some(IndexValue::DateTime { from_ms, to_ms });
    }

    obj.get("repeat")
        .and_then(|r| r.get("boundsPeriod"))
        .and_then(|p| p.as_object())
        .and_then(period_range)
}

fn conversion_failed(param_name: &str, expected_type: &str, actual_value: &str) -> ExtractionError {
    ExtractionError::ConversionFailed {
        param_name: param_name.to_string(),
        expected_type: expected_type.to_string(),
        actual_value: actual_value.to_string(),
    }
}
