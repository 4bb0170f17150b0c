//! Typed index construction.
//!
//! [`ResourceIndexer`] turns a record into [`ResourceIndices`]: one list of
//! rows per index table. Rows are never patched; a write replaces the whole
//! set for its record.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::converters::IndexValue;
use super::errors::ExtractionError;
use super::extractor::{ExtractedValue, SearchParameterExtractor};
use super::registry::SearchParameterRegistry;

/// Name of the synthetic remote last-modified row.
pub const LAST_UPDATED: &str = "_lastUpdated";

/// Name of the synthetic local last-modified row.
pub const LOCAL_LAST_UPDATED: &str = "_localLastUpdated";

/// One index row: a parameter name, the path it was read from and its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry<V> {
    /// Search parameter code.
    pub name: String,
    /// Expression the value was read through.
    pub path: String,
    /// Typed value.
    pub value: V,
}

impl<V> IndexEntry<V> {
    fn new(name: impl Into<String>, path: impl Into<String>, value: V) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            value,
        }
    }
}

/// Token row value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenValue {
    /// Code system.
    pub system: Option<String>,
    /// Code.
    pub code: String,
}

/// Quantity row value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityValue {
    /// Unit system.
    pub system: Option<String>,
    /// Unit code.
    pub code: Option<String>,
    /// Amount.
    pub value: f64,
}

/// Date row value, an inclusive range of epoch days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    /// First day.
    pub from_day: i64,
    /// Last day.
    pub to_day: i64,
}

/// DateTime row value, an inclusive range of epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MillisRange {
    /// First millisecond.
    pub from_ms: i64,
    /// Last millisecond.
    pub to_ms: i64,
}

impl MillisRange {
    /// A range covering exactly one instant.
    pub fn instant(at: DateTime<Utc>) -> Self {
        let ms = at.timestamp_millis();
        Self {
            from_ms: ms,
            to_ms: ms,
        }
    }
}

/// Position row value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

/// The complete index row set of one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceIndices {
    /// String rows.
    pub string: Vec<IndexEntry<String>>,
    /// Token rows.
    pub token: Vec<IndexEntry<TokenValue>>,
    /// Reference rows.
    pub reference: Vec<IndexEntry<String>>,
    /// Quantity rows.
    pub quantity: Vec<IndexEntry<QuantityValue>>,
    /// URI rows.
    pub uri: Vec<IndexEntry<String>>,
    /// Date rows.
    pub date: Vec<IndexEntry<DayRange>>,
    /// DateTime rows, including the synthetic last-modified ones.
    pub date_time: Vec<IndexEntry<MillisRange>>,
    /// Number rows.
    pub number: Vec<IndexEntry<f64>>,
    /// Position rows.
    pub position: Vec<IndexEntry<Position>>,
}

impl ResourceIndices {
    /// Routes an extracted value to the row list of its kind.
    pub fn push(&mut self, extracted: ExtractedValue) {
        let ExtractedValue {
            param_name: name,
            path,
            value,
            ..
        } = extracted;

        match value {
            IndexValue::String(s) => self.string.push(IndexEntry::new(name, path, s)),
            IndexValue::Token { system, code } => self
                .token
                .push(IndexEntry::new(name, path, TokenValue { system, code })),
            IndexValue::Reference(r) => self.reference.push(IndexEntry::new(name, path, r)),
            IndexValue::Quantity {
                system,
                code,
                value,
            } => self.quantity.push(IndexEntry::new(
                name,
                path,
                QuantityValue {
                    system,
                    code,
                    value,
                },
            )),
            IndexValue::Uri(u) => self.uri.push(IndexEntry::new(name, path, u)),
            IndexValue::Date { from_day, to_day } => self
                .date
                .push(IndexEntry::new(name, path, DayRange { from_day, to_day })),
            IndexValue::DateTime { from_ms, to_ms } => self
                .date_time
                .push(IndexEntry::new(name, path, MillisRange { from_ms, to_ms })),
            IndexValue::Number(n) => self.number.push(IndexEntry::new(name, path, n)),
            IndexValue::Position {
                latitude,
                longitude,
            } => self.position.push(IndexEntry::new(
                name,
                path,
                Position {
                    latitude,
                    longitude,
                },
            )),
        }
    }

    /// Adds the synthetic last-modified rows.
    pub fn add_last_updated(
        &mut self,
        remote: Option<DateTime<Utc>>,
        local: Option<DateTime<Utc>>,
    ) {
        if let Some(remote) = remote {
            self.date_time.push(IndexEntry::new(
                LAST_UPDATED,
                LAST_UPDATED,
                MillisRange::instant(remote),
            ));
        }
        if let Some(local) = local {
            self.date_time.push(IndexEntry::new(
                LOCAL_LAST_UPDATED,
                LOCAL_LAST_UPDATED,
                MillisRange::instant(local),
            ));
        }
    }

    /// Total number of rows across all kinds.
    pub fn len(&self) -> usize {
        self.string.len()
            + self.token.len()
            + self.reference.len()
            + self.quantity.len()
            + self.uri.len()
            + self.date.len()
            + self.date_time.len()
            + self.number.len()
            + self.position.len()
    }

    /// Returns true when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds index rows for records using the shared registry.
pub struct ResourceIndexer {
    extractor: SearchParameterExtractor,
}

impl ResourceIndexer {
    /// Creates an indexer over the given registry.
    pub fn new(registry: Arc<RwLock<SearchParameterRegistry>>) -> Self {
        Self {
            extractor: SearchParameterExtractor::new(registry),
        }
    }

    /// Computes the index rows of a record's content.
    pub fn index(
        &self,
        resource: &Value,
        resource_type: &str,
    ) -> Result<ResourceIndices, ExtractionError> {
        let mut indices = ResourceIndices::default();
        for value in self.extractor.extract(resource, resource_type)? {
            indices.push(value);
        }
        Ok(indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn indexer() -> ResourceIndexer {
        ResourceIndexer::new(Arc::new(RwLock::new(
            SearchParameterRegistry::with_embedded(),
        )))
    }

    #[test]
    fn test_index_observation() {
        let observation = json!({
            "resourceType": "Observation",
            "id": "o1",
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
            "subject": {"reference": "Patient/p1"},
            "effectivePeriod": {"start": "1970-01-01T00:00:00Z"},
            "valueQuantity": {"value": 72, "system": "http://unitsofmeasure.org", "code": "/min"}
        });

        let indices = indexer().index(&observation, "Observation").unwrap();

        assert!(indices.token.iter().any(|t| t.name == "code"
            && t.value.system.as_deref() == Some("http://loinc.org")
            && t.value.code == "8867-4"));
        assert!(indices.token.iter().any(|t| t.name == "_id" && t.value.code == "o1"));
        assert_eq!(
            indices
                .reference
                .iter()
                .filter(|r| r.value == "Patient/p1")
                .count(),
            2
        );
        assert_eq!(indices.quantity.len(), 1);
        assert_eq!(indices.quantity[0].value.value, 72.0);
        assert_eq!(
            indices.date_time,
            vec![IndexEntry::new(
                "date",
                "Observation.effective",
                MillisRange {
                    from_ms: 0,
                    to_ms: i64::MAX
                }
            )]
        );
        assert!(indices.string.is_empty());
    }

    #[test]
    fn test_index_location_position() {
        let location = json!({
            "resourceType": "Location",
            "name": "Clinic",
            "position": {"latitude": 52.37, "longitude": 4.89}
        });
        let indices = indexer().index(&location, "Location").unwrap();
        assert_eq!(
            indices.position[0].value,
            Position {
                latitude: 52.37,
                longitude: 4.89
            }
        );
        assert_eq!(indices.string[0].value, "Clinic");
    }

    #[test]
    fn test_last_updated_rows() {
        let mut indices = ResourceIndices::default();
        let at = DateTime::from_timestamp_millis(1_000).unwrap();
        indices.add_last_updated(None, Some(at));
        assert_eq!(indices.len(), 1);
        assert_eq!(indices.date_time[0].name, LOCAL_LAST_UPDATED);
        assert_eq!(
            indices.date_time[0].value,
            MillisRange {
                from_ms: 1_000,
                to_ms: 1_000
            }
        );

        indices.add_last_updated(Some(at), None);
        assert_eq!(indices.date_time[1].name, LAST_UPDATED);
    }
}
