//! Search parameter and query types.
//!
//! This module defines the parameter types understood by the indexer, the
//! comparison prefixes for ordered values, and the typed query accepted by
//! [`ResourceStorage::search`](crate::core::ResourceStorage::search).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite search parameter that combines others.
    Composite,
    /// Special search parameters (e.g. `Location.near`).
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Composite => write!(f, "composite"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "composite" => Ok(SearchParamType::Composite),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Comparison prefixes for number, quantity and date filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

/// Precision of a partial date or dateTime value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    /// `YYYY`
    Year,
    /// `YYYY-MM`
    Month,
    /// `YYYY-MM-DD`
    Day,
    /// `YYYY-MM-DDThh:mm`
    Minute,
    /// `YYYY-MM-DDThh:mm:ss`
    Second,
    /// Fractional seconds.
    Millisecond,
}

impl DatePrecision {
    /// Infers the precision of an ISO 8601 date or dateTime string.
    pub fn from_date_string(s: &str) -> Self {
        let base = match s.split_once('T') {
            Some((date, time)) => {
                let time = time.split(['Z', '+', '-']).next().unwrap_or(time);
                date.len() + 1 + time.len()
            }
            None => s.len(),
        };

        match base {
            4 => DatePrecision::Year,
            7 => DatePrecision::Month,
            10 => DatePrecision::Day,
            16 => DatePrecision::Minute,
            19 => DatePrecision::Second,
            _ => DatePrecision::Millisecond,
        }
    }

    /// Returns true when the value carries a time component.
    pub fn has_time(&self) -> bool {
        matches!(
            self,
            DatePrecision::Minute | DatePrecision::Second | DatePrecision::Millisecond
        )
    }
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatePrecision::Year => write!(f, "year"),
            DatePrecision::Month => write!(f, "month"),
            DatePrecision::Day => write!(f, "day"),
            DatePrecision::Minute => write!(f, "minute"),
            DatePrecision::Second => write!(f, "second"),
            DatePrecision::Millisecond => write!(f, "millisecond"),
        }
    }
}

/// An inclusive instant range covered by a partial date or dateTime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    /// First covered instant.
    pub start: DateTime<Utc>,
    /// Last covered instant (inclusive, millisecond resolution).
    pub end: DateTime<Utc>,
    /// Precision of the source value.
    pub precision: DatePrecision,
}

impl DateRange {
    /// Parses `YYYY`, `YYYY-MM`, `YYYY-MM-DD` or an RFC 3339 dateTime and
    /// widens it to the instants it covers.
    ///
    /// Dates without an offset are interpreted as UTC.
    pub fn parse(value: &str) -> Option<Self> {
        let precision = DatePrecision::from_date_string(value);
        match precision {
            DatePrecision::Year => {
                let year: i32 = value.parse().ok()?;
                let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
                let next = NaiveDate::from_ymd_opt(year + 1, 1, 1)?;
                Some(Self::from_days(start, next, precision))
            }
            DatePrecision::Month => {
                let (y, m) = value.split_once('-')?;
                let (year, month): (i32, u32) = (y.parse().ok()?, m.parse().ok()?);
                let start = NaiveDate::from_ymd_opt(year, month, 1)?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                Some(Self::from_days(start, next, precision))
            }
            DatePrecision::Day => {
                let start = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
                let next = start.succ_opt()?;
                Some(Self::from_days(start, next, precision))
            }
            DatePrecision::Minute => {
                let instant = parse_minute_precision(value)?;
                Some(Self {
                    start: instant,
                    end: instant + Duration::minutes(1) - Duration::milliseconds(1),
                    precision,
                })
            }
            DatePrecision::Second | DatePrecision::Millisecond => {
                let instant = DateTime::parse_from_rfc3339(value)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
                    .or_else(|| {
                        NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                            .ok()
                            .map(|naive| Utc.from_utc_datetime(&naive))
                    })?;
                let width = if precision == DatePrecision::Second {
                    Duration::seconds(1)
                } else {
                    Duration::milliseconds(1)
                };
                Some(Self {
                    start: instant,
                    end: instant + width - Duration::milliseconds(1),
                    precision,
                })
            }
        }
    }

    fn from_days(start: NaiveDate, next: NaiveDate, precision: DatePrecision) -> Self {
        let start = Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN));
        let next = Utc.from_utc_datetime(&next.and_time(chrono::NaiveTime::MIN));
        Self {
            start,
            end: next - Duration::milliseconds(1),
            precision,
        }
    }

    /// Start of the range in epoch milliseconds.
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    /// End of the range in epoch milliseconds.
    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Start of the range in days since the Unix epoch.
    pub fn start_epoch_day(&self) -> i64 {
        self.start.timestamp().div_euclid(SECONDS_PER_DAY)
    }

    /// End of the range in days since the Unix epoch.
    pub fn end_epoch_day(&self) -> i64 {
        self.end.timestamp().div_euclid(SECONDS_PER_DAY)
    }
}

const SECONDS_PER_DAY: i64 = 86_400;

fn parse_minute_precision(value: &str) -> Option<DateTime<Utc>> {
    // "2024-01-15T10:30" with an optional "Z" or "+hh:mm" suffix
    let head = value.get(..16)?;
    let offset = match value.get(16..)? {
        "" => "Z",
        offset => offset,
    };
    let with_seconds = format!("{}:00{}", head, offset);
    DateTime::parse_from_rfc3339(&with_seconds)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Matching mode for string filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    /// Case-insensitive prefix match (default).
    #[default]
    StartsWith,
    /// Case-sensitive exact match.
    Exact,
    /// Case-insensitive substring match.
    Contains,
}

/// A single typed filter of a [`SearchQuery`].
///
/// Each variant names the search parameter by its code (for example `family`
/// or `_lastUpdated`) and is matched against the index table for that type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SearchFilter {
    String {
        name: String,
        value: String,
        #[serde(default)]
        matching: StringMatch,
    },
    Token {
        name: String,
        system: Option<String>,
        code: String,
    },
    Reference {
        name: String,
        reference: String,
    },
    Uri {
        name: String,
        uri: String,
    },
    Number {
        name: String,
        #[serde(default)]
        prefix: SearchPrefix,
        value: f64,
    },
    Quantity {
        name: String,
        #[serde(default)]
        prefix: SearchPrefix,
        value: f64,
        system: Option<String>,
        code: Option<String>,
    },
    /// Matches both date and dateTime index rows.
    Date {
        name: String,
        #[serde(default)]
        prefix: SearchPrefix,
        value: String,
    },
    /// Matches positions within `distance_km` of the given point.
    Near {
        name: String,
        latitude: f64,
        longitude: f64,
        distance_km: f64,
    },
}

impl SearchFilter {
    /// Creates a default (starts-with) string filter.
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        SearchFilter::String {
            name: name.into(),
            value: value.into(),
            matching: StringMatch::StartsWith,
        }
    }

    /// Creates a token filter on code only.
    pub fn token(name: impl Into<String>, code: impl Into<String>) -> Self {
        SearchFilter::Token {
            name: name.into(),
            system: None,
            code: code.into(),
        }
    }

    /// Creates a reference filter.
    pub fn reference(name: impl Into<String>, reference: impl Into<String>) -> Self {
        SearchFilter::Reference {
            name: name.into(),
            reference: reference.into(),
        }
    }

    /// Creates a date filter.
    pub fn date(name: impl Into<String>, prefix: SearchPrefix, value: impl Into<String>) -> Self {
        SearchFilter::Date {
            name: name.into(),
            prefix,
            value: value.into(),
        }
    }

    /// Returns the parameter code this filter targets.
    pub fn name(&self) -> &str {
        match self {
            SearchFilter::String { name, .. }
            | SearchFilter::Token { name, .. }
            | SearchFilter::Reference { name, .. }
            | SearchFilter::Uri { name, .. }
            | SearchFilter::Number { name, .. }
            | SearchFilter::Quantity { name, .. }
            | SearchFilter::Date { name, .. }
            | SearchFilter::Near { name, .. } => name,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending order (default).
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses a sort parameter value (e.g., "-_lastUpdated" for descending).
    pub fn parse(s: &str) -> Self {
        if let Some(stripped) = s.strip_prefix('-') {
            Self {
                parameter: stripped.to_string(),
                direction: SortDirection::Descending,
            }
        } else {
            Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            }
        }
    }
}

/// A typed query over one resource type.
///
/// Filters are AND-ed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The resource type being searched.
    pub resource_type: String,

    /// Filters that every result must satisfy.
    pub filters: Vec<SearchFilter>,

    /// Sort directive.
    pub sort: Option<SortDirective>,

    /// Maximum number of results.
    pub count: Option<u32>,

    /// Number of results to skip.
    pub offset: Option<u32>,
}

impl SearchQuery {
    /// Creates a query matching every record of a type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Adds a filter.
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the sort directive.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the page size.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the number of results to skip.
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}
