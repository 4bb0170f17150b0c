//! Typed search over the index tables.
//!
//! Each filter becomes an `r.record_key IN (SELECT record_key FROM <table> ...)`
//! clause against the index table of its type; clauses are AND-ed.
//!
//! Near filters are resolved in Rust. Their matching keys are staged in the
//! connection's `temp.near_matches` table, one slot per filter, so the
//! statement never binds more than a handful of parameters.

use std::collections::BTreeSet;

use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{Connection, ToSql, params_from_iter};

use crate::error::{SearchError, StorageError, StorageResult, ValidationError};
use crate::journal::JournalConfig;
use crate::search::{LAST_UPDATED, LOCAL_LAST_UPDATED, SearchParameterRegistry};
use crate::types::{
    DateRange, SearchFilter, SearchParamType, SearchPrefix, SearchQuery, SortDirection,
    StoredResource, StringMatch,
};

use super::SqliteBackend;
use super::storage::{RECORD_COLUMNS, RawRecord};

const EARTH_RADIUS_KM: f64 = 6371.0;
const KM_PER_DEGREE: f64 = 111.32;
const MILLIS_PER_DAY: i64 = 86_400_000;

/// A fragment of SQL with bound parameters.
#[derive(Debug, Clone, Default)]
pub(crate) struct SqlFragment {
    /// The SQL text.
    pub sql: String,
    /// Bound parameter values, numbered from `?1`.
    pub params: Vec<SqlParam>,
}

/// A bound SQL parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam {
    String(String),
    Integer(i64),
    Float(f64),
}

impl ToSql for SqlParam {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlParam::String(s) => ToSqlOutput::from(s.as_str()),
            SqlParam::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            SqlParam::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
        })
    }
}

impl SqlFragment {
    /// Adds a parameter and returns its placeholder.
    pub fn add_param(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("?{}", self.params.len())
    }

    fn push_str(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }
}

/// Translates a [`SearchQuery`] into SQL over `resources r`.
pub(crate) struct QueryBuilder<'a> {
    query: &'a SearchQuery,
    registry: &'a SearchParameterRegistry,
    max_params: usize,
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(query: &'a SearchQuery, registry: &'a SearchParameterRegistry) -> Self {
        Self {
            query,
            registry,
            max_params: JournalConfig::default().max_sql_params,
        }
    }

    /// Caps the parameters bound by one staging statement.
    pub(crate) fn with_max_params(mut self, max_params: usize) -> Self {
        self.max_params = max_params.max(1);
        self
    }

    /// Builds the paged, sorted select.
    pub(crate) fn build_search(&self, conn: &Connection) -> StorageResult<SqlFragment> {
        let mut fragment = SqlFragment::default();
        fragment.push_str(&format!("SELECT {} FROM resources r", RECORD_COLUMNS));
        self.push_where(conn, &mut fragment)?;
        self.push_order(&mut fragment)?;

        if let Some(count) = self.query.count {
            let limit = fragment.add_param(SqlParam::Integer(i64::from(count)));
            fragment.push_str(&format!(" LIMIT {}", limit));
        } else if self.query.offset.is_some() {
            fragment.push_str(" LIMIT -1");
        }
        if let Some(offset) = self.query.offset {
            let offset = fragment.add_param(SqlParam::Integer(i64::from(offset)));
            fragment.push_str(&format!(" OFFSET {}", offset));
        }
        Ok(fragment)
    }

    /// Builds a count over the same filters, ignoring sort and paging.
    pub(crate) fn build_count(&self, conn: &Connection) -> StorageResult<SqlFragment> {
        let mut fragment = SqlFragment::default();
        fragment.push_str("SELECT COUNT(*) FROM resources r");
        self.push_where(conn, &mut fragment)?;
        Ok(fragment)
    }

    fn push_where(&self, conn: &Connection, fragment: &mut SqlFragment) -> StorageResult<()> {
        let resource_type = fragment.add_param(SqlParam::String(self.query.resource_type.clone()));
        fragment.push_str(&format!(" WHERE r.resource_type = {}", resource_type));

        if self
            .query
            .filters
            .iter()
            .any(|filter| matches!(filter, SearchFilter::Near { .. }))
        {
            reset_near_matches(conn)?;
        }

        for (slot, filter) in self.query.filters.iter().enumerate() {
            self.check_parameter(filter.name())?;
            let clause = self.filter_clause(conn, slot, filter, fragment)?;
            fragment.push_str(&format!(" AND ({})", clause));
        }
        Ok(())
    }

    fn check_parameter(&self, code: &str) -> StorageResult<SearchParamType> {
        if code == LAST_UPDATED || code == LOCAL_LAST_UPDATED {
            return Ok(SearchParamType::Date);
        }
        self.registry
            .get_param(&self.query.resource_type, code)
            .map(|param| param.param_type)
            .ok_or_else(|| {
                StorageError::Search(SearchError::UnknownParameter {
                    resource_type: self.query.resource_type.clone(),
                    code: code.to_string(),
                })
            })
    }

    /// Opens `r.record_key IN (SELECT ...)` on an index table, binding type and name.
    fn subquery(&self, table: &str, name: &str, fragment: &mut SqlFragment) -> String {
        let resource_type = fragment.add_param(SqlParam::String(self.query.resource_type.clone()));
        let name = fragment.add_param(SqlParam::String(name.to_string()));
        format!(
            "r.record_key IN (SELECT record_key FROM {} WHERE resource_type = {} AND name = {}",
            table, resource_type, name
        )
    }

    fn filter_clause(
        &self,
        conn: &Connection,
        slot: usize,
        filter: &SearchFilter,
        fragment: &mut SqlFragment,
    ) -> StorageResult<String> {
        let clause = match filter {
            SearchFilter::String {
                name,
                value,
                matching,
            } => {
                let head = self.subquery("string_index", name, fragment);
                let condition = match matching {
                    StringMatch::Exact => {
                        format!("value = {}", fragment.add_param(SqlParam::String(value.clone())))
                    }
                    StringMatch::StartsWith => format!(
                        "value LIKE {} ESCAPE '\\'",
                        fragment.add_param(SqlParam::String(format!("{}%", escape_like(value))))
                    ),
                    StringMatch::Contains => format!(
                        "value LIKE {} ESCAPE '\\'",
                        fragment.add_param(SqlParam::String(format!("%{}%", escape_like(value))))
                    ),
                };
                format!("{} AND {})", head, condition)
            }
            SearchFilter::Token { name, system, code } => {
                let head = self.subquery("token_index", name, fragment);
                let code = fragment.add_param(SqlParam::String(code.clone()));
                match system {
                    Some(system) if system.is_empty() => {
                        format!("{} AND code = {} AND system IS NULL)", head, code)
                    }
                    Some(system) => {
                        let system = fragment.add_param(SqlParam::String(system.clone()));
                        format!("{} AND code = {} AND system = {})", head, code, system)
                    }
                    None => format!("{} AND code = {})", head, code),
                }
            }
            SearchFilter::Reference { name, reference } => {
                let head = self.subquery("reference_index", name, fragment);
                let value = fragment.add_param(SqlParam::String(reference.clone()));
                format!("{} AND value = {})", head, value)
            }
            SearchFilter::Uri { name, uri } => {
                let head = self.subquery("uri_index", name, fragment);
                let value = fragment.add_param(SqlParam::String(uri.clone()));
                format!("{} AND value = {})", head, value)
            }
            SearchFilter::Number {
                name,
                prefix,
                value,
            } => {
                let head = self.subquery("number_index", name, fragment);
                let value = fragment.add_param(SqlParam::Float(*value));
                format!("{} AND value {} {})", head, comparison(*prefix), value)
            }
            SearchFilter::Quantity {
                name,
                prefix,
                value,
                system,
                code,
            } => {
                let head = self.subquery("quantity_index", name, fragment);
                let value = fragment.add_param(SqlParam::Float(*value));
                let mut clause = format!("{} AND value {} {}", head, comparison(*prefix), value);
                if let Some(system) = system {
                    let system = fragment.add_param(SqlParam::String(system.clone()));
                    clause.push_str(&format!(" AND system = {}", system));
                }
                if let Some(code) = code {
                    let code = fragment.add_param(SqlParam::String(code.clone()));
                    clause.push_str(&format!(" AND code = {}", code));
                }
                clause.push(')');
                clause
            }
            SearchFilter::Date {
                name,
                prefix,
                value,
            } => {
                let range = DateRange::parse(value).ok_or_else(|| {
                    StorageError::Validation(ValidationError::InvalidResource {
                        message: format!("Invalid date search value '{}'", value),
                    })
                })?;
                let days = range_condition(
                    "from_day",
                    "to_day",
                    *prefix,
                    range.start_epoch_day(),
                    range.end_epoch_day(),
                    fragment,
                );
                let date_head = self.subquery("date_index", name, fragment);
                let date_clause = format!("{} AND {})", date_head, days);

                let millis = range_condition(
                    "from_ms",
                    "to_ms",
                    *prefix,
                    range.start_millis(),
                    range.end_millis(),
                    fragment,
                );
                let time_head = self.subquery("datetime_index", name, fragment);
                let time_clause = format!("{} AND {})", time_head, millis);

                format!("{} OR {}", date_clause, time_clause)
            }
            SearchFilter::Near {
                name,
                latitude,
                longitude,
                distance_km,
            } => {
                let keys = self.keys_near(conn, name, *latitude, *longitude, *distance_km)?;
                let slot = slot as i64;
                self.stage_near_matches(conn, slot, &keys)?;
                let slot = fragment.add_param(SqlParam::Integer(slot));
                format!(
                    "r.record_key IN (SELECT record_key FROM temp.near_matches WHERE slot = {})",
                    slot
                )
            }
        };
        Ok(clause)
    }

    /// Record keys with a position row within `distance_km` of the point.
    ///
    /// A bounding box narrows candidates in SQL; great-circle distance is
    /// checked per row.
    fn keys_near(
        &self,
        conn: &Connection,
        name: &str,
        latitude: f64,
        longitude: f64,
        distance_km: f64,
    ) -> StorageResult<BTreeSet<String>> {
        let lat_delta = distance_km / KM_PER_DEGREE;
        let cos_lat = latitude.to_radians().cos();
        let lon_delta = if cos_lat.abs() < 1e-6 {
            180.0
        } else {
            (distance_km / (KM_PER_DEGREE * cos_lat.abs())).min(180.0)
        };

        let params = [
            SqlParam::String(self.query.resource_type.clone()),
            SqlParam::String(name.to_string()),
            SqlParam::Float(latitude - lat_delta),
            SqlParam::Float(latitude + lat_delta),
            SqlParam::Float(longitude - lon_delta),
            SqlParam::Float(longitude + lon_delta),
        ];
        let mut stmt = conn.prepare_cached(
            "SELECT record_key, latitude, longitude FROM position_index
             WHERE resource_type = ?1 AND name = ?2
               AND latitude BETWEEN ?3 AND ?4
               AND longitude BETWEEN ?5 AND ?6",
        )?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
            ))
        })?;

        let mut keys = BTreeSet::new();
        for row in rows {
            let (key, lat, lon) = row?;
            if haversine_km(latitude, longitude, lat, lon) <= distance_km {
                keys.insert(key);
            }
        }
        Ok(keys)
    }

    /// Writes `keys` into the staging table under `slot`, in multi-row
    /// inserts of at most `max_params` parameters each.
    fn stage_near_matches(
        &self,
        conn: &Connection,
        slot: i64,
        keys: &BTreeSet<String>,
    ) -> StorageResult<()> {
        let keys: Vec<&String> = keys.iter().collect();
        let rows_per_insert = (self.max_params / 2).max(1);
        for chunk in keys.chunks(rows_per_insert) {
            let mut params = Vec::with_capacity(chunk.len() * 2);
            let mut rows = Vec::with_capacity(chunk.len());
            for key in chunk {
                params.push(SqlParam::Integer(slot));
                params.push(SqlParam::String((*key).clone()));
                rows.push(format!("(?{}, ?{})", params.len() - 1, params.len()));
            }
            let sql = format!(
                "INSERT INTO temp.near_matches (slot, record_key) VALUES {}",
                rows.join(", ")
            );
            conn.execute(&sql, params_from_iter(params.iter()))?;
        }
        Ok(())
    }

    fn push_order(&self, fragment: &mut SqlFragment) -> StorageResult<()> {
        let Some(sort) = &self.query.sort else {
            fragment.push_str(" ORDER BY r.rowid");
            return Ok(());
        };

        let (aggregate, direction) = match sort.direction {
            SortDirection::Ascending => ("MIN", "ASC"),
            SortDirection::Descending => ("MAX", "DESC"),
        };
        let param_type = self.check_parameter(&sort.parameter)?;
        let name = fragment.add_param(SqlParam::String(sort.parameter.clone()));

        let key = match param_type {
            SearchParamType::Date => format!(
                "COALESCE({}, {} * {})",
                sort_subquery(aggregate, "from_ms", "datetime_index", &name),
                sort_subquery(aggregate, "from_day", "date_index", &name),
                MILLIS_PER_DAY
            ),
            SearchParamType::String => sort_subquery(aggregate, "value", "string_index", &name),
            SearchParamType::Number => sort_subquery(aggregate, "value", "number_index", &name),
            SearchParamType::Quantity => sort_subquery(aggregate, "value", "quantity_index", &name),
            SearchParamType::Token => sort_subquery(aggregate, "code", "token_index", &name),
            SearchParamType::Uri => sort_subquery(aggregate, "value", "uri_index", &name),
            SearchParamType::Reference => {
                sort_subquery(aggregate, "value", "reference_index", &name)
            }
            SearchParamType::Composite | SearchParamType::Special => {
                return Err(StorageError::Search(SearchError::UnknownParameter {
                    resource_type: self.query.resource_type.clone(),
                    code: sort.parameter.clone(),
                }));
            }
        };

        fragment.push_str(&format!(" ORDER BY {} {}, r.rowid", key, direction));
        Ok(())
    }
}

fn sort_subquery(aggregate: &str, column: &str, table: &str, name: &str) -> String {
    format!(
        "(SELECT {}({}) FROM {} s WHERE s.record_key = r.record_key AND s.name = {})",
        aggregate, column, table, name
    )
}

fn comparison(prefix: SearchPrefix) -> &'static str {
    match prefix {
        SearchPrefix::Eq => "=",
        SearchPrefix::Ne => "!=",
        SearchPrefix::Gt => ">",
        SearchPrefix::Lt => "<",
        SearchPrefix::Ge => ">=",
        SearchPrefix::Le => "<=",
    }
}

/// Range comparison of an indexed `[from, to]` against the query `[start, end]`.
fn range_condition(
    from: &str,
    to: &str,
    prefix: SearchPrefix,
    start: i64,
    end: i64,
    fragment: &mut SqlFragment,
) -> String {
    let start = fragment.add_param(SqlParam::Integer(start));
    let end = fragment.add_param(SqlParam::Integer(end));
    match prefix {
        SearchPrefix::Eq => format!("{from} >= {start} AND {to} <= {end}"),
        SearchPrefix::Ne => format!("NOT ({from} >= {start} AND {to} <= {end})"),
        SearchPrefix::Gt => format!("{to} > {end}"),
        SearchPrefix::Lt => format!("{from} < {start}"),
        SearchPrefix::Ge => format!("{to} >= {start}"),
        SearchPrefix::Le => format!("{from} <= {end}"),
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Creates the connection's staging table if needed and empties it.
fn reset_near_matches(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TEMP TABLE IF NOT EXISTS near_matches (
             slot INTEGER NOT NULL,
             record_key TEXT NOT NULL
         );
         DELETE FROM temp.near_matches;",
    )?;
    Ok(())
}

impl SqliteBackend {
    pub(crate) fn search_records(
        &self,
        conn: &Connection,
        query: &SearchQuery,
    ) -> StorageResult<Vec<StoredResource>> {
        let fragment = {
            let registry = self.search_registry().read();
            QueryBuilder::new(query, &registry)
                .with_max_params(self.journal_config().max_sql_params)
                .build_search(conn)?
        };
        tracing::debug!(
            resource_type = %query.resource_type,
            filters = query.filters.len(),
            sql = %fragment.sql,
            "Executing search"
        );

        let mut stmt = conn.prepare(&fragment.sql)?;
        let rows = stmt.query_map(params_from_iter(fragment.params.iter()), RawRecord::from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(self.to_stored(row?)?);
        }
        Ok(results)
    }

    pub(crate) fn count_records(&self, conn: &Connection, query: &SearchQuery) -> StorageResult<u64> {
        let fragment = {
            let registry = self.search_registry().read();
            QueryBuilder::new(query, &registry)
                .with_max_params(self.journal_config().max_sql_params)
                .build_count(conn)?
        };
        let count: i64 = conn.query_row(
            &fragment.sql,
            params_from_iter(fragment.params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
