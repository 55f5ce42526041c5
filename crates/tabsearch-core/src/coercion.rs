//! Date column detection and epoch normalization.
//!
//! For every `date` column the candidate patterns are tried in a fixed order
//! and the first one that parses every non-null cell wins. Ambiguous columns
//! such as `01/02/2020` therefore resolve to the earlier candidate
//! (`%m/%d/%Y` before `%d/%m/%Y`). The winning pattern is then used to derive
//! `<column>_asEpoch` holding seconds since the Unix epoch at midnight UTC.
//! Full RFC 3339 datetimes are tried last and keep their exact instant.
//! Operators who need a different reading edit the schema instead.

use chrono::{DateTime, NaiveDate};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::schema::{ColumnSchema, FieldType, Schema, EPOCH_SECOND_FORMAT};
use crate::value::{DataTable, Value};

/// Candidate date patterns, in tie-break order.
pub const DATE_CANDIDATES: [&str; 6] = [
    "%Y-%m-%d",
    "%d-%m-%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    RFC3339_PATTERN,
];

/// Candidate for full datetimes with an offset.
pub const RFC3339_PATTERN: &str = "%+";

/// Suffix of derived epoch columns.
pub const EPOCH_SUFFIX: &str = "_asEpoch";

/// A non-fatal problem found while normalizing one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionDiagnostic {
    pub column: String,
    pub message: String,
}

/// What the coercion pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoercionReport {
    /// `(source column, derived column, detected pattern)`.
    pub converted: Vec<(String, String, String)>,
    pub diagnostics: Vec<CoercionDiagnostic>,
}

/// Name of the epoch column derived from `column`.
#[must_use]
pub fn epoch_column_name(column: &str) -> String {
    format!("{column}{EPOCH_SUFFIX}")
}

fn parse_cell(value: &Value, pattern: &str) -> Option<i64> {
    match value {
        Value::Timestamp(ts) => Some(ts.timestamp()),
        Value::String(s) if pattern == RFC3339_PATTERN => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.timestamp()),
        Value::String(s) => NaiveDate::parse_from_str(s.trim(), pattern)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp()),
        _ => None,
    }
}

/// Returns the first candidate that parses every non-missing cell.
///
/// A column with no non-missing cells matches nothing.
pub fn detect_date_format<'a, I>(values: I) -> Option<&'static str>
where
    I: IntoIterator<Item = &'a Value>,
{
    let present: Vec<&Value> = values.into_iter().filter(|v| !v.is_missing()).collect();
    if present.is_empty() {
        return None;
    }
    DATE_CANDIDATES
        .into_iter()
        .find(|pattern| present.iter().all(|v| parse_cell(v, pattern).is_some()))
}

/// Converts cells to epoch seconds under `pattern`; cells that do not parse
/// become `Null`.
pub fn to_epoch_seconds<'a, I>(values: I, pattern: &str) -> Vec<Value>
where
    I: IntoIterator<Item = &'a Value>,
{
    values
        .into_iter()
        .map(|v| parse_cell(v, pattern).map_or(Value::Null, Value::Integer))
        .collect()
}

/// Whether `column` is the epoch column of another date column in `schema`.
fn is_derived_column(schema: &Schema, column: &str) -> bool {
    column
        .strip_suffix(EPOCH_SUFFIX)
        .and_then(|source| schema.get(source))
        .is_some_and(ColumnSchema::is_date)
}

/// Derives an epoch column for each convertible `date` column and registers
/// it in the schema. Original columns are left untouched; columns that cannot
/// be converted are reported and skipped.
pub fn normalize_dates(schema: &mut Schema, data: &mut DataTable) -> Result<CoercionReport> {
    let mut report = CoercionReport::default();

    for column in schema.date_columns() {
        if is_derived_column(schema, &column) {
            continue;
        }
        if !data.has_column(&column) {
            debug!(column = %column, "date column not present in data, skipping");
            continue;
        }

        let Some(pattern) = detect_date_format(data.column(&column)) else {
            warn!(column = %column, "no candidate date format parses the whole column");
            report.diagnostics.push(CoercionDiagnostic {
                column: column.clone(),
                message: format!(
                    "could not detect a date format for column '{column}' (tried {}); left unconverted",
                    DATE_CANDIDATES.join(", ")
                ),
            });
            continue;
        };

        let derived = epoch_column_name(&column);
        let values = to_epoch_seconds(data.column(&column), pattern);
        data.push_column(&derived, values);
        schema.insert(ColumnSchema::new(&derived, FieldType::Date).with_format(EPOCH_SECOND_FORMAT))?;

        info!(column = %column, pattern, derived = %derived, "converted date column to epoch seconds");
        report
            .converted
            .push((column, derived, pattern.to_string()));
    }

    Ok(report)
}
