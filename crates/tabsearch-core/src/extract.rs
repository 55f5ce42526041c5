//! Extraction of filtered documents back into rows.

use chrono::NaiveDate;
use serde_json::{json, Value as Json};
use tracing::{debug, info};

use crate::client::{Hit, SearchClient};
use crate::error::{Error, Result};
use crate::value::{DataTable, Row, Value};

/// Projection sentinel meaning every column.
pub const SELECT_ALL: &str = "Select All";

/// Rendering of null and missing fields.
pub const NULL_TEXT: &str = "NULL";

/// Default cap on extracted documents.
pub const DEFAULT_MAX_HITS: usize = 10_000;

/// Default number of facet values.
pub const DEFAULT_FACET_SIZE: usize = 100;

/// Indices whose name contains `keyword`, case-insensitively, sorted.
pub async fn list_indices(client: &dyn SearchClient, keyword: &str) -> Result<Vec<String>> {
    let needle = keyword.to_lowercase();
    let mut names: Vec<String> = client
        .list_indices()
        .await?
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&needle))
        .collect();
    names.sort();
    Ok(names)
}

/// Field names of one sampled document.
///
/// Fields absent from that document are not reported; this is a quick look,
/// not the index mapping.
pub async fn discover_columns(client: &dyn SearchClient, index: &str) -> Result<Vec<String>> {
    let resp = client.search(index, &json!({}), 1).await?;
    Ok(resp
        .hits
        .into_iter()
        .next()
        .map(|hit| hit.source.keys().cloned().collect())
        .unwrap_or_default())
}

/// Most frequent distinct values of `column`, at most `size` of them.
pub async fn facet_values(
    client: &dyn SearchClient,
    index: &str,
    column: &str,
    size: usize,
) -> Result<Vec<Json>> {
    let body = json!({
        "aggs": { "unique_values": { "terms": { "field": column, "size": size } } }
    });
    let resp = client.search(index, &body, 0).await?;
    let buckets = resp
        .aggregations
        .as_ref()
        .and_then(|a| a.pointer("/unique_values/buckets"))
        .and_then(Json::as_array)
        .ok_or_else(|| Error::Extraction(format!("no terms aggregation returned for '{column}'")))?;
    Ok(buckets.iter().filter_map(|b| b.get("key").cloned()).collect())
}

/// Terms filter on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsFilter {
    pub field: String,
    pub values: Vec<Json>,
}

/// Columns to keep in the output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ColumnSelection {
    #[default]
    All,
    Only(Vec<String>),
}

impl ColumnSelection {
    /// Builds a selection from operator choices; empty or containing
    /// [`SELECT_ALL`] means every column.
    #[must_use]
    pub fn from_choices(choices: &[String]) -> Self {
        if choices.is_empty() || choices.iter().any(|c| c == SELECT_ALL) {
            Self::All
        } else {
            Self::Only(choices.to_vec())
        }
    }
}

/// One extraction request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractRequest {
    pub index: String,
    pub date_field: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub filter: Option<TermsFilter>,
    pub columns: ColumnSelection,
    pub max_hits: usize,
}

/// Inclusive epoch-millisecond bounds covering `start` 00:00:00.000 UTC to
/// `end` 23:59:59.999 UTC.
pub fn date_bounds_millis(start: NaiveDate, end: NaiveDate) -> Result<(i64, i64)> {
    if start > end {
        return Err(Error::Extraction(format!(
            "start date {start} is after end date {end}"
        )));
    }
    let low = start
        .and_hms_milli_opt(0, 0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis());
    let high = end
        .and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc().timestamp_millis());
    low.zip(high)
        .ok_or_else(|| Error::Extraction("date out of range".to_string()))
}

/// Builds the `bool.must` query: a date range, plus a terms match when filter
/// values are given.
pub fn build_query(request: &ExtractRequest) -> Result<Json> {
    let (gte, lte) = date_bounds_millis(request.start, request.end)?;
    let mut must = vec![json!({
        "range": {
            request.date_field.as_str(): { "gte": gte, "lte": lte, "format": "epoch_millis" }
        }
    })];
    if let Some(filter) = request.filter.as_ref().filter(|f| !f.values.is_empty()) {
        must.push(json!({ "terms": { filter.field.as_str(): filter.values } }));
    }
    Ok(json!({ "query": { "bool": { "must": must } } }))
}

/// Renders one field value as a cell: null becomes `NULL`, lists are joined
/// with ", ".
#[must_use]
pub fn render_field(value: &Json) -> String {
    match value {
        Json::Null => NULL_TEXT.to_string(),
        Json::String(s) => s.clone(),
        Json::Array(items) => items
            .iter()
            .map(render_field)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Flattens hits into a string table. Columns are the union of field names in
/// first-seen order; a field a hit lacks renders as `NULL`.
#[must_use]
pub fn flatten_hits(hits: &[Hit]) -> DataTable {
    let mut table = DataTable::default();
    for hit in hits {
        for key in hit.source.keys() {
            if !table.has_column(key) {
                table.columns.push(key.clone());
            }
        }
    }
    table.rows = hits
        .iter()
        .map(|hit| {
            table
                .columns
                .iter()
                .map(|c| {
                    let cell = hit.source.get(c).map_or_else(|| NULL_TEXT.to_string(), render_field);
                    (c.clone(), Value::String(cell))
                })
                .collect::<Row>()
        })
        .collect();
    table
}

/// Keeps the selected columns in the requested order. Selected columns that
/// no hit carried render as `NULL`.
#[must_use]
pub fn project(table: DataTable, selection: &ColumnSelection) -> DataTable {
    let ColumnSelection::Only(columns) = selection else {
        return table;
    };
    let rows = table
        .rows
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| {
                    let cell = row
                        .shift_remove(c)
                        .unwrap_or_else(|| Value::String(NULL_TEXT.to_string()));
                    (c.clone(), cell)
                })
                .collect::<Row>()
        })
        .collect();
    DataTable {
        columns: columns.clone(),
        rows,
    }
}

/// Runs an extraction and returns the flattened, projected rows.
pub async fn extract(client: &dyn SearchClient, request: &ExtractRequest) -> Result<DataTable> {
    let query = build_query(request)?;
    debug!(index = %request.index, query = %query, "running extraction query");

    let resp = client.search(&request.index, &query, request.max_hits).await?;
    let table = project(flatten_hits(&resp.hits), &request.columns);

    info!(index = %request.index, rows = table.len(), "extraction finished");
    Ok(table)
}
