//! Bulk ingestion: rows to documents to a single bulk write.
//!
//! Every input row ends up on exactly one side of the [`IngestReport`]:
//! indexed, or failed with a reason. Rows that cannot become documents are
//! set aside before the write; documents the engine rejects are matched back
//! to their rows afterwards. Only a whole-request engine failure aborts.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Map;
use tracing::{debug, info, warn};

use crate::client::{BulkAction, SearchClient};
use crate::error::{Error, Result};
use crate::identity::IdPolicy;
use crate::value::{DataTable, Row};

/// Number of failures shown to the operator. All failures are still counted.
pub const DISPLAY_CAP: usize = 5;

/// Why a row was not indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The row could not be turned into a write action.
    RowConversion,
    /// The engine rejected the document.
    DocumentIndex,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RowConversion => f.write_str("row conversion"),
            Self::DocumentIndex => f.write_str("document index"),
        }
    }
}

/// A row that was not indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedRow {
    /// Zero-based position in the input.
    pub row_number: usize,
    pub row: Row,
    pub kind: FailureKind,
    pub reason: String,
}

/// Success/failure partition of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub total: usize,
    pub indexed: usize,
    /// Failed rows in input order.
    pub failed: Vec<FailedRow>,
}

impl IngestReport {
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The first [`DISPLAY_CAP`] failures.
    #[must_use]
    pub fn displayed_failures(&self) -> &[FailedRow] {
        &self.failed[..self.failed.len().min(DISPLAY_CAP)]
    }

    #[must_use]
    pub fn count_of(&self, kind: FailureKind) -> usize {
        self.failed.iter().filter(|f| f.kind == kind).count()
    }
}

/// Converts a row to a document body. Missing values (null, NaN) become
/// absent fields.
pub fn row_to_source(row: &Row) -> std::result::Result<Map<String, serde_json::Value>, String> {
    let mut source = Map::new();
    for (column, value) in row {
        match value.to_json() {
            Ok(Some(json)) => {
                source.insert(column.clone(), json);
            }
            Ok(None) => {}
            Err(e) => return Err(format!("column '{column}': {e}")),
        }
    }
    Ok(source)
}

/// Builds the write action for one row.
pub fn build_action(index: &str, policy: &IdPolicy, row: &Row) -> std::result::Result<BulkAction, String> {
    let id = policy.document_id(row)?;
    let source = row_to_source(row)?;
    Ok(BulkAction {
        index: index.to_string(),
        id,
        source,
    })
}

/// Writes every row of `data` into `index` with one logical bulk request.
///
/// Returns `Err` only when the engine request itself fails; the partition is
/// then unknown and nothing is reported as indexed.
pub async fn ingest(
    client: &dyn SearchClient,
    index: &str,
    policy: &IdPolicy,
    data: &DataTable,
) -> Result<IngestReport> {
    let mut failed: BTreeMap<usize, FailedRow> = BTreeMap::new();
    let mut actions = Vec::with_capacity(data.len());
    let mut origins = Vec::with_capacity(data.len());

    for (row_number, row) in data.rows.iter().enumerate() {
        match build_action(index, policy, row) {
            Ok(action) => {
                actions.push(action);
                origins.push(row_number);
            }
            Err(reason) => {
                debug!(row_number, reason = %reason, "row conversion failed");
                failed.insert(
                    row_number,
                    FailedRow {
                        row_number,
                        row: row.clone(),
                        kind: FailureKind::RowConversion,
                        reason,
                    },
                );
            }
        }
    }

    let converted = actions.len();
    if !actions.is_empty() {
        info!(index, actions = converted, id_source = %policy.source(), "submitting bulk write");
        let response = client.bulk_write(&actions).await?;

        for failure in response.failures {
            let Some(&row_number) = origins.get(failure.position) else {
                return Err(Error::Engine(format!(
                    "bulk failure refers to unknown action position {}",
                    failure.position
                )));
            };
            failed.entry(row_number).or_insert_with(|| FailedRow {
                row_number,
                row: data.rows[row_number].clone(),
                kind: FailureKind::DocumentIndex,
                reason: format!("{} (status {}, id {})", failure.reason, failure.status, failure.id),
            });
        }
    }

    let failed: Vec<FailedRow> = failed.into_values().collect();
    let report = IngestReport {
        total: data.len(),
        indexed: data.len() - failed.len(),
        failed,
    };

    if report.is_complete_success() {
        info!(index, indexed = report.indexed, "all rows indexed");
    } else {
        warn!(
            index,
            indexed = report.indexed,
            row_failures = report.count_of(FailureKind::RowConversion),
            document_failures = report.count_of(FailureKind::DocumentIndex),
            "some rows were not indexed"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::identity::IdSource;
    use crate::value::Value;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn table(rows: Vec<Row>) -> DataTable {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        DataTable { columns, rows }
    }

    #[test]
    fn test_nulls_and_nan_become_absent() {
        let source = row_to_source(&row(&[
            ("a", Value::Integer(1)),
            ("b", Value::Null),
            ("c", Value::Float(f64::NAN)),
            ("d", Value::Float(1.5)),
        ]))
        .unwrap();

        assert_eq!(source.len(), 2);
        assert!(!source.contains_key("b"));
        assert!(!source.contains_key("c"));
    }

    #[test]
    fn test_displayed_failures_capped() {
        let report = IngestReport {
            total: 8,
            indexed: 0,
            failed: (0..8)
                .map(|i| FailedRow {
                    row_number: i,
                    row: Row::new(),
                    kind: FailureKind::RowConversion,
                    reason: "bad".to_string(),
                })
                .collect(),
        };
        assert_eq!(report.displayed_failures().len(), DISPLAY_CAP);
        assert_eq!(report.failed.len(), 8);
    }

    #[tokio::test]
    async fn test_bad_row_does_not_abort_batch() {
        let client = MemoryClient::new();
        let data = table(vec![
            row(&[("sku", Value::String("A".into())), ("n", Value::Integer(1))]),
            row(&[("sku", Value::String("B".into())), ("n", Value::Float(f64::INFINITY))]),
            row(&[("sku", Value::String("C".into())), ("n", Value::Integer(3))]),
        ]);
        let policy = IdPolicy::validate(IdSource::Column("sku".into()), &data).unwrap();

        let report = ingest(&client, "items", &policy, &data).await.unwrap();

        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].row_number, 1);
        assert_eq!(report.failed[0].kind, FailureKind::RowConversion);
        assert!(report.failed[0].reason.contains("non-finite"));
        assert!(client.get_document("items", "A").is_some());
        assert!(client.get_document("items", "B").is_none());
    }

    #[tokio::test]
    async fn test_engine_failure_is_fatal() {
        let client = MemoryClient::new();
        client.set_unavailable(true);
        let data = table(vec![row(&[("n", Value::Integer(1))])]);
        let policy = IdPolicy::validate(IdSource::Generate, &data).unwrap();

        let err = ingest(&client, "items", &policy, &data).await.unwrap_err();
        assert!(err.is_engine_fatal());
    }

    #[tokio::test]
    async fn test_empty_table_skips_bulk_call() {
        let client = MemoryClient::new();
        client.set_unavailable(true);
        let policy = IdPolicy::validate(IdSource::Generate, &DataTable::default()).unwrap();

        let report = ingest(&client, "items", &policy, &DataTable::default()).await.unwrap();
        assert_eq!(report, IngestReport::default());
    }
}
