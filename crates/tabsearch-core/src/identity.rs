//! Document identifier selection.

use std::collections::HashSet;
use std::fmt;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::value::{DataTable, Row};

/// Where document ids come from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdSource {
    /// Random v4 UUID per document.
    #[default]
    Generate,
    /// Verbatim string form of this column's value.
    Column(String),
}

impl IdSource {
    /// Maps an optional column name to a source.
    #[must_use]
    pub fn from_column(column: Option<&str>) -> Self {
        match column {
            Some(c) if !c.trim().is_empty() => Self::Column(c.to_string()),
            _ => Self::Generate,
        }
    }
}

impl fmt::Display for IdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Generate => f.write_str("generated"),
            Self::Column(c) => write!(f, "column '{c}'"),
        }
    }
}

/// An id source that passed pre-flight validation against a data table.
///
/// Only obtainable through [`IdPolicy::validate`], so ingestion cannot start
/// with an unchecked id column.
#[derive(Debug, Clone)]
pub struct IdPolicy {
    source: IdSource,
}

impl IdPolicy {
    /// Checks that a chosen id column exists and holds no nulls and no
    /// duplicates across the whole table.
    pub fn validate(source: IdSource, data: &DataTable) -> Result<Self> {
        let IdSource::Column(column) = &source else {
            return Ok(Self { source });
        };

        if !data.has_column(column) {
            return Err(Error::Config(format!(
                "id column '{column}' is not present in the data"
            )));
        }

        let mut seen = HashSet::with_capacity(data.len());
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();
        let mut null_count = 0;

        for value in data.column(column) {
            if value.is_missing() {
                null_count += 1;
                continue;
            }
            let key = value.to_string();
            if !seen.insert(key.clone()) && reported.insert(key.clone()) {
                duplicates.push(key);
            }
        }

        if null_count > 0 || !duplicates.is_empty() {
            return Err(Error::IdentifierConflict {
                column: column.clone(),
                null_count,
                duplicates,
            });
        }

        debug!(column = %column, rows = data.len(), "id column validated");
        Ok(Self { source })
    }

    #[must_use]
    pub fn source(&self) -> &IdSource {
        &self.source
    }

    /// Id for one row.
    ///
    /// Column-sourced ids come from a validated table; a row that still lacks
    /// the value is reported as a conversion failure by the caller.
    pub fn document_id(&self, row: &Row) -> std::result::Result<String, String> {
        match &self.source {
            IdSource::Generate => Ok(Uuid::new_v4().to_string()),
            IdSource::Column(column) => match row.get(column) {
                Some(value) if !value.is_missing() => Ok(value.to_string()),
                _ => Err(format!("row has no value for id column '{column}'")),
            },
        }
    }
}
