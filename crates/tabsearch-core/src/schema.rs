//! Column schema: declared index types and date formats.
//!
//! The schema starts from the operator's definition file, is extended with
//! derived epoch columns by [`crate::coercion`], and may be replaced wholesale
//! by an edited JSON document. Every path into [`Schema`] validates; invalid
//! types are rejected, never coerced.

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Format registered on derived epoch columns.
pub const EPOCH_SECOND_FORMAT: &str = "epoch_second";

/// Field types accepted in an index mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Keyword,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Date,
}

impl FieldType {
    pub const ALL: [FieldType; 8] = [
        Self::Text,
        Self::Keyword,
        Self::Integer,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Boolean,
        Self::Date,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Keyword => "keyword",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::Date => "date",
        }
    }

    fn valid_list() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| {
                Error::SchemaValidation(format!(
                    "invalid data type '{s}'. Valid types: {}",
                    Self::valid_list()
                ))
            })
    }
}

/// Built-in engine date format names.
const BUILTIN_DATE_FORMATS: &[&str] = &[
    "epoch_second",
    "epoch_millis",
    "date_optional_time",
    "strict_date_optional_time",
    "strict_date_optional_time_nanos",
    "basic_date",
    "basic_date_time",
    "basic_date_time_no_millis",
    "date",
    "strict_date",
    "date_time",
    "strict_date_time",
    "date_time_no_millis",
    "strict_date_time_no_millis",
    "date_hour_minute_second",
    "strict_date_hour_minute_second",
    "year_month_day",
    "strict_year_month_day",
    "year_month",
    "year",
];

const PATTERN_LETTERS: &str = "yMdHhmsSaZXEuk";
const PATTERN_SEPARATORS: &str = "-/.:, T'";

/// Whether `format` names a built-in date format or is a custom pattern made
/// of date pattern letters. `||` separates alternatives.
#[must_use]
pub fn is_recognized_date_format(format: &str) -> bool {
    format.split("||").all(|alt| {
        let alt = alt.trim();
        if alt.is_empty() {
            return false;
        }
        if BUILTIN_DATE_FORMATS.contains(&alt) {
            return true;
        }
        alt.chars().any(|c| PATTERN_LETTERS.contains(c))
            && alt
                .chars()
                .all(|c| PATTERN_LETTERS.contains(c) || PATTERN_SEPARATORS.contains(c))
    })
}

/// One column's declaration.
///
/// `declared_type` is `None` when the definition file left the type blank; such
/// columns stay in the schema but get no mapping entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub declared_type: Option<FieldType>,
    pub format: Option<String>,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, declared_type: FieldType) -> Self {
        Self {
            name: name.into(),
            declared_type: Some(declared_type),
            format: None,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    #[must_use]
    pub fn is_date(&self) -> bool {
        self.declared_type == Some(FieldType::Date)
    }

    /// Checks the format against the declared type.
    pub fn validate(&self) -> Result<()> {
        let Some(format) = &self.format else {
            return Ok(());
        };
        if !self.is_date() {
            return Err(Error::SchemaValidation(format!(
                "column '{}' has format '{format}' but type {}; formats apply to date columns only",
                self.name,
                self.declared_type.map_or("<none>", FieldType::as_str)
            )));
        }
        if !is_recognized_date_format(format) {
            return Err(Error::SchemaValidation(format!(
                "column '{}' has unrecognized date format '{format}'",
                self.name
            )));
        }
        Ok(())
    }
}

/// Editable JSON form of a column: `{"type": "...", "format": "..."}`.
#[derive(Debug, Serialize, Deserialize)]
struct ColumnSpec {
    #[serde(rename = "type", default)]
    data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    format: Option<String>,
}

/// Ordered column name to declaration map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    columns: IndexMap<String, ColumnSchema>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a column after validating it.
    pub fn insert(&mut self, column: ColumnSchema) -> Result<()> {
        column.validate()?;
        self.columns.insert(column.name.clone(), column);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Names of columns declared as `date`.
    #[must_use]
    pub fn date_columns(&self) -> Vec<String> {
        self.iter()
            .filter(|c| c.is_date())
            .map(|c| c.name.clone())
            .collect()
    }

    /// Renders the operator-editable JSON document.
    pub fn to_json_pretty(&self) -> Result<String> {
        let doc: IndexMap<&str, ColumnSpec> = self
            .iter()
            .map(|c| {
                (
                    c.name.as_str(),
                    ColumnSpec {
                        data_type: c.declared_type.map(|t| t.as_str().to_string()).unwrap_or_default(),
                        format: c.format.clone(),
                    },
                )
            })
            .collect();
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parses an edited schema document. The whole edit is rejected on the
    /// first invalid column.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: IndexMap<String, ColumnSpec> = serde_json::from_str(text)
            .map_err(|e| Error::SchemaValidation(format!("invalid JSON format in schema: {e}")))?;

        let mut schema = Self::new();
        for (name, spec) in doc {
            let declared_type = if spec.data_type.trim().is_empty() {
                None
            } else {
                Some(
                    spec.data_type
                        .parse::<FieldType>()
                        .map_err(|e| prefix_column(&name, e))?,
                )
            };
            schema.insert(ColumnSchema {
                name,
                declared_type,
                format: spec.format.filter(|f| !f.trim().is_empty()),
            })?;
        }
        Ok(schema)
    }
}

fn prefix_column(column: &str, err: Error) -> Error {
    match err {
        Error::SchemaValidation(msg) => Error::SchemaValidation(format!("column '{column}': {msg}")),
        other => other,
    }
}
