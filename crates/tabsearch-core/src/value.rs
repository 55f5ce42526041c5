//! Cell values and in-memory data tables.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;

/// A single cell.
///
/// A column missing from a [`Row`] is absence; `Null` is an explicit empty
/// cell. Both are dropped when the row becomes a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    /// Multi-valued cell. Only scalars may appear inside.
    List(Vec<Value>),
}

/// One input row, keyed by column name in column order.
pub type Row = IndexMap<String, Value>;

impl Value {
    /// True for `Null` and for floating-point NaN.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Converts to a JSON document value.
    ///
    /// Returns `Ok(None)` for missing values (null or NaN), which the caller
    /// turns into field absence.
    pub fn to_json(&self) -> std::result::Result<Option<serde_json::Value>, String> {
        match self {
            Self::Null => Ok(None),
            Self::String(s) => Ok(Some(serde_json::Value::String(s.clone()))),
            Self::Integer(i) => Ok(Some(serde_json::Value::from(*i))),
            Self::Boolean(b) => Ok(Some(serde_json::Value::Bool(*b))),
            Self::Float(f) if f.is_nan() => Ok(None),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(|n| Some(serde_json::Value::Number(n)))
                .ok_or_else(|| format!("non-finite float value {f} cannot be indexed")),
            Self::Timestamp(ts) => Ok(Some(serde_json::Value::String(
                ts.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ))),
            Self::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if matches!(item, Self::List(_)) {
                        return Err("unsupported nested list value".to_string());
                    }
                    if let Some(v) = item.to_json()? {
                        out.push(v);
                    }
                }
                Ok(Some(serde_json::Value::Array(out)))
            }
        }
    }

    /// Converts a JSON value back into a cell. Objects are kept as their JSON
    /// text since tables are flat.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Boolean(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            serde_json::Value::Object(_) => Self::String(value.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::String(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            // Whole floats keep a trailing ".0" so 3.0 and 3 stay distinguishable.
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 => {
                write!(f, "{v:.1}")
            }
            Self::Float(v) => write!(f, "{v}"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
        }
    }
}

/// Rows with an ordered column list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl DataTable {
    #[must_use]
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Iterates the cells of one column; rows lacking the column yield `Null`.
    pub fn column<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .map(move |row| row.get(name).unwrap_or(&Value::Null))
    }

    /// Appends a derived column. `values` must have one entry per row.
    pub fn push_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.insert(name.to_string(), value);
        }
    }
}
