//! Error types for tabsearch.

use thiserror::Error;

/// Ingestion and extraction error types.
///
/// Row-level conversion failures and per-document indexing rejections are not
/// errors: they are recorded in [`crate::ingest::IngestReport`] and the batch
/// continues. Everything here aborts the operation that raised it.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tabular input is structurally unusable (missing header, duplicate column).
    #[error("Invalid input: {0}")]
    Input(String),

    /// Unknown declared type, unrecognized date format, or malformed schema edit.
    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    /// The chosen id column contains nulls or duplicates.
    #[error(
        "Identifier conflict on column '{column}': {null_count} null value(s), {} duplicate value(s){}",
        duplicates.len(),
        preview_duplicates(duplicates)
    )]
    IdentifierConflict {
        column: String,
        null_count: usize,
        duplicates: Vec<String>,
    },

    /// The search engine rejected an index-level operation or returned an
    /// unexpected response.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Extraction request could not be built or answered.
    #[error("Extraction error: {0}")]
    Extraction(String),

    /// HTTP transport error (connection refused, timeout after retries, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Delimited text read/write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the engine itself could not be reached or
    /// refused a whole request, as opposed to bad operator input.
    #[must_use]
    pub fn is_engine_fatal(&self) -> bool {
        matches!(self, Self::Engine(_) | Self::Http(_))
    }
}

fn preview_duplicates(duplicates: &[String]) -> String {
    if duplicates.is_empty() {
        return String::new();
    }
    let shown: Vec<&str> = duplicates.iter().take(5).map(String::as_str).collect();
    format!(" (e.g. {})", shown.join(", "))
}

/// Result type alias for tabsearch operations.
pub type Result<T> = std::result::Result<T, Error>;
