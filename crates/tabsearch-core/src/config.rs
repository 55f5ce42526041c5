//! Configuration file support.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub ingest: IngestConfig,
    pub extract: ExtractConfig,
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client.url.trim().is_empty() {
            return Err(Error::Config("client.url must not be empty".to_string()));
        }
        if self.client.bulk_chunk_size == 0 {
            return Err(Error::Config(
                "client.bulk_chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.extract.max_hits == 0 {
            return Err(Error::Config(
                "extract.max_hits must be greater than 0".to_string(),
            ));
        }
        if self.ingest.index.trim().is_empty() {
            return Err(Error::Config("ingest.index must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Search engine connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Engine base URL.
    pub url: String,
    /// Basic auth user.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// API key; takes precedence over basic auth.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_secs: u64,
    /// Transport-level retries for transient failures.
    pub max_retries: u32,
    /// Whether timeouts count as transient.
    pub retry_on_timeout: bool,
    /// Actions per `_bulk` HTTP request.
    pub bulk_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            username: None,
            password: None,
            api_key: None,
            timeout_secs: 60,
            max_retries: 3,
            retry_on_timeout: true,
            bulk_chunk_size: 500,
        }
    }
}

/// Ingestion defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub index: String,
    /// Column to copy document ids from; `None` generates ids.
    pub id_column: Option<String>,
    pub delimiter: char,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            index: "csv_index".to_string(),
            id_column: None,
            delimiter: ',',
        }
    }
}

/// Extraction limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub max_hits: usize,
    pub facet_size: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            max_hits: 10_000,
            facet_size: 100,
        }
    }
}
