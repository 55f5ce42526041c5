//! Search engine client seam.
//!
//! The core talks to the engine only through [`SearchClient`]. One client is
//! constructed per session and passed by reference into every operation.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::mapping::IndexMapping;

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchClient;
pub use memory::MemoryClient;

/// A create-or-replace write of one document.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkAction {
    pub index: String,
    pub id: String,
    pub source: serde_json::Map<String, serde_json::Value>,
}

/// One document the engine refused during a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkFailure {
    /// Position of the action in the submitted slice.
    pub position: usize,
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Outcome of a bulk write that reached the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub succeeded: usize,
    pub failures: Vec<BulkFailure>,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Hit {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: serde_json::Map<String, serde_json::Value>,
}

/// Hits plus raw aggregation results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<Hit>,
    pub aggregations: Option<serde_json::Value>,
}

/// Operations the ingestion and extraction flows need from the engine.
///
/// `bulk_write` must not fail because individual documents were rejected;
/// those come back in [`BulkResponse::failures`]. An `Err` from any method is
/// a whole-request failure.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Returns the engine kind (e.g. "elasticsearch").
    fn engine_type(&self) -> &'static str;

    async fn index_exists(&self, index: &str) -> Result<bool>;

    async fn delete_index(&self, index: &str) -> Result<()>;

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<()>;

    async fn bulk_write(&self, actions: &[BulkAction]) -> Result<BulkResponse>;

    /// Runs a query body. `size` caps the number of hits returned.
    async fn search(&self, index: &str, body: &serde_json::Value, size: usize)
        -> Result<SearchResponse>;

    async fn list_indices(&self) -> Result<Vec<String>>;
}
