//! End-to-end flows over one client session.

use tracing::{debug, info};

use crate::client::{ElasticsearchClient, SearchClient};
use crate::coercion::{normalize_dates, CoercionReport};
use crate::config::Config;
use crate::error::Result;
use crate::extract::{self, ExtractRequest};
use crate::identity::{IdPolicy, IdSource};
use crate::ingest::{ingest, IngestReport};
use crate::mapping::{recreate_index, IndexMapping};
use crate::schema::Schema;
use crate::value::DataTable;

/// Schema and data after date normalization.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub schema: Schema,
    pub data: DataTable,
    pub coercion: CoercionReport,
}

impl PreparedDataset {
    /// Replaces the schema with an operator-edited JSON document. The data is
    /// untouched; an invalid edit leaves the current schema in place.
    pub fn apply_schema_edit(&mut self, edited: &str) -> Result<()> {
        self.schema = Schema::from_json(edited)?;
        Ok(())
    }
}

/// Runs the coercion pass over freshly read inputs.
pub fn prepare(mut schema: Schema, mut data: DataTable) -> Result<PreparedDataset> {
    let coercion = normalize_dates(&mut schema, &mut data)?;
    Ok(PreparedDataset {
        schema,
        data,
        coercion,
    })
}

/// One operator session: a single client handle reused for every call.
pub struct Session {
    client: Box<dyn SearchClient>,
    config: Config,
}

impl Session {
    #[must_use]
    pub fn new(client: Box<dyn SearchClient>, config: Config) -> Self {
        debug!(engine = client.engine_type(), "session created");
        Self { client, config }
    }

    /// Opens a session against the Elasticsearch cluster in `config`.
    pub fn connect(config: Config) -> Result<Self> {
        config.validate()?;
        let client = ElasticsearchClient::new(config.client.clone())?;
        info!(url = %config.client.url, "session opened");
        Ok(Self::new(Box::new(client), config))
    }

    #[must_use]
    pub fn client(&self) -> &dyn SearchClient {
        self.client.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Compiles `schema` and replaces `index` with a fresh index using it.
    pub async fn create_index(&self, index: &str, schema: &Schema) -> Result<IndexMapping> {
        let mapping = IndexMapping::compile(schema)?;
        recreate_index(self.client(), index, &mapping).await?;
        Ok(mapping)
    }

    /// Validates the id source against the whole table, then bulk-writes it.
    /// An id conflict stops the upload before anything is written.
    pub async fn upload(&self, index: &str, id_source: IdSource, data: &DataTable) -> Result<IngestReport> {
        let policy = IdPolicy::validate(id_source, data)?;
        ingest(self.client(), index, &policy, data).await
    }

    pub async fn list_indices(&self, keyword: &str) -> Result<Vec<String>> {
        extract::list_indices(self.client(), keyword).await
    }

    pub async fn columns(&self, index: &str) -> Result<Vec<String>> {
        extract::discover_columns(self.client(), index).await
    }

    pub async fn facets(&self, index: &str, column: &str) -> Result<Vec<serde_json::Value>> {
        extract::facet_values(self.client(), index, column, self.config.extract.facet_size).await
    }

    pub async fn extract(&self, request: &ExtractRequest) -> Result<DataTable> {
        extract::extract(self.client(), request).await
    }
}
