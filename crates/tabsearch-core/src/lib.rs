//! # tabsearch-core
//!
//! Schema-driven ingestion of delimited tabular data into a search index, and
//! extraction of filtered documents back into rows.
//!
//! ## Ingestion flow
//!
//! ```text
//! schema definition + data ──▶ coercion (date columns → <col>_asEpoch)
//!        ──▶ mapping compile ──▶ index recreate
//!        ──▶ id pre-flight ──▶ bulk write ──▶ IngestReport
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use tabsearch_core::{prepare, tabular, Config, IdSource, Session};
//!
//! # async fn run() -> tabsearch_core::Result<()> {
//! let session = Session::connect(Config::default())?;
//! let schema = tabular::read_schema_definition_file("schema.csv", b',')?;
//! let data = tabular::read_data_table_file("data.csv", b',')?;
//!
//! let prepared = prepare(schema, data)?;
//! session.create_index("sales", &prepared.schema).await?;
//! let report = session
//!     .upload("sales", IdSource::Column("sku".into()), &prepared.data)
//!     .await?;
//! println!("indexed {} of {}", report.indexed, report.total);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod coercion;
pub mod config;
pub mod error;
pub mod extract;
pub mod identity;
pub mod ingest;
pub mod mapping;
pub mod pipeline;
pub mod schema;
pub mod tabular;
pub mod value;

pub use client::{BulkAction, BulkFailure, BulkResponse, ElasticsearchClient, MemoryClient, SearchClient};
pub use coercion::{CoercionDiagnostic, CoercionReport};
pub use config::{ClientConfig, Config};
pub use error::{Error, Result};
pub use extract::{ColumnSelection, ExtractRequest, TermsFilter};
pub use identity::{IdPolicy, IdSource};
pub use ingest::{FailedRow, FailureKind, IngestReport};
pub use mapping::IndexMapping;
pub use pipeline::{prepare, PreparedDataset, Session};
pub use schema::{ColumnSchema, FieldType, Schema};
pub use value::{DataTable, Row, Value};
