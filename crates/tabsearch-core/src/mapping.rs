//! Index mapping compilation and index (re)creation.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::info;

use crate::client::SearchClient;
use crate::error::Result;
use crate::schema::{FieldType, Schema};

/// Mapping entry for one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// The engine-side declaration of field names and types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMapping {
    pub properties: IndexMap<String, FieldMapping>,
}

impl IndexMapping {
    /// Compiles a schema. Columns without a declared type are left to the
    /// engine's dynamic mapping.
    pub fn compile(schema: &Schema) -> Result<Self> {
        let mut properties = IndexMap::new();
        for column in schema.iter() {
            column.validate()?;
            let Some(field_type) = column.declared_type else {
                continue;
            };
            properties.insert(
                column.name.clone(),
                FieldMapping {
                    field_type,
                    format: column.format.clone(),
                },
            );
        }
        Ok(Self { properties })
    }

    /// Index creation body: `{"mappings": {"properties": {...}}}`.
    #[must_use]
    pub fn to_body(&self) -> serde_json::Value {
        serde_json::json!({ "mappings": { "properties": self.properties } })
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldMapping> {
        self.properties.get(field)
    }
}

/// Drops any existing index of the same name, then creates it with `mapping`.
///
/// Destructive: documents in the previous index are lost.
pub async fn recreate_index(
    client: &dyn SearchClient,
    index: &str,
    mapping: &IndexMapping,
) -> Result<()> {
    if client.index_exists(index).await? {
        info!(index, "deleting existing index before recreation");
        client.delete_index(index).await?;
    }
    client.create_index(index, mapping).await?;
    info!(index, fields = mapping.properties.len(), "index created");
    Ok(())
}
