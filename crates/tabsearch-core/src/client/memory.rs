//! In-memory search engine.
//!
//! Holds indices in process and understands the query subset this crate
//! produces: `match_all`, `bool.must` of `range` and `terms` clauses, and
//! `terms` aggregations. Documents are checked against the index mapping the
//! way the engine's mapper would, so type mismatches surface as per-document
//! bulk failures.

use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::{BulkAction, BulkFailure, BulkResponse, Hit, SearchClient, SearchResponse};
use crate::error::{Error, Result};
use crate::mapping::{FieldMapping, IndexMapping};
use crate::schema::FieldType;

#[derive(Debug, Default)]
struct MemoryIndex {
    mapping: IndexMapping,
    docs: IndexMap<String, Map<String, Value>>,
}

/// In-process [`SearchClient`].
#[derive(Debug, Default)]
pub struct MemoryClient {
    indices: RwLock<IndexMap<String, MemoryIndex>>,
    unavailable: RwLock<bool>,
}

impl MemoryClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail as if the engine were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    #[must_use]
    pub fn document_count(&self, index: &str) -> usize {
        self.indices.read().get(index).map_or(0, |i| i.docs.len())
    }

    #[must_use]
    pub fn get_document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.indices
            .read()
            .get(index)
            .and_then(|i| i.docs.get(id).cloned())
    }

    #[must_use]
    pub fn mapping(&self, index: &str) -> Option<IndexMapping> {
        self.indices.read().get(index).map(|i| i.mapping.clone())
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.read() {
            return Err(Error::Engine("engine unavailable".to_string()));
        }
        Ok(())
    }
}

fn parse_date_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Converts a stored or queried date value to epoch milliseconds, reading bare
/// numbers according to `format`.
#[allow(clippy::cast_possible_truncation)]
fn to_millis(value: &Value, format: Option<&str>) -> Option<i64> {
    match value {
        Value::Number(n) => {
            let n = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if format.is_some_and(|f| f.contains("epoch_second")) {
                n.checked_mul(1000)
            } else {
                Some(n)
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .ok()
            .and_then(|n| to_millis(&Value::from(n), format))
            .or_else(|| parse_date_millis(s)),
        _ => None,
    }
}

fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Number(_) => true,
        Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn check_scalar(field: &str, mapping: &FieldMapping, value: &Value) -> std::result::Result<(), String> {
    let ok = match (mapping.field_type, value) {
        (_, Value::Null) => true,
        (_, Value::Object(_)) => false,
        (FieldType::Text | FieldType::Keyword, _) => true,
        (FieldType::Integer, Value::Number(n)) => n
            .as_i64()
            .is_some_and(|i| i32::try_from(i).is_ok()),
        (FieldType::Integer | FieldType::Long, Value::String(s)) => s.trim().parse::<i64>().is_ok(),
        (FieldType::Long, Value::Number(n)) => n.is_i64() || n.is_u64(),
        (FieldType::Float | FieldType::Double, v) => is_numeric(v),
        (FieldType::Boolean, Value::Bool(_)) => true,
        (FieldType::Boolean, Value::String(s)) => s == "true" || s == "false",
        (FieldType::Date, v) => to_millis(v, mapping.format.as_deref()).is_some(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "mapper_parsing_exception: failed to parse field [{field}] of type [{}]",
            mapping.field_type
        ))
    }
}

fn check_document(mapping: &IndexMapping, source: &Map<String, Value>) -> std::result::Result<(), String> {
    for (field, value) in source {
        let Some(field_mapping) = mapping.get(field) else {
            continue;
        };
        match value {
            Value::Array(items) => {
                for item in items {
                    check_scalar(field, field_mapping, item)?;
                }
            }
            other => check_scalar(field, field_mapping, other)?,
        }
    }
    Ok(())
}

fn term_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Scalar values of a field, flattening one level of arrays.
fn field_values<'a>(doc: &'a Map<String, Value>, field: &str) -> Vec<&'a Value> {
    match doc.get(field) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(v) => vec![v],
    }
}

enum Clause {
    MatchAll,
    Range {
        field: String,
        gte: Option<Value>,
        lte: Option<Value>,
        format: Option<String>,
    },
    Terms {
        field: String,
        keys: Vec<String>,
    },
}

fn single_entry<'a>(obj: &'a Value, what: &str) -> Result<(&'a String, &'a Value)> {
    obj.as_object()
        .filter(|m| m.len() == 1)
        .and_then(|m| m.iter().next())
        .ok_or_else(|| Error::Engine(format!("malformed {what} clause: {obj}")))
}

fn parse_clause(clause: &Value) -> Result<Clause> {
    let (kind, body) = single_entry(clause, "query")?;
    match kind.as_str() {
        "match_all" => Ok(Clause::MatchAll),
        "range" => {
            let (field, bounds) = single_entry(body, "range")?;
            Ok(Clause::Range {
                field: field.clone(),
                gte: bounds.get("gte").cloned(),
                lte: bounds.get("lte").cloned(),
                format: bounds.get("format").and_then(Value::as_str).map(String::from),
            })
        }
        "terms" => {
            let (field, values) = single_entry(body, "terms")?;
            let keys = values
                .as_array()
                .ok_or_else(|| Error::Engine(format!("terms on [{field}] needs an array")))?
                .iter()
                .filter_map(term_key)
                .collect();
            Ok(Clause::Terms {
                field: field.clone(),
                keys,
            })
        }
        other => Err(Error::Engine(format!("unsupported query clause [{other}]"))),
    }
}

fn parse_query(body: &Value) -> Result<Vec<Clause>> {
    let Some(query) = body.get("query") else {
        return Ok(vec![Clause::MatchAll]);
    };
    if let Some(must) = query.get("bool").and_then(|b| b.get("must")) {
        return match must {
            Value::Array(clauses) => clauses.iter().map(parse_clause).collect(),
            single => Ok(vec![parse_clause(single)?]),
        };
    }
    Ok(vec![parse_clause(query)?])
}

impl Clause {
    fn matches(&self, mapping: &IndexMapping, doc: &Map<String, Value>) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Range {
                field,
                gte,
                lte,
                format,
            } => {
                let stored_format = mapping.get(field).and_then(|m| m.format.as_deref());
                let bound_format = format.as_deref().or(stored_format);
                let low = gte.as_ref().and_then(|v| to_millis(v, bound_format));
                let high = lte.as_ref().and_then(|v| to_millis(v, bound_format));
                field_values(doc, field).into_iter().any(|v| {
                    to_millis(v, stored_format).is_some_and(|ms| {
                        low.is_none_or(|l| ms >= l) && high.is_none_or(|h| ms <= h)
                    })
                })
            }
            Self::Terms { field, keys } => field_values(doc, field)
                .into_iter()
                .filter_map(term_key)
                .any(|k| keys.contains(&k)),
        }
    }
}

fn terms_aggregation(docs: &[&Map<String, Value>], spec: &Value) -> Result<Value> {
    let terms = spec
        .get("terms")
        .ok_or_else(|| Error::Engine(format!("unsupported aggregation: {spec}")))?;
    let field = terms
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Engine("terms aggregation needs a field".to_string()))?;
    let size = terms
        .get("size")
        .and_then(Value::as_u64)
        .and_then(|s| usize::try_from(s).ok())
        .unwrap_or(10);

    let mut counts: HashMap<String, (Value, u64)> = HashMap::new();
    for doc in docs {
        for value in field_values(doc, field) {
            if let Some(key) = term_key(value) {
                counts.entry(key).or_insert_with(|| (value.clone(), 0)).1 += 1;
            }
        }
    }

    let mut buckets: Vec<(String, Value, u64)> = counts.into_iter().map(|(k, (v, c))| (k, v, c)).collect();
    buckets.sort_by(|a, b| match b.2.cmp(&a.2) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    buckets.truncate(size);

    let buckets: Vec<Value> = buckets
        .into_iter()
        .map(|(_, key, count)| serde_json::json!({ "key": key, "doc_count": count }))
        .collect();
    Ok(serde_json::json!({ "buckets": buckets }))
}

#[async_trait]
impl SearchClient for MemoryClient {
    fn engine_type(&self) -> &'static str {
        "memory"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.indices.read().contains_key(index))
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        self.check_available()?;
        self.indices
            .write()
            .shift_remove(index)
            .map(|_| ())
            .ok_or_else(|| Error::Engine(format!("index_not_found_exception: no such index [{index}]")))
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<()> {
        self.check_available()?;
        let mut indices = self.indices.write();
        if indices.contains_key(index) {
            return Err(Error::Engine(format!(
                "resource_already_exists_exception: index [{index}] already exists"
            )));
        }
        indices.insert(
            index.to_string(),
            MemoryIndex {
                mapping: mapping.clone(),
                docs: IndexMap::new(),
            },
        );
        Ok(())
    }

    async fn bulk_write(&self, actions: &[BulkAction]) -> Result<BulkResponse> {
        self.check_available()?;
        let mut indices = self.indices.write();
        let mut response = BulkResponse::default();

        for (position, action) in actions.iter().enumerate() {
            let target = indices.entry(action.index.clone()).or_default();
            match check_document(&target.mapping, &action.source) {
                Ok(()) => {
                    target.docs.insert(action.id.clone(), action.source.clone());
                    response.succeeded += 1;
                }
                Err(reason) => response.failures.push(BulkFailure {
                    position,
                    id: action.id.clone(),
                    status: 400,
                    reason,
                }),
            }
        }
        Ok(response)
    }

    async fn search(&self, index: &str, body: &Value, size: usize) -> Result<SearchResponse> {
        self.check_available()?;
        let indices = self.indices.read();
        let target = indices
            .get(index)
            .ok_or_else(|| Error::Engine(format!("index_not_found_exception: no such index [{index}]")))?;

        let clauses = parse_query(body)?;
        let matched: Vec<(&String, &Map<String, Value>)> = target
            .docs
            .iter()
            .filter(|(_, doc)| clauses.iter().all(|c| c.matches(&target.mapping, doc)))
            .collect();

        let aggregations = match body.get("aggs").and_then(Value::as_object) {
            Some(aggs) => {
                let docs: Vec<&Map<String, Value>> = matched.iter().map(|(_, d)| *d).collect();
                let mut out = Map::new();
                for (name, spec) in aggs {
                    out.insert(name.clone(), terms_aggregation(&docs, spec)?);
                }
                Some(Value::Object(out))
            }
            None => None,
        };

        let hits = matched
            .into_iter()
            .take(size)
            .map(|(id, doc)| Hit {
                id: id.clone(),
                source: doc.clone(),
            })
            .collect();

        Ok(SearchResponse { hits, aggregations })
    }

    async fn list_indices(&self) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.indices.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    fn action(id: &str, source: Value) -> BulkAction {
        BulkAction {
            index: "items".to_string(),
            id: id.to_string(),
            source: source.as_object().cloned().unwrap_or_default(),
        }
    }

    fn mapping(json: &str) -> IndexMapping {
        IndexMapping::compile(&Schema::from_json(json).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_bulk_rejects_type_mismatch() {
        let client = MemoryClient::new();
        client
            .create_index("items", &mapping(r#"{"qty": {"type": "integer"}}"#))
            .await
            .unwrap();

        let resp = client
            .bulk_write(&[
                action("1", serde_json::json!({"qty": 5})),
                action("2", serde_json::json!({"qty": "many"})),
            ])
            .await
            .unwrap();

        assert_eq!(resp.succeeded, 1);
        assert_eq!(resp.failures.len(), 1);
        assert_eq!(resp.failures[0].position, 1);
        assert!(resp.failures[0].reason.contains("[qty]"));
        assert_eq!(client.document_count("items"), 1);
    }

    #[tokio::test]
    async fn test_same_id_replaces_document() {
        let client = MemoryClient::new();
        client
            .bulk_write(&[
                action("1", serde_json::json!({"v": "a"})),
                action("1", serde_json::json!({"v": "b"})),
            ])
            .await
            .unwrap();

        assert_eq!(client.document_count("items"), 1);
        assert_eq!(
            client.get_document("items", "1").unwrap().get("v"),
            Some(&serde_json::json!("b"))
        );
    }

    #[tokio::test]
    async fn test_range_on_epoch_second_field_with_millis_bounds() {
        let client = MemoryClient::new();
        client
            .create_index(
                "items",
                &mapping(r#"{"d": {"type": "date", "format": "epoch_second"}}"#),
            )
            .await
            .unwrap();
        client
            .bulk_write(&[
                action("in", serde_json::json!({"d": 1_579_046_400})),
                action("out", serde_json::json!({"d": 1_582_156_800})),
            ])
            .await
            .unwrap();

        let body = serde_json::json!({"query": {"bool": {"must": [
            {"range": {"d": {"gte": 1_579_046_400_000_i64, "lte": 1_579_132_799_999_i64, "format": "epoch_millis"}}}
        ]}}});
        let resp = client.search("items", &body, 10).await.unwrap();

        assert_eq!(resp.hits.len(), 1);
        assert_eq!(resp.hits[0].id, "in");
    }

    #[tokio::test]
    async fn test_terms_aggregation_orders_by_count() {
        let client = MemoryClient::new();
        client
            .bulk_write(&[
                action("1", serde_json::json!({"c": "red"})),
                action("2", serde_json::json!({"c": "blue"})),
                action("3", serde_json::json!({"c": ["blue", "green"]})),
            ])
            .await
            .unwrap();

        let body = serde_json::json!({"aggs": {"u": {"terms": {"field": "c", "size": 2}}}});
        let resp = client.search("items", &body, 0).await.unwrap();

        assert!(resp.hits.is_empty());
        let keys: Vec<&str> = resp.aggregations.as_ref().unwrap()["u"]["buckets"]
            .as_array()
            .unwrap()
            .iter()
            .map(|b| b["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["blue", "green"]);
    }

    #[tokio::test]
    async fn test_unavailable_engine_fails_every_call() {
        let client = MemoryClient::new();
        client.set_unavailable(true);
        assert!(client.list_indices().await.unwrap_err().is_engine_fatal());
        assert!(client.bulk_write(&[]).await.is_err());
    }
}
