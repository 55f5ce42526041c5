//! Elasticsearch REST client.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{BulkAction, BulkFailure, BulkResponse, Hit, SearchClient, SearchResponse};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::mapping::IndexMapping;

const BASE_BACKOFF_MS: u64 = 100;

/// Elasticsearch client over HTTP.
///
/// Transient transport failures (connection errors, timeouts when enabled,
/// 502/503/504) are retried up to `max_retries` times. Per-document bulk
/// failures are returned, never retried.
pub struct ElasticsearchClient {
    config: ClientConfig,
    client: reqwest::Client,
}

#[derive(Clone, Copy)]
enum Payload<'a> {
    Empty,
    Json(&'a serde_json::Value),
    NdJson(&'a str),
}

impl ElasticsearchClient {
    /// Create a new client. No request is sent until the first call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.bulk_chunk_size == 0 {
            return Err(Error::Config(
                "bulk_chunk_size must be greater than 0".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    /// Build request with optional auth.
    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        let req = self.client.request(method, &url);

        if let Some(ref key) = self.config.api_key {
            req.header("Authorization", format!("ApiKey {key}"))
        } else if let Some(ref user) = self.config.username {
            req.basic_auth(user, self.config.password.as_ref())
        } else {
            req
        }
    }

    fn is_transient(&self, err: &reqwest::Error) -> bool {
        err.is_connect() || (err.is_timeout() && self.config.retry_on_timeout)
    }

    async fn send(&self, method: Method, path: &str, payload: Payload<'_>) -> Result<reqwest::Response> {
        let mut attempt: u32 = 0;
        loop {
            let req = self.request(method.clone(), path);
            let req = match payload {
                Payload::Empty => req,
                Payload::Json(body) => req.json(body),
                Payload::NdJson(body) => req
                    .header("Content-Type", "application/x-ndjson")
                    .body(body.to_string()),
            };

            match req.send().await {
                Ok(resp)
                    if is_transient_status(resp.status()) && attempt < self.config.max_retries =>
                {
                    warn!(%method, path, status = %resp.status(), attempt, "transient engine status, retrying");
                }
                Ok(resp) => return Ok(resp),
                Err(e) if self.is_transient(&e) && attempt < self.config.max_retries => {
                    warn!(%method, path, error = %e, attempt, "transport error, retrying");
                }
                Err(e) => return Err(e.into()),
            }

            attempt += 1;
            tokio::time::sleep(Duration::from_millis(BASE_BACKOFF_MS << attempt.min(6))).await;
        }
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT
    )
}

async fn ensure_success(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Engine(format!("{what} failed: {status} - {body}")))
}

/// Renders bulk actions as NDJSON `index` operations.
fn render_bulk_body(actions: &[BulkAction]) -> Result<String> {
    let mut body = String::new();
    for action in actions {
        let meta = serde_json::json!({ "index": { "_index": action.index, "_id": action.id } });
        body.push_str(&meta.to_string());
        body.push('\n');
        body.push_str(&serde_json::to_string(&action.source)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkApiResponse {
    #[serde(default)]
    errors: bool,
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id")]
    id: Option<String>,
    status: u16,
    error: Option<serde_json::Value>,
}

fn describe_item_error(error: &serde_json::Value) -> String {
    match (
        error.get("type").and_then(serde_json::Value::as_str),
        error.get("reason").and_then(serde_json::Value::as_str),
    ) {
        (Some(kind), Some(reason)) => format!("{kind}: {reason}"),
        (Some(kind), None) => kind.to_string(),
        (None, Some(reason)) => reason.to_string(),
        (None, None) => error.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct SearchApiResponse {
    hits: SearchApiHits,
    aggregations: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchApiHits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct CatIndex {
    index: String,
}

#[async_trait]
impl SearchClient for ElasticsearchClient {
    fn engine_type(&self) -> &'static str {
        "elasticsearch"
    }

    async fn index_exists(&self, index: &str) -> Result<bool> {
        let resp = self
            .send(Method::HEAD, &format!("/{index}"), Payload::Empty)
            .await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Error::Engine(format!(
                "Index existence check for '{index}' failed: {status}"
            ))),
        }
    }

    async fn delete_index(&self, index: &str) -> Result<()> {
        let resp = self
            .send(Method::DELETE, &format!("/{index}"), Payload::Empty)
            .await?;
        ensure_success(resp, &format!("Deleting index '{index}'")).await?;
        debug!(index, "index deleted");
        Ok(())
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> Result<()> {
        let body = mapping.to_body();
        let resp = self
            .send(Method::PUT, &format!("/{index}"), Payload::Json(&body))
            .await?;
        ensure_success(resp, &format!("Creating index '{index}'")).await?;
        Ok(())
    }

    async fn bulk_write(&self, actions: &[BulkAction]) -> Result<BulkResponse> {
        let mut response = BulkResponse::default();

        for (chunk_no, chunk) in actions.chunks(self.config.bulk_chunk_size).enumerate() {
            let offset = chunk_no * self.config.bulk_chunk_size;
            let body = render_bulk_body(chunk)?;
            debug!(chunk = chunk_no, actions = chunk.len(), bytes = body.len(), "sending bulk chunk");

            let resp = self.send(Method::POST, "/_bulk", Payload::NdJson(&body)).await?;
            let resp = ensure_success(resp, "Bulk request").await?;
            let parsed: BulkApiResponse = resp.json().await?;

            if parsed.items.len() != chunk.len() {
                return Err(Error::Engine(format!(
                    "Bulk response has {} items for {} actions",
                    parsed.items.len(),
                    chunk.len()
                )));
            }

            for (i, item) in parsed.items.into_iter().enumerate() {
                let Some(result) = item.into_values().next() else {
                    return Err(Error::Engine("Bulk response item is empty".to_string()));
                };
                if result.status < 300 && result.error.is_none() {
                    response.succeeded += 1;
                    continue;
                }
                let position = offset + i;
                response.failures.push(BulkFailure {
                    position,
                    id: result.id.unwrap_or_else(|| chunk[i].id.clone()),
                    status: result.status,
                    reason: result
                        .error
                        .as_ref()
                        .map_or_else(|| format!("status {}", result.status), describe_item_error),
                });
            }

            if parsed.errors {
                debug!(chunk = chunk_no, "bulk chunk reported item errors");
            }
        }

        info!(
            succeeded = response.succeeded,
            failed = response.failures.len(),
            "bulk write finished"
        );
        Ok(response)
    }

    async fn search(
        &self,
        index: &str,
        body: &serde_json::Value,
        size: usize,
    ) -> Result<SearchResponse> {
        let mut body = body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("size".to_string(), serde_json::Value::from(size));
        }
        let resp = self
            .send(Method::POST, &format!("/{index}/_search"), Payload::Json(&body))
            .await?;
        let resp = ensure_success(resp, &format!("Search on '{index}'")).await?;
        let parsed: SearchApiResponse = resp.json().await?;
        Ok(SearchResponse {
            hits: parsed.hits.hits,
            aggregations: parsed.aggregations,
        })
    }

    async fn list_indices(&self) -> Result<Vec<String>> {
        let resp = self
            .send(Method::GET, "/_cat/indices?format=json", Payload::Empty)
            .await?;
        let resp = ensure_success(resp, "Listing indices").await?;
        let indices: Vec<CatIndex> = resp.json().await?;
        Ok(indices.into_iter().map(|i| i.index).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_bulk_body() {
        let mut source = serde_json::Map::new();
        source.insert("name".to_string(), serde_json::json!("widget"));
        let actions = vec![BulkAction {
            index: "products".to_string(),
            id: "A100".to_string(),
            source,
        }];

        let body = render_bulk_body(&actions).unwrap();
        let lines: Vec<&str> = body.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(lines[0]).unwrap(),
            serde_json::json!({"index": {"_index": "products", "_id": "A100"}})
        );
        assert_eq!(lines[1], r#"{"name":"widget"}"#);
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_render_bulk_body_one_pair_per_action() {
        let actions: Vec<BulkAction> = ["A1", "A2", "A3"]
            .iter()
            .map(|id| BulkAction {
                index: "items".to_string(),
                id: (*id).to_string(),
                source: serde_json::Map::new(),
            })
            .collect();

        let body = render_bulk_body(&actions).unwrap();

        assert_eq!(body.matches('\n').count(), 6);
        assert!(body.lines().skip(1).step_by(2).all(|l| l == "{}"));
        assert!(body.lines().nth(4).unwrap().contains(r#""_id":"A3""#));
    }

    #[test]
    fn test_describe_item_error() {
        let err = serde_json::json!({"type": "mapper_parsing_exception", "reason": "failed to parse field [qty]"});
        assert_eq!(
            describe_item_error(&err),
            "mapper_parsing_exception: failed to parse field [qty]"
        );
        assert_eq!(describe_item_error(&serde_json::json!("boom")), "\"boom\"");
    }

    #[test]
    fn test_transient_statuses() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
        assert!(!is_transient_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = ClientConfig {
            bulk_chunk_size: 0,
            ..ClientConfig::default()
        };
        assert!(matches!(ElasticsearchClient::new(config), Err(Error::Config(_))));
    }
}
