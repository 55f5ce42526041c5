//! HTTP-level tests for the Elasticsearch client against a mock server.

use serde_json::json;
use tabsearch_core::mapping::recreate_index;
use tabsearch_core::{
    BulkAction, ClientConfig, ColumnSchema, ElasticsearchClient, Error, FieldType, IndexMapping,
    Schema, SearchClient,
};
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> ElasticsearchClient {
    ElasticsearchClient::new(ClientConfig {
        url: server.uri(),
        ..ClientConfig::default()
    })
    .expect("client")
}

fn action(id: &str, qty: i64) -> BulkAction {
    let mut source = serde_json::Map::new();
    source.insert("qty".to_string(), json!(qty));
    BulkAction {
        index: "items".to_string(),
        id: id.to_string(),
        source,
    }
}

#[tokio::test]
async fn test_index_exists() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/sales"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.index_exists("sales").await.unwrap());
    assert!(!client.index_exists("missing").await.unwrap());
}

#[tokio::test]
async fn test_recreate_deletes_then_creates_with_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/sales"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sales"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/sales"))
        .and(body_json(json!({
            "mappings": {
                "properties": {
                    "sku": {"type": "keyword"},
                    "joined_asEpoch": {"type": "date", "format": "epoch_second"}
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acknowledged": true})))
        .expect(1)
        .mount(&server)
        .await;

    let mut schema = Schema::new();
    schema.insert(ColumnSchema::new("sku", FieldType::Keyword)).unwrap();
    schema
        .insert(ColumnSchema::new("joined_asEpoch", FieldType::Date).with_format("epoch_second"))
        .unwrap();
    let mapping = IndexMapping::compile(&schema).unwrap();

    let client = client_for(&server);
    recreate_index(&client, "sales", &mapping).await.unwrap();
}

#[tokio::test]
async fn test_create_index_error_carries_engine_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/sales"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("resource_already_exists_exception"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .create_index("sales", &IndexMapping::default())
        .await
        .unwrap_err();

    assert!(err.is_engine_fatal());
    assert!(err.to_string().contains("resource_already_exists_exception"));
}

#[tokio::test]
async fn test_bulk_item_failures_keep_positions_across_chunks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains("\"A1\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "A1", "status": 201}},
                {"index": {"_id": "A2", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [qty]"
                }}}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains("\"A3\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [
                {"index": {"_id": "A3", "status": 429, "error": {
                    "type": "es_rejected_execution_exception"
                }}}
            ]
        })))
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new(ClientConfig {
        url: server.uri(),
        bulk_chunk_size: 2,
        ..ClientConfig::default()
    })
    .unwrap();
    let actions = vec![action("A1", 1), action("A2", 2), action("A3", 3)];

    let response = client.bulk_write(&actions).await.unwrap();

    assert_eq!(response.succeeded, 1);
    assert_eq!(response.failures.len(), 2);
    assert_eq!(response.failures[0].position, 1);
    assert_eq!(response.failures[0].id, "A2");
    assert_eq!(
        response.failures[0].reason,
        "mapper_parsing_exception: failed to parse field [qty]"
    );
    assert_eq!(response.failures[1].position, 2);
    assert_eq!(response.failures[1].status, 429);
}

#[tokio::test]
async fn test_bulk_sends_ndjson() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .and(body_string_contains(r#"{"index":{"_index":"items","_id":"A1"}}"#))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": false,
            "items": [{"index": {"_id": "A1", "status": 201}}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let response = client.bulk_write(&[action("A1", 1)]).await.unwrap();
    assert_eq!(response.succeeded, 1);
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cat/indices"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_cat/indices"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"index": "sales", "health": "green"},
            {"index": "inventory", "health": "yellow"}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let indices = client.list_indices().await.unwrap();
    assert_eq!(indices, vec!["sales", "inventory"]);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cat/indices"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new(ClientConfig {
        url: server.uri(),
        max_retries: 1,
        ..ClientConfig::default()
    })
    .unwrap();

    let err = client.list_indices().await.unwrap_err();
    assert!(matches!(err, Error::Engine(_)));
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sales/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.search("sales", &json!({}), 1).await.unwrap_err();
    assert!(err.is_engine_fatal());
    assert!(err.to_string().contains("boom"));
}

#[tokio::test]
async fn test_search_sends_size_and_parses_results() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sales/_search"))
        .and(body_json(json!({
            "aggs": {"unique_values": {"terms": {"field": "region", "size": 100}}},
            "size": 0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"total": {"value": 3}, "hits": []},
            "aggregations": {"unique_values": {"buckets": [
                {"key": "EU", "doc_count": 2},
                {"key": "US", "doc_count": 1}
            ]}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sales/_search"))
        .and(body_json(json!({"size": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"hits": [
                {"_index": "sales", "_id": "A100", "_source": {"sku": "A100", "region": "EU"}}
            ]}
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);

    let facets = tabsearch_core::extract::facet_values(&client, "sales", "region", 100)
        .await
        .unwrap();
    assert_eq!(facets, vec![json!("EU"), json!("US")]);

    let columns = tabsearch_core::extract::discover_columns(&client, "sales")
        .await
        .unwrap();
    assert_eq!(columns, vec!["sku", "region"]);
}

#[tokio::test]
async fn test_api_key_header() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/sales"))
        .and(header("authorization", "ApiKey c2VjcmV0"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = ElasticsearchClient::new(ClientConfig {
        url: server.uri(),
        api_key: Some("c2VjcmV0".to_string()),
        username: Some("ignored".to_string()),
        ..ClientConfig::default()
    })
    .unwrap();

    assert!(client.index_exists("sales").await.unwrap());
}
