//! Integration tests for the Hindsight HTTP API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use hindsight::config::Config;
use hindsight::state::AppState;
use hindsight::storage::{MemoryRecorder, Recorder};
use hindsight_types::HistoryPoint;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

/// Helper to create a test app instance without a database.
fn create_test_app() -> Router {
    hindsight::create_app(AppState::mock(&Config::default()))
}

fn app_with_recorder(config: &Config, recorder: MemoryRecorder) -> Router {
    let recorder: Arc<dyn Recorder> = Arc::new(recorder);
    hindsight::create_app(AppState::new(config, Some(recorder), None))
}

fn t(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}

async fn post_mcp(app: Router, body: impl Into<String>) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body.into()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

fn call(id: i64, tool: &str, arguments: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": tool, "arguments": arguments }
    })
    .to_string()
}

#[tokio::test]
async fn test_health_check() {
    let app = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["database"], "mock_mode");
    assert_eq!(health["tool_count"], 4);
    assert_eq!(health["sessions"], 0);
    assert!(health["configuration"].get("password").is_none());
}

async fn get_health(app: Router) -> Value {
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_with_recorder() {
    let health = get_health(app_with_recorder(&Config::default(), MemoryRecorder::new())).await;
    assert_eq!(health["database"], "connected");
    assert_eq!(health["mock_data"], false);

    let health = get_health(app_with_recorder(
        &Config::default(),
        MemoryRecorder::new().failing(),
    ))
    .await;
    assert_eq!(health["database"], "mock_mode");
    assert_eq!(health["mock_data"], true);
}

#[tokio::test]
async fn test_tools_list() {
    let (status, response) = post_mcp(
        create_test_app(),
        r#"{"jsonrpc": "2.0", "id": 1, "method": "tools/list"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        ["get_history", "get_statistics", "list_entities", "health_check"]
    );
}

#[tokio::test]
async fn test_get_history_in_mock_mode() {
    let (status, response) = post_mcp(
        create_test_app(),
        call(
            2,
            "get_history",
            json!({
                "entity_id": "sensor.temperature",
                "start": "2024-12-19T00:00:00Z",
                "end": "2024-12-20T00:00:00Z",
                "interval": "1h"
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["id"], 2);
    let result = &response["result"]["structuredContent"];
    assert_eq!(result["mock_data"], true);
    assert_eq!(result["count"], 24);
    assert_eq!(result["series"][0]["t"], "2024-12-19T00:00:00Z");
    assert_eq!(response["result"]["content"][0]["type"], "text");
}

#[tokio::test]
async fn test_call_alias() {
    let response = create_test_app()
        .oneshot(
            Request::builder()
                .uri("/mcp/call")
                .method("POST")
                .body(Body::from(r#"{"id": "x", "method": "ping"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_parse_error() {
    let (status, response) = post_mcp(create_test_app(), "{\"jsonrpc\": \"2.0\", \"id\": ").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
    assert_eq!(response["error"]["data"]["kind"], "parse_error");
}

#[tokio::test]
async fn test_invalid_utf8_is_a_parse_error() {
    let response = create_test_app()
        .oneshot(
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(vec![0xff, 0xfe, b'{']))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let response: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn test_unknown_method() {
    let (_, response) = post_mcp(
        create_test_app(),
        r#"{"jsonrpc": "2.0", "id": 41, "method": "prompts/list"}"#,
    )
    .await;

    assert_eq!(response["id"], 41);
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn test_tool_errors() {
    let (_, response) = post_mcp(create_test_app(), call(3, "delete_history", json!({}))).await;
    assert_eq!(response["error"]["code"], -32001);
    assert_eq!(response["error"]["data"]["kind"], "unknown_tool");

    let (_, response) = post_mcp(
        create_test_app(),
        call(4, "get_history", json!({"entity_id": "sensor.temperature"})),
    )
    .await;
    assert_eq!(response["error"]["code"], -32602);

    let (_, response) = post_mcp(
        create_test_app(),
        call(
            5,
            "get_history",
            json!({
                "entity_id": "sensor.temperature",
                "start": "2024-01-01T00:00:00Z",
                "end": "2024-12-01T00:00:00Z"
            }),
        ),
    )
    .await;
    assert_eq!(response["error"]["code"], -32002);
    assert_eq!(response["error"]["data"]["kind"], "invalid_range");

    let (_, response) = post_mcp(
        create_test_app(),
        call(6, "list_entities", json!({"limit": 501})),
    )
    .await;
    assert_eq!(response["error"]["code"], -32003);
}

#[tokio::test]
async fn test_notification_is_accepted() {
    let (status, body) = post_mcp(
        create_test_app(),
        r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#,
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn test_history_from_recorder() {
    let recorder = MemoryRecorder::new().with_states(
        "sensor.temperature",
        vec![
            HistoryPoint::new(t("2024-12-19T00:00:00Z"), 20.0),
            HistoryPoint::new(t("2024-12-19T00:30:00Z"), 22.0),
            HistoryPoint::new(t("2024-12-19T00:45:00Z"), "unavailable"),
            HistoryPoint::new(t("2024-12-19T02:10:00Z"), 18.0),
        ],
    );
    let app = app_with_recorder(&Config::default(), recorder);

    let (_, response) = post_mcp(
        app,
        call(
            7,
            "get_history",
            json!({
                "entity_id": "sensor.temperature",
                "start": "2024-12-19T00:00:00Z",
                "end": "2024-12-19T03:00:00Z"
            }),
        ),
    )
    .await;

    let result = &response["result"]["structuredContent"];
    assert_eq!(result["mock_data"], false);
    // The hour without data is omitted
    assert_eq!(result["count"], 2);
    assert_eq!(result["series"][0]["v"], 21.0);
    assert_eq!(result["series"][1]["t"], "2024-12-19T02:00:00Z");
}

#[tokio::test(start_paused = true)]
async fn test_query_timeout() {
    let mut config = Config::default();
    config.query.timeout_secs = 1;
    let recorder = MemoryRecorder::new().with_latency(Duration::from_secs(60));
    let app = app_with_recorder(&config, recorder);

    let (_, response) = post_mcp(
        app,
        call(
            8,
            "get_history",
            json!({
                "entity_id": "sensor.temperature",
                "start": "2024-12-19T00:00:00Z",
                "end": "2024-12-19T03:00:00Z"
            }),
        ),
    )
    .await;

    assert_eq!(response["error"]["code"], -32004);
    assert_eq!(response["error"]["data"]["kind"], "timeout");
}

#[tokio::test]
async fn test_sse_stream_starts_with_init() {
    let response = create_test_app()
        .oneshot(
            Request::builder()
                .uri("/sse")
                .header("accept", "text/event-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(!session_id.is_empty());

    let mut body = response.into_body();
    let frame = body.frame().await.unwrap().unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: init"), "{}", text);
    assert!(text.contains(&session_id));
}

#[tokio::test]
async fn test_delete_session() {
    let state = AppState::mock(&Config::default());
    let app = hindsight::create_app(state.clone());

    let stream = state.sessions().open().await;
    let session_id = stream.id().to_string();

    let delete = |id: String| {
        Request::builder()
            .uri("/mcp")
            .method("DELETE")
            .header("mcp-session-id", id)
            .body(Body::empty())
            .unwrap()
    };

    let response = app
        .clone()
        .oneshot(delete(session_id.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(delete(session_id)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    drop(stream);
}

#[tokio::test]
async fn test_openapi_document() {
    let response = create_test_app()
        .oneshot(
            Request::builder()
                .uri("/api-docs/openapi.json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
