//! End-to-end demo: a toy GraphQL upstream plus a gateway in front of it,
//! exercising the Connect JSON unary path described in spec.md §8 scenario
//! 1. Run with `cargo run --example upstream-demo`.

use axum::routing::post;
use axum::{Json, Router};
use connect_graphql_gateway::{Config, GatewayServer};
use serde_json::{json, Value};

/// A minimal GraphQL upstream that answers exactly one operation
/// (`GetUser`) with a canned response, standing in for a real GraphQL
/// server so this demo has no external dependencies.
async fn fake_upstream(Json(payload): Json<Value>) -> Json<Value> {
    let operation_name = payload.get("operationName").and_then(Value::as_str).unwrap_or("");
    match operation_name {
        "GetUser" => Json(json!({
            "data": {
                "user": { "id": 1, "name": "Jane" }
            }
        })),
        other => Json(json!({
            "data": null,
            "errors": [{ "message": format!("unknown operation: {other}") }]
        })),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let upstream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let upstream_addr = upstream_listener.local_addr()?;
    let upstream_router = Router::new().route("/", post(fake_upstream));
    tokio::spawn(async move {
        axum::serve(upstream_listener, upstream_router).await.expect("fake upstream exited unexpectedly");
    });

    let services_dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/upstream_demo/services");

    let config = Config {
        services_dir,
        graphql_endpoint: format!("http://{upstream_addr}"),
        listen_addr: "127.0.0.1:0".to_string(),
        request_timeout_secs: 30,
    };

    let server = GatewayServer::new(config);
    server.start().await?;
    let gateway_addr = server.local_addr().await.expect("start() sets local_addr on success");
    tracing::info!(%gateway_addr, %upstream_addr, "gateway and demo upstream are both listening");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{gateway_addr}/demo.user.v1.UserService/QueryGetUser"))
        .header("content-type", "application/json")
        .body(r#"{"id":1}"#)
        .send()
        .await?;

    println!("HTTP {}", response.status());
    println!("{}", response.text().await?);

    server.stop().await?;
    Ok(())
}
