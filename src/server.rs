//! Server Lifecycle (spec.md §4.8).
//!
//! Binds an HTTP/2-cleartext listener (via `axum::serve`, whose
//! `hyper_util` connection builder negotiates `h2c` automatically on the
//! client's HTTP/2 connection preface — no TLS is required, matching the
//! teacher's own cleartext-first `axum` serving shape, generalized from a
//! single `/graphql` POST route to the wildcard Connect/gRPC/gRPC-Web
//! dispatch this gateway needs) and owns `Start`/`Stop`/`Reload`.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, StatusCode};
use http_body_util::BodyExt;
use prost_reflect::{DescriptorPool, MethodDescriptor};
use serde_json::Value as Json;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::descriptor::DescriptorLoader;
use crate::discovery::{self, ServiceBundle};
use crate::error::{Error, GatewayError, Result};
use crate::handler::RpcHandler;
use crate::operations::OperationRegistry;
use crate::streaming;
use crate::transcode::{self, content_type, Encoding, WireMode};
use crate::upstream::UpstreamClient;

/// Everything a single in-flight request needs to resolve and transcode a
/// call: the compiled descriptor pool (for method lookup) and the RPC
/// handler (operation lookup + upstream execution). Replaced wholesale on
/// reload via `ArcSwap`, so a request that already loaded its `Arc` keeps
/// using it to completion (spec.md §4.8 "in-flight requests continue with
/// the previous transcoder").
pub struct Transcoder {
    descriptors: DescriptorPool,
    handler: Arc<RpcHandler>,
}

impl Transcoder {
    fn method(&self, service_fqn: &str, method_name: &str) -> Option<MethodDescriptor> {
        let service = self.descriptors.get_service_by_name(service_fqn)?;
        service.methods().find(|m| m.name() == method_name)
    }
}

/// Owns the service catalog, the HTTP listener task, and the swappable
/// `Transcoder`. One instance per gateway process.
pub struct GatewayServer {
    config: Config,
    descriptor_loader: Arc<DescriptorLoader>,
    operation_registry: Arc<OperationRegistry>,
    upstream: Arc<UpstreamClient>,
    transcoder: Arc<ArcSwap<Transcoder>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    serve_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<std::net::SocketAddr>>,
}

impl GatewayServer {
    pub fn new(config: Config) -> Self {
        let upstream = Arc::new(UpstreamClient::new(config.normalized_graphql_endpoint(), config.request_timeout()));
        let operation_registry = Arc::new(OperationRegistry::new());
        let handler = Arc::new(RpcHandler::new(operation_registry.clone(), upstream.clone()));
        let empty_transcoder = Transcoder {
            descriptors: DescriptorPool::default(),
            handler,
        };

        Self {
            config,
            descriptor_loader: Arc::new(DescriptorLoader::new()),
            operation_registry,
            upstream,
            transcoder: Arc::new(ArcSwap::from_pointee(empty_transcoder)),
            shutdown_tx: Mutex::new(None),
            serve_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// The address the listener actually bound to, available once `start`
    /// has returned successfully. Useful when `listen_addr` used an
    /// ephemeral port (`:0`).
    pub async fn local_addr(&self) -> Option<std::net::SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Discovers services, loads descriptors and operations, binds the
    /// listener, and starts serving in a background task. Non-blocking:
    /// only the initial bind is awaited synchronously; serve-loop errors
    /// afterward are logged, not propagated (spec.md §4.8).
    pub async fn start(&self) -> Result<()> {
        let bundles = discovery::discover(&self.config.services_dir)?;
        self.load_bundles(&bundles)?;

        let router = build_router(self.transcoder.clone());
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .map_err(Error::Io)?;
        let bound_addr = listener.local_addr().map_err(Error::Io)?;
        *self.local_addr.lock().await = Some(bound_addr);
        tracing::info!(addr = %bound_addr, services = bundles.len(), "gateway listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let serve_task = tokio::spawn(async move {
            let graceful = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(err) = graceful.await {
                tracing::error!(error = %err, "gateway server task ended with an error");
            }
        });

        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *self.serve_task.lock().await = Some(serve_task);
        Ok(())
    }

    /// Gracefully shuts down the HTTP server, bounded by a 5-second
    /// timeout. `FailedPrecondition` if the server was never started.
    pub async fn stop(&self) -> Result<()> {
        let shutdown_tx = self.shutdown_tx.lock().await.take();
        let Some(shutdown_tx) = shutdown_tx else {
            return Err(Error::FailedPrecondition("gateway server was never started".to_string()));
        };
        let _ = shutdown_tx.send(());

        let serve_task = self.serve_task.lock().await.take();
        if let Some(serve_task) = serve_task {
            if tokio::time::timeout(Duration::from_secs(5), serve_task).await.is_err() {
                tracing::warn!("gateway server did not shut down within the 5-second grace period");
            }
        }
        Ok(())
    }

    /// Re-runs discovery and registry population, then atomically swaps in
    /// a fresh `Transcoder`. Per-service operation replacement is already
    /// atomic (§4.3); this additionally rebuilds the descriptor pool from
    /// scratch so removed/renamed `.proto` files are picked up.
    pub async fn reload(&self) -> Result<()> {
        let bundles = discovery::discover(&self.config.services_dir)?;
        self.descriptor_loader.clear();
        self.load_bundles(&bundles)?;
        tracing::info!(services = bundles.len(), "gateway reloaded");
        Ok(())
    }

    fn load_bundles(&self, bundles: &[ServiceBundle]) -> Result<()> {
        for bundle in bundles {
            self.descriptor_loader.load(&[&bundle.dir])?;
            self.operation_registry.load_for_service(&bundle.service_fqn, &bundle.graphql_files);
        }

        let handler = Arc::new(RpcHandler::new(self.operation_registry.clone(), self.upstream.clone()));
        let transcoder = Transcoder {
            descriptors: self.descriptor_loader.snapshot(),
            handler,
        };
        self.transcoder.store(Arc::new(transcoder));
        Ok(())
    }
}

fn build_router(transcoder: Arc<ArcSwap<Transcoder>>) -> Router {
    Router::new()
        .route("/{*rest}", any(dispatch))
        .with_state(transcoder)
}

async fn dispatch(State(transcoder): State<Arc<ArcSwap<Transcoder>>>, req: Request) -> Response {
    match dispatch_inner(transcoder, req).await {
        Ok(response) => response,
        Err(err) => connect_error_response(&err),
    }
}

async fn dispatch_inner(transcoder: Arc<ArcSwap<Transcoder>>, req: Request) -> std::result::Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();
    let (service_fqn, method_name) = content_type::split_service_and_method(parts.uri.path())?;

    let current = transcoder.load_full();
    let method = current
        .method(&service_fqn, &method_name)
        .ok_or_else(|| GatewayError::not_found(format!("unknown method {service_fqn}/{method_name}")))?;

    if let Some(version) = parts.headers.get("connect-protocol-version") {
        if version.as_bytes() != b"1" {
            return Err(GatewayError::invalid_argument("Connect-Protocol-Version must be 1"));
        }
    }

    let (wire_mode, request_mapping) = if parts.method == http::Method::GET {
        let query = parts.uri.query().unwrap_or("");
        if method.is_server_streaming() || !is_idempotent(&method) {
            return Err(GatewayError::invalid_argument(format!(
                "method {service_fqn}/{method_name} is not idempotent; GET is only accepted for idempotent unary methods"
            )));
        }
        let form = content_type::parse_connect_get_form(query)?;
        let mode = WireMode::ConnectUnary(form.encoding);
        let mapping = transcode::decode_request_body(&method, form.encoding, &form.message)?;
        (mode, mapping)
    } else {
        let content_type = parts
            .headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let mode = content_type::detect_wire_mode(content_type)
            .ok_or_else(|| GatewayError::invalid_argument(format!("unrecognized Content-Type: {content_type}")))?;

        let body_bytes = collect_body(body).await?;
        let payload = if mode.is_streaming() {
            streaming::decode_request_envelope(&body_bytes)?
        } else {
            body_bytes.to_vec()
        };
        let mapping = transcode::decode_request_body(&method, mode.encoding(), &payload)?;
        (mode, mapping)
    };

    if wire_mode.is_streaming() {
        return Ok(build_streaming_response(current.handler.clone(), service_fqn, method_name, request_mapping, parts.headers, wire_mode, method));
    }

    let data = current
        .handler
        .execute_unary(&service_fqn, &method_name, &request_mapping, &parts.headers)
        .await?;

    let body = transcode::encode_response_body(&method, wire_mode.encoding(), &data)?;
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, wire_mode.response_content_type())
        .body(Body::from(body))
        .expect("response with validated headers should always build"))
}

fn build_streaming_response(
    handler: Arc<RpcHandler>,
    service_fqn: String,
    method_name: String,
    request_mapping: Json,
    headers: HeaderMap,
    wire_mode: WireMode,
    method: MethodDescriptor,
) -> Response {
    let encoding = wire_mode.encoding();
    let output_desc = matches!(encoding, Encoding::Proto).then(|| method.output());

    let frames = streaming::start(handler, service_fqn, method_name, request_mapping, headers, encoding, output_desc);
    let body = Body::from_stream(frames.map(Ok::<_, std::io::Error>));

    Response::builder()
        .status(StatusCode::OK)
        .header(http::header::CONTENT_TYPE, wire_mode.response_content_type())
        .header("connect-protocol-version", "1")
        .body(body)
        .expect("streaming response with validated headers should always build")
}

/// Whether `method` is safe to invoke over an unframed Connect `GET`
/// (spec.md §4.4). Proto's `idempotency_level` method option is the only
/// signal the wire format carries for this; methods with no explicit
/// option default to `IdempotencyUnknown`, which is treated as non-GET-able.
fn is_idempotent(method: &MethodDescriptor) -> bool {
    use prost_types::method_options::IdempotencyLevel;
    matches!(
        method.options().idempotency_level(),
        IdempotencyLevel::NoSideEffects | IdempotencyLevel::Idempotent
    )
}

async fn collect_body(body: Body) -> std::result::Result<Bytes, GatewayError> {
    body.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| GatewayError::invalid_argument(format!("failed to read request body: {e}")))
}

fn connect_error_response(err: &GatewayError) -> Response {
    err.log();
    let status = err.code.http_status();
    let body = err.to_connect_body();
    (status, axum::Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_config_server_rejects_unknown_routes_with_not_found() {
        let config = Config {
            services_dir: std::env::temp_dir(),
            graphql_endpoint: "http://localhost:9".to_string(),
            listen_addr: "127.0.0.1:0".to_string(),
            request_timeout_secs: 1,
        };
        let server = GatewayServer::new(config);
        let router = build_router(server.transcoder.clone());

        let response = tower::ServiceExt::oneshot(
            router,
            Request::builder()
                .method(http::Method::POST)
                .uri("/no.such.Service/QueryNope")
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
