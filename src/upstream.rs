//! Upstream Client (spec.md §4.7).
//!
//! Executes GraphQL operations over HTTP against the configured endpoint.
//! Transport/5xx failures are retried with exponential backoff via
//! `reqwest-middleware`/`reqwest-retry`; GraphQL errors and 4xx responses
//! are never retried (spec.md §7) — that distinction is exactly why the
//! retry policy lives at the HTTP-client layer rather than around the
//! whole `Execute` call.

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use serde_json::Value as Json;

use crate::error::{ConnectCode, GatewayError};

const MAX_RETRIES: u32 = 3;

/// The outcome of a successful (2xx) GraphQL call: raw HTTP status plus the
/// decoded envelope, kept separate so the handler can classify results
/// without re-parsing.
pub struct UpstreamResponse {
    pub http_status: u16,
    pub body: Json,
}

#[derive(Serialize)]
struct GraphQlPayload<'a> {
    query: &'a str,
    #[serde(rename = "operationName")]
    operation_name: &'a str,
    variables: &'a Json,
}

/// Thin wrapper over a retrying `reqwest` client, bound to one GraphQL
/// endpoint and one outbound request timeout.
pub struct UpstreamClient {
    client: ClientWithMiddleware,
    endpoint: String,
}

impl UpstreamClient {
    pub fn new(endpoint: String, request_timeout: Duration) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client construction should never fail with static config");

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(inner)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self { client, endpoint }
    }

    /// Executes one GraphQL operation and returns its HTTP status alongside
    /// the parsed JSON envelope. Only transport errors produce `Err`; a
    /// non-2xx HTTP response is still `Ok` so the handler can classify it
    /// per spec.md §4.6.
    pub async fn execute(
        &self,
        operation_raw: &str,
        operation_name: &str,
        variables: &Json,
        headers: &HeaderMap,
    ) -> Result<UpstreamResponse, GatewayError> {
        let payload = GraphQlPayload {
            query: operation_raw,
            operation_name,
            variables,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let http_status = response.status().as_u16();
        let text = response.text().await.map_err(transport_error)?;
        let body: Json = if text.trim().is_empty() {
            Json::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Json::String(text))
        };

        Ok(UpstreamResponse { http_status, body })
    }

    /// Executes a subscription operation, sending the `data` field of every
    /// SSE event with no `errors` onto `sink`. Returns on stream end, a
    /// transport error, a GraphQL error payload, or as soon as `sink` is
    /// closed (the consumer went away — cooperative cancellation).
    pub async fn execute_subscription(
        &self,
        operation_raw: &str,
        operation_name: &str,
        variables: &Json,
        headers: &HeaderMap,
        sink: tokio::sync::mpsc::Sender<Json>,
    ) -> Result<(), GatewayError> {
        let payload = GraphQlPayload {
            query: operation_raw,
            operation_name,
            variables,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .headers(headers.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::new(ConnectCode::from_http_status(status), format!("upstream subscription request failed: {body}"))
                .with_meta(crate::error::ErrorMeta {
                    http_status: Some(status),
                    http_response_body: Some(body),
                    ..Default::default()
                }));
        }

        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| GatewayError::unavailable(format!("SSE stream error: {e}")))?;
            if event.data.is_empty() {
                continue;
            }

            let parsed: Json = serde_json::from_str(&event.data)
                .map_err(|e| GatewayError::invalid_argument(format!("malformed SSE data line: {e}")))?;

            if let Some(errors) = parsed.get("errors").filter(|e| !e.is_null()) {
                return Err(GatewayError::new(ConnectCode::Unknown, "GraphQL subscription reported errors")
                    .with_classification(crate::error::Classification::Critical)
                    .with_meta(crate::error::ErrorMeta {
                        error_classification: Some(crate::error::Classification::Critical),
                        graphql_errors: Some(errors.clone()),
                        ..Default::default()
                    }));
            }

            let data = parsed.get("data").cloned().unwrap_or(Json::Null);
            if sink.send(data).await.is_err() {
                break;
            }
        }

        Ok(())
    }
}

fn transport_error(err: impl std::fmt::Display) -> GatewayError {
    GatewayError::unavailable(format!("upstream transport error: {err}"))
}

/// Strips the header-forwarding denylist (spec.md §4.6) and converts the
/// remainder into a `reqwest::header::HeaderMap`, tolerating header values
/// the inbound framework accepted but `reqwest` would reject outright.
pub fn forwardable_headers(inbound: &http::HeaderMap) -> HeaderMap {
    const DENYLIST: &[&str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
        "host",
        "content-length",
        "content-type",
        "accept",
        "accept-encoding",
        "accept-charset",
        "alt-svc",
        "proxy-connection",
    ];

    let mut out = HeaderMap::new();
    for (name, value) in inbound {
        let lower = name.as_str().to_ascii_lowercase();
        if DENYLIST.contains(&lower.as_str()) || lower.starts_with("sec-websocket-") {
            continue;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_str().as_bytes()) else {
            continue;
        };
        let Ok(value) = HeaderValue::from_bytes(value.as_bytes()) else {
            continue;
        };
        out.append(name, value);
    }
    out
}
