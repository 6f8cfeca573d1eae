//! Inbound protocol / Content-Type detection (spec.md §4.4, §6).

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{ConnectCode, GatewayError};

/// Wire encoding carried by the request/response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Proto,
}

/// Which of the three wire protocols (and which framing) a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// Unary Connect: raw (unenveloped) body.
    ConnectUnary(Encoding),
    /// Streaming Connect: enveloped frames (spec.md §4.5).
    ConnectStream(Encoding),
    /// gRPC over HTTP/2: enveloped frames, trailers carry status.
    Grpc,
    /// gRPC-Web: enveloped frames in the body; trailers as a final frame.
    GrpcWeb,
}

impl WireMode {
    pub fn is_streaming(self) -> bool {
        matches!(self, WireMode::ConnectStream(_) | WireMode::Grpc | WireMode::GrpcWeb)
    }

    pub fn encoding(self) -> Encoding {
        match self {
            WireMode::ConnectUnary(e) | WireMode::ConnectStream(e) => e,
            // gRPC/gRPC-Web always carry protobuf in this gateway (no
            // registered method accepts a grpc+json content type here).
            WireMode::Grpc | WireMode::GrpcWeb => Encoding::Proto,
        }
    }

    pub fn response_content_type(self) -> &'static str {
        match self {
            WireMode::ConnectUnary(Encoding::Json) => "application/json",
            WireMode::ConnectUnary(Encoding::Proto) => "application/proto",
            WireMode::ConnectStream(Encoding::Json) => "application/connect+json",
            WireMode::ConnectStream(Encoding::Proto) => "application/connect+proto",
            WireMode::Grpc => "application/grpc+proto",
            WireMode::GrpcWeb => "application/grpc-web+proto",
        }
    }
}

/// Detects the wire mode from an inbound `Content-Type` header, per the
/// table in spec.md §6.
pub fn detect_wire_mode(content_type: &str) -> Option<WireMode> {
    let ct = content_type.split(';').next().unwrap_or("").trim();
    match ct {
        "application/json" => Some(WireMode::ConnectUnary(Encoding::Json)),
        "application/proto" => Some(WireMode::ConnectUnary(Encoding::Proto)),
        "application/connect+json" => Some(WireMode::ConnectStream(Encoding::Json)),
        "application/connect+proto" => Some(WireMode::ConnectStream(Encoding::Proto)),
        "application/grpc" | "application/grpc+proto" => Some(WireMode::Grpc),
        other if other.starts_with("application/grpc-web") => Some(WireMode::GrpcWeb),
        _ => None,
    }
}

/// The decoded Connect GET-form query parameters (spec.md §4.4, §6).
pub struct ConnectGetForm {
    pub encoding: Encoding,
    pub message: Vec<u8>,
}

/// Parses the Connect unary GET query string into a decoded payload.
/// Only valid for idempotent unary Connect calls; callers are responsible
/// for checking method idempotence before accepting a `GET`.
pub fn parse_connect_get_form(query: &str) -> Result<ConnectGetForm, GatewayError> {
    let params: HashMap<String, String> = url_decode_query(query);

    let connect_version = params.get("connect").map(String::as_str);
    if connect_version != Some("v1") {
        return Err(GatewayError::invalid_argument("missing or invalid connect=v1 query parameter"));
    }

    if let Some(compression) = params.get("compression") {
        if compression != "identity" {
            return Err(GatewayError::invalid_argument(format!(
                "unsupported compression: {compression}"
            )));
        }
    }

    let encoding = match params.get("encoding").map(String::as_str) {
        Some("json") => Encoding::Json,
        Some("proto") => Encoding::Proto,
        other => {
            return Err(GatewayError::invalid_argument(format!(
                "unsupported or missing encoding query parameter: {other:?}"
            )))
        }
    };

    let raw_message = params.get("message").cloned().unwrap_or_default();
    let base64_flag = params.get("base64").map(String::as_str) == Some("1");

    let message = if base64_flag || encoding == Encoding::Proto {
        BASE64
            .decode(raw_message.as_bytes())
            .map_err(|e| GatewayError::invalid_argument(format!("invalid base64 message: {e}")))?
    } else {
        raw_message.into_bytes()
    };

    Ok(ConnectGetForm { encoding, message })
}

fn url_decode_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or_default();
        out.insert(percent_decode(key), percent_decode(value));
    }
    out
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                if let Ok(value) = u8::from_str_radix(std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or(""), 16) {
                    out.push(value);
                    i += 3;
                } else {
                    out.push(bytes[i]);
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a Connect URL path (`/<service-fqn>/<method-name>`) into its two
/// components. Any other shape is a `NotFound` per spec.md §4.4.
pub fn split_service_and_method(path: &str) -> Result<(String, String), GatewayError> {
    let trimmed = path.trim_start_matches('/');
    let mut parts = trimmed.rsplitn(2, '/');
    let method = parts.next().unwrap_or_default();
    let service = parts.next().unwrap_or_default();
    if service.is_empty() || method.is_empty() {
        return Err(GatewayError::new(ConnectCode::NotFound, format!("malformed path: {path}")));
    }
    Ok((service.to_string(), method.to_string()))
}
