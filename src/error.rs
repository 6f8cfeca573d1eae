//! Error types and the Connect error taxonomy.
//!
//! The gateway speaks three wire protocols but only one error vocabulary:
//! the closed set of Connect codes (`ConnectCode`). Every failure surfaced
//! to a caller, regardless of which protocol it arrived over, is reduced to
//! a [`GatewayError`] carrying one of these codes plus the classification
//! and metadata spec'd in spec.md §3/§7.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used for load-time / infrastructure failures.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure error type for load-time failures.
///
/// Distinct from [`GatewayError`]: `Error` covers failures while building
/// the service catalog (descriptor loading, discovery, registry
/// population) and low-level plumbing; `GatewayError` covers per-request
/// failures that must be mapped to a Connect code and returned to a caller.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("proto compile error: {0}")]
    ProtoCompile(String),

    #[error("descriptor error: {0}")]
    Descriptor(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The closed set of Connect RPC status codes (spec.md §7 taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectCode {
    Canceled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ConnectCode {
    /// Maps the code to an HTTP status, per spec.md §6.
    ///
    /// `ResourceExhausted` and `DeadlineExceeded` each list two plausible
    /// statuses in the table; we pick the first-listed one consistently
    /// since the table gives no per-case discriminator.
    pub fn http_status(self) -> http::StatusCode {
        use http::StatusCode as S;
        match self {
            ConnectCode::Canceled => S::from_u16(499).unwrap(),
            ConnectCode::InvalidArgument
            | ConnectCode::FailedPrecondition
            | ConnectCode::OutOfRange => S::BAD_REQUEST,
            ConnectCode::Unauthenticated => S::UNAUTHORIZED,
            ConnectCode::PermissionDenied => S::FORBIDDEN,
            ConnectCode::NotFound => S::NOT_FOUND,
            ConnectCode::AlreadyExists | ConnectCode::Aborted => S::CONFLICT,
            ConnectCode::ResourceExhausted => S::PAYLOAD_TOO_LARGE,
            ConnectCode::DeadlineExceeded => S::REQUEST_TIMEOUT,
            ConnectCode::Unimplemented => S::NOT_IMPLEMENTED,
            ConnectCode::Internal | ConnectCode::DataLoss | ConnectCode::Unknown => {
                S::INTERNAL_SERVER_ERROR
            }
            ConnectCode::Unavailable => S::SERVICE_UNAVAILABLE,
        }
    }

    /// Maps an upstream HTTP status to a Connect code, per spec.md §6.
    pub fn from_http_status(status: u16) -> ConnectCode {
        match status {
            401 => ConnectCode::Unauthenticated,
            403 => ConnectCode::PermissionDenied,
            404 => ConnectCode::NotFound,
            408 | 504 => ConnectCode::DeadlineExceeded,
            409 => ConnectCode::AlreadyExists,
            413 | 429 => ConnectCode::ResourceExhausted,
            400 | 422 => ConnectCode::InvalidArgument,
            501 => ConnectCode::Unimplemented,
            503 => ConnectCode::Unavailable,
            499 => ConnectCode::Canceled,
            _ => ConnectCode::Internal,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ConnectCode::Canceled => "canceled",
            ConnectCode::Unknown => "unknown",
            ConnectCode::InvalidArgument => "invalid_argument",
            ConnectCode::DeadlineExceeded => "deadline_exceeded",
            ConnectCode::NotFound => "not_found",
            ConnectCode::AlreadyExists => "already_exists",
            ConnectCode::PermissionDenied => "permission_denied",
            ConnectCode::ResourceExhausted => "resource_exhausted",
            ConnectCode::FailedPrecondition => "failed_precondition",
            ConnectCode::Aborted => "aborted",
            ConnectCode::OutOfRange => "out_of_range",
            ConnectCode::Unimplemented => "unimplemented",
            ConnectCode::Internal => "internal",
            ConnectCode::Unavailable => "unavailable",
            ConnectCode::DataLoss => "data_loss",
            ConnectCode::Unauthenticated => "unauthenticated",
        }
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a GraphQL-layer error left any usable data behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    /// No usable data was returned; the whole call failed.
    Critical,
    /// Partial data was returned alongside the GraphQL errors.
    NonCritical,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Critical => f.write_str("CRITICAL"),
            Classification::NonCritical => f.write_str("NON-CRITICAL"),
        }
    }
}

/// Structured metadata attached to a [`GatewayError`], serialized into the
/// Connect error body's `meta` object (spec.md §6).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorMeta {
    #[serde(rename = "http-status", skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(rename = "http-response-body", skip_serializing_if = "Option::is_none")]
    pub http_response_body: Option<String>,
    #[serde(rename = "error-classification", skip_serializing_if = "Option::is_none")]
    pub error_classification: Option<Classification>,
    #[serde(rename = "graphql-errors", skip_serializing_if = "Option::is_none")]
    pub graphql_errors: Option<serde_json::Value>,
    #[serde(rename = "graphql-partial-data", skip_serializing_if = "Option::is_none")]
    pub graphql_partial_data: Option<serde_json::Value>,
}

impl ErrorMeta {
    /// Flattens the metadata into the string-keyed map the Connect error
    /// body's `meta` field is specified as.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut out = HashMap::new();
        if let Some(status) = self.http_status {
            out.insert("http-status".to_string(), status.to_string());
        }
        if let Some(body) = &self.http_response_body {
            out.insert("http-response-body".to_string(), body.clone());
        }
        if let Some(classification) = self.error_classification {
            out.insert("error-classification".to_string(), classification.to_string());
        }
        if let Some(errors) = &self.graphql_errors {
            out.insert("graphql-errors".to_string(), errors.to_string());
        }
        if let Some(data) = &self.graphql_partial_data {
            out.insert("graphql-partial-data".to_string(), data.to_string());
        }
        out
    }
}

/// A request-facing error: a Connect code, a message, and classification +
/// metadata for the CRITICAL/NON-CRITICAL GraphQL error taxonomy.
#[derive(Debug, Clone)]
pub struct GatewayError {
    pub code: ConnectCode,
    pub message: String,
    pub classification: Option<Classification>,
    pub meta: ErrorMeta,
}

impl GatewayError {
    pub fn new(code: ConnectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            classification: None,
            meta: ErrorMeta::default(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ConnectCode::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ConnectCode::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ConnectCode::Unavailable, message)
    }

    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn with_meta(mut self, meta: ErrorMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Emits the one structured log line per error spec.md §7 mandates:
    /// warning for NON-CRITICAL, error otherwise (transport/decoding/lookup
    /// failures have no classification and are logged at error).
    pub fn log(&self) {
        match self.classification {
            Some(Classification::NonCritical) => {
                tracing::warn!(code = %self.code, message = %self.message, "non-critical gateway error");
            }
            _ => {
                tracing::error!(code = %self.code, message = %self.message, "gateway error");
            }
        }
    }

    /// Renders the Connect JSON error body: `{code, message, meta?}`.
    pub fn to_connect_body(&self) -> serde_json::Value {
        let meta = self.meta.to_map();
        let mut body = serde_json::json!({
            "code": self.code.to_string(),
            "message": self.message,
        });
        if !meta.is_empty() {
            body["meta"] = serde_json::json!(meta);
        }
        body
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_code_http_status_mapping_matches_table() {
        assert_eq!(ConnectCode::Canceled.http_status().as_u16(), 499);
        assert_eq!(ConnectCode::InvalidArgument.http_status(), http::StatusCode::BAD_REQUEST);
        assert_eq!(ConnectCode::Unauthenticated.http_status(), http::StatusCode::UNAUTHORIZED);
        assert_eq!(ConnectCode::NotFound.http_status(), http::StatusCode::NOT_FOUND);
        assert_eq!(ConnectCode::Unknown.http_status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ConnectCode::Unavailable.http_status(), http::StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn http_status_to_connect_code_matches_scenario_six() {
        assert_eq!(ConnectCode::from_http_status(401), ConnectCode::Unauthenticated);
    }

    #[test]
    fn error_meta_serializes_documented_keys() {
        let meta = ErrorMeta {
            http_status: Some(200),
            error_classification: Some(Classification::Critical),
            graphql_errors: Some(serde_json::json!([{"message": "not found"}])),
            ..Default::default()
        };
        let map = meta.to_map();
        assert_eq!(map.get("http-status").unwrap(), "200");
        assert_eq!(map.get("error-classification").unwrap(), "CRITICAL");
        assert!(map.get("graphql-errors").unwrap().contains("not found"));
    }

    #[test]
    fn critical_error_body_matches_scenario_three() {
        let err = GatewayError::new(ConnectCode::Unknown, "GraphQL operation failed: not found")
            .with_classification(Classification::Critical)
            .with_meta(ErrorMeta {
                http_status: Some(200),
                error_classification: Some(Classification::Critical),
                graphql_errors: Some(serde_json::json!([{"message": "not found"}])),
                ..Default::default()
            });
        let body = err.to_connect_body();
        assert_eq!(body["code"], "unknown");
        assert_eq!(body["message"], "GraphQL operation failed: not found");
        assert_eq!(body["meta"]["error-classification"], "CRITICAL");
    }
}
