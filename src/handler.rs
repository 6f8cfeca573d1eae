//! RPC Handler (spec.md §4.6).
//!
//! Resolves a decoded call to a registered GraphQL operation, translates
//! variable names, forwards to the Upstream Client, and classifies the
//! result into the five-way taxonomy spec.md §4.6/§7 describes.

use std::sync::Arc;

use serde_json::Value as Json;

use crate::error::{Classification, ConnectCode, ErrorMeta, GatewayError};
use crate::operations::{strip_operation_prefix, OperationRecord, OperationRegistry};
use crate::transcode::naming::camelize_top_level_keys;
use crate::upstream::{forwardable_headers, UpstreamClient};

/// A successful unary call's result: the GraphQL `data` field, promoted to
/// the top level (spec.md §4.6 "Return the data field, not the enclosing
/// envelope").
pub type HandlerResult = Result<Json, GatewayError>;

pub struct RpcHandler {
    registry: Arc<OperationRegistry>,
    upstream: Arc<UpstreamClient>,
}

impl RpcHandler {
    pub fn new(registry: Arc<OperationRegistry>, upstream: Arc<UpstreamClient>) -> Self {
        Self { registry, upstream }
    }

    /// Looks up the operation for `(service_fqn, method_name)` following
    /// the stripped-prefix-then-original fallback rule.
    pub fn resolve_operation(&self, service_fqn: &str, method_name: &str) -> Option<Arc<OperationRecord>> {
        if let Some(stripped) = strip_operation_prefix(method_name) {
            if let Some(record) = self.registry.get_for_service(service_fqn, stripped) {
                return Some(record);
            }
        }
        self.registry.get_for_service(service_fqn, method_name)
    }

    /// Executes a unary call: resolves the operation, translates variables,
    /// forwards upstream, and classifies the result.
    pub async fn execute_unary(
        &self,
        service_fqn: &str,
        method_name: &str,
        request_mapping: &Json,
        headers: &http::HeaderMap,
    ) -> HandlerResult {
        let operation = self
            .resolve_operation(service_fqn, method_name)
            .ok_or_else(|| GatewayError::not_found(format!("no operation registered for {service_fqn}/{method_name}")))?;

        let variables = translate_variables(request_mapping);
        let outbound_headers = forwardable_headers(headers);

        let response = self
            .upstream
            .execute(&operation.raw, &operation.name, &variables, &outbound_headers)
            .await?;

        classify_response(response.http_status, response.body)
    }

    /// Drives a subscription operation, sending each translated payload
    /// onto `sink`. Stops as soon as `sink` is closed by the consumer
    /// (cooperative cancellation — spec.md §4.5 step 8).
    pub async fn execute_subscription(
        &self,
        service_fqn: &str,
        method_name: &str,
        request_mapping: &Json,
        headers: &http::HeaderMap,
        sink: tokio::sync::mpsc::Sender<Json>,
    ) -> Result<(), GatewayError> {
        let operation = self
            .resolve_operation(service_fqn, method_name)
            .ok_or_else(|| GatewayError::not_found(format!("no operation registered for {service_fqn}/{method_name}")))?;

        let variables = translate_variables(request_mapping);
        let outbound_headers = forwardable_headers(headers);

        self.upstream
            .execute_subscription(&operation.raw, &operation.name, &variables, &outbound_headers, sink)
            .await
    }
}

/// Converts every top-level key of the neutral request mapping from
/// snake_case to camelCase before sending upstream (spec.md §4.6). Falls
/// back to an empty object mapping if the request wasn't a JSON object
/// (the decoder only ever produces objects or an explicit empty mapping,
/// but defensive here costs nothing).
fn translate_variables(request_mapping: &Json) -> Json {
    match request_mapping.as_object() {
        Some(obj) => Json::Object(camelize_top_level_keys(obj)),
        None => Json::Object(serde_json::Map::new()),
    }
}

/// Classifies a completed upstream HTTP response into the five-way
/// taxonomy spec.md §4.6 specifies.
fn classify_response(http_status: u16, body: Json) -> HandlerResult {
    if !(200..300).contains(&http_status) {
        let body_text = body.as_str().map(str::to_string).unwrap_or_else(|| body.to_string());
        let err = GatewayError::new(
            ConnectCode::from_http_status(http_status),
            format!("upstream HTTP error: {http_status}"),
        )
        .with_classification(Classification::Critical)
        .with_meta(ErrorMeta {
            http_status: Some(http_status),
            http_response_body: Some(body_text),
            ..Default::default()
        });
        return Err(err);
    }

    let errors = body.get("errors").filter(|e| !e.is_null());
    let data = body.get("data").cloned().unwrap_or(Json::Null);
    let data_is_empty = data.is_null() || data.as_object().map(|o| o.is_empty()).unwrap_or(false);

    match errors {
        Some(errors) if data_is_empty => {
            let message = first_error_message(errors);
            Err(GatewayError::new(ConnectCode::Unknown, format!("GraphQL operation failed: {message}"))
                .with_classification(Classification::Critical)
                .with_meta(ErrorMeta {
                    http_status: Some(http_status),
                    error_classification: Some(Classification::Critical),
                    graphql_errors: Some(errors.clone()),
                    ..Default::default()
                }))
        }
        Some(errors) => {
            let message = first_error_message(errors);
            Err(GatewayError::new(ConnectCode::Unknown, format!("GraphQL operation returned partial data: {message}"))
                .with_classification(Classification::NonCritical)
                .with_meta(ErrorMeta {
                    http_status: Some(http_status),
                    error_classification: Some(Classification::NonCritical),
                    graphql_errors: Some(errors.clone()),
                    graphql_partial_data: Some(data),
                    ..Default::default()
                }))
        }
        None if data.is_null() => Ok(Json::Object(serde_json::Map::new())),
        None => Ok(data),
    }
}

fn first_error_message(errors: &Json) -> String {
    errors
        .as_array()
        .and_then(|a| a.first())
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or("unknown error")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_success_returns_data_not_envelope() {
        let body = serde_json::json!({"data": {"user": {"id": 1, "name": "Jane"}}});
        let result = classify_response(200, body).unwrap();
        assert_eq!(result, serde_json::json!({"user": {"id": 1, "name": "Jane"}}));
    }

    #[test]
    fn null_data_and_no_errors_is_empty_mapping() {
        let body = serde_json::json!({"data": null});
        let result = classify_response(200, body).unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[test]
    fn critical_when_no_data_and_errors_present() {
        let body = serde_json::json!({"data": null, "errors": [{"message": "not found"}]});
        let err = classify_response(200, body).unwrap_err();
        assert_eq!(err.code, ConnectCode::Unknown);
        assert_eq!(err.classification, Some(Classification::Critical));
        assert_eq!(err.meta.graphql_errors.unwrap(), serde_json::json!([{"message": "not found"}]));
    }

    #[test]
    fn non_critical_when_partial_data_present() {
        let body = serde_json::json!({
            "data": {"user": {"id": "123", "email": null}},
            "errors": [{"message": "email forbidden", "path": ["user", "email"]}],
        });
        let err = classify_response(200, body).unwrap_err();
        assert_eq!(err.classification, Some(Classification::NonCritical));
        assert_eq!(
            err.meta.graphql_partial_data.unwrap(),
            serde_json::json!({"user": {"id": "123", "email": null}})
        );
    }

    #[test]
    fn http_error_maps_via_connect_code_table() {
        let err = classify_response(401, Json::String("Unauthorized".to_string())).unwrap_err();
        assert_eq!(err.code, ConnectCode::Unauthenticated);
        assert_eq!(err.meta.http_status, Some(401));
        assert_eq!(err.meta.http_response_body.as_deref(), Some("Unauthorized"));
        assert_eq!(err.classification, Some(Classification::Critical));
    }

    #[test]
    fn variable_translation_camelizes_top_level_keys_only() {
        let request = serde_json::json!({"employee_id": 1, "has_pets": true});
        let translated = translate_variables(&request);
        assert_eq!(translated, serde_json::json!({"employeeId": 1, "hasPets": true}));
    }
}
