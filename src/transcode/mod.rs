//! Transcoding: everything that converts between the wire (Connect/gRPC/
//! gRPC-Web, proto or JSON) and the neutral `serde_json` mapping the
//! handler and upstream client exchange GraphQL variables/data as
//! (spec.md §4.4).

pub mod codec;
pub mod content_type;
pub mod naming;

use prost_reflect::MethodDescriptor;
use serde_json::Value as Json;

use crate::error::GatewayError;
pub use content_type::{detect_wire_mode, split_service_and_method, ConnectGetForm, Encoding, WireMode};

/// Decodes an inbound request body for `method` against `mode`'s encoding
/// into the neutral JSON mapping used as GraphQL variables.
///
/// JSON bodies are parsed directly (already the neutral shape, modulo
/// snake/camel translation performed a layer up by the handler); proto
/// bodies are decoded against the method's input message descriptor.
pub fn decode_request_body(method: &MethodDescriptor, encoding: Encoding, body: &[u8]) -> Result<Json, GatewayError> {
    match encoding {
        Encoding::Json => {
            if body.is_empty() {
                return Ok(Json::Object(serde_json::Map::new()));
            }
            serde_json::from_slice(body)
                .map_err(|e| GatewayError::invalid_argument(format!("invalid JSON request body: {e}")))
        }
        Encoding::Proto => codec::decode_wire(&method.input(), body),
    }
}

/// Encodes a GraphQL `data` mapping (already camelCase, as returned by the
/// upstream) into the outbound response body for `method`/`encoding`.
pub fn encode_response_body(method: &MethodDescriptor, encoding: Encoding, data: &Json) -> Result<Vec<u8>, GatewayError> {
    match encoding {
        Encoding::Json => serde_json::to_vec(data)
            .map_err(|e| GatewayError::new(crate::error::ConnectCode::Internal, format!("failed to serialize JSON response: {e}"))),
        Encoding::Proto => codec::encode_wire_from_mapping(&method.output(), data),
    }
}
