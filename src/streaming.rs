//! Streaming Engine (spec.md §4.5).
//!
//! Implements the Connect server-streaming envelope on top of
//! `axum::body::Body`. There's no existing Connect implementation upstream
//! in this lineage to adapt — the teacher's streaming shape
//! (`StreamHellosStream` in its greeter example) is a `tonic::Streaming`
//! response built from a channel-fed `ReceiverStream`; the same
//! spawn-a-producer-task, read-from-a-bounded-channel structure is used
//! here, generalized from a gRPC response stream to an SSE-sourced one.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use prost_reflect::MessageDescriptor;
use serde_json::Value as Json;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::GatewayError;
use crate::handler::RpcHandler;
use crate::transcode::{codec, Encoding};

/// Bit 1 of a frame's flags byte: this is the terminal `EndStreamResponse`
/// frame (spec.md §4.5/§6).
pub const FLAG_END_STREAM: u8 = 0x02;

/// Depth of the bounded channel between the upstream SSE producer and the
/// frame-writing consumer (spec.md §4.5/§9).
const CHANNEL_CAPACITY: usize = 100;

/// Encodes one `[flags:u8][length:u32 BE][payload]` frame.
pub fn encode_frame(flags: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + payload.len());
    buf.extend_from_slice(&[flags]);
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.freeze()
}

fn encode_success_end_frame() -> Bytes {
    encode_frame(FLAG_END_STREAM, &[])
}

fn encode_error_end_frame(err: &GatewayError) -> Bytes {
    let body = serde_json::json!({
        "error": {
            "code": err.code.to_string(),
            "message": err.message,
        }
    });
    let payload = serde_json::to_vec(&body).unwrap_or_default();
    encode_frame(FLAG_END_STREAM, &payload)
}

/// Decodes the single request envelope Connect streaming sends: a lone
/// `[flags][length][payload]` frame, or an entirely empty body (permitted
/// for subscriptions with no input fields).
pub fn decode_request_envelope(body: &[u8]) -> Result<Vec<u8>, GatewayError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    if body.len() < 5 {
        return Err(GatewayError::invalid_argument("streaming request envelope shorter than 5 bytes"));
    }
    let length = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let payload_end = 5usize
        .checked_add(length)
        .filter(|&end| end <= body.len())
        .ok_or_else(|| GatewayError::invalid_argument("streaming request envelope length exceeds body size"))?;
    Ok(body[5..payload_end].to_vec())
}

fn encode_data_frame(datum: &Json, encoding: Encoding, output_desc: Option<&MessageDescriptor>) -> Result<Bytes, GatewayError> {
    let payload = match (encoding, output_desc) {
        (Encoding::Json, _) => serde_json::to_vec(datum)
            .map_err(|e| GatewayError::new(crate::error::ConnectCode::Internal, format!("failed to serialize streaming frame: {e}")))?,
        (Encoding::Proto, Some(desc)) => codec::encode_wire_from_mapping(desc, datum)?,
        (Encoding::Proto, None) => {
            return Err(GatewayError::new(
                crate::error::ConnectCode::Internal,
                "proto streaming requested but no output message descriptor was supplied",
            ))
        }
    };
    Ok(encode_frame(0, &payload))
}

/// Drives one Connect server-streaming response: spawns a producer task
/// that calls the handler's subscription API, and returns a
/// `Stream<Item = Bytes>` of already-framed bytes suitable for
/// `axum::body::Body::from_stream`.
///
/// Cancellation is cooperative and channel-driven: when the caller drops
/// the returned stream (client disconnected, response body discarded), the
/// frame channel's receiver is dropped, `sink.send` inside the producer
/// starts failing, and the producer exits on its next upstream event
/// (spec.md §4.5 step 8).
pub fn start(
    handler: Arc<RpcHandler>,
    service_fqn: String,
    method_name: String,
    request_mapping: Json,
    headers: http::HeaderMap,
    encoding: Encoding,
    output_desc: Option<MessageDescriptor>,
) -> ReceiverStream<Bytes> {
    let (data_tx, mut data_rx) = mpsc::channel::<Json>(CHANNEL_CAPACITY);
    let (result_tx, result_rx) = oneshot::channel::<Result<(), GatewayError>>();
    let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);

    // Producer: drives the upstream subscription, forwarding each datum
    // onto the data channel.
    tokio::spawn(async move {
        let result = handler
            .execute_subscription(&service_fqn, &method_name, &request_mapping, &headers, data_tx)
            .await;
        let _ = result_tx.send(result);
    });

    // Consumer: encodes each datum as a data frame, then emits exactly one
    // end frame once the producer finishes.
    tokio::spawn(async move {
        while let Some(datum) = data_rx.recv().await {
            match encode_data_frame(&datum, encoding, output_desc.as_ref()) {
                Ok(frame) => {
                    if frame_tx.send(frame).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    err.log();
                    let _ = frame_tx.send(encode_error_end_frame(&err)).await;
                    return;
                }
            }
        }

        let end_frame = match result_rx.await {
            Ok(Ok(())) => encode_success_end_frame(),
            Ok(Err(err)) => {
                err.log();
                encode_error_end_frame(&err)
            }
            // Producer task died without sending a result (panicked) — still
            // terminate the stream with a generic internal error rather than
            // hanging the consumer forever.
            Err(_) => encode_error_end_frame(&GatewayError::new(
                crate::error::ConnectCode::Internal,
                "streaming producer task ended without a result",
            )),
        };
        let _ = frame_tx.send(end_frame).await;
    });

    ReceiverStream::new(frame_rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn frame_encoding_matches_wire_contract() {
        let frame = encode_frame(0, b"hello");
        assert_eq!(frame[0], 0);
        assert_eq!(u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]), 5);
        assert_eq!(&frame[5..], b"hello");
    }

    #[test]
    fn success_end_frame_has_flag_set_and_empty_payload() {
        let frame = encode_success_end_frame();
        assert_eq!(frame[0] & FLAG_END_STREAM, FLAG_END_STREAM);
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn error_end_frame_carries_code_and_message() {
        let err = GatewayError::not_found("missing");
        let frame = encode_error_end_frame(&err);
        assert_eq!(frame[0] & FLAG_END_STREAM, FLAG_END_STREAM);
        let length = u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]]) as usize;
        let payload: Json = serde_json::from_slice(&frame[5..5 + length]).unwrap();
        assert_eq!(payload["error"]["code"], "not_found");
        assert_eq!(payload["error"]["message"], "missing");
    }

    #[test]
    fn empty_body_decodes_to_empty_envelope() {
        assert_eq!(decode_request_envelope(&[]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn short_body_is_rejected() {
        assert!(decode_request_envelope(&[0, 0, 0]).is_err());
    }

    #[test]
    fn envelope_with_payload_round_trips() {
        let body = encode_frame(0, b"{}");
        let payload = decode_request_envelope(&body).unwrap();
        assert_eq!(payload, b"{}".to_vec());
    }

    #[tokio::test]
    async fn five_events_produce_five_data_frames_and_one_end_frame() {
        // Exercises the frame-assembly half directly (producer/consumer
        // wiring through a real upstream is covered by the integration
        // tests), feeding the consumer loop's logic via the same channel
        // plumbing `start` uses.
        let (frame_tx, frame_rx) = mpsc::channel::<Bytes>(CHANNEL_CAPACITY);
        for i in 0..3 {
            let frame = encode_data_frame(&serde_json::json!({"tick": i}), Encoding::Json, None).unwrap();
            frame_tx.send(frame).await.unwrap();
        }
        frame_tx.send(encode_success_end_frame()).await.unwrap();
        drop(frame_tx);

        let frames: Vec<Bytes> = ReceiverStream::new(frame_rx).collect::<Vec<_>>().await;
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[3][0] & FLAG_END_STREAM, FLAG_END_STREAM);
        for frame in &frames[..3] {
            assert_eq!(frame[0], 0);
        }
    }
}
