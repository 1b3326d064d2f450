// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! LSP message types and `Content-Length` framing.
//!
//! Inbound JSON is classified into a closed set of [`Message`] variants at
//! this boundary; nothing past the framer sees an untyped frame. Field
//! presence is preserved: an absent `params` and `"params": null` decode to
//! different values and encode back to what they were.

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{EngineError, Result};

/// JSON-RPC protocol version carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Default upper bound on a single frame body (4 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// A header block longer than this without a terminator is garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// JSON-RPC `MethodNotFound`.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC `InternalError`.
pub const INTERNAL_ERROR: i64 = -32603;
/// LSP `RequestCancelled`.
pub const REQUEST_CANCELLED: i64 = -32800;

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// Deserializes a field that is present in the object, keeping `null` as
/// `Some(Value::Null)`. Combined with `#[serde(default)]`, an absent field
/// stays `None`.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A request identifier.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id (the only kind this client issues).
    Number(i64),
    /// String id (some servers use these for their own requests).
    String(String),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A request: carries an id and expects exactly one response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Request {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Identifier the response will echo.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Parameters, if any were sent.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

impl Request {
    /// Creates a request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A notification: no id, no response.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Parameters, if any were sent.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

impl Notification {
    /// Creates a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// A response to an earlier request.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Response {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Id of the request being answered; `null` only for unparseable requests.
    pub id: Option<RequestId>,
    /// Result on success. `Some(Value::Null)` is a legitimate result.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    /// A successful response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    #[must_use]
    pub fn failure(id: RequestId, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id: Some(id),
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any message that crosses the wire.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Message {
    /// Has `id` and `method`.
    Request(Request),
    /// Has `id` and `result` or `error`.
    Response(Response),
    /// Has `method` but no `id`.
    Notification(Notification),
}

impl Message {
    /// Classifies a decoded JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] if the value is not a well-formed
    /// request, response, or notification.
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(EngineError::Protocol(
                "message is not a JSON object".to_string(),
            ));
        };

        let has_id = object.contains_key("id");
        let has_method = object.get("method").is_some_and(Value::is_string);
        let has_outcome = object.contains_key("result") || object.contains_key("error");

        let message = match (has_method, has_id, has_outcome) {
            (true, true, _) => serde_json::from_value(value).map(Self::Request),
            (true, false, _) => serde_json::from_value(value).map(Self::Notification),
            (false, true, true) => serde_json::from_value(value).map(Self::Response),
            (false, true, false) => {
                return Err(EngineError::Protocol(
                    "response carries neither result nor error".to_string(),
                ));
            }
            (false, false, _) => {
                return Err(EngineError::Protocol(
                    "message has neither id nor method".to_string(),
                ));
            }
        };

        message.map_err(|e| EngineError::Protocol(format!("malformed message: {e}")))
    }

    /// Parses and classifies a frame body.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] on invalid JSON or an unclassifiable message.
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| EngineError::Protocol(format!("invalid JSON body: {e}")))?;
        Self::from_value(value)
    }

    /// The method name, for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }
}

/// Encodes a message as a `Content-Length` framed byte sequence.
///
/// # Errors
///
/// Returns [`EngineError::Json`] if the message cannot be serialized.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(message)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Finds `Content-Length` in a header block.
///
/// Leading garbage on the header line is tolerated so the decoder can
/// resynchronize after a frame whose declared length was too short.
fn content_length(headers: &str) -> std::result::Result<usize, String> {
    const KEY: &str = "content-length:";
    for line in headers.split("\r\n") {
        let lower = line.to_ascii_lowercase();
        if let Some(idx) = lower.find(KEY) {
            let value = line[idx + KEY.len()..].trim();
            return value
                .parse::<usize>()
                .map_err(|e| format!("invalid Content-Length '{value}': {e}"));
        }
    }
    Err("missing Content-Length header".to_string())
}

/// Incremental frame decoder.
///
/// Bytes arrive in arbitrary chunks through [`FrameDecoder::extend`];
/// [`FrameDecoder::decode_next`] yields a message once a whole frame is
/// buffered. A malformed frame is consumed and reported, and decoding resumes
/// with the next one.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_bytes: usize,
    /// Body bytes of a rejected oversized frame still to be skipped.
    discard: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    /// Creates a decoder that rejects bodies larger than `max_frame_bytes`.
    #[must_use]
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_frame_bytes,
            discard: 0,
        }
    }

    /// Appends raw bytes read from the stream.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.discard > 0 {
            let skipped = self.discard.min(bytes.len());
            self.discard -= skipped;
            self.buffer.extend_from_slice(&bytes[skipped..]);
        } else {
            self.buffer.extend_from_slice(bytes);
        }
    }

    /// Number of buffered, not yet decoded bytes.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Decodes the next complete frame, or `Ok(None)` if more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] for a malformed header, an oversized
    /// frame, or a body that is not a valid message. The offending frame is
    /// dropped; calling again continues with the following bytes.
    pub fn decode_next(&mut self) -> Result<Option<Message>> {
        let Some(header_end) = self
            .buffer
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
        else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                self.buffer.clear();
                return Err(EngineError::Protocol(format!(
                    "header block exceeds {MAX_HEADER_BYTES} bytes"
                )));
            }
            return Ok(None);
        };
        let header_len = header_end + HEADER_TERMINATOR.len();

        let length = match std::str::from_utf8(&self.buffer[..header_end]) {
            Ok(headers) => content_length(headers),
            Err(e) => Err(format!("headers are not valid UTF-8: {e}")),
        };
        let length = match length {
            Ok(length) => length,
            Err(reason) => {
                self.buffer.advance(header_len);
                return Err(EngineError::Protocol(reason));
            }
        };

        if length > self.max_frame_bytes {
            self.buffer.advance(header_len);
            let available = self.buffer.len().min(length);
            self.buffer.advance(available);
            self.discard = length - available;
            return Err(EngineError::Protocol(format!(
                "Content-Length {length} exceeds maximum {}",
                self.max_frame_bytes
            )));
        }

        if self.buffer.len() < header_len + length {
            return Ok(None);
        }

        self.buffer.advance(header_len);
        let body = self.buffer.split_to(length);
        Message::from_slice(&body).map(Some)
    }

    /// Signals end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] if a partial frame is left over,
    /// i.e. the stream ended before the declared body length arrived.
    pub fn finish(&mut self) -> Result<()> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return Ok(());
        }

        let declared = self
            .buffer
            .windows(HEADER_TERMINATOR.len())
            .position(|w| w == HEADER_TERMINATOR)
            .and_then(|end| {
                let headers = std::str::from_utf8(&self.buffer[..end]).ok()?;
                let length = content_length(headers).ok()?;
                Some((length, self.buffer.len() - end - HEADER_TERMINATOR.len()))
            });
        self.buffer.clear();

        Err(EngineError::Protocol(match declared {
            Some((length, got)) => {
                format!("stream ended mid-frame: declared {length} bytes, received {got}")
            }
            None => "stream ended inside a header block".to_string(),
        }))
    }
}

/// Reads framed messages from an async byte stream.
///
/// This is the lazy, restartable decode side of the framer: each call to
/// [`MessageReader::next_message`] suspends until a whole message is
/// available, and a protocol error does not poison the reader.
pub struct MessageReader<R> {
    reader: R,
    decoder: FrameDecoder,
    eof: bool,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    /// Wraps a byte stream.
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(max_frame_bytes),
            eof: false,
        }
    }

    /// Returns the next message, or `Ok(None)` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] for a malformed frame (the reader
    /// remains usable) and [`EngineError::Transport`] for I/O failures.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.decoder.decode_next()? {
                return Ok(Some(message));
            }

            if self.eof {
                return self.decoder.finish().map(|()| None);
            }

            let mut chunk = [0u8; 4096];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.decoder.extend(&chunk[..n]);
            }
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;
    use tokio::io::AsyncWriteExt;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn decoder_with(bytes: &[u8]) -> FrameDecoder {
        let mut decoder = FrameDecoder::default();
        decoder.extend(bytes);
        decoder
    }

    #[test]
    fn test_parse_complete_message() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#;
        let mut decoder = decoder_with(&frame(body));

        let message = decoder.decode_next().unwrap().unwrap();
        let Message::Request(request) = message else {
            panic!("expected request, got {message:?}");
        };
        assert_eq!(request.id, RequestId::Number(1));
        assert_eq!(request.method, "initialize");
        assert_eq!(request.params, None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_parse_incomplete_header() {
        let mut decoder = decoder_with(b"Content-Length: 10\r\n");
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_parse_incomplete_body() {
        let mut decoder = decoder_with(b"Content-Length: 100\r\n\r\n{\"partial\":");
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_byte_at_a_time() {
        let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let mut decoder = FrameDecoder::default();
        let bytes = frame(body);
        let (last, head) = bytes.split_last().unwrap();

        for byte in head {
            decoder.extend(std::slice::from_ref(byte));
            assert!(decoder.decode_next().unwrap().is_none());
        }
        decoder.extend(std::slice::from_ref(last));

        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("initialized"));
    }

    #[test]
    fn test_parse_multiple_messages() {
        let body1 = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let body2 = r#"{"jsonrpc":"2.0","id":2,"result":[]}"#;
        let mut bytes = frame(body1);
        bytes.extend(frame(body2));
        let mut decoder = decoder_with(&bytes);

        let first = decoder.decode_next().unwrap().unwrap();
        let second = decoder.decode_next().unwrap().unwrap();
        assert!(matches!(first, Message::Response(r) if r.id == Some(RequestId::Number(1))));
        assert!(matches!(second, Message::Response(r) if r.id == Some(RequestId::Number(2))));
        assert!(decoder.decode_next().unwrap().is_none());
    }

    #[test]
    fn test_parse_case_insensitive_header_and_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let raw = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len()
        );
        let mut decoder = decoder_with(raw.as_bytes());
        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("exit"));
    }

    #[test]
    fn test_multibyte_content_length_counts_bytes() {
        let body = r#"{"jsonrpc":"2.0","method":"m","params":"é"}"#;
        assert_eq!(body.chars().count() + 1, body.len());
        let mut decoder = decoder_with(&frame(body));
        let Some(Message::Notification(n)) = decoder.decode_next().unwrap() else {
            panic!("expected notification");
        };
        assert_eq!(n.params, Some(json!("é")));
    }

    #[test]
    fn test_missing_content_length_is_protocol_error_and_recovers() {
        let mut bytes = b"Content-Type: application/json\r\n\r\n".to_vec();
        bytes.extend(frame(r#"{"jsonrpc":"2.0","method":"ok"}"#));
        let mut decoder = decoder_with(&bytes);

        assert!(matches!(
            decoder.decode_next(),
            Err(EngineError::Protocol(_))
        ));
        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("ok"));
    }

    #[test]
    fn test_invalid_json_is_protocol_error_and_recovers() {
        let mut bytes = frame("not valid json!!!");
        bytes.extend(frame(r#"{"jsonrpc":"2.0","method":"next"}"#));
        let mut decoder = decoder_with(&bytes);

        assert!(matches!(
            decoder.decode_next(),
            Err(EngineError::Protocol(_))
        ));
        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("next"));
    }

    #[test]
    fn test_short_declared_length_resynchronizes() {
        let body = r#"{"jsonrpc":"2.0","method":"a"}"#;
        let mut bytes = format!("Content-Length: {}\r\n\r\n{body}", body.len() - 4).into_bytes();
        bytes.extend(frame(r#"{"jsonrpc":"2.0","method":"b"}"#));
        let mut decoder = decoder_with(&bytes);

        assert!(matches!(
            decoder.decode_next(),
            Err(EngineError::Protocol(_))
        ));
        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("b"));
    }

    #[test]
    fn test_oversized_frame_is_skipped() {
        let big = format!(r#"{{"jsonrpc":"2.0","method":"big","params":"{}"}}"#, "x".repeat(64));
        let mut decoder = FrameDecoder::new(32);
        let bytes = frame(&big);
        let (first, rest) = bytes.split_at(30);
        decoder.extend(first);
        assert!(matches!(
            decoder.decode_next(),
            Err(EngineError::Protocol(_))
        ));

        // the rest of the oversized body is dropped as it arrives
        decoder.extend(rest);
        assert_eq!(decoder.buffered(), 0);
        decoder.extend(&frame(r#"{"jsonrpc":"2.0","method":"s"}"#));
        let message = decoder.decode_next().unwrap().unwrap();
        assert_eq!(message.method(), Some("s"));
    }

    #[test]
    fn test_truncated_body_at_eof() {
        let mut decoder = decoder_with(b"Content-Length: 100\r\n\r\nhello");
        assert!(decoder.decode_next().unwrap().is_none());
        let Err(EngineError::Protocol(reason)) = decoder.finish() else {
            panic!("expected protocol error");
        };
        assert!(reason.contains("declared 100"), "{reason}");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_request_id_string() {
        let json = r#"{"jsonrpc":"2.0","id":"abc-123","method":"test"}"#;
        let Message::Request(request) = Message::from_slice(json.as_bytes()).unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.id, RequestId::String("abc-123".to_string()));
    }

    #[test]
    fn test_response_with_error() {
        let json =
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32600,"message":"Invalid Request"}}"#;
        let Message::Response(response) = Message::from_slice(json.as_bytes()).unwrap() else {
            panic!("expected response");
        };
        assert!(response.result.is_none());
        assert_eq!(response.error.map(|e| e.code), Some(-32600));
    }

    #[test]
    fn test_response_null_result_is_present() {
        let json = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let Message::Response(response) = Message::from_slice(json.as_bytes()).unwrap() else {
            panic!("expected response");
        };
        assert_eq!(response.result, Some(Value::Null));
    }

    #[test]
    fn test_response_without_outcome_rejected() {
        let json = r#"{"jsonrpc":"2.0","id":1}"#;
        assert!(matches!(
            Message::from_slice(json.as_bytes()),
            Err(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn test_notification_no_id() {
        let json = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let message = Message::from_slice(json.as_bytes()).unwrap();
        assert!(matches!(message, Message::Notification(ref n) if n.method == "initialized"));
    }

    #[test]
    fn test_encode_preserves_absent_vs_null() {
        let absent = Message::Notification(Notification::new("exit", None));
        let null = Message::Notification(Notification::new("exit", Some(Value::Null)));

        let absent_bytes = encode(&absent).unwrap();
        let null_bytes = encode(&null).unwrap();
        assert!(!String::from_utf8_lossy(&absent_bytes).contains("params"));
        assert!(String::from_utf8_lossy(&null_bytes).contains(r#""params":null"#));

        let encoded = encode(&Message::Request(Request::new(RequestId::Number(7), "shutdown", None))).unwrap();
        assert!(String::from_utf8_lossy(&encoded).contains(r#""id":7"#));
    }

    #[test]
    fn test_write_content_length_is_byte_count() {
        let message = Message::Notification(Notification::new("m", Some(json!({"k": "é"}))));
        let bytes = encode(&message).unwrap();
        let body = serde_json::to_vec(&message).unwrap();
        assert!(bytes.starts_with(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes()));
    }

    #[tokio::test]
    async fn test_reader_spans_small_reads() {
        let (mut client, server) = tokio::io::duplex(7);
        let mut reader = MessageReader::new(server, DEFAULT_MAX_FRAME_BYTES);

        let writer = tokio::spawn(async move {
            let mut bytes = frame(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#);
            bytes.extend(frame(r#"{"jsonrpc":"2.0","method":"window/logMessage"}"#));
            client.write_all(&bytes).await.unwrap();
        });

        let first = reader.next_message().await.unwrap().unwrap();
        let second = reader.next_message().await.unwrap().unwrap();
        writer.await.unwrap();

        assert!(matches!(first, Message::Response(r) if r.result == Some(json!({"ok": true}))));
        assert_eq!(second.method(), Some("window/logMessage"));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_reports_truncation_then_ends() {
        let bytes: &[u8] = b"Content-Length: 50\r\n\r\n{\"jsonrpc\"";
        let mut reader = MessageReader::new(bytes, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(
            reader.next_message().await,
            Err(EngineError::Protocol(_))
        ));
        assert!(reader.next_message().await.unwrap().is_none());
    }

    fn arb_id() -> impl Strategy<Value = RequestId> {
        prop_oneof![
            any::<i64>().prop_map(RequestId::Number),
            "[a-z0-9-]{1,12}".prop_map(RequestId::String),
        ]
    }

    fn arb_params() -> impl Strategy<Value = Option<Value>> {
        prop_oneof![
            Just(None),
            Just(Some(Value::Null)),
            any::<i64>().prop_map(|n| Some(json!({ "n": n }))),
            ".{0,16}".prop_map(|s| Some(json!([s, { "nested": s }]))),
        ]
    }

    fn arb_message() -> impl Strategy<Value = Message> {
        prop_oneof![
            (arb_id(), "[a-zA-Z/$]{1,24}", arb_params())
                .prop_map(|(id, m, p)| Message::Request(Request::new(id, m, p))),
            ("[a-zA-Z/$]{1,24}", arb_params())
                .prop_map(|(m, p)| Message::Notification(Notification::new(m, p))),
            (arb_id(), arb_params()).prop_map(|(id, result)| Message::Response(Response {
                jsonrpc: jsonrpc_version(),
                id: Some(id),
                result: Some(result.unwrap_or(Value::Null)),
                error: None,
            })),
            (proptest::option::of(arb_id()), any::<i64>(), ".{0,16}").prop_map(
                |(id, code, message)| Message::Response(Response {
                    jsonrpc: jsonrpc_version(),
                    id,
                    result: None,
                    error: Some(ResponseError {
                        code,
                        message,
                        data: None,
                    }),
                })
            ),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(message in arb_message()) {
            let mut decoder = decoder_with(&encode(&message).unwrap());
            let decoded = decoder.decode_next().unwrap();
            prop_assert_eq!(decoded, Some(message));
            prop_assert_eq!(decoder.buffered(), 0);
        }
    }
}
