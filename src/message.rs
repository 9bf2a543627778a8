//! Wire-level JSON-RPC message shapes and the `RequestId` correlation key.
//!
//! Unlike the teacher's `server::message` module, which parses into one
//! statically-typed `Request<A>` per LSP method, this module stays untyped:
//! the Dispatcher resolves a method name to a handler at runtime (see
//! `handler.rs`), so params stay `serde_json::Value` until a handler
//! deserializes them itself.

use std::fmt;

use jsonrpc_core::Id;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_json::Value;

/// A JSON-RPC request id, as carried by requests, responses and
/// `$/cancelRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Str(String),
    Num(u64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Str(s) => write!(f, "\"{}\"", s),
            RequestId::Num(n) => write!(f, "{}", n),
        }
    }
}

impl From<&RequestId> for Id {
    fn from(id: &RequestId) -> Self {
        match id {
            RequestId::Str(s) => Id::Str(s.clone()),
            RequestId::Num(n) => Id::Num(*n),
        }
    }
}

impl RequestId {
    /// Renders the id the way it travels on the wire, for embedding into a
    /// `$/partialResult` notification's `params.id` (spec.md §6).
    pub fn to_json(&self) -> Value {
        match self {
            RequestId::Str(s) => Value::String(s.clone()),
            RequestId::Num(n) => Value::Number((*n).into()),
        }
    }

    fn from_id(id: &Id) -> Option<RequestId> {
        match id {
            Id::Str(s) => Some(RequestId::Str(s.clone())),
            Id::Num(n) => Some(RequestId::Num(*n)),
            Id::Null => None,
        }
    }
}

/// Tracing context carried as `meta` on requests/notifications, textmap-encoded
/// (a flat string->string mapping, per spec.md §4.3 step 4).
pub type Meta = std::collections::HashMap<String, String>;

/// A parsed inbound request, still carrying untyped `params`.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub id: RequestId,
    pub method: String,
    pub params: Value,
    pub meta: Option<Meta>,
}

/// A parsed inbound notification.
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub method: String,
    pub params: Value,
    pub meta: Option<Meta>,
}

/// A parsed inbound response (discarded by the Dispatcher; this endpoint never
/// issues requests of its own over the connection it serves, only over the
/// router's back-end connections where `Connection` handles responses itself).
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub id: RequestId,
    pub result: Option<Value>,
    pub error: Option<ErrorObject>,
}

/// An inbound message, tagged by JSON-RPC shape.
#[derive(Debug, Clone)]
pub enum Message {
    Request(RawRequest),
    Notification(RawNotification),
    Response(RawResponse),
}

/// A JSON-RPC error object, per spec.md §3.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Reserved error codes referenced throughout the dispatcher and router.
pub mod error_code {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const REQUEST_CANCELLED: i64 = -32800;
    pub const UNKNOWN_ERROR: i64 = -32099;
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        ErrorObject { code, message: message.into(), data: None }
    }

    pub fn method_not_found(method: &str) -> Self {
        ErrorObject::new(error_code::METHOD_NOT_FOUND, format!("method not found: {}", method))
    }

    pub fn request_cancelled() -> Self {
        ErrorObject::new(error_code::REQUEST_CANCELLED, "request cancelled")
    }
}

/// Parses a raw JSON line into a `Message`, or `None` if it is a response this
/// endpoint should ignore having not issued the original request (e.g. a
/// malformed shape carrying neither `method` nor a recognizable response).
///
/// Mirrors the teacher's `RawMessage::try_parse`, generalized to not require a
/// per-method static type.
pub fn try_parse(value: &Value) -> Result<Message, ErrorObject> {
    let obj = value.as_object().ok_or_else(|| ErrorObject::new(error_code::INVALID_REQUEST, "not a JSON object"))?;

    let id = obj.get("id").and_then(|v| serde_json::from_value::<Id>(v.clone()).ok());
    let method = obj.get("method").and_then(Value::as_str);

    match method {
        Some(method) => {
            let meta = obj
                .get("meta")
                .and_then(|v| serde_json::from_value::<Meta>(v.clone()).ok());
            let params = obj.get("params").cloned().unwrap_or(Value::Null);

            match id.as_ref().and_then(RequestId::from_id) {
                Some(id) => Ok(Message::Request(RawRequest { id, method: method.to_owned(), params, meta })),
                None => Ok(Message::Notification(RawNotification { method: method.to_owned(), params, meta })),
            }
        }
        None => {
            let id = id
                .and_then(|id| RequestId::from_id(&id))
                .ok_or_else(|| ErrorObject::new(error_code::INVALID_REQUEST, "response with no id"))?;
            let result = obj.get("result").cloned();
            let error = obj
                .get("error")
                .map(|v| serde_json::from_value::<ErrorObject>(v.clone()))
                .transpose()
                .map_err(|e| ErrorObject::new(error_code::PARSE_ERROR, e.to_string()))?;
            Ok(Message::Response(RawResponse { id, result, error }))
        }
    }
}

/// Parses a `$/cancelRequest`-style `params.id` value (which travels as a
/// bare string or number, not the full request envelope) into a `RequestId`.
pub fn parse_request_id_value(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::Str(s.clone())),
        Value::Number(n) => n.as_u64().map(RequestId::Num),
        _ => None,
    }
}

/// Builds the serializable wire form of a response.
pub(crate) fn wire_response(id: RequestId, result: Result<Value, ErrorObject>) -> WireResponse {
    WireResponse { id, result }
}

/// Builds the serializable wire form of a notification.
pub(crate) fn wire_notification(method: &str, params: Value) -> WireNotification<'_> {
    WireNotification { method, params }
}

/// Builds the serializable wire form of an outbound request (used by the
/// Master Router's `Connection` to call a back-end, and for reverse requests
/// proxied back to the front connection).
pub(crate) fn wire_request(id: RequestId, method: &str, params: Value) -> WireRequest<'_> {
    WireRequest { id, method, params }
}

/// Serializable wire form of a JSON-RPC response, used by the writer.
pub(crate) struct WireResponse {
    pub id: RequestId,
    pub result: Result<Value, ErrorObject>,
}

impl Serialize for WireResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut msg = serializer.serialize_struct("WireResponse", 3)?;
        msg.serialize_field("jsonrpc", "2.0")?;
        msg.serialize_field("id", &Id::from(&self.id))?;
        match &self.result {
            Ok(value) => msg.serialize_field("result", value)?,
            Err(err) => msg.serialize_field("error", err)?,
        }
        msg.end()
    }
}

/// Serializable wire form of a notification (used for `$/partialResult` and
/// any server->client or router->worker notification).
pub(crate) struct WireNotification<'a> {
    pub method: &'a str,
    pub params: Value,
}

impl<'a> Serialize for WireNotification<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut msg = serializer.serialize_struct("WireNotification", 3)?;
        msg.serialize_field("jsonrpc", "2.0")?;
        msg.serialize_field("method", self.method)?;
        msg.serialize_field("params", &self.params)?;
        msg.end()
    }
}

/// Serializable wire form of an outbound request (used for reverse requests
/// such as `workspace/xfiles`).
pub(crate) struct WireRequest<'a> {
    pub id: RequestId,
    pub method: &'a str,
    pub params: Value,
}

impl<'a> Serialize for WireRequest<'a> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut msg = serializer.serialize_struct("WireRequest", 4)?;
        msg.serialize_field("jsonrpc", "2.0")?;
        msg.serialize_field("id", &Id::from(&self.id))?;
        msg.serialize_field("method", self.method)?;
        msg.serialize_field("params", &self.params)?;
        msg.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_request_with_numeric_id() {
        let raw = json!({"jsonrpc": "2.0", "id": 1, "method": "textDocument/hover", "params": {}});
        match try_parse(&raw).unwrap() {
            Message::Request(req) => {
                assert_eq!(req.id, RequestId::Num(1));
                assert_eq!(req.method, "textDocument/hover");
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn parses_notification_without_id() {
        let raw = json!({"jsonrpc": "2.0", "method": "textDocument/didOpen", "params": {}});
        match try_parse(&raw).unwrap() {
            Message::Notification(n) => assert_eq!(n.method, "textDocument/didOpen"),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn parses_response_and_discards_unrecognized_shape() {
        let raw = json!({"jsonrpc": "2.0", "id": "abc", "result": 42});
        match try_parse(&raw).unwrap() {
            Message::Response(r) => {
                assert_eq!(r.id, RequestId::Str("abc".into()));
                assert_eq!(r.result, Some(json!(42)));
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn round_trips_request_id_through_jsonrpc_core_id() {
        let id = RequestId::Num(7);
        let wire_id = Id::from(&id);
        assert_eq!(wire_id, Id::Num(7));
    }
}
