//! Error kinds per spec.md §7, unified at the Dispatcher boundary.

use thiserror::Error;

use crate::message::{error_code, ErrorObject};

/// Errors a handler's result stream may produce. Carries an optional numeric
/// JSON-RPC code; when absent the Dispatcher falls back to `UnknownError`
/// (spec.md §4.3 step 6 / §7).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub code: Option<i64>,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError { code: None, message: message.into(), data: None }
    }

    pub fn with_code(code: i64, message: impl Into<String>) -> Self {
        HandlerError { code: Some(code), message: message.into(), data: None }
    }

    /// Converts into the JSON-RPC error object sent on the wire, stripping
    /// `code`/`message` out of `data` as spec.md §4.3 step 6 requires (any
    /// remaining structured payload travels in `data` verbatim).
    pub fn into_error_object(self) -> ErrorObject {
        ErrorObject {
            code: self.code.unwrap_or(error_code::UNKNOWN_ERROR),
            message: self.message,
            data: self.data,
        }
    }
}

impl From<std::convert::Infallible> for HandlerError {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// A response already carrying a wire error object (e.g. one relayed back
/// from a Master Router back-end connection) converts straight through.
impl From<ErrorObject> for HandlerError {
    fn from(err: ErrorObject) -> Self {
        HandlerError { code: Some(err.code), message: err.message, data: err.data }
    }
}

/// Framing-layer errors (spec.md §7: "Framing error"). Logged and the frame is
/// dropped; never fatal to the connection.
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("malformed frame header: {0}")]
    Header(String),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error reading frame: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-layer errors (spec.md §7: "Transport error"): the duplex stream
/// closed or errored out from under the connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}
