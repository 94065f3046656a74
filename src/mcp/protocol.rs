//! JSON-RPC 2.0 message types for MCP protocol.
//!
//! This module defines the message types used on both sides of the bridge:
//!
//! - **Provider side** (the bridge is the client): outgoing
//!   [`JsonRpcRequest`] and [`JsonRpcNotification`] values are turned into
//!   lines with [`encode`], and every line read back is turned into a
//!   [`ProviderMessage`] with [`decode`].
//! - **Client side** (the bridge is the server, see [`crate::mcp::server`]):
//!   incoming lines are parsed with [`parse_message`] and answered with
//!   [`JsonRpcResponse`] or [`JsonRpcError`].
//!
//! # Framing
//!
//! One message per line. Messages never span lines and are never batched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// The JSON-RPC version string carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Server name for capability negotiation when re-exporting tools.
pub const SERVER_NAME: &str = "stdio-mcp-bridge";

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect a response from the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    /// Validates that this is a well-formed JSON-RPC 2.0 request.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Some("jsonrpc field must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Some("method field cannot be empty");
        }
        None
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and do not expect a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A message read from a provider process.
///
/// Usually the response to the request just sent, but providers may also
/// interleave notifications (`method` without `id`) or requests of their own
/// (`method` with `id`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderMessage {
    /// Always "2.0" after [`decode`].
    pub jsonrpc: String,

    /// Request ID, absent for notifications.
    #[serde(default)]
    pub id: Option<RequestId>,

    /// Method name, present only on provider-initiated messages.
    #[serde(default)]
    pub method: Option<String>,

    /// Success payload.
    #[serde(default)]
    pub result: Option<Value>,

    /// Error payload.
    #[serde(default)]
    pub error: Option<Value>,
}

impl ProviderMessage {
    /// Returns `true` if this message is a response (not provider-initiated).
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.method.is_none() && self.id.is_some()
    }

    /// Returns `true` if this message is the response to request `id`.
    #[must_use]
    pub fn answers(&self, id: &RequestId) -> bool {
        self.is_response() && self.id.as_ref() == Some(id)
    }
}

/// Serialises a message to a single newline-terminated line.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedMessage`] if the value cannot be serialised.
pub fn encode<T: Serialize>(message: &T) -> Result<String, BridgeError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| BridgeError::MalformedMessage {
            reason: e.to_string(),
        })?;

    // serde_json escapes control characters inside strings, so compact
    // output never contains a raw newline.
    debug_assert!(
        !line.contains('\n'),
        "JSON message must not contain embedded newlines"
    );

    line.push('\n');
    Ok(line)
}

/// Parses one line read from a provider.
///
/// # Errors
///
/// Returns [`BridgeError::MalformedMessage`] if the line is empty, is not
/// valid JSON, is not an object, or lacks `"jsonrpc": "2.0"`.
pub fn decode(line: &str) -> Result<ProviderMessage, BridgeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(BridgeError::MalformedMessage {
            reason: "empty line".to_string(),
        });
    }

    let value: Value = serde_json::from_str(line).map_err(|e| BridgeError::MalformedMessage {
        reason: e.to_string(),
    })?;

    let jsonrpc = value
        .as_object()
        .ok_or_else(|| BridgeError::MalformedMessage {
            reason: "message is not a JSON object".to_string(),
        })?
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::MalformedMessage {
            reason: "missing jsonrpc field".to_string(),
        })?;

    if jsonrpc != JSONRPC_VERSION {
        return Err(BridgeError::MalformedMessage {
            reason: format!("unsupported jsonrpc version \"{jsonrpc}\""),
        });
    }

    serde_json::from_value(value).map_err(|e| BridgeError::MalformedMessage {
        reason: e.to_string(),
    })
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,

    /// The request ID this error corresponds to (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // JsonRpcErrorData contains String
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }

    /// Creates a method not found error response.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(
                ErrorCode::MethodNotFound,
                format!("Method not found: {method}"),
            ),
        )
    }

    /// Creates an invalid params error response.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InvalidParams, message),
        )
    }

    /// Creates an internal error response.
    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(
            Some(id),
            JsonRpcErrorData::with_message(ErrorCode::InternalError, message),
        )
    }
}

/// An incoming message that could be either a request or notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IncomingMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// Returns the method name of this message.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// Returns the request ID if this is a request.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
        }
    }
}

/// Parses a JSON string from an MCP client into an incoming message.
///
/// # Errors
///
/// Returns a `JsonRpcError` if the JSON is malformed or not a valid message.
pub fn parse_message(json: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;

    let obj = value.as_object().ok_or_else(JsonRpcError::parse_error)?;

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcError::invalid_request(None))?;

    if jsonrpc != JSONRPC_VERSION {
        return Err(JsonRpcError::invalid_request(None));
    }

    if obj.contains_key("id") {
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;

        if request.validate().is_some() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }

        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;

        Ok(IncomingMessage::Notification(notification))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::BridgeErrorKind;

    #[test]
    fn encode_request_is_one_line() {
        let request = JsonRpcRequest::new(
            1,
            "initialize",
            Some(json!({"protocolVersion": "2025-03-26", "capabilities": {}})),
        );
        let line = encode(&request).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.starts_with(r#"{"jsonrpc":"2.0","id":1,"method":"initialize""#));
    }

    #[test]
    fn encode_escapes_newlines_in_strings() {
        let request = JsonRpcRequest::new(
            7,
            "tools/call",
            Some(json!({"name": "write", "arguments": {"text": "a\nb"}})),
        );
        let line = encode(&request).unwrap();
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.contains(r"a\nb"));
    }

    #[test]
    fn encode_notification_has_no_id() {
        let notification = JsonRpcNotification::new("notifications/initialized", None);
        let line = encode(&notification).unwrap();
        assert_eq!(
            line,
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n"
        );
    }

    #[test]
    fn encode_request_without_params_omits_them() {
        let line = encode(&JsonRpcRequest::new(2, "tools/list", None)).unwrap();
        assert_eq!(line, "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n");
    }

    #[test]
    fn decode_success_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":3,"result":{"content":"pong"}}"#).unwrap();
        assert!(msg.answers(&RequestId::Number(3)));
        assert!(!msg.answers(&RequestId::Number(4)));
        assert_eq!(msg.result, Some(json!({"content": "pong"})));
        assert!(msg.error.is_none());
    }

    #[test]
    fn decode_error_response() {
        let msg =
            decode(r#"{"jsonrpc":"2.0","id":"x","error":{"code":-1,"message":"nope"}}"#).unwrap();
        assert_eq!(msg.id, Some(RequestId::String("x".to_string())));
        assert_eq!(msg.error, Some(json!({"code": -1, "message": "nope"})));
    }

    #[test]
    fn decode_notification_is_not_a_response() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#)
            .unwrap();
        assert!(!msg.is_response());
    }

    #[test]
    fn decode_strips_trailing_newline() {
        let msg = decode("{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\r\n").unwrap();
        assert!(msg.answers(&RequestId::Number(1)));
    }

    #[test]
    fn decode_rejects_empty_line() {
        let err = decode("   ").unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedMessage);
    }

    #[test]
    fn decode_rejects_invalid_json() {
        let err = decode("not valid json").unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedMessage);
    }

    #[test]
    fn decode_rejects_missing_jsonrpc() {
        let err = decode(r#"{"id":1,"result":{}}"#).unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedMessage);
        assert!(err.to_string().contains("jsonrpc"));
    }

    #[test]
    fn decode_rejects_non_object() {
        let err = decode("[1,2,3]").unwrap_err();
        assert_eq!(err.kind(), BridgeErrorKind::MalformedMessage);
    }

    #[test]
    fn parse_valid_request() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#;
        let msg = parse_message(json).unwrap();

        let IncomingMessage::Request(req) = msg else {
            panic!("Expected Request, got Notification");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "initialize");
    }

    #[test]
    fn parse_valid_notification() {
        let json = r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#;
        let msg = parse_message(json).unwrap();

        let IncomingMessage::Notification(notif) = msg else {
            panic!("Expected Notification, got Request");
        };
        assert_eq!(notif.method, "notifications/initialized");
    }

    #[test]
    fn parse_invalid_json() {
        let err = parse_message("not valid json").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::ParseError.code());
    }

    #[test]
    fn parse_wrong_jsonrpc_version() {
        let json = r#"{"jsonrpc": "1.0", "id": 1, "method": "test"}"#;
        let err = parse_message(json).unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidRequest.code());
    }

    #[test]
    fn serialise_error_response() {
        let error = JsonRpcError::method_not_found(RequestId::Number(1), "unknown/method");
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""id":1"#));
        assert!(json.contains(r#""code":-32601"#));
        assert!(json.contains("unknown/method"));
    }

    #[test]
    fn request_id_display() {
        assert_eq!(format!("{}", RequestId::Number(42)), "42");
        assert_eq!(format!("{}", RequestId::String("abc".to_string())), "abc");
    }
}
