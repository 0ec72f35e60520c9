use std::{borrow::Cow, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;

mod serde_impl;

pub type JsonObject<F = Value> = serde_json::Map<String, F>;

/// Method name of the MCP handshake request.
pub const INITIALIZE_METHOD: &str = "initialize";

/// Marker for the `"jsonrpc": "2.0"` field; any other value is rejected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct JsonRpcVersion2_0;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumberOrString {
    Number(i64),
    String(Arc<str>),
}

impl std::fmt::Display for NumberOrString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NumberOrString::Number(n) => n.fmt(f),
            NumberOrString::String(s) => s.fmt(f),
        }
    }
}

impl From<i64> for NumberOrString {
    fn from(value: i64) -> Self {
        NumberOrString::Number(value)
    }
}

impl From<&str> for NumberOrString {
    fn from(value: &str) -> Self {
        NumberOrString::String(value.into())
    }
}

pub type RequestId = NumberOrString;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const PARSE_ERROR: Self = Self(-32700);
    pub const INVALID_REQUEST: Self = Self(-32600);
    pub const METHOD_NOT_FOUND: Self = Self(-32601);
    pub const INVALID_PARAMS: Self = Self(-32602);
    pub const INTERNAL_ERROR: Self = Self(-32603);
    /// Generic transport-level failure, also used for closed connections.
    pub const CONNECTION_CLOSED: Self = Self(-32000);
    pub const SESSION_NOT_FOUND: Self = Self(-32001);
}

/// Error information for JSON-RPC error responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    /// The error type that occurred.
    pub code: ErrorCode,

    /// A short description of the error. The message SHOULD be limited to a concise single sentence.
    pub message: Cow<'static, str>,

    /// Additional information about the error. The value of this member is defined by the
    /// sender (e.g. detailed error information, nested errors etc.).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorData {
    pub fn new(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        data: Option<Value>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
    pub fn parse_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::PARSE_ERROR, message, data)
    }
    pub fn invalid_request(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_REQUEST, message, data)
    }
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
            None,
        )
    }
    pub fn invalid_params(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INVALID_PARAMS, message, data)
    }
    pub fn internal_error(message: impl Into<Cow<'static, str>>, data: Option<Value>) -> Self {
        Self::new(ErrorCode::INTERNAL_ERROR, message, data)
    }
    pub fn transport_error(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::CONNECTION_CLOSED, message, None)
    }
    pub fn session_not_found() -> Self {
        Self::new(ErrorCode::SESSION_NOT_FOUND, "Session not found", None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: JsonRpcVersion2_0,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: JsonRpcVersion2_0,
    pub id: RequestId,
    pub result: JsonObject,
}

/// An error reply. `id` is `None` (serialized as `null`) when the failing
/// request could not be identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: JsonRpcVersion2_0,
    pub error: ErrorData,
    #[serde(default)]
    pub id: Option<RequestId>,
}

/// Any message that can travel over the transport in either direction.
///
/// Variant order matters for untagged deserialization: a request must be
/// tried before a notification, since both carry `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
    Error(JsonRpcError),
}

impl JsonRpcMessage {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcMessage::Request(JsonRpcRequest {
            jsonrpc: JsonRpcVersion2_0,
            id: id.into(),
            method: method.into(),
            params,
        })
    }
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: JsonRpcVersion2_0,
            method: method.into(),
            params,
        })
    }
    pub fn response(id: impl Into<RequestId>, result: JsonObject) -> Self {
        JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: JsonRpcVersion2_0,
            id: id.into(),
            result,
        })
    }
    pub fn error(id: Option<RequestId>, error: ErrorData) -> Self {
        JsonRpcMessage::Error(JsonRpcError {
            jsonrpc: JsonRpcVersion2_0,
            error,
            id,
        })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            JsonRpcMessage::Request(request) if request.method == INITIALIZE_METHOD => {
                MessageKind::Initialize
            }
            JsonRpcMessage::Request(_) => MessageKind::Request,
            JsonRpcMessage::Response(_) => MessageKind::Response,
            JsonRpcMessage::Notification(_) => MessageKind::Notification,
            JsonRpcMessage::Error(_) => MessageKind::Error,
        }
    }

    /// The id of the request this message answers, if it is a response or an error.
    pub fn response_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Response(response) => Some(&response.id),
            JsonRpcMessage::Error(error) => error.id.as_ref(),
            JsonRpcMessage::Request(_) | JsonRpcMessage::Notification(_) => None,
        }
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(request) => Some(&request.id),
            _ => None,
        }
    }

    pub fn is_response_or_error(&self) -> bool {
        matches!(self, JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Initialize,
    Request,
    Notification,
    Response,
    Error,
}

impl MessageKind {
    /// Whether the sender of this message expects a reply.
    pub fn expects_response(self) -> bool {
        matches!(self, MessageKind::Initialize | MessageKind::Request)
    }
}

/// A message tagged with its [`MessageKind`] at ingress.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedMessage {
    pub kind: MessageKind,
    pub message: JsonRpcMessage,
}

impl From<JsonRpcMessage> for ClassifiedMessage {
    fn from(message: JsonRpcMessage) -> Self {
        Self {
            kind: message.kind(),
            message,
        }
    }
}

/// Parse a request body holding either a single message or a batch.
pub fn parse_messages(value: Value) -> Result<Vec<ClassifiedMessage>, serde_json::Error> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value::<JsonRpcMessage>(item).map(Into::into))
            .collect(),
        single => Ok(vec![serde_json::from_value::<JsonRpcMessage>(single)?.into()]),
    }
}
