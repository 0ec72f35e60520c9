//! Session handling for the Streamable HTTP transport.
//!
//! A *session* groups the interactions between one MCP client and the
//! server, starting from the `initialize` handshake. The server assigns the
//! session a [`SessionId`] (returned in the `mcp-session-id` response header)
//! and the client repeats it on every subsequent request.
//!
//! A transport built without a [`SessionIdGenerator`] runs in stateless mode:
//! no id is handed out and no header is checked.

use http::{HeaderMap, StatusCode};

pub use crate::transport::common::server_side_http::{SessionId, session_id};
use crate::{
    model::ErrorData,
    transport::common::http_header::{HEADER_MCP_PROTOCOL_VERSION, HEADER_SESSION_ID},
};

/// Protocol revisions accepted in the `mcp-protocol-version` header.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[
    "2025-11-25",
    "2025-06-18",
    "2025-03-26",
    "2024-11-05",
    "2024-10-07",
];

/// Produces the id of a new session when the client initializes.
pub trait SessionIdGenerator: Send + Sync + 'static {
    fn generate(&self) -> SessionId;
}

impl<F> SessionIdGenerator for F
where
    F: Fn() -> SessionId + Send + Sync + 'static,
{
    fn generate(&self) -> SessionId {
        (self)()
    }
}

/// Random UUID v4 session ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidSessionIdGenerator;

impl SessionIdGenerator for UuidSessionIdGenerator {
    fn generate(&self) -> SessionId {
        session_id()
    }
}

/// A request refused before it reaches the message handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub status: StatusCode,
    pub error: ErrorData,
}

impl Rejection {
    pub fn new(status: StatusCode, error: ErrorData) -> Self {
        Self { status, error }
    }

    pub fn bad_request(message: &'static str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorData::transport_error(message))
    }
}

/// Session bookkeeping of one transport instance.
#[derive(Debug, Clone, Default)]
pub(crate) struct SessionState {
    pub initialized: bool,
    pub session_id: Option<SessionId>,
}

pub(crate) fn validate_session(
    stateful: bool,
    session: &SessionState,
    headers: &HeaderMap,
) -> Result<(), Rejection> {
    if !stateful {
        return Ok(());
    }
    if !session.initialized {
        return Err(Rejection::bad_request(
            "Bad Request: Server not initialized",
        ));
    }
    let Some(header) = headers.get(HEADER_SESSION_ID) else {
        return Err(Rejection::bad_request(
            "Bad Request: Mcp-Session-Id header is required",
        ));
    };
    let matches = match (header.to_str(), &session.session_id) {
        (Ok(received), Some(expected)) => received == &**expected,
        _ => false,
    };
    if !matches {
        return Err(Rejection::new(
            StatusCode::NOT_FOUND,
            ErrorData::session_not_found(),
        ));
    }
    Ok(())
}

/// A missing header is accepted; an unknown revision is not.
pub(crate) fn validate_protocol_version(headers: &HeaderMap) -> Result<(), Rejection> {
    let Some(version) = headers.get(HEADER_MCP_PROTOCOL_VERSION) else {
        return Ok(());
    };
    let supported = version
        .to_str()
        .is_ok_and(|version| SUPPORTED_PROTOCOL_VERSIONS.contains(&version));
    if supported {
        return Ok(());
    }
    Err(Rejection::new(
        StatusCode::BAD_REQUEST,
        ErrorData::transport_error(format!(
            "Bad Request: Unsupported protocol version (supported versions: {})",
            SUPPORTED_PROTOCOL_VERSIONS.join(", ")
        )),
    ))
}
