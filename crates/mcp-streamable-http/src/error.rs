use std::{borrow::Cow, fmt::Display};

pub use crate::model::ErrorData;
use crate::{model::RequestId, transport::event_store::EventStoreError};

impl Display for ErrorData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.0, self.message)?;
        if let Some(data) = &self.data {
            write!(f, "({})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorData {}

/// Errors returned to the code driving the transport.
///
/// Client-facing problems (bad headers, malformed bodies, unknown sessions)
/// never show up here; they are answered with JSON-RPC error responses.
/// These variants indicate that the transport itself is being misused.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Transport already started")]
    AlreadyStarted,
    #[error("No connection established for request ID: {0}")]
    NoActiveStream(RequestId),
    #[error("Not implemented: {0}")]
    NotImplemented(Cow<'static, str>),
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),
    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
