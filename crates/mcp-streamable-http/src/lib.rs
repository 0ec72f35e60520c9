#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![doc = include_str!("../README.md")]

mod error;
pub use error::{ErrorData, TransportError};

pub mod handler;
/// JSON-RPC message types carried by the transport
pub mod model;
pub mod transport;

pub use handler::{AuthInfo, MessageContext, MessageHandler};
pub use transport::{
    HandleRequestOptions, SendOptions, StreamableHttpServerConfig, StreamableHttpServerTransport,
};

// re-export
pub use serde_json;
