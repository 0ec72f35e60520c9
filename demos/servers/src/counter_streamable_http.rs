mod common;

use std::sync::Arc;

use common::counter::Counter;
use mcp_streamable_http::{
    MessageContext, StreamableHttpServerTransport, model::JsonRpcMessage,
    transport::InMemoryEventStore,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let json_response = std::env::var("MCP_JSON_RESPONSE")
        .map(|value| matches!(value.as_str(), "1" | "true"))
        .unwrap_or(false);

    let counter = Counter::new();
    let transport = StreamableHttpServerTransport::builder()
        .stateful()
        .enable_json_response(json_response)
        .event_store(Arc::new(InMemoryEventStore::new()))
        .on_session_initialized(|session_id| tracing::info!(%session_id, "session started"))
        .on_close(|| tracing::info!("session closed"))
        .on_error(|error| tracing::debug!(%error, "request rejected"))
        .message_handler(move |message: JsonRpcMessage, context: MessageContext| {
            counter.handle(message, context)
        })
        .build();

    let router = axum::Router::new().nest_service("/mcp", transport.clone());
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!(%bind_address, json_response, "serving MCP at /mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    transport.close().await;
    Ok(())
}
