mod common;

use std::net::SocketAddr;

use axum::{Router, extract::Request, middleware::Next, response::Response};
use common::*;
use mcp_streamable_http::{
    AuthInfo, MessageContext, SendOptions, StreamableHttpServerTransport,
    model::{JsonObject, JsonRpcMessage},
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

async fn insert_auth(mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(AuthInfo {
        token: "secret".into(),
        client_id: "axum-client".into(),
        ..Default::default()
    });
    next.run(request).await
}

/// Answers with the client id the transport saw for the request.
fn whoami(message: JsonRpcMessage, context: MessageContext) {
    let JsonRpcMessage::Request(request) = message else {
        return;
    };
    tokio::spawn(async move {
        let mut result = JsonObject::new();
        result.insert(
            "clientId".into(),
            context
                .auth_info
                .map(|auth| Value::String(auth.client_id))
                .unwrap_or(Value::Null),
        );
        context
            .transport
            .send(
                JsonRpcMessage::response(request.id, result),
                SendOptions::default(),
            )
            .await
            .expect("response should be routable");
    });
}

async fn serve(transport: StreamableHttpServerTransport) -> anyhow::Result<(SocketAddr, CancellationToken)> {
    let router = Router::new()
        .nest_service("/mcp", transport)
        .layer(axum::middleware::from_fn(insert_auth));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let ct = CancellationToken::new();
    tokio::spawn({
        let ct = ct.clone();
        async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move { ct.cancelled().await })
                .await;
        }
    });
    Ok((addr, ct))
}

#[tokio::test]
async fn test_axum_nest_service_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let transport = StreamableHttpServerTransport::builder()
        .stateful()
        .message_handler(whoami)
        .build();
    let (addr, ct) = serve(transport).await?;
    let url = format!("http://{addr}/mcp");
    let client = reqwest::Client::new();

    let response = client
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .json(&initialize_body(1))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str()?,
        "text/event-stream"
    );
    let session_id = response.headers()["mcp-session-id"].to_str()?.to_string();
    // the stream ends once the only request on it is answered
    let text = response.text().await?;
    let data = text
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .expect("one event");
    assert_eq!(
        serde_json::from_str::<Value>(data)?,
        json!({"jsonrpc": "2.0", "id": 1, "result": {"clientId": "axum-client"}})
    );

    let response = client
        .post(&url)
        .header("accept", ACCEPT_BOTH)
        .header("mcp-session-id", "wrong")
        .json(&request_body(2, "ping"))
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let body: Value = response.json().await?;
    assert_eq!(body["error"]["code"], -32001);

    let response = client
        .delete(&url)
        .header("mcp-session-id", &session_id)
        .send()
        .await?;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let response = client.put(&url).send().await?;
    assert_eq!(response.status(), reqwest::StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()["allow"].to_str()?, "GET, POST, DELETE");

    ct.cancel();
    Ok(())
}
