mod common;

use std::sync::{Arc, Mutex};

use common::*;
use http::StatusCode;
use mcp_streamable_http::{
    StreamableHttpServerTransport,
    transport::streamable_http_server::SessionId,
};
use serde_json::json;

fn stateful() -> StreamableHttpServerTransport {
    StreamableHttpServerTransport::builder()
        .stateful()
        .message_handler(echo_handler())
        .build()
}

#[tokio::test]
async fn test_initialize_assigns_session() -> anyhow::Result<()> {
    init_tracing();
    let initialized = Arc::new(Mutex::new(Vec::<SessionId>::new()));
    let transport = StreamableHttpServerTransport::builder()
        .stateful()
        .message_handler(echo_handler())
        .on_session_initialized({
            let initialized = initialized.clone();
            move |id| initialized.lock().unwrap().push(id.clone())
        })
        .build();

    let response = transport.handle_request(post(initialize_body(1), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(content_type(&response).as_deref(), Some("text/event-stream"));
    let session_id = session_header(&response).expect("session header");

    assert_eq!(transport.session_id().await.as_deref(), Some(session_id.as_str()));
    assert_eq!(*initialized.lock().unwrap(), vec![SessionId::from(session_id.as_str())]);

    let mut events = SseReader::new(response);
    let event = events.expect_event().await;
    assert_eq!(event.event.as_deref(), Some("message"));
    assert_eq!(
        event.data,
        json!({"jsonrpc": "2.0", "id": 1, "result": {"method": "initialize"}})
    );
    events.expect_end().await;
    Ok(())
}

#[tokio::test]
async fn test_second_initialize_is_rejected() -> anyhow::Result<()> {
    let transport = stateful();
    let response = transport.handle_request(post(initialize_body(1), None)).await;
    let session_id = session_header(&response).unwrap();

    for session in [None, Some(session_id.as_str())] {
        let response = transport
            .handle_request(post(initialize_body(2), session))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(
            body["error"]["message"],
            "Invalid Request: Server already initialized"
        );
        assert_eq!(body["id"], serde_json::Value::Null);
    }
    // the first session survives
    assert_eq!(transport.session_id().await.as_deref(), Some(session_id.as_str()));
    Ok(())
}

#[tokio::test]
async fn test_initialize_must_be_alone_in_batch() -> anyhow::Result<()> {
    let transport = stateful();
    let batch = json!([initialize_body(1), notification_body("notifications/initialized")]);
    let response = transport.handle_request(post(batch, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
    assert_eq!(
        body["error"]["message"],
        "Invalid Request: Only one initialization request is allowed"
    );
    assert_eq!(transport.session_id().await, None);
    Ok(())
}

#[tokio::test]
async fn test_request_before_initialize() -> anyhow::Result<()> {
    let transport = stateful();
    let response = transport
        .handle_request(post(request_body(1, "ping"), Some("anything")))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["message"], "Bad Request: Server not initialized");
    Ok(())
}

#[tokio::test]
async fn test_session_header_is_enforced() -> anyhow::Result<()> {
    let transport = stateful();
    let response = transport.handle_request(post(initialize_body(1), None)).await;
    let session_id = session_header(&response).unwrap();

    let response = transport
        .handle_request(post(request_body(2, "ping"), None))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(
        body["error"]["message"],
        "Bad Request: Mcp-Session-Id header is required"
    );

    let response = transport
        .handle_request(post(request_body(3, "ping"), Some("not-the-session")))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32001);
    assert_eq!(body["error"]["message"], "Session not found");

    let response = transport
        .handle_request(post(request_body(4, "ping"), Some(&session_id)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(session_header(&response).as_deref(), Some(session_id.as_str()));
    let event = SseReader::new(response).expect_event().await;
    assert_eq!(event.data["id"], 4);
    Ok(())
}

#[tokio::test]
async fn test_get_and_delete_check_the_session() -> anyhow::Result<()> {
    let transport = stateful();
    let response = transport.handle_request(post(initialize_body(1), None)).await;
    let _session_id = session_header(&response).unwrap();

    let response = transport.handle_request(get(None, None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = transport.handle_request(get(Some("wrong"), None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = transport.handle_request(delete(None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = transport.handle_request(delete(Some("wrong"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn test_stateless_mode_ignores_session_header() -> anyhow::Result<()> {
    let transport = StreamableHttpServerTransport::builder()
        .message_handler(echo_handler())
        .build();
    assert!(!transport.is_stateful());

    let response = transport.handle_request(post(initialize_body(1), None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(session_header(&response), None);
    assert_eq!(transport.session_id().await, None);

    for session in [None, Some("made-up")] {
        let response = transport
            .handle_request(post(request_body(2, "ping"), session))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let event = SseReader::new(response).expect_event().await;
        assert_eq!(event.data["result"]["method"], "ping");
    }
    Ok(())
}

#[tokio::test]
async fn test_custom_session_id_generator() -> anyhow::Result<()> {
    let transport = StreamableHttpServerTransport::builder()
        .session_id_generator(|| SessionId::from("fixed-session"))
        .message_handler(echo_handler())
        .build();
    let response = transport.handle_request(post(initialize_body(1), None)).await;
    assert_eq!(session_header(&response).as_deref(), Some("fixed-session"));

    let response = transport
        .handle_request(post(request_body(2, "ping"), Some("fixed-session")))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_unsupported_protocol_version() -> anyhow::Result<()> {
    let transport = stateful();
    let response = transport.handle_request(post(initialize_body(1), None)).await;
    let session_id = session_header(&response).unwrap();

    let mut request = post(request_body(2, "ping"), Some(&session_id));
    request
        .headers_mut()
        .insert("mcp-protocol-version", "1999-01-01".parse()?);
    let response = transport.handle_request(request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("Bad Request: Unsupported protocol version")
    );

    let mut request = post(request_body(3, "ping"), Some(&session_id));
    request
        .headers_mut()
        .insert("mcp-protocol-version", "2025-03-26".parse()?);
    let response = transport.handle_request(request).await;
    assert_eq!(response.status(), StatusCode::OK);
    Ok(())
}
