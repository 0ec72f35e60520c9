use std::{
    convert::Infallible,
    fmt::Display,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use http::Request;
use http_body::Body;

use super::StreamableHttpServerTransport;
use crate::transport::common::server_side_http::BoxResponse;

/// Lets the transport be mounted directly on a tower-based server, e.g.
/// `axum::Router::nest_service("/mcp", transport)`.
impl<B> tower_service::Service<Request<B>> for StreamableHttpServerTransport
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display,
{
    type Response = BoxResponse;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let transport = self.clone();
        Box::pin(async move { Ok(transport.handle_request(req).await) })
    }
}
