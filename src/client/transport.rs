//! Client transports.
//!
//! # Responsibilities
//! - `Transport`: one raw HTTP exchange, request in, response out
//! - `LocalTransport`: dispatch straight into an in-process [`App`]
//! - `HttpTransport`: dispatch over the network via reqwest
//!
//! # Design Decisions
//! - Both ends speak `http::Request` / `http::Response` with an axum `Body`,
//!   so the builder and decoder are transport-agnostic
//! - Response bodies stay streaming; the decoder decides whether to buffer

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use url::Url;

use crate::app::App;
use crate::client::ClientError;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request<Body>) -> Result<Response, ClientError>;
}

/// Calls [`App::handle`] directly. No sockets, no serialization beyond the
/// envelope itself.
pub struct LocalTransport {
    app: Arc<App>,
}

impl LocalTransport {
    pub fn new(app: App) -> Self {
        LocalTransport { app: Arc::new(app) }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response, ClientError> {
        Ok(self.app.handle(request).await)
    }
}

/// Sends over the network. The request path and query are resolved against
/// the configured base URL.
pub struct HttpTransport {
    base: Url,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base_url)
            .map_err(|e| ClientError::Transport(format!("invalid base url: {e}")))?;
        Ok(HttpTransport { base, client: reqwest::Client::new() })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request<Body>) -> Result<Response, ClientError> {
        let (parts, body) = request.into_parts();
        let mut url = self.base.clone();
        url.set_path(parts.uri.path());
        url.set_query(parts.uri.query());
        let bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let response = self
            .client
            .request(parts.method, url)
            .headers(parts.headers)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        let mut builder = Response::builder().status(response.status());
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers().clone();
        }
        builder
            .body(Body::from_stream(response.bytes_stream()))
            .map_err(|e| ClientError::Transport(e.to_string()))
    }
}
