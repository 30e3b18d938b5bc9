//! Typed client: request builder, retry loop, response decoder.
//!
//! # Responsibilities
//! - Explicit request builder (`method` + `path` + query/header/body/file)
//! - Encode bodies through the rich-value envelope, or multipart when any
//!   file part is attached
//! - Bounded retries with jittered exponential backoff, for 5xx only
//! - Decode responses by content type: SSE frame streams, JSON envelopes,
//!   multipart maps, text with a best-effort JSON reparse
//!
//! # Data Flow
//! ```text
//! RequestBuilder
//!     → build (marker header, query flattening, body encoding)
//!     → request hooks
//!     → Transport::send            ──5xx──▶ backoff, rebuild, resend
//!     → response hooks
//!     → Decoded / ClientError::Status
//! ```
//!
//! # Design Decisions
//! - Requests are rebuilt from the stored parameters on every attempt, so a
//!   retry never replays a half-consumed body
//! - Non-2xx is an error at the call site, carrying the decoded payload

mod backoff;
pub mod sse;
pub mod transport;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode};
use axum::response::Response;
use futures_util::StreamExt;
use serde_json::Value;

use crate::app::{App, RPC_MARKER_HEADER, RPC_MARKER_VALUE};
use crate::codec::{self, RichValue};
use crate::config::RetryConfig;
use crate::multipart::{self, Part};

pub use sse::EventStream;
pub use transport::{HttpTransport, LocalTransport, Transport};

/// Client-side fault.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The exchange itself failed (connection, body collection).
    #[error("transport error: {0}")]
    Transport(String),
    /// The request could not be built from its parameters.
    #[error("invalid request: {0}")]
    Request(String),
    /// The server answered with a non-2xx status.
    #[error("request failed with status {status}")]
    Status { status: u16, payload: RichValue },
    /// The response body did not decode.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// The server reported a fault mid-stream.
    #[error("stream error: {0}")]
    Stream(String),
}

/// A decoded response body.
pub enum Decoded {
    /// Rich value from a JSON envelope (or a reparsed JSON text literal).
    Value(RichValue),
    /// Plain text that was not a JSON literal.
    Text(String),
    /// Multipart parts, in body order.
    Parts(Vec<Part>),
    /// Lazy frame stream from a `text/event-stream` response.
    Stream(EventStream),
}

impl std::fmt::Debug for Decoded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decoded::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Decoded::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Decoded::Parts(p) => f.debug_tuple("Parts").field(p).finish(),
            Decoded::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl Decoded {
    /// The rich value, if this response carried one.
    pub fn into_value(self) -> Option<RichValue> {
        match self {
            Decoded::Value(v) => Some(v),
            _ => None,
        }
    }
}

type RequestHook = Arc<dyn Fn(&mut axum::http::request::Parts) + Send + Sync>;
type ResponseHook = Arc<dyn Fn(StatusCode, &HeaderMap) + Send + Sync>;

#[derive(Clone, Default)]
struct Hooks {
    request: Vec<RequestHook>,
    response: Vec<ResponseHook>,
}

/// Typed client over a [`Transport`].
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    retry: RetryConfig,
    hooks: Hooks,
}

impl Client {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Client { transport, retry: RetryConfig::default(), hooks: Hooks::default() }
    }

    /// In-process client calling `app.handle` directly.
    pub fn local(app: App) -> Self {
        Client::new(Arc::new(LocalTransport::new(app)))
    }

    /// Network client against `base_url`.
    pub fn http(base_url: &str) -> Result<Self, ClientError> {
        Ok(Client::new(Arc::new(HttpTransport::new(base_url)?)))
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run `hook` on every outgoing request head, after the builder.
    pub fn on_request<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut axum::http::request::Parts) + Send + Sync + 'static,
    {
        self.hooks.request.push(Arc::new(hook));
        self
    }

    /// Observe every response head, including retried attempts.
    pub fn on_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(StatusCode, &HeaderMap) + Send + Sync + 'static,
    {
        self.hooks.response.push(Arc::new(hook));
        self
    }

    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        RequestBuilder {
            client: self.clone(),
            method,
            path: path.to_string(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            files: Vec::new(),
            fields: Vec::new(),
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }
}

/// One request in the making. Parameters are kept so retries rebuild the
/// exact same request.
pub struct RequestBuilder {
    client: Client,
    method: Method,
    path: String,
    query: Vec<(String, Value)>,
    headers: Vec<(String, String)>,
    body: Option<RichValue>,
    files: Vec<Part>,
    fields: Vec<(String, String)>,
}

impl RequestBuilder {
    /// Add a query parameter. Arrays repeat the key, objects are
    /// JSON-stringified, scalars are coerced, nulls are dropped.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// JSON-envelope body. Ignored if any file part is attached.
    pub fn body(mut self, body: impl Into<RichValue>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Plain form field, sent as a multipart part alongside files.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Attach a file. Any file part switches the request to multipart.
    pub fn file(
        mut self,
        name: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<bytes::Bytes>,
    ) -> Self {
        self.files.push(Part::file(name, filename, content_type, data));
        self
    }

    /// Send and decode. Retries 5xx responses up to the configured bound.
    pub async fn send(self) -> Result<Decoded, ClientError> {
        let retry = self.client.retry.clone();
        let mut attempt: u32 = 0;
        loop {
            let request = self.build()?;
            let response = self.client.transport.send(request).await?;
            for hook in &self.client.hooks.response {
                hook(response.status(), response.headers());
            }
            if response.status().is_server_error() && attempt < retry.max_retries {
                attempt += 1;
                let delay = backoff::backoff_delay(attempt, retry.base_delay_ms, retry.max_delay_ms);
                tracing::warn!(
                    status = response.status().as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after server error"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return decode_response(response).await;
        }
    }

    /// Send, expecting a frame stream back.
    pub async fn send_stream(self) -> Result<EventStream, ClientError> {
        match self.send().await? {
            Decoded::Stream(events) => Ok(events),
            other => Err(ClientError::Decode(format!(
                "expected an event stream, got {other:?}"
            ))),
        }
    }

    fn build(&self) -> Result<Request<Body>, ClientError> {
        let uri = self.build_uri();
        let mut builder = Request::builder().method(self.method.clone()).uri(uri);
        builder = builder.header(RPC_MARKER_HEADER, RPC_MARKER_VALUE);

        let body = if !self.files.is_empty() {
            let mut parts: Vec<Part> = self
                .fields
                .iter()
                .map(|(name, value)| Part::field(name.clone(), value.clone()))
                .collect();
            parts.extend(self.files.iter().cloned());
            let (content_type, bytes) = multipart::encode(&parts);
            builder = builder.header(header::CONTENT_TYPE, content_type);
            Body::from(bytes)
        } else if let Some(value) = &self.body {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(codec::encode_to_string(value, true))
        } else {
            Body::empty()
        };

        let mut request = builder
            .body(body)
            .map_err(|e| ClientError::Request(e.to_string()))?;
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ClientError::Request(format!("bad header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ClientError::Request(format!("bad header value: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        if !self.client.hooks.request.is_empty() {
            let (mut parts, body) = request.into_parts();
            for hook in &self.client.hooks.request {
                hook(&mut parts);
            }
            request = Request::from_parts(parts, body);
        }
        Ok(request)
    }

    fn build_uri(&self) -> String {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for (key, value) in &self.query {
            flatten_query(key, value, &mut pairs);
        }
        if pairs.is_empty() {
            return self.path.clone();
        }
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &pairs {
            serializer.append_pair(key, value);
        }
        format!("{}?{}", self.path, serializer.finish())
    }
}

/// Flatten one query parameter into wire pairs.
fn flatten_query(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for item in items {
                flatten_query(key, item, out);
            }
        }
        Value::Object(_) => out.push((key.to_string(), value.to_string())),
        Value::String(s) => out.push((key.to_string(), s.clone())),
        other => out.push((key.to_string(), other.to_string())),
    }
}

async fn decode_response(response: Response) -> Result<Decoded, ClientError> {
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !status.is_success() {
        let bytes = collect(response).await?;
        let payload = match codec::decode_from_slice(&bytes) {
            Ok(value) => value,
            Err(_) => RichValue::String(String::from_utf8_lossy(&bytes).into_owned()),
        };
        return Err(ClientError::Status { status: status.as_u16(), payload });
    }

    if content_type.starts_with("text/event-stream") {
        let frames = response
            .into_body()
            .into_data_stream()
            .map(|r| r.map_err(|e| ClientError::Transport(e.to_string())))
            .boxed();
        return Ok(Decoded::Stream(EventStream::new(frames)));
    }
    if content_type.starts_with("application/json") {
        let bytes = collect(response).await?;
        if bytes.is_empty() {
            return Ok(Decoded::Value(RichValue::Null));
        }
        return codec::decode_from_slice(&bytes)
            .map(Decoded::Value)
            .map_err(|e| ClientError::Decode(e.to_string()));
    }
    if content_type.starts_with("multipart/form-data") {
        let bytes = collect(response).await?;
        return multipart::decode(&content_type, &bytes)
            .map(Decoded::Parts)
            .map_err(|e| ClientError::Decode(e.to_string()));
    }

    let bytes = collect(response).await?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    // Text bodies that happen to be JSON literals reparse into values.
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Ok(Decoded::Value(RichValue::from(value))),
        Err(_) => Ok(Decoded::Text(text)),
    }
}

async fn collect(response: Response) -> Result<bytes::Bytes, ClientError> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .map_err(|e| ClientError::Transport(e.to_string()))
}
