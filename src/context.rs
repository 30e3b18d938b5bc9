//! Per-request context.
//!
//! # Responsibilities
//! - Carry parsed query, extracted path params, the request head and body
//! - Hold a state bag deep-cloned from the owning node's default template
//! - Expose the cancellation signal, the background-task registrar and a
//!   redirect helper
//!
//! # Design Decisions
//! - Cheaply clonable (`Arc` innards) so middleware, handlers and background
//!   tasks share one view of the request
//! - The body is buffered on first read so validation and the handler can
//!   both observe it

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, RichValue};
use crate::error::{Error, ErrorHandler};
use crate::lifecycle::InFlight;

enum BodySource {
    Empty,
    Raw(Body),
    Buffered(Bytes),
}

pub(crate) struct ContextInner {
    method: Method,
    path: String,
    headers: HeaderMap,
    query: HashMap<String, Vec<String>>,
    params: HashMap<String, String>,
    state: Mutex<Map<String, Value>>,
    body: Mutex<BodySource>,
    cancel: CancellationToken,
    tasks: Tasks,
    emit_meta: bool,
}

/// The per-request mutable state handed to every middleware and handler.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        path: String,
        headers: HeaderMap,
        query: HashMap<String, Vec<String>>,
        params: HashMap<String, String>,
        state: Map<String, Value>,
        body: Option<Body>,
        cancel: CancellationToken,
        tasks: Tasks,
        emit_meta: bool,
    ) -> Self {
        let body = match body {
            Some(b) => BodySource::Raw(b),
            None => BodySource::Empty,
        };
        Context {
            inner: Arc::new(ContextInner {
                method,
                path,
                headers,
                query,
                params,
                state: Mutex::new(state),
                body: Mutex::new(body),
                cancel,
                tasks,
                emit_meta,
            }),
        }
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    /// Path extracted from the incoming URL, e.g. `/users/42`.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Query map with repeated keys folded into arrays.
    pub fn query(&self) -> &HashMap<String, Vec<String>> {
        &self.inner.query
    }

    /// First value for a query key.
    pub fn query_first(&self, key: &str) -> Option<&str> {
        self.inner.query.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    /// Extracted path parameter. Absent optional params yield `None`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.inner.params
    }

    /// Read a state-bag entry (cloned).
    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().expect("state lock").get(key).cloned()
    }

    /// Write a state-bag entry.
    pub fn state_set(&self, key: impl Into<String>, value: Value) {
        self.inner.state.lock().expect("state lock").insert(key.into(), value);
    }

    /// Query map as a JSON object, single values unwrapped from their arrays.
    pub(crate) fn query_as_value(&self) -> Value {
        let mut map = Map::new();
        for (key, values) in &self.inner.query {
            let entry = if values.len() == 1 {
                Value::String(values[0].clone())
            } else {
                Value::Array(values.iter().cloned().map(Value::String).collect())
            };
            map.insert(key.clone(), entry);
        }
        Value::Object(map)
    }

    pub(crate) fn params_as_value(&self) -> Value {
        Value::Object(
            self.inner
                .params
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    /// Raw request body. Buffered on first read so later reads see the same
    /// bytes.
    pub async fn body_bytes(&self) -> Result<Bytes, Error> {
        let taken = {
            let mut slot = self.inner.body.lock().expect("body lock");
            std::mem::replace(&mut *slot, BodySource::Empty)
        };
        let bytes = match taken {
            BodySource::Empty => Bytes::new(),
            BodySource::Buffered(b) => b,
            BodySource::Raw(body) => to_bytes(body, usize::MAX)
                .await
                .map_err(|e| Error::Parse(e.to_string()))?,
        };
        let mut slot = self.inner.body.lock().expect("body lock");
        *slot = BodySource::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Request body decoded through the rich-value envelope.
    pub async fn body_value(&self) -> Result<RichValue, Error> {
        let bytes = self.body_bytes().await?;
        if bytes.is_empty() {
            return Ok(RichValue::Null);
        }
        codec::decode_from_slice(&bytes)
    }

    /// Request body deserialized as JSON.
    pub async fn body_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, Error> {
        let bytes = self.body_bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Parse(e.to_string()))
    }

    pub async fn body_text(&self) -> Result<String, Error> {
        let bytes = self.body_bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Cancellation signal attached to the inbound request.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Resolves when the client has aborted the request.
    pub async fn cancelled(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Build a redirect response (302 by default).
    pub fn redirect(&self, location: &str) -> Response {
        self.redirect_with(location, StatusCode::FOUND)
    }

    pub fn redirect_with(&self, location: &str, status: StatusCode) -> Response {
        Response::builder()
            .status(status)
            .header(header::LOCATION, location)
            .body(Body::empty())
            .unwrap_or_else(|_| {
                Response::builder()
                    .status(StatusCode::FOUND)
                    .body(Body::empty())
                    .expect("static redirect response")
            })
    }

    /// Register fire-and-forget work that must not block the response.
    ///
    /// Failures are funneled through the scoped error handlers and logged;
    /// they can never affect the primary response.
    pub fn wait_until<F>(&self, fut: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.inner.tasks.spawn(self.clone(), fut);
    }

    pub(crate) fn emit_meta(&self) -> bool {
        self.inner.emit_meta
    }
}

/// Background-task registrar shared by all contexts of one request.
#[derive(Clone)]
pub(crate) struct Tasks {
    in_flight: Arc<InFlight>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
}

impl Tasks {
    pub fn new(in_flight: Arc<InFlight>, error_handlers: Vec<Arc<dyn ErrorHandler>>) -> Self {
        Tasks { in_flight, error_handlers }
    }

    fn spawn<F>(&self, cx: Context, fut: F)
    where
        F: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let guard = self.in_flight.enter();
        let handlers = self.error_handlers.clone();
        tokio::spawn(async move {
            if let Err(error) = fut.await {
                tracing::error!(error = %error, "background task failed");
                for handler in &handlers {
                    if handler.handle(error.clone(), cx.clone()).await.is_some() {
                        break;
                    }
                }
            }
            drop(guard);
        });
    }
}

/// Fold a raw query string into a repeated-key → array map.
pub(crate) fn fold_query(raw: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    if let Some(raw) = raw {
        for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
            out.entry(key.into_owned()).or_default().push(value.into_owned());
        }
    }
    out
}
