//! Application tree and request dispatch.
//!
//! # Responsibilities
//! - Builder for the composition tree: routes, middleware, error handlers,
//!   default state and mounted children
//! - Compile the tree exactly once, on the first request
//! - Dispatch: match, build the per-request context, run the scoped chain,
//!   materialize the result
//!
//! # Data Flow
//! ```text
//! Request
//!     → compiled-tree match (or synthetic not-found on the nearest node)
//!     → Context (query fold, params, deep-cloned state template)
//!     → scoped middleware chain → terminal (validate, handler, materialize)
//!     → Response (HEAD fallback strips the body)
//! ```
//!
//! # Design Decisions
//! - The builder is consumed by value; registration order is preserved
//! - No socket I/O here; the caller owns the listener and hands us
//!   `http::Request<Body>` values

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::context::{fold_query, Context, Tasks};
use crate::error::{Error, ErrorHandler};
use crate::lifecycle::{InFlight, Shutdown};
use crate::middleware::{Chain, Middleware, Terminal};
use crate::respond::{self, Handler, SharedHandler};
use crate::routing::pattern::Pattern;
use crate::routing::table::{RouteEntry, RouteOptions, RouteTable};
use crate::routing::tree::{CompiledTree, MatchOutcome};

/// Marker header RPC clients attach so rich-value metadata is emitted even
/// under `plain_json_unless_rpc`.
pub const RPC_MARKER_HEADER: &str = "x-strand-client";
pub(crate) const RPC_MARKER_VALUE: &str = "rpc";

/// One node of the composition tree and, at the root, the whole engine.
pub struct App {
    pub(crate) prefix: String,
    pub(crate) scoped: bool,
    pub(crate) plain_json_unless_rpc: bool,
    pub(crate) state: Map<String, Value>,
    pub(crate) routes: RouteTable,
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) error_handlers: Vec<Arc<dyn ErrorHandler>>,
    pub(crate) children: Vec<App>,
    config: EngineConfig,
    in_flight: Arc<InFlight>,
    shutdown: Arc<Shutdown>,
    compiled: OnceLock<Arc<CompiledTree>>,
}

impl Default for App {
    fn default() -> Self {
        App::new()
    }
}

impl App {
    pub fn new() -> Self {
        App::with_prefix("")
    }

    /// A node whose routes and children all live under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        App {
            prefix: prefix.to_string(),
            scoped: true,
            plain_json_unless_rpc: false,
            state: Map::new(),
            routes: RouteTable::default(),
            middleware: Vec::new(),
            error_handlers: Vec::new(),
            children: Vec::new(),
            config: EngineConfig::default(),
            in_flight: InFlight::new(),
            shutdown: Arc::new(Shutdown::new()),
            compiled: OnceLock::new(),
        }
    }

    /// `scoped: false` exposes this node's middleware and error handlers to
    /// every request in the tree, not just requests under this node.
    pub fn scoped(mut self, scoped: bool) -> Self {
        self.scoped = scoped;
        self
    }

    /// Emit plain JSON (no rich-value metadata) unless the request carries
    /// the RPC marker header. Inherited by mounted children.
    pub fn plain_json_unless_rpc(mut self, plain: bool) -> Self {
        self.plain_json_unless_rpc = plain;
        self
    }

    /// Seed a default-state entry; each request receives a deep clone.
    pub fn state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    /// Engine tuning (keep-alive interval, drain settings). Only the root
    /// node's config is consulted.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Mount a child node. Its effective prefix is this node's prefix plus
    /// its own, unless its own already contains the accumulated prefix.
    pub fn mount(mut self, child: App) -> Self {
        self.children.push(child);
        self
    }

    /// Attach middleware; it runs for every request this node's scope sees,
    /// in registration order.
    pub fn layer<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Attach an error handler consulted in scope order; the first one
    /// returning a response wins.
    pub fn on_error<H: ErrorHandler + 'static>(mut self, handler: H) -> Self {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Register a route. `method: None` matches every method.
    pub fn route<H: Handler + 'static>(
        self,
        method: Option<Method>,
        path: &str,
        handler: H,
    ) -> Self {
        self.route_with(method, path, handler, RouteOptions::default())
    }

    pub fn route_with<H: Handler + 'static>(
        mut self,
        method: Option<Method>,
        path: &str,
        handler: H,
        options: RouteOptions,
    ) -> Self {
        self.routes.insert(RouteEntry {
            method,
            pattern: Pattern::parse(path),
            handler: Arc::new(handler),
            options,
        });
        self
    }

    pub fn get<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(Some(Method::GET), path, handler)
    }

    pub fn get_with<H: Handler + 'static>(
        self,
        path: &str,
        handler: H,
        options: RouteOptions,
    ) -> Self {
        self.route_with(Some(Method::GET), path, handler, options)
    }

    pub fn post<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(Some(Method::POST), path, handler)
    }

    pub fn post_with<H: Handler + 'static>(
        self,
        path: &str,
        handler: H,
        options: RouteOptions,
    ) -> Self {
        self.route_with(Some(Method::POST), path, handler, options)
    }

    pub fn put<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(Some(Method::PUT), path, handler)
    }

    pub fn patch<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(Some(Method::PATCH), path, handler)
    }

    pub fn delete<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(Some(Method::DELETE), path, handler)
    }

    /// All-methods route.
    pub fn all<H: Handler + 'static>(self, path: &str, handler: H) -> Self {
        self.route(None, path, handler)
    }

    /// Process-wide in-flight counter (requests plus background tasks).
    pub fn in_flight(&self) -> Arc<InFlight> {
        self.in_flight.clone()
    }

    /// Shutdown coordinator. Triggering it halts open streams; pair with
    /// [`drain`](App::drain) or
    /// [`Shutdown::trigger_and_drain`] to wait for in-flight work.
    pub fn shutdown(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }

    /// Hold shutdown until in-flight work finishes or the configured drain
    /// deadline passes. Returns `false` on deadline.
    pub async fn drain(&self) -> bool {
        self.in_flight
            .drain(self.config.drain.max_wait(), self.config.drain.check_interval())
            .await
    }

    fn tree(&self) -> &Arc<CompiledTree> {
        self.compiled.get_or_init(|| Arc::new(CompiledTree::compile(self)))
    }

    /// Dispatch one request through the tree.
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let _guard = self.in_flight.enter();
        let tree = self.tree().clone();
        let (parts, body) = request.into_parts();
        let path = parts.uri.path().to_string();
        let query = fold_query(parts.uri.query());
        let cancel = parts
            .extensions
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();
        let is_rpc = parts
            .headers
            .get(RPC_MARKER_HEADER)
            .is_some();
        let keep_alive = self.config.sse_keep_alive();

        let (node, entry, params, head_fallback) = match tree.match_request(&parts.method, &path) {
            MatchOutcome::Found { node, entry, params, head_fallback } => {
                (node, Some(entry.clone()), params, head_fallback)
            }
            MatchOutcome::NotFound { nearest } => {
                tracing::debug!(method = %parts.method, path = %path, "no route matched");
                (nearest, None, Default::default(), false)
            }
        };

        let compiled = &tree.nodes[node];
        let emit_meta = is_rpc || !compiled.plain_json_unless_rpc;
        let error_handlers = tree.scoped_error_handlers(node);
        let cx = Context::new(
            parts.method.clone(),
            path,
            parts.headers,
            query,
            params,
            compiled.state.clone(),
            Some(body),
            cancel.clone(),
            Tasks::new(self.in_flight.clone(), error_handlers.clone()),
            emit_meta,
        );

        let terminal: Arc<dyn Terminal> = match entry {
            Some(entry) => Arc::new(RouteTerminal {
                handler: entry.handler.clone(),
                options: entry.options.clone(),
                error_handlers: error_handlers.clone(),
                keep_alive,
                shutdown: self.shutdown.token(),
            }),
            None => Arc::new(NotFoundTerminal),
        };
        let chain = Chain::new(tree.scoped_middleware(node), terminal, error_handlers);
        let response = chain.run(cx).await;

        if head_fallback || parts.method == Method::HEAD {
            // HEAD keeps the computed headers and status, drops the payload.
            response.map(|_| Body::empty())
        } else {
            response
        }
    }
}

/// Terminal continuation for a matched route: validate, invoke the handler
/// once, materialize its payload.
struct RouteTerminal {
    handler: SharedHandler,
    options: RouteOptions,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    keep_alive: Duration,
    shutdown: CancellationToken,
}

impl RouteTerminal {
    async fn run(&self, cx: &Context) -> Result<Response, Error> {
        self.validate(cx).await?;
        let payload = self.handler.call(cx.clone()).await?;
        respond::materialize(
            payload,
            self.options.format,
            cx,
            self.keep_alive,
            cx.cancellation(),
            self.shutdown.clone(),
        )
        .await
    }

    async fn validate(&self, cx: &Context) -> Result<(), Error> {
        let schema = &self.options.schema;
        let mut issues = Vec::new();
        if let Some(validator) = &schema.params {
            issues.extend(validator.validate(&cx.params_as_value()));
        }
        if let Some(validator) = &schema.query {
            issues.extend(validator.validate(&cx.query_as_value()));
        }
        if let Some(validator) = &schema.body {
            // Validators see the plain JSON projection, not codec tags.
            let value = cx.body_value().await?;
            issues.extend(validator.validate(&crate::codec::encode_envelope_with(&value, false)));
        }
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(issues))
        }
    }
}

#[async_trait::async_trait]
impl Terminal for RouteTerminal {
    async fn invoke(&self, cx: Context) -> Response {
        match self.run(&cx).await {
            Ok(response) => response,
            Err(error) => crate::error::dispatch(error, &self.error_handlers, &cx).await,
        }
    }
}

struct NotFoundTerminal;

#[async_trait::async_trait]
impl Terminal for NotFoundTerminal {
    async fn invoke(&self, _cx: Context) -> Response {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header(axum::http::header::CONTENT_TYPE, "text/plain")
            .body(Body::from("Not Found"))
            .unwrap_or_else(|_| Response::new(Body::empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RichValue;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn matched_route_produces_encoded_body() {
        let app = App::new().get("/hello", |_cx: Context| async { RichValue::from("hi") });
        let response = app.handle(get("/hello")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "\"hi\"");
    }

    #[tokio::test]
    async fn unmatched_path_yields_plain_not_found() {
        let app = App::new().get("/hello", |_cx: Context| async { RichValue::Null });
        let response = app.handle(get("/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_text(response).await, "Not Found");
    }

    #[tokio::test]
    async fn head_falls_back_to_get_without_body() {
        let app = App::new().get("/page", |_cx: Context| async { RichValue::from("payload") });
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/page")
            .body(Body::empty())
            .unwrap();
        let response = app.handle(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "");
    }

    #[tokio::test]
    async fn path_params_reach_the_handler() {
        let app = App::new().get("/users/:id", |cx: Context| async move {
            RichValue::from(cx.param("id").unwrap_or(""))
        });
        let response = app.handle(get("/users/42")).await;
        assert_eq!(body_text(response).await, "\"42\"");
    }

    #[tokio::test]
    async fn default_state_is_cloned_per_request() {
        let app = App::new()
            .state("counter", serde_json::json!(0))
            .get("/bump", |cx: Context| async move {
                let n = cx
                    .state_get("counter")
                    .and_then(|v| v.as_i64())
                    .unwrap_or(0);
                cx.state_set("counter", serde_json::json!(n + 1));
                RichValue::from(n + 1)
            });
        for _ in 0..3 {
            let response = app.handle(get("/bump")).await;
            // Always 1: each request starts from the template, never from a
            // previous request's mutation.
            assert_eq!(body_text(response).await, "1");
        }
    }

    #[tokio::test]
    async fn validation_failure_surfaces_as_422() {
        use crate::error::Issue;
        use crate::routing::table::Schema;
        let options = RouteOptions {
            format: crate::respond::PayloadFormat::Json,
            schema: Schema {
                body: None,
                query: Some(Arc::new(|value: &Value| {
                    if value.get("id").is_none() {
                        vec![Issue::new("id", "required")]
                    } else {
                        Vec::new()
                    }
                })),
                params: None,
            },
        };
        let app = App::new().get_with(
            "/items",
            |_cx: Context| async { RichValue::Null },
            options,
        );
        let response = app.handle(get("/items")).await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let response = app.handle(get("/items?id=5")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
