//! Middleware chain executor.
//!
//! # Responsibilities
//! - Run the scope-filtered middleware list as an explicit continuation chain
//! - Invoke the matched handler exactly once at the terminal position
//! - Convert faults into responses at the failure site, so middleware that
//!   already ran still observe a well-formed response on the way out
//!
//! # Design Decisions
//! - Control flow is a tagged `Flow` value, never a thrown response
//! - `Next` is consumed by value, making double execution unrepresentable;
//!   a watermark catches the one remaining misuse (consuming `next` and then
//!   returning `Continue`)
//! - The error path re-enters the same continuation chain rather than
//!   restarting it

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::context::Context;
use crate::error::{self, Error, ErrorHandler};

/// Tagged result of one middleware invocation.
pub enum Flow {
    /// No response produced and `next` untouched; the executor runs the
    /// remainder of the chain.
    Continue,
    /// A response, either fresh or obtained by wrapping `next.run()`.
    Respond(Response),
    /// A fault, routed through the scoped error dispatcher at this point in
    /// the chain.
    Fail(Error),
}

/// One participant in the continuation chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, cx: Context, next: Next) -> Flow;
}

#[async_trait]
impl<F, Fut> Middleware for F
where
    F: Fn(Context, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Flow> + Send + 'static,
{
    async fn call(&self, cx: Context, next: Next) -> Flow {
        (self)(cx, next).await
    }
}

/// The terminal continuation: matched handler plus response materialization.
#[async_trait]
pub(crate) trait Terminal: Send + Sync {
    async fn invoke(&self, cx: Context) -> Response;
}

/// The rest of the pipeline from one middleware's point of view.
///
/// Consumed by value; running it executes every remaining participant and
/// returns the response they produced.
pub struct Next {
    chain: Arc<Chain>,
    index: usize,
}

impl Next {
    /// Execute the remainder of the chain.
    pub async fn run(self, cx: Context) -> Response {
        self.chain.clone().run_from(self.index, cx).await
    }
}

pub(crate) struct Chain {
    middleware: Vec<Arc<dyn Middleware>>,
    terminal: Arc<dyn Terminal>,
    error_handlers: Vec<Arc<dyn ErrorHandler>>,
    /// Highest chain position entered so far, for the exactly-once guarantee.
    watermark: AtomicUsize,
}

impl Chain {
    pub fn new(
        middleware: Vec<Arc<dyn Middleware>>,
        terminal: Arc<dyn Terminal>,
        error_handlers: Vec<Arc<dyn ErrorHandler>>,
    ) -> Arc<Self> {
        Arc::new(Chain { middleware, terminal, error_handlers, watermark: AtomicUsize::new(0) })
    }

    pub async fn run(self: Arc<Self>, cx: Context) -> Response {
        self.run_from(0, cx).await
    }

    fn run_from(self: Arc<Self>, index: usize, cx: Context) -> BoxFuture<'static, Response> {
        Box::pin(async move {
            let entered = self.watermark.fetch_max(index + 1, Ordering::SeqCst);
            if entered > index {
                tracing::error!(index, "chain position re-entered; refusing to run it twice");
                return error::dispatch(
                    Error::Internal("middleware chain position executed twice".to_string()),
                    &self.error_handlers,
                    &cx,
                )
                .await;
            }
            let Some(mw) = self.middleware.get(index).cloned() else {
                return self.terminal.invoke(cx).await;
            };
            let next = Next { chain: self.clone(), index: index + 1 };
            match mw.call(cx.clone(), next).await {
                Flow::Respond(response) => response,
                Flow::Fail(error) => error::dispatch(error, &self.error_handlers, &cx).await,
                Flow::Continue => {
                    if self.watermark.load(Ordering::SeqCst) > index + 1 {
                        tracing::error!(
                            index,
                            "middleware consumed next but returned Continue, dropping response"
                        );
                        return error::dispatch(
                            Error::Internal(
                                "middleware consumed next but returned Continue".to_string(),
                            ),
                            &self.error_handlers,
                            &cx,
                        )
                        .await;
                    }
                    self.clone().run_from(index + 1, cx).await
                }
            }
        })
    }
}
