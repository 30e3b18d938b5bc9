//! Error taxonomy and the scoped error dispatcher.
//!
//! # Responsibilities
//! - Classify faults: validation failures, parse failures, explicit-status
//!   faults, internal faults
//! - Walk the scoped error-handler list; first handler producing a response
//!   wins
//! - Synthesize the default response when no handler claims the fault
//!
//! # Design Decisions
//! - Faults are values threaded through the chain, never panics
//! - Status is taken from the fault only when plausible (100-599), else 500
//! - The default body is the rich-value encoding of the fault, always
//!   carrying at least a `message` field

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;

use crate::codec::{self, RichValue};
use crate::context::Context;

/// One validation problem: where it happened and what went wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl Issue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into() }
    }
}

fn format_issues(issues: &[Issue]) -> String {
    if issues.is_empty() {
        return "validation failed".to_string();
    }
    issues
        .iter()
        .map(|i| {
            if i.path.is_empty() {
                i.message.clone()
            } else {
                format!("{}: {}", i.path, i.message)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Engine-level fault.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Raised by a route's pluggable validator hook. Always client-visible 422.
    #[error("{}", format_issues(.0))]
    Validation(Vec<Issue>),
    /// The request carried a body the engine could not parse. 400.
    #[error("failed to parse request body: {0}")]
    Parse(String),
    /// A fault carrying an explicit status code.
    #[error("{message}")]
    Status { status: u16, message: String },
    /// Anything else. 500.
    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a fault with an explicit status.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Error::Status { status, message: message.into() }
    }

    /// HTTP status for this fault; implausible explicit statuses fall to 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Parse(_) => StatusCode::BAD_REQUEST,
            Error::Status { status, .. } if (100..=599).contains(status) => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body representation, coerced to carry at least a `message` field.
    pub fn to_rich(&self) -> RichValue {
        match self {
            Error::Validation(issues) => RichValue::Object(vec![
                ("message".to_string(), RichValue::from(self.to_string())),
                (
                    "issues".to_string(),
                    RichValue::Array(
                        issues
                            .iter()
                            .map(|i| {
                                RichValue::Object(vec![
                                    ("path".to_string(), RichValue::from(i.path.as_str())),
                                    ("message".to_string(), RichValue::from(i.message.as_str())),
                                ])
                            })
                            .collect(),
                    ),
                ),
            ]),
            other => RichValue::Error { message: other.to_string() },
        }
    }
}

/// A scoped error handler. The first handler returning a response terminates
/// dispatch; `None` passes the fault along.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle(&self, error: Error, cx: Context) -> Option<Response>;
}

#[async_trait]
impl<F, Fut> ErrorHandler for F
where
    F: Fn(Error, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Option<Response>> + Send + 'static,
{
    async fn handle(&self, error: Error, cx: Context) -> Option<Response> {
        (self)(error, cx).await
    }
}

/// Run the scoped error-handler chain and fall back to the default response.
pub(crate) async fn dispatch(
    error: Error,
    handlers: &[Arc<dyn ErrorHandler>],
    cx: &Context,
) -> Response {
    if handlers.is_empty() {
        tracing::error!(error = %error, "unhandled request fault");
        return default_response(&error, cx.emit_meta());
    }
    for handler in handlers {
        if let Some(response) = handler.handle(error.clone(), cx.clone()).await {
            return response;
        }
    }
    tracing::debug!(error = %error, "no error handler claimed fault, synthesizing default");
    default_response(&error, cx.emit_meta())
}

/// The synthesized terminal response for an unclaimed fault.
pub(crate) fn default_response(error: &Error, with_meta: bool) -> Response {
    let body = codec::encode_to_string(&error.to_rich(), with_meta);
    Response::builder()
        .status(error.status_code())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| {
            Response::new(Body::from(r#"{"message":"internal server error"}"#))
        })
}
