//! Response materialization.
//!
//! # Responsibilities
//! - Turn a handler's return value into a wire response
//! - Enforce declared route content types (mismatches are programming errors,
//!   not client-facing validation failures)
//! - Branch generator-style results into the streaming path
//!
//! # Design Decisions
//! - Rich values become the JSON envelope; preformed responses pass through
//!   untouched
//! - The first stream item is pulled before the response head is committed,
//!   so an error before any item becomes an ordinary error response

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use futures_util::stream::{BoxStream, Stream, StreamExt};
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::codec::{self, RichValue};
use crate::context::Context;
use crate::error::Error;
use crate::stream;

/// Lazily-produced sequence of values for a streaming route.
pub type ValueStream = BoxStream<'static, Result<RichValue, Error>>;

/// Declared content type of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    /// Rich-value JSON envelope (the default).
    #[default]
    Json,
    /// `text/plain`; the handler must produce a string.
    Text,
    /// URL-encoded form; the handler must produce key/value pairs.
    Form,
    /// Multipart form; the handler must produce a preformed response.
    Multipart,
}

/// A handler's return value, normalized.
pub enum Payload {
    /// A preformed response, passed through unchanged.
    Response(Response),
    /// A value for the rich-value codec.
    Value(RichValue),
    /// URL-encoded form pairs.
    Form(Vec<(String, String)>),
    /// A lazily-produced, finite or infinite sequence of values.
    Stream(ValueStream),
}

impl Payload {
    /// Wrap a value stream for a streaming route.
    pub fn stream<S>(stream: S) -> Payload
    where
        S: Stream<Item = Result<RichValue, Error>> + Send + 'static,
    {
        Payload::Stream(stream.boxed())
    }
}

/// Conversion of handler return types into a normalized payload.
pub trait IntoPayload {
    fn into_payload(self) -> Result<Payload, Error>;
}

impl IntoPayload for Payload {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(self)
    }
}

impl IntoPayload for Response {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Response(self))
    }
}

impl IntoPayload for RichValue {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Value(self))
    }
}

impl IntoPayload for serde_json::Value {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Value(RichValue::from(self)))
    }
}

impl IntoPayload for String {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Value(RichValue::String(self)))
    }
}

impl IntoPayload for &'static str {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Value(RichValue::from(self)))
    }
}

impl IntoPayload for () {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Value(RichValue::Null))
    }
}

impl IntoPayload for Vec<(String, String)> {
    fn into_payload(self) -> Result<Payload, Error> {
        Ok(Payload::Form(self))
    }
}

impl<T: IntoPayload> IntoPayload for Result<T, Error> {
    fn into_payload(self) -> Result<Payload, Error> {
        self.and_then(IntoPayload::into_payload)
    }
}

/// A route handler. Implemented for any `Fn(Context) -> Future` whose output
/// converts into a payload.
pub trait Handler: Send + Sync {
    fn call(&self, cx: Context) -> BoxFuture<'static, Result<Payload, Error>>;
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoPayload + Send + 'static,
{
    fn call(&self, cx: Context) -> BoxFuture<'static, Result<Payload, Error>> {
        let fut = (self)(cx);
        Box::pin(async move { fut.await.into_payload() })
    }
}

pub(crate) type SharedHandler = Arc<dyn Handler>;

/// Materialize a handler payload into a wire response according to the
/// route's declared format.
pub(crate) async fn materialize(
    payload: Payload,
    format: PayloadFormat,
    cx: &Context,
    keep_alive: Duration,
    cancel: CancellationToken,
    shutdown: CancellationToken,
) -> Result<Response, Error> {
    let payload = match payload {
        // Preformed responses pass through regardless of declared format.
        Payload::Response(response) => return Ok(response),
        other => other,
    };
    match format {
        PayloadFormat::Json => match payload {
            Payload::Value(value) => {
                let body = codec::encode_to_string(&value, cx.emit_meta());
                Ok(json_response(body))
            }
            Payload::Stream(stream) => {
                stream::respond(stream, keep_alive, cancel, shutdown, cx.emit_meta()).await
            }
            _ => Err(Error::Internal(
                "json route returned a form payload; declare the form content type".to_string(),
            )),
        },
        PayloadFormat::Text => match payload {
            Payload::Value(RichValue::String(text)) => Ok(text_response(text)),
            other => Err(Error::Internal(format!(
                "text route must return a string, got {}",
                payload_kind(&other)
            ))),
        },
        PayloadFormat::Form => match payload {
            Payload::Form(pairs) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in &pairs {
                    serializer.append_pair(key, value);
                }
                Ok(form_response(serializer.finish()))
            }
            other => Err(Error::Internal(format!(
                "form route must return key/value pairs, got {}",
                payload_kind(&other)
            ))),
        },
        PayloadFormat::Multipart => Err(Error::Internal(
            "multipart route must return a preformed response".to_string(),
        )),
    }
}

fn payload_kind(payload: &Payload) -> &'static str {
    match payload {
        Payload::Response(_) => "a response",
        Payload::Value(_) => "a value",
        Payload::Form(_) => "form pairs",
        Payload::Stream(_) => "a stream",
    }
}

fn json_response(body: String) -> Response {
    typed_response("application/json", body)
}

fn text_response(body: String) -> Response {
    typed_response("text/plain", body)
}

fn form_response(body: String) -> Response {
    typed_response("application/x-www-form-urlencoded", body)
}

fn typed_response(content_type: &'static str, body: String) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_results_become_json_string_values() {
        let payload = "hi".into_payload().unwrap();
        match payload {
            Payload::Value(RichValue::String(s)) => assert_eq!(s, "hi"),
            _ => panic!("expected string value"),
        }
    }

    #[test]
    fn result_flattens_into_payload() {
        let ok: Result<&'static str, Error> = Ok("fine");
        assert!(matches!(ok.into_payload(), Ok(Payload::Value(_))));
        let err: Result<&'static str, Error> = Err(Error::status(418, "teapot"));
        assert!(err.into_payload().is_err());
    }
}
