//! Server-Sent-Events framing for streaming routes.
//!
//! # Responsibilities
//! - Frame each produced value as `event: message\ndata: <envelope>\n\n`
//! - Inject a bare-newline keep-alive on a fixed idle interval
//! - Stop pulling on request cancellation so the producer can clean up
//! - Deliver a post-first-item error as an `event: error` frame; finalize a
//!   never-yielding sequence with a `done` event
//!
//! # Design Decisions
//! - Pull-driven: the producer is resumed exactly once per transport pull,
//!   so there is no unbounded buffering (true backpressure)
//! - Cancellation drops the producer rather than force-killing it; cleanup
//!   runs in its destructor

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::Response;
use bytes::Bytes;
use futures_util::{Future, Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::codec::{self, RichValue};
use crate::error::Error;
use crate::respond::ValueStream;

/// Pull the first item, then commit to a framing decision.
///
/// An error before any item is returned to the caller so it takes the
/// ordinary error-dispatch path instead of a stream frame. The stream halts
/// on either the request's abort signal or the process shutdown signal.
pub(crate) async fn respond(
    mut stream: ValueStream,
    keep_alive: Duration,
    cancel: CancellationToken,
    shutdown: CancellationToken,
    emit_meta: bool,
) -> Result<Response, Error> {
    match stream.next().await {
        Some(Err(error)) => Err(error),
        None => Ok(sse_response(Body::from(EMPTY_STREAM_BODY))),
        Some(Ok(first)) => {
            let frames = SseFrames::new(first, stream, keep_alive, cancel, shutdown, emit_meta);
            Ok(sse_response(Body::from_stream(frames)))
        }
    }
}

/// Terminal body for a sequence that completed without yielding.
const EMPTY_STREAM_BODY: &str = "event: message\ndata: null\n\nevent: done\n\n";

fn sse_response(body: Body) -> Response {
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn message_frame(value: &RichValue, emit_meta: bool) -> Bytes {
    Bytes::from(format!(
        "event: message\ndata: {}\n\n",
        codec::encode_to_string(value, emit_meta)
    ))
}

fn error_frame(error: &Error) -> Bytes {
    let data = serde_json::json!({ "message": error.to_string() });
    Bytes::from(format!("event: error\ndata: {data}\n\n"))
}

struct SseFrames {
    first: Option<RichValue>,
    inner: ValueStream,
    keep_alive: tokio::time::Interval,
    cancelled: Pin<Box<dyn Future<Output = ()> + Send>>,
    emit_meta: bool,
    done: bool,
}

impl SseFrames {
    fn new(
        first: RichValue,
        inner: ValueStream,
        keep_alive: Duration,
        cancel: CancellationToken,
        shutdown: CancellationToken,
        emit_meta: bool,
    ) -> Self {
        // Delay the first tick a full period so data frames reset the idle
        // clock instead of racing it.
        let start = tokio::time::Instant::now() + keep_alive;
        SseFrames {
            first: Some(first),
            inner,
            keep_alive: tokio::time::interval_at(start, keep_alive),
            cancelled: Box::pin(async move {
                tokio::select! {
                    _ = cancel.cancelled_owned() => {}
                    _ = shutdown.cancelled_owned() => {}
                }
            }),
            emit_meta,
            done: false,
        }
    }
}

impl Stream for SseFrames {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(first) = this.first.take() {
            this.keep_alive.reset();
            return Poll::Ready(Some(Ok(message_frame(&first, this.emit_meta))));
        }
        // Aborted: stop pulling and let the producer's destructor clean up.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }
        match this.inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(value))) => {
                this.keep_alive.reset();
                Poll::Ready(Some(Ok(message_frame(&value, this.emit_meta))))
            }
            Poll::Ready(Some(Err(error))) => {
                // Items already sent are not retracted; surface the fault as
                // a terminal error frame.
                this.done = true;
                Poll::Ready(Some(Ok(error_frame(&error))))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => match this.keep_alive.poll_tick(cx) {
                Poll::Ready(_) => Poll::Ready(Some(Ok(Bytes::from_static(b"\n")))),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}
