//! Client-side Server-Sent-Events frame parser.
//!
//! # Responsibilities
//! - Reassemble frames from arbitrarily-chunked response bytes
//! - Decode `message` frame data through the rich-value codec
//! - Surface an `error` frame as a stream item error and stop
//! - Stop cleanly on a `done` frame or transport end
//!
//! # Design Decisions
//! - Lazy: bytes are only pulled when the consumer polls
//! - Bare-newline keep-alives parse as empty frames and are skipped

use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};

use crate::client::ClientError;
use crate::codec::{self, RichValue};

/// Decoded values arriving over an SSE response, one item per `message`
/// frame.
pub struct EventStream {
    inner: BoxStream<'static, Result<Bytes, ClientError>>,
    buffer: Vec<u8>,
    done: bool,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("buffer", &self.buffer)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    pub(crate) fn new(inner: BoxStream<'static, Result<Bytes, ClientError>>) -> Self {
        EventStream { inner, buffer: Vec::new(), done: false }
    }

    /// Pop the next complete `\n\n`-terminated frame from the buffer.
    fn next_frame(&mut self) -> Option<Frame> {
        let end = self
            .buffer
            .windows(2)
            .position(|w| w == b"\n\n")?;
        let raw: Vec<u8> = self.buffer.drain(..end + 2).collect();
        let text = String::from_utf8_lossy(&raw[..end]).into_owned();
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in text.lines() {
            if let Some(v) = line.strip_prefix("event:") {
                event = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("data:") {
                data.push(v.strip_prefix(' ').unwrap_or(v));
            }
        }
        Some(Frame { event, data: data.join("\n") })
    }
}

struct Frame {
    event: Option<String>,
    data: String,
}

impl Stream for EventStream {
    type Item = Result<RichValue, ClientError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            if let Some(frame) = this.next_frame() {
                match frame.event.as_deref() {
                    // Keep-alive newlines produce frames with no event name
                    // and no data.
                    None if frame.data.is_empty() => continue,
                    Some("done") => {
                        this.done = true;
                        return Poll::Ready(None);
                    }
                    Some("error") => {
                        this.done = true;
                        return Poll::Ready(Some(Err(error_from_frame(&frame.data))));
                    }
                    _ => match decode_data(&frame.data) {
                        Ok(value) => return Poll::Ready(Some(Ok(value))),
                        Err(error) => {
                            this.done = true;
                            return Poll::Ready(Some(Err(error)));
                        }
                    },
                }
            }
            match this.inner.poll_next_unpin(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.buffer.extend_from_slice(&bytes),
                Poll::Ready(Some(Err(error))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn decode_data(data: &str) -> Result<RichValue, ClientError> {
    codec::decode_from_slice(data.as_bytes())
        .map_err(|e| ClientError::Decode(format!("bad stream frame: {e}")))
}

fn error_from_frame(data: &str) -> ClientError {
    let message = serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
        .unwrap_or_else(|| data.to_string());
    ClientError::Stream(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn from_chunks(chunks: Vec<&[u8]>) -> EventStream {
        let items: Vec<Result<Bytes, ClientError>> =
            chunks.into_iter().map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        EventStream::new(stream::iter(items).boxed())
    }

    #[tokio::test]
    async fn frames_split_across_chunks_reassemble() {
        let mut events = from_chunks(vec![
            b"event: message\nda",
            b"ta: \"a\"\n\nevent: message\ndata: \"b\"\n\n",
        ]);
        assert_eq!(events.next().await.unwrap().unwrap(), RichValue::from("a"));
        assert_eq!(events.next().await.unwrap().unwrap(), RichValue::from("b"));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn done_frame_ends_the_stream() {
        let mut events =
            from_chunks(vec![b"event: message\ndata: null\n\nevent: done\n\nevent: message\ndata: 1\n\n"]);
        assert_eq!(events.next().await.unwrap().unwrap(), RichValue::Null);
        assert!(events.next().await.is_none());
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn error_frame_raises_and_stops() {
        let mut events = from_chunks(vec![
            b"event: message\ndata: 1\n\nevent: error\ndata: {\"message\":\"boom\"}\n\n",
        ]);
        assert!(events.next().await.unwrap().is_ok());
        match events.next().await.unwrap() {
            Err(ClientError::Stream(message)) => assert_eq!(message, "boom"),
            other => panic!("expected stream error, got {other:?}"),
        }
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn keep_alive_newlines_are_skipped() {
        let mut events = from_chunks(vec![b"event: message\ndata: 1\n\n\nevent: message\ndata: 2\n\n"]);
        assert_eq!(events.next().await.unwrap().unwrap(), RichValue::from(1i64));
        assert_eq!(events.next().await.unwrap().unwrap(), RichValue::from(2i64));
    }
}
