//! Call outputs: unary responses and streaming response handles.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use connect_rpc_core::{Codec, Compression, ConnectError};
use futures::Stream;
use http::HeaderMap;
use http_body_util::BodyDataStream;
use hyper::body::Incoming;
use prost::Message;
use serde::de::DeserializeOwned;

use crate::frame::FrameDecoder;

/// The output of a unary-shaped call: one message plus response metadata.
#[derive(Debug)]
pub struct UnaryResponse<T> {
    message: T,
    headers: HeaderMap,
    trailers: HeaderMap,
}

impl<T> UnaryResponse<T> {
    pub(crate) fn new(message: T, headers: HeaderMap, trailers: HeaderMap) -> Self {
        Self {
            message,
            headers,
            trailers,
        }
    }

    /// The response message.
    pub fn message(&self) -> &T {
        &self.message
    }

    /// Consume the response, keeping only the message.
    pub fn into_message(self) -> T {
        self.message
    }

    /// Response headers, verbatim (including any `trailer-`-prefixed ones).
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trailing metadata, with the `trailer-` prefix already stripped for
    /// unary calls; for client-streaming calls these come from the
    /// end-of-stream block.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }
}

type ResponseDecoder<T> = FrameDecoder<BodyDataStream<Incoming>, T>;

/// A streaming call in progress.
///
/// Implements [`Stream`] of `Result<T, ConnectError>`: messages arrive in
/// order, and a server error reported in the end-of-stream block is yielded
/// as the final item. [`trailers`](Self::trailers) becomes available once
/// the stream has ended.
///
/// Dropping the handle — or calling [`close`](Self::close), which is
/// idempotent — releases the underlying HTTP connection.
pub struct StreamingResponse<T> {
    headers: HeaderMap,
    decoder: Option<ResponseDecoder<T>>,
    deadline: Option<Pin<Box<tokio::time::Sleep>>>,
    finished_trailers: Option<HeaderMap>,
}

impl<T> StreamingResponse<T> {
    pub(crate) fn new(
        headers: HeaderMap,
        body: Incoming,
        codec: Codec,
        compression: Compression,
        max_receive_bytes: usize,
        deadline_at: Option<Instant>,
    ) -> Self {
        Self {
            headers,
            decoder: Some(FrameDecoder::new(
                BodyDataStream::new(body),
                codec,
                compression,
                max_receive_bytes,
            )),
            deadline: deadline_at.map(|at| {
                Box::pin(tokio::time::sleep_until(tokio::time::Instant::from_std(at)))
            }),
            finished_trailers: None,
        }
    }

    /// Response headers, available immediately.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trailing metadata from the end-of-stream block.
    ///
    /// Only readable after the stream has been fully consumed; asking
    /// earlier is an error.
    pub fn trailers(&self) -> Result<&HeaderMap, ConnectError> {
        if let Some(trailers) = &self.finished_trailers {
            return Ok(trailers);
        }
        match self.decoder.as_ref().and_then(|d| {
            if d.is_finished() { d.trailers() } else { None }
        }) {
            Some(trailers) => Ok(trailers),
            None => Err(ConnectError::internal(
                "trailers are not available until the stream has been fully consumed",
            )),
        }
    }

    /// Release the HTTP connection.
    ///
    /// Safe to call any number of times; iteration after closing reports
    /// the stream as ended.
    pub fn close(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            self.finished_trailers = decoder.trailers().cloned();
        }
        self.deadline = None;
    }
}

impl<T> Stream for StreamingResponse<T>
where
    T: Message + DeserializeOwned + Default + Unpin,
{
    type Item = Result<T, ConnectError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.decoder.is_none() {
            return Poll::Ready(None);
        }

        if let Some(deadline) = this.deadline.as_mut()
            && deadline.as_mut().poll(cx).is_ready()
        {
            this.close();
            return Poll::Ready(Some(Err(ConnectError::deadline_exceeded(
                "call deadline exceeded while reading the response stream",
            ))));
        }

        let Some(decoder) = this.decoder.as_mut() else {
            return Poll::Ready(None);
        };
        match Pin::new(decoder).poll_next(cx) {
            Poll::Ready(None) => {
                // Normal end: keep the trailers and release the connection.
                this.close();
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(err))) => {
                this.close();
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

impl<T> std::fmt::Debug for StreamingResponse<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("headers", &self.headers)
            .field("open", &self.decoder.is_some())
            .finish_non_exhaustive()
    }
}

/// Parse a failed unary response body into the error to surface.
///
/// A parseable Connect error body is passed through verbatim; anything else
/// is synthesized from the HTTP status with a snippet of the body.
pub(crate) fn parse_unary_error(
    status: http::StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) -> ConnectError {
    let mut err = match ConnectError::from_wire_json(body) {
        Some(err) => err,
        None => {
            let snippet = String::from_utf8_lossy(&body[..body.len().min(256)]);
            let code = connect_rpc_core::Code::from_http_status(status);
            if snippet.is_empty() {
                ConnectError::new(code, format!("HTTP {}", status.as_u16()))
            } else {
                ConnectError::new(code, format!("HTTP {}: {}", status.as_u16(), snippet))
            }
        }
    };
    err.set_metadata(headers.clone());
    err
}
