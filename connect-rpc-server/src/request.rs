//! Typed inbound requests and body decoding.
//!
//! Unary bodies are read whole, decompressed, and decoded. Streaming bodies
//! are parsed incrementally into a lazy message stream that ends at the
//! client's half-close: an explicit end-of-stream envelope, or clean EOF on
//! an envelope boundary.

use axum::body::Body;
use connect_rpc_core::{
    Codec, Compression, ConnectError, Deadline, EnvelopeDecoder, open_payload,
};
use futures::{Stream, StreamExt};
use http::HeaderMap;
use prost::Message;
use serde::de::DeserializeOwned;
use std::pin::Pin;

use crate::config::ServerConfig;
use crate::negotiate::Negotiated;

/// A decoded request as the handler sees it.
#[derive(Debug)]
pub struct RpcRequest<T> {
    /// The decoded message, or a [`MessageStream`] for inbound-streaming
    /// kinds.
    pub message: T,
    /// All request headers, verbatim.
    pub headers: HeaderMap,
    /// Trailing metadata the client sent as `trailer-`-prefixed headers,
    /// with the prefix stripped.
    pub trailers: HeaderMap,
    /// The call deadline derived from `Connect-Timeout-Ms`.
    pub deadline: Deadline,
}

impl<T> RpcRequest<T> {
    /// Build a bare request around a message, with no metadata and no
    /// deadline. Useful for exercising handlers directly.
    pub fn new(message: T) -> Self {
        Self {
            message,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            deadline: Deadline::unbounded(),
        }
    }
}

/// The lazy inbound message sequence of a client-streaming or bidi call.
pub struct MessageStream<T> {
    inner: Pin<Box<dyn Stream<Item = Result<T, ConnectError>> + Send>>,
}

impl<T> MessageStream<T> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, ConnectError>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Unwrap into the boxed stream.
    pub fn into_inner(self) -> Pin<Box<dyn Stream<Item = Result<T, ConnectError>> + Send>> {
        self.inner
    }
}

impl<T> Stream for MessageStream<T> {
    type Item = Result<T, ConnectError>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> std::fmt::Debug for MessageStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageStream")
    }
}

/// Read, decompress, and decode a unary request body.
pub(crate) async fn read_unary_message<T>(
    body: Body,
    negotiated: &Negotiated,
    config: &ServerConfig,
) -> Result<T, ConnectError>
where
    T: Message + DeserializeOwned + Default,
{
    let bytes = axum::body::to_bytes(body, config.max_receive_bytes)
        .await
        .map_err(|e| {
            ConnectError::resource_exhausted(format!("failed to read request body: {e}"))
        })?;

    let bytes = if negotiated.request_compression.is_identity() {
        bytes
    } else {
        negotiated.request_compression.decompress(&bytes)?
    };

    negotiated.codec.decode(&bytes)
}

/// Read the single enveloped message of a server-streaming request.
///
/// The body must hold exactly one message envelope: an end-of-stream frame
/// or a second envelope in the request is a protocol violation.
pub(crate) async fn read_single_enveloped_message<T>(
    body: Body,
    negotiated: &Negotiated,
    config: &ServerConfig,
) -> Result<T, ConnectError>
where
    T: Message + DeserializeOwned + Default,
{
    let bytes = axum::body::to_bytes(body, config.max_receive_bytes)
        .await
        .map_err(|e| {
            ConnectError::resource_exhausted(format!("failed to read request body: {e}"))
        })?;

    let mut decoder = EnvelopeDecoder::new(config.max_receive_bytes);
    decoder.push(&bytes);

    let Some(envelope) = decoder.next_envelope()? else {
        return Err(ConnectError::invalid_argument(
            "incomplete envelope: request body ended before a full frame",
        ));
    };
    if envelope.is_end_stream() {
        return Err(ConnectError::invalid_argument(
            "unexpected end-of-stream frame in request",
        ));
    }
    let payload = open_payload(envelope, negotiated.request_compression)?;

    if decoder.next_envelope()?.is_some() {
        return Err(ConnectError::invalid_argument(
            "unexpected additional envelope in request",
        ));
    }
    decoder.finish()?;

    negotiated.codec.decode(&payload)
}

/// Parse an enveloped request body into a lazy typed message stream.
///
/// The stream ends at the first end-of-stream envelope or at clean EOF
/// between envelopes. EOF inside an envelope surfaces `invalid_argument`;
/// a transport failure mid-body surfaces `canceled`, the disconnect notice
/// the handler observes at its next read.
pub(crate) fn inbound_message_stream<T>(
    body: Body,
    codec: Codec,
    compression: Compression,
    max_receive_bytes: usize,
) -> impl Stream<Item = Result<T, ConnectError>> + Send + 'static
where
    T: Message + DeserializeOwned + Default + Send + 'static,
{
    async_stream::stream! {
        let mut decoder = EnvelopeDecoder::new(max_receive_bytes);
        let mut data = body.into_data_stream();

        loop {
            loop {
                match decoder.next_envelope() {
                    Ok(Some(envelope)) => {
                        if envelope.is_end_stream() {
                            // Half-close; anything after it is ignored.
                            return;
                        }
                        let message = open_payload(envelope, compression)
                            .and_then(|payload| codec.decode::<T>(&payload));
                        match message {
                            Ok(message) => yield Ok(message),
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            match data.next().await {
                Some(Ok(chunk)) => decoder.push(&chunk),
                Some(Err(err)) => {
                    yield Err(ConnectError::canceled(format!("client disconnected: {err}")));
                    return;
                }
                None => {
                    if let Err(err) = decoder.finish() {
                        yield Err(err);
                    }
                    return;
                }
            }
        }
    }
}
