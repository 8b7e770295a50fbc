//! Typed handler results and the wire writers for each response shape.

use axum::body::Body;
use axum::response::Response;
use bytes::{Bytes, BytesMut};
use connect_rpc_core::{
    CONNECT_CONTENT_ENCODING, Codec, Compression, ConnectError, EndStream,
    append_prefixed_trailers, encode_envelope, envelope_flags,
};
use futures::{Stream, StreamExt};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use prost::Message;
use serde::Serialize;
use std::pin::Pin;

use crate::config::ServerConfig;
use crate::negotiate::Negotiated;

/// A single-message handler result: the message plus response metadata.
#[derive(Debug)]
pub struct RpcResponse<T> {
    pub message: T,
    pub headers: HeaderMap,
    pub trailers: HeaderMap,
}

impl<T> RpcResponse<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }

    /// Append a response header, dropping entries that are not legal HTTP
    /// header material.
    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        append_entry(&mut self.headers, name.as_ref(), value.as_ref());
        self
    }

    /// Append a trailing-metadata entry.
    pub fn with_trailer<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        append_entry(&mut self.trailers, name.as_ref(), value.as_ref());
        self
    }
}

/// A streaming handler result: a lazy message sequence plus response
/// metadata. Trailers ride in the terminal end-of-stream block.
pub struct StreamResponse<T> {
    pub(crate) stream: Pin<Box<dyn Stream<Item = Result<T, ConnectError>> + Send>>,
    pub(crate) headers: HeaderMap,
    pub(crate) trailers: HeaderMap,
}

impl<T> StreamResponse<T> {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, ConnectError>> + Send + 'static,
    {
        Self {
            stream: Box::pin(stream),
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
        }
    }

    pub fn with_header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        append_entry(&mut self.headers, name.as_ref(), value.as_ref());
        self
    }

    pub fn with_trailer<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        append_entry(&mut self.trailers, name.as_ref(), value.as_ref());
        self
    }
}

impl<T> std::fmt::Debug for StreamResponse<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("headers", &self.headers)
            .field("trailers", &self.trailers)
            .finish_non_exhaustive()
    }
}

fn append_entry(map: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::try_from(name),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            map.append(name, value);
        }
        _ => {
            tracing::debug!(name, "invalid response metadata entry dropped");
        }
    }
}

/// Serialize, compress, and envelope one streamed message.
fn encode_stream_frame<T>(
    message: &T,
    codec: Codec,
    compression: Compression,
    min_bytes: usize,
) -> Result<Bytes, ConnectError>
where
    T: Message + Serialize,
{
    let payload = codec.encode(message)?;
    let (payload, compressed) = compression.maybe_compress(payload, min_bytes)?;
    let flags = if compressed {
        envelope_flags::COMPRESSED
    } else {
        0
    };
    Ok(encode_envelope(flags, &payload))
}

/// Write a unary response: status 200, plain body (whole-body compressed if
/// negotiated), handler headers, and trailers as `trailer-` headers.
pub(crate) fn write_unary_response<T>(
    response: RpcResponse<T>,
    negotiated: &Negotiated,
    config: &ServerConfig,
) -> Result<Response, ConnectError>
where
    T: Message + Serialize,
{
    let payload = negotiated.codec.encode(&response.message)?;
    let (payload, compressed) = negotiated
        .response_compression
        .maybe_compress(payload, config.compress_min_bytes)?;

    let mut http_response = Response::new(Body::from(payload));
    *http_response.status_mut() = StatusCode::OK;
    let headers = http_response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(negotiated.codec.unary_content_type()),
    );
    if compressed {
        headers.insert(
            header::CONTENT_ENCODING,
            HeaderValue::from_static(negotiated.response_compression.as_label()),
        );
    }
    headers.extend(response.headers.iter().map(|(k, v)| (k.clone(), v.clone())));
    append_prefixed_trailers(headers, &response.trailers);
    Ok(http_response)
}

/// Write a client-streaming response: the single message framed as an
/// envelope, followed by the end-of-stream block carrying the trailers.
pub(crate) fn write_single_message_stream_response<T>(
    response: RpcResponse<T>,
    negotiated: &Negotiated,
    config: &ServerConfig,
) -> Result<Response, ConnectError>
where
    T: Message + Serialize,
{
    let frame = encode_stream_frame(
        &response.message,
        negotiated.codec,
        negotiated.response_compression,
        config.compress_min_bytes,
    )?;
    let end = EndStream::success(response.trailers).to_frame();

    let mut body = BytesMut::with_capacity(frame.len() + end.len());
    body.extend_from_slice(&frame);
    body.extend_from_slice(&end);

    let mut http_response = Response::new(Body::from(body.freeze()));
    apply_stream_headers(&mut http_response, negotiated, &response.headers);
    Ok(http_response)
}

/// Write a streaming response: lazily enveloped messages, a deadline check
/// between each, and exactly one terminal end-of-stream frame.
///
/// The HTTP status is always 200; a handler failure after the response has
/// started can only be told through the end block.
pub(crate) fn write_stream_response<T>(
    response: StreamResponse<T>,
    negotiated: &Negotiated,
    config: &ServerConfig,
) -> Response
where
    T: Message + Serialize + Send + 'static,
{
    let StreamResponse {
        mut stream,
        headers,
        trailers,
    } = response;
    let codec = negotiated.codec;
    let compression = negotiated.response_compression;
    let min_bytes = config.compress_min_bytes;
    let deadline = negotiated.deadline;

    let body_stream = async_stream::stream! {
        let end = loop {
            let next = if let Some(at) = deadline.instant() {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(at), stream.next())
                    .await
                {
                    Ok(next) => next,
                    Err(_) => {
                        break EndStream::failure(
                            ConnectError::deadline_exceeded("call deadline exceeded"),
                            trailers,
                        );
                    }
                }
            } else {
                stream.next().await
            };

            match next {
                Some(Ok(message)) => {
                    match encode_stream_frame(&message, codec, compression, min_bytes) {
                        Ok(frame) => yield Ok::<_, std::convert::Infallible>(frame),
                        Err(err) => break EndStream::failure(err, trailers),
                    }
                }
                Some(Err(err)) => break EndStream::failure(err, trailers),
                None => break EndStream::success(trailers),
            }
        };
        yield Ok(end.to_frame());
    };

    let mut http_response = Response::new(Body::from_stream(body_stream));
    apply_stream_headers(&mut http_response, negotiated, &headers);
    http_response
}

fn apply_stream_headers(
    response: &mut Response,
    negotiated: &Negotiated,
    handler_headers: &HeaderMap,
) {
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(negotiated.codec.streaming_content_type()),
    );
    if !negotiated.response_compression.is_identity() {
        headers.insert(
            CONNECT_CONTENT_ENCODING,
            HeaderValue::from_static(negotiated.response_compression.as_label()),
        );
    }
    headers.extend(handler_headers.iter().map(|(k, v)| (k.clone(), v.clone())));
}
