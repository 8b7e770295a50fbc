//! Per-request dispatch for the four RPC kinds.
//!
//! Each function here is one arm of the request state machine: validate
//! headers, build the typed input, run the handler under the deadline, and
//! write the response in the wire shape the kind demands. Failures exit
//! early in whatever shape the call has already committed to.

use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use connect_rpc_core::{ConnectError, Deadline, trailers_from_headers};
use http::Request;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ServerConfig;
use crate::negotiate::{Rejection, negotiate};
use crate::request::{
    MessageStream, RpcRequest, inbound_message_stream, read_single_enveloped_message,
    read_unary_message,
};
use crate::respond::{streaming_error, streaming_reply_content_type, unary_error};
use crate::response::{
    RpcResponse, StreamResponse, write_single_message_stream_response, write_stream_response,
    write_unary_response,
};
use crate::router::RpcKind;

/// Run a handler future, converting deadline expiry into
/// `deadline_exceeded`.
async fn run_with_deadline<T, F>(deadline: Deadline, fut: F) -> Result<T, ConnectError>
where
    F: Future<Output = Result<T, ConnectError>>,
{
    match deadline.instant() {
        Some(at) => {
            match tokio::time::timeout_at(tokio::time::Instant::from_std(at), fut).await {
                Ok(result) => result,
                Err(_) => Err(ConnectError::deadline_exceeded("call deadline exceeded")),
            }
        }
        None => fut.await,
    }
}

fn expired_deadline_error() -> ConnectError {
    ConnectError::deadline_exceeded("deadline expired before the call was dispatched")
}

pub(crate) async fn serve_unary<I, O, F, Fut>(
    handler: F,
    config: Arc<ServerConfig>,
    request: Request<Body>,
) -> Response
where
    I: Message + DeserializeOwned + Default + Send + 'static,
    O: Message + Serialize + Send + 'static,
    F: Fn(RpcRequest<I>) -> Fut,
    Fut: Future<Output = Result<RpcResponse<O>, ConnectError>> + Send,
{
    let (parts, body) = request.into_parts();

    let negotiated = match negotiate(&parts.headers, RpcKind::Unary, &config) {
        Ok(negotiated) => negotiated,
        Err(Rejection::Bare(response)) => return response,
        Err(Rejection::Connect(err)) => return unary_error(&err),
    };
    if negotiated.deadline.expired() {
        return unary_error(&expired_deadline_error());
    }

    let message = match read_unary_message::<I>(body, &negotiated, &config).await {
        Ok(message) => message,
        Err(err) => return unary_error(&err),
    };

    let rpc_request = RpcRequest {
        message,
        trailers: trailers_from_headers(&parts.headers),
        headers: parts.headers,
        deadline: negotiated.deadline,
    };

    match run_with_deadline(negotiated.deadline, handler(rpc_request)).await {
        Ok(response) => write_unary_response(response, &negotiated, &config)
            .unwrap_or_else(|err| unary_error(&err)),
        Err(err) => unary_error(&err),
    }
}

pub(crate) async fn serve_server_streaming<I, O, F, Fut>(
    handler: F,
    config: Arc<ServerConfig>,
    request: Request<Body>,
) -> Response
where
    I: Message + DeserializeOwned + Default + Send + 'static,
    O: Message + Serialize + Send + 'static,
    F: Fn(RpcRequest<I>) -> Fut,
    Fut: Future<Output = Result<StreamResponse<O>, ConnectError>> + Send,
{
    let (parts, body) = request.into_parts();

    let negotiated = match negotiate(&parts.headers, RpcKind::ServerStreaming, &config) {
        Ok(negotiated) => negotiated,
        Err(rejection) => return reject_streaming(&parts.headers, rejection),
    };
    let content_type = negotiated.codec.streaming_content_type();
    if negotiated.deadline.expired() {
        return streaming_error(content_type, expired_deadline_error());
    }

    let message = match read_single_enveloped_message::<I>(body, &negotiated, &config).await {
        Ok(message) => message,
        Err(err) => return streaming_error(content_type, err),
    };

    let rpc_request = RpcRequest {
        message,
        trailers: trailers_from_headers(&parts.headers),
        headers: parts.headers,
        deadline: negotiated.deadline,
    };

    match run_with_deadline(negotiated.deadline, handler(rpc_request)).await {
        Ok(response) => write_stream_response(response, &negotiated, &config),
        Err(err) => streaming_error(content_type, err),
    }
}

pub(crate) async fn serve_client_streaming<I, O, F, Fut>(
    handler: F,
    config: Arc<ServerConfig>,
    request: Request<Body>,
) -> Response
where
    I: Message + DeserializeOwned + Default + Send + 'static,
    O: Message + Serialize + Send + 'static,
    F: Fn(RpcRequest<MessageStream<I>>) -> Fut,
    Fut: Future<Output = Result<RpcResponse<O>, ConnectError>> + Send,
{
    let (parts, body) = request.into_parts();

    let negotiated = match negotiate(&parts.headers, RpcKind::ClientStreaming, &config) {
        Ok(negotiated) => negotiated,
        Err(rejection) => return reject_streaming(&parts.headers, rejection),
    };
    let content_type = negotiated.codec.streaming_content_type();
    if negotiated.deadline.expired() {
        return streaming_error(content_type, expired_deadline_error());
    }

    let stream = inbound_message_stream::<I>(
        body,
        negotiated.codec,
        negotiated.request_compression,
        config.max_receive_bytes,
    );
    let rpc_request = RpcRequest {
        message: MessageStream::new(stream),
        trailers: trailers_from_headers(&parts.headers),
        headers: parts.headers,
        deadline: negotiated.deadline,
    };

    match run_with_deadline(negotiated.deadline, handler(rpc_request)).await {
        Ok(response) => write_single_message_stream_response(response, &negotiated, &config)
            .unwrap_or_else(|err| streaming_error(content_type, err)),
        Err(err) => streaming_error(content_type, err),
    }
}

pub(crate) async fn serve_bidi_streaming<I, O, F, Fut>(
    handler: F,
    config: Arc<ServerConfig>,
    request: Request<Body>,
) -> Response
where
    I: Message + DeserializeOwned + Default + Send + 'static,
    O: Message + Serialize + Send + 'static,
    F: Fn(RpcRequest<MessageStream<I>>) -> Fut,
    Fut: Future<Output = Result<StreamResponse<O>, ConnectError>> + Send,
{
    let (parts, body) = request.into_parts();

    let negotiated = match negotiate(&parts.headers, RpcKind::BidiStreaming, &config) {
        Ok(negotiated) => negotiated,
        Err(rejection) => return reject_streaming(&parts.headers, rejection),
    };
    let content_type = negotiated.codec.streaming_content_type();
    if negotiated.deadline.expired() {
        return streaming_error(content_type, expired_deadline_error());
    }

    let stream = inbound_message_stream::<I>(
        body,
        negotiated.codec,
        negotiated.request_compression,
        config.max_receive_bytes,
    );
    let rpc_request = RpcRequest {
        message: MessageStream::new(stream),
        trailers: trailers_from_headers(&parts.headers),
        headers: parts.headers,
        deadline: negotiated.deadline,
    };

    // The handler only assembles its response stream here; the deadline
    // keeps being enforced between frames as the stream is written.
    match run_with_deadline(negotiated.deadline, handler(rpc_request)).await {
        Ok(response) => write_stream_response(response, &negotiated, &config),
        Err(err) => streaming_error(content_type, err),
    }
}

fn reject_streaming(headers: &http::HeaderMap, rejection: Rejection) -> Response {
    match rejection {
        Rejection::Bare(response) => response,
        Rejection::Connect(err) => {
            streaming_error(&streaming_reply_content_type(headers), err)
        }
    }
}
