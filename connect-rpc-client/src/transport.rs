//! The hyper transport handle and its error mapping.

use bytes::Bytes;
use connect_rpc_core::ConnectError;
use http_body_util::combinators::UnsyncBoxBody;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;

/// Request body type used on the wire: either a buffered unary payload or a
/// lazy stream of envelope frames.
pub type RequestBody = UnsyncBoxBody<Bytes, ConnectError>;

/// The pooled hyper client every call runs on.
///
/// Clients share one of these per [`ConnectClient`]; pass your own through
/// [`ClientBuilder::http_client`](crate::ClientBuilder::http_client) to
/// share a pool across clients.
pub type HttpClient = Client<HttpConnector, RequestBody>;

/// Build the default pooled transport.
///
/// With `http2_prior_knowledge` the connection speaks HTTP/2 from the first
/// byte (h2c). Bidirectional calls need this: HTTP/1.1 cannot run both body
/// directions concurrently.
pub(crate) fn default_http_client(http2_prior_knowledge: bool) -> HttpClient {
    let mut builder = Client::builder(TokioExecutor::new());
    if http2_prior_knowledge {
        builder.http2_only(true);
    }
    builder.build_http()
}

/// Failures below the protocol layer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum TransportError {
    #[error("invalid request uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),
    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<TransportError> for ConnectError {
    fn from(err: TransportError) -> Self {
        match err {
            // A malformed URI is a caller bug, not a network condition.
            TransportError::Uri(_) => ConnectError::internal(err.to_string()),
            TransportError::Request(_) | TransportError::Body(_) => {
                ConnectError::unavailable(err.to_string())
            }
        }
    }
}
