//! The Connect client and its four call primitives.

use std::time::{Duration, Instant};

use bytes::Bytes;
use connect_rpc_core::{
    CONNECT_ACCEPT_ENCODING, CONNECT_CONTENT_ENCODING, CONNECT_TIMEOUT_MS, Codec, Compression,
    ConnectError, timeout_header_value, trailers_from_headers,
};
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, Request, StatusCode, header};
use http_body::Frame;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Incoming;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::Instrument;

use crate::frame::{encode_request_frames, encode_single_frame};
use crate::options::CallOptions;
use crate::response::{StreamingResponse, UnaryResponse, parse_unary_error};
use crate::transport::{HttpClient, RequestBody, TransportError};

const CONNECT_PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";
const CONNECT_PROTOCOL_VERSION: &str = "1";

/// A Connect RPC client bound to one base URL.
///
/// Cheap to clone; all clones share the same HTTP connection pool.
#[derive(Clone)]
pub struct ConnectClient {
    http: HttpClient,
    base_url: String,
    codec: Codec,
    request_compression: Compression,
    compress_min_bytes: usize,
    accept_gzip: bool,
    default_timeout: Option<Duration>,
    max_receive_bytes: usize,
}

impl ConnectClient {
    /// Start building a client. See [`ClientBuilder`](crate::ClientBuilder).
    pub fn builder<S: Into<String>>(base_url: S) -> crate::ClientBuilder {
        crate::ClientBuilder::new(base_url)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        http: HttpClient,
        base_url: String,
        codec: Codec,
        request_compression: Compression,
        compress_min_bytes: usize,
        accept_gzip: bool,
        default_timeout: Option<Duration>,
        max_receive_bytes: usize,
    ) -> Self {
        Self {
            http,
            base_url,
            codec,
            request_compression,
            compress_min_bytes,
            accept_gzip,
            default_timeout,
            max_receive_bytes,
        }
    }

    /// The configured base URL, without a trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The configured message codec.
    pub fn codec(&self) -> Codec {
        self.codec
    }
}

impl std::fmt::Debug for ConnectClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectClient")
            .field("base_url", &self.base_url)
            .field("codec", &self.codec)
            .field("request_compression", &self.request_compression)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectClient {
    fn request_uri(&self, procedure: &str) -> Result<http::Uri, ConnectError> {
        let path = procedure.trim_start_matches('/');
        format!("{}/{}", self.base_url, path)
            .parse::<http::Uri>()
            .map_err(|e| TransportError::Uri(e).into())
    }

    fn effective_timeout(&self, options: &CallOptions) -> Option<Duration> {
        options.timeout.or(self.default_timeout)
    }

    /// Common headers for one call; `streaming` selects the content-type
    /// family and the encoding header names.
    fn base_request(
        &self,
        procedure: &str,
        streaming: bool,
        compressed: bool,
        timeout: Option<Duration>,
        options: &CallOptions,
    ) -> Result<http::request::Builder, ConnectError> {
        let content_type = if streaming {
            self.codec.streaming_content_type()
        } else {
            self.codec.unary_content_type()
        };
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.request_uri(procedure)?)
            .header(header::CONTENT_TYPE, content_type)
            .header(CONNECT_PROTOCOL_VERSION_HEADER, CONNECT_PROTOCOL_VERSION);

        if compressed {
            let name = if streaming {
                CONNECT_CONTENT_ENCODING
            } else {
                header::CONTENT_ENCODING.as_str()
            };
            builder = builder.header(name, self.request_compression.as_label());
        }
        if self.accept_gzip {
            let name = if streaming {
                CONNECT_ACCEPT_ENCODING
            } else {
                header::ACCEPT_ENCODING.as_str()
            };
            builder = builder.header(name, Compression::Gzip.as_label());
        }
        if let Some(timeout) = timeout {
            builder = builder.header(CONNECT_TIMEOUT_MS, timeout_header_value(timeout));
        }
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        Ok(builder)
    }

    async fn send(
        &self,
        request: Request<RequestBody>,
    ) -> Result<http::Response<Incoming>, ConnectError> {
        self.http
            .request(request)
            .await
            .map_err(|e| TransportError::Request(e).into())
    }

    /// Call a unary procedure (`pkg.Service/Method`).
    pub async fn call_unary<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        self.call_unary_with_options(procedure, request, CallOptions::new())
            .await
    }

    /// [`call_unary`](Self::call_unary) with per-call headers and timeout.
    pub async fn call_unary_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let span = tracing::info_span!("rpc.call", rpc.method = %procedure, rpc.kind = "unary");
        let timeout = self.effective_timeout(&options);
        let fut = self.unary_inner(procedure, request, timeout, &options);
        with_deadline(timeout, fut).instrument(span).await
    }

    async fn unary_inner<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        timeout: Option<Duration>,
        options: &CallOptions,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default,
    {
        let payload = self.codec.encode(request)?;
        let (payload, compressed) = self
            .request_compression
            .maybe_compress(payload, self.compress_min_bytes)?;

        let request = self
            .base_request(procedure, false, compressed, timeout, options)?
            .body(full_body(payload))
            .map_err(|e| ConnectError::internal(format!("failed to build request: {e}")))?;

        let (parts, body) = self.send(request).await?.into_parts();

        if parts.status != StatusCode::OK {
            let bytes = collect_limited(body, self.max_receive_bytes).await?;
            return Err(parse_unary_error(parts.status, &parts.headers, &bytes));
        }

        let content_type = header_str(&parts.headers, header::CONTENT_TYPE.as_str());
        if !content_type.starts_with(self.codec.unary_content_type()) {
            return Err(ConnectError::internal(format!(
                "unexpected Content-Type in response: {content_type:?}"
            )));
        }

        let encoding = response_compression(&parts.headers, header::CONTENT_ENCODING.as_str())?;
        let bytes = collect_limited(body, self.max_receive_bytes).await?;
        let bytes = if encoding.is_identity() {
            bytes
        } else {
            encoding.decompress(&bytes)?
        };

        let message = self.codec.decode(&bytes)?;
        let trailers = trailers_from_headers(&parts.headers);
        Ok(UnaryResponse::new(message, parts.headers, trailers))
    }

    /// Call a server-streaming procedure: one request message, a lazy
    /// stream of responses.
    pub async fn call_server_streaming<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<StreamingResponse<Res>, ConnectError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        self.call_server_streaming_with_options(procedure, request, CallOptions::new())
            .await
    }

    /// [`call_server_streaming`](Self::call_server_streaming) with per-call
    /// headers and timeout.
    pub async fn call_server_streaming_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<StreamingResponse<Res>, ConnectError>
    where
        Req: Message + Serialize,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        let span =
            tracing::info_span!("rpc.call", rpc.method = %procedure, rpc.kind = "server_streaming");
        let timeout = self.effective_timeout(&options);
        let deadline_at = timeout.map(|d| Instant::now() + d);

        let frame = encode_single_frame(
            request,
            self.codec,
            self.request_compression,
            self.compress_min_bytes,
        )?;
        let compressed = !self.request_compression.is_identity();
        let request = self
            .base_request(procedure, true, compressed, timeout, &options)?
            .body(full_body(frame))
            .map_err(|e| ConnectError::internal(format!("failed to build request: {e}")))?;

        let fut = self.open_stream(request, deadline_at);
        with_deadline(timeout, fut).instrument(span).await
    }

    /// Call a client-streaming procedure: a lazy stream of requests, one
    /// response message.
    pub async fn call_client_streaming<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        self.call_client_streaming_with_options(procedure, requests, CallOptions::new())
            .await
    }

    /// [`call_client_streaming`](Self::call_client_streaming) with per-call
    /// headers and timeout.
    pub async fn call_client_streaming_with_options<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        let span =
            tracing::info_span!("rpc.call", rpc.method = %procedure, rpc.kind = "client_streaming");
        let timeout = self.effective_timeout(&options);
        let fut = self.client_streaming_inner(procedure, requests, timeout, &options);
        with_deadline(timeout, fut).instrument(span).await
    }

    async fn client_streaming_inner<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
        timeout: Option<Duration>,
        options: &CallOptions,
    ) -> Result<UnaryResponse<Res>, ConnectError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        let frames = encode_request_frames(
            requests,
            self.codec,
            self.request_compression,
            self.compress_min_bytes,
        );
        let compressed = !self.request_compression.is_identity();
        let request = self
            .base_request(procedure, true, compressed, timeout, options)?
            .body(stream_body(frames))
            .map_err(|e| ConnectError::internal(format!("failed to build request: {e}")))?;

        let mut stream = self.open_stream::<Res>(request, None).await?;
        let headers = stream.headers().clone();

        // Exactly one message, then the end-of-stream block.
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(err),
            None => {
                return Err(ConnectError::internal(
                    "protocol error: missing response message",
                ));
            }
        };
        match stream.next().await {
            None => {}
            Some(Err(err)) => return Err(err),
            Some(Ok(_)) => {
                return Err(ConnectError::internal(
                    "protocol error: unexpected extra response message",
                ));
            }
        }

        let trailers = stream.trailers()?.clone();
        Ok(UnaryResponse::new(message, headers, trailers))
    }

    /// Call a bidirectional-streaming procedure: both directions are lazy
    /// and independent.
    ///
    /// Full duplex needs an HTTP/2 transport
    /// ([`ClientBuilder::http2_prior_knowledge`](crate::ClientBuilder::http2_prior_knowledge));
    /// over HTTP/1.1 the exchange degrades to half duplex.
    pub async fn call_bidi_streaming<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
    ) -> Result<StreamingResponse<Res>, ConnectError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        self.call_bidi_streaming_with_options(procedure, requests, CallOptions::new())
            .await
    }

    /// [`call_bidi_streaming`](Self::call_bidi_streaming) with per-call
    /// headers and timeout.
    pub async fn call_bidi_streaming_with_options<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<StreamingResponse<Res>, ConnectError>
    where
        S: Stream<Item = Req> + Send + 'static,
        Req: Message + Serialize + Send + 'static,
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        let span =
            tracing::info_span!("rpc.call", rpc.method = %procedure, rpc.kind = "bidi_streaming");
        let timeout = self.effective_timeout(&options);
        let deadline_at = timeout.map(|d| Instant::now() + d);

        let frames = encode_request_frames(
            requests,
            self.codec,
            self.request_compression,
            self.compress_min_bytes,
        );
        let compressed = !self.request_compression.is_identity();
        let request = self
            .base_request(procedure, true, compressed, timeout, &options)?
            .body(stream_body(frames))
            .map_err(|e| ConnectError::internal(format!("failed to build request: {e}")))?;

        let fut = self.open_stream(request, deadline_at);
        with_deadline(timeout, fut).instrument(span).await
    }

    /// Send a streaming request and validate the response head.
    async fn open_stream<Res>(
        &self,
        request: Request<RequestBody>,
        deadline_at: Option<Instant>,
    ) -> Result<StreamingResponse<Res>, ConnectError>
    where
        Res: Message + DeserializeOwned + Default + Unpin,
    {
        let (parts, body) = self.send(request).await?.into_parts();

        if parts.status != StatusCode::OK {
            let bytes = collect_limited(body, self.max_receive_bytes).await?;
            return Err(parse_unary_error(parts.status, &parts.headers, &bytes));
        }

        let content_type = header_str(&parts.headers, header::CONTENT_TYPE.as_str());
        if !content_type.starts_with(self.codec.streaming_content_type()) {
            return Err(ConnectError::internal(format!(
                "unexpected Content-Type in response: {content_type:?}"
            )));
        }

        let compression = response_compression(&parts.headers, CONNECT_CONTENT_ENCODING)?;
        Ok(StreamingResponse::new(
            parts.headers,
            body,
            self.codec,
            compression,
            self.max_receive_bytes,
            deadline_at,
        ))
    }
}

/// Enforce the call timeout locally, alongside the `Connect-Timeout-Ms`
/// header the server enforces on its side.
async fn with_deadline<T>(
    timeout: Option<Duration>,
    fut: impl Future<Output = Result<T, ConnectError>>,
) -> Result<T, ConnectError> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::deadline_exceeded("call deadline exceeded")),
        },
        None => fut.await,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

fn response_compression(headers: &HeaderMap, name: &str) -> Result<Compression, ConnectError> {
    let label = headers.get(name).and_then(|v| v.to_str().ok());
    Compression::from_label(label).ok_or_else(|| {
        ConnectError::internal(format!(
            "unsupported response encoding {:?}",
            label.unwrap_or_default()
        ))
    })
}

fn full_body(payload: Bytes) -> RequestBody {
    Full::new(payload)
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn stream_body<S>(frames: S) -> RequestBody
where
    S: Stream<Item = Result<Frame<Bytes>, ConnectError>> + Send + 'static,
{
    StreamBody::new(frames).boxed_unsync()
}

async fn collect_limited(body: Incoming, limit: usize) -> Result<Bytes, ConnectError> {
    match http_body_util::Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => {
            if err.is::<http_body_util::LengthLimitError>() {
                Err(ConnectError::resource_exhausted(format!(
                    "response body exceeds {limit} byte limit"
                )))
            } else {
                Err(TransportError::Body(err.to_string()).into())
            }
        }
    }
}
