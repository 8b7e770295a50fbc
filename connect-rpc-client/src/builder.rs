//! Client construction.

use std::time::Duration;

use connect_rpc_core::{Codec, Compression, DEFAULT_MAX_ENVELOPE_LEN};

use crate::call::ConnectClient;
use crate::transport::{HttpClient, default_http_client};

/// Builder for [`ConnectClient`].
///
/// Defaults: protobuf codec, no request compression, gzip accepted on
/// responses, no timeout, 64 MiB receive cap, HTTP/1.1 transport with a
/// private connection pool.
pub struct ClientBuilder {
    base_url: String,
    codec: Codec,
    request_compression: Compression,
    compress_min_bytes: usize,
    accept_gzip: bool,
    default_timeout: Option<Duration>,
    max_receive_bytes: usize,
    http2_prior_knowledge: bool,
    http: Option<HttpClient>,
}

impl ClientBuilder {
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            codec: Codec::Proto,
            request_compression: Compression::Identity,
            compress_min_bytes: 0,
            accept_gzip: true,
            default_timeout: None,
            max_receive_bytes: DEFAULT_MAX_ENVELOPE_LEN,
            http2_prior_knowledge: false,
            http: None,
        }
    }

    /// Encode messages as protobuf binary (the default).
    pub fn use_proto(mut self) -> Self {
        self.codec = Codec::Proto;
        self
    }

    /// Encode messages as canonical JSON.
    pub fn use_json(mut self) -> Self {
        self.codec = Codec::Json;
        self
    }

    /// Compress request bodies (whole-body for unary, per-envelope for
    /// streaming).
    pub fn request_compression(mut self, compression: Compression) -> Self {
        self.request_compression = compression;
        self
    }

    /// Smallest payload worth compressing.
    pub fn compress_min_bytes(mut self, bytes: usize) -> Self {
        self.compress_min_bytes = bytes;
        self
    }

    /// Whether to advertise gzip for response bodies. On by default.
    pub fn accept_gzip(mut self, accept: bool) -> Self {
        self.accept_gzip = accept;
        self
    }

    /// Default timeout applied to every call unless overridden per call.
    /// Sent to the server as `Connect-Timeout-Ms` and enforced locally.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Cap on response bodies and envelope payloads.
    pub fn max_receive_bytes(mut self, bytes: usize) -> Self {
        self.max_receive_bytes = bytes;
        self
    }

    /// Speak HTTP/2 from the first byte (h2c prior knowledge).
    ///
    /// Required for full-duplex bidirectional calls; HTTP/1.1 cannot run
    /// both body directions concurrently.
    pub fn http2_prior_knowledge(mut self) -> Self {
        self.http2_prior_knowledge = true;
        self
    }

    /// Share an existing transport instead of creating a private pool.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn build(self) -> ConnectClient {
        let http = self
            .http
            .unwrap_or_else(|| default_http_client(self.http2_prior_knowledge));
        ConnectClient::new(
            http,
            self.base_url,
            self.codec,
            self.request_compression,
            self.compress_min_bytes,
            self.accept_gzip,
            self.default_timeout,
            self.max_receive_bytes,
        )
    }
}
