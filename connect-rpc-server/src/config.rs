//! Server configuration knobs.

use connect_rpc_core::DEFAULT_MAX_ENVELOPE_LEN;

/// Engine-wide settings, shared by every route registered on an
/// [`RpcRouter`](crate::RpcRouter).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Cap on inbound bodies and envelope payloads, in bytes.
    pub max_receive_bytes: usize,
    /// Smallest payload worth compressing when the client accepts a
    /// non-identity response encoding.
    pub compress_min_bytes: usize,
    /// Reject requests missing the `Connect-Protocol-Version` header.
    ///
    /// Off by default: conformance suites omit the header, and the protocol
    /// tolerates its absence.
    pub require_protocol_version: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_receive_bytes: DEFAULT_MAX_ENVELOPE_LEN,
            compress_min_bytes: 0,
            require_protocol_version: false,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound size cap.
    pub fn max_receive_bytes(mut self, bytes: usize) -> Self {
        self.max_receive_bytes = bytes;
        self
    }

    /// Set the response compression threshold.
    pub fn compress_min_bytes(mut self, bytes: usize) -> Self {
        self.compress_min_bytes = bytes;
        self
    }

    /// Require clients to send `Connect-Protocol-Version: 1`.
    pub fn require_protocol_version(mut self, require: bool) -> Self {
        self.require_protocol_version = require;
        self
    }
}
