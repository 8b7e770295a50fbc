//! Message compression codecs and negotiation.
//!
//! Connect supports `identity` and `gzip`. Unary RPCs compress the whole
//! body (`Content-Encoding`); streaming RPCs compress each envelope payload
//! independently (`Connect-Content-Encoding`), so a fresh encoder or decoder
//! is used per message.

use std::io::{Read, Write};

use bytes::Bytes;
use flate2::Compression as GzipLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::ConnectError;

/// Header carrying per-envelope compression on streaming requests and
/// responses.
pub const CONNECT_CONTENT_ENCODING: &str = "connect-content-encoding";

/// Header advertising acceptable streaming response compression.
pub const CONNECT_ACCEPT_ENCODING: &str = "connect-accept-encoding";

/// A negotiated compression codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Identity,
    Gzip,
}

impl Compression {
    /// Resolve an encoding header value. A missing or empty header means
    /// identity; an unrecognized label returns `None` so the caller can
    /// reject it as unimplemented.
    pub fn from_label(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("") | Some("identity") => Some(Self::Identity),
            Some("gzip") => Some(Self::Gzip),
            _ => None,
        }
    }

    /// The label used in encoding headers.
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
        }
    }

    /// The supported labels, for `unimplemented` error messages.
    pub fn supported_labels() -> &'static str {
        "gzip, identity"
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Compress `data` if this codec is not identity and the payload meets
    /// the size threshold. Returns the bytes and whether compression was
    /// applied.
    pub fn maybe_compress(
        &self,
        data: Bytes,
        min_bytes: usize,
    ) -> Result<(Bytes, bool), ConnectError> {
        match self {
            Self::Identity => Ok((data, false)),
            Self::Gzip => {
                if data.len() < min_bytes {
                    return Ok((data, false));
                }
                let mut encoder = GzEncoder::new(Vec::new(), GzipLevel::default());
                encoder
                    .write_all(&data)
                    .and_then(|_| encoder.finish())
                    .map(|compressed| (Bytes::from(compressed), true))
                    .map_err(|e| ConnectError::internal(format!("gzip compression failed: {e}")))
            }
        }
    }

    /// Decompress `data`. Identity passes bytes through unchanged.
    ///
    /// Malformed compressed input is the peer's fault and maps to
    /// `invalid_argument`.
    pub fn decompress(&self, data: &[u8]) -> Result<Bytes, ConnectError> {
        match self {
            Self::Identity => Ok(Bytes::copy_from_slice(data)),
            Self::Gzip => {
                let mut decoder = GzDecoder::new(data);
                let mut decompressed = Vec::new();
                decoder
                    .read_to_end(&mut decompressed)
                    .map(|_| Bytes::from(decompressed))
                    .map_err(|e| {
                        ConnectError::invalid_argument(format!("failed to decompress gzip data: {e}"))
                    })
            }
        }
    }
}

/// Pick a response compression from an accept-encoding style header.
///
/// First supported token wins, honoring the client's preference order;
/// `q=0` disables a token per RFC 7231. An unusable header degrades to
/// identity rather than failing the call.
pub fn negotiate_accept_encoding(accept: Option<&str>) -> Compression {
    let Some(accept) = accept else {
        return Compression::Identity;
    };

    for token in accept.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }

        let (label, q_value) = match token.split_once(';') {
            Some((label, params)) => {
                let q = params.split(';').find_map(|p| p.trim().strip_prefix("q="));
                (label.trim(), q)
            }
            None => (token, None),
        };

        if let Some(q) = q_value
            && matches!(q.trim(), "0" | "0.0" | "0.00" | "0.000")
        {
            continue;
        }

        match label {
            "gzip" => return Compression::Gzip,
            "identity" => return Compression::Identity,
            _ => continue,
        }
    }

    Compression::Identity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::Code;

    #[test]
    fn label_resolution() {
        assert_eq!(Compression::from_label(None), Some(Compression::Identity));
        assert_eq!(Compression::from_label(Some("")), Some(Compression::Identity));
        assert_eq!(
            Compression::from_label(Some("identity")),
            Some(Compression::Identity)
        );
        assert_eq!(Compression::from_label(Some("gzip")), Some(Compression::Gzip));
        assert_eq!(Compression::from_label(Some("br")), None);
        assert_eq!(Compression::from_label(Some("zstd")), None);
    }

    #[test]
    fn gzip_round_trip() {
        let original = Bytes::from_static(b"a body large enough to shrink, repeated repeated repeated");
        let (compressed, was) = Compression::Gzip.maybe_compress(original.clone(), 0).unwrap();
        assert!(was);
        assert_ne!(compressed, original);
        assert_eq!(Compression::Gzip.decompress(&compressed).unwrap(), original);
    }

    #[test]
    fn identity_is_passthrough() {
        let original = Bytes::from_static(b"unchanged");
        let (out, was) = Compression::Identity.maybe_compress(original.clone(), 0).unwrap();
        assert!(!was);
        assert_eq!(out, original);
        assert_eq!(Compression::Identity.decompress(&original).unwrap(), original);
    }

    #[test]
    fn min_bytes_threshold_skips_small_payloads() {
        let small = Bytes::from_static(b"tiny");
        let (out, was) = Compression::Gzip.maybe_compress(small.clone(), 1024).unwrap();
        assert!(!was);
        assert_eq!(out, small);
    }

    #[test]
    fn invalid_gzip_input_is_invalid_argument() {
        let err = Compression::Gzip.decompress(b"definitely not gzip").unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn accept_encoding_negotiation() {
        assert_eq!(negotiate_accept_encoding(None), Compression::Identity);
        assert_eq!(negotiate_accept_encoding(Some("")), Compression::Identity);
        assert_eq!(negotiate_accept_encoding(Some("gzip")), Compression::Gzip);
        assert_eq!(
            negotiate_accept_encoding(Some("br, gzip, identity")),
            Compression::Gzip
        );
        assert_eq!(
            negotiate_accept_encoding(Some("identity, gzip")),
            Compression::Identity
        );
    }

    #[test]
    fn accept_encoding_q_zero_disables() {
        assert_eq!(negotiate_accept_encoding(Some("gzip;q=0")), Compression::Identity);
        assert_eq!(
            negotiate_accept_encoding(Some("gzip;q=0.0, identity")),
            Compression::Identity
        );
        assert_eq!(negotiate_accept_encoding(Some("gzip;q=0.5")), Compression::Gzip);
    }
}
