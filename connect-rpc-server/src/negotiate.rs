//! Header validation and negotiation.
//!
//! Every request passes through here before its body is touched. The result
//! is the validated negotiation record the rest of the call runs on: the
//! message codec, the compression for each direction, and the deadline.

use axum::response::Response;
use connect_rpc_core::{
    CONNECT_ACCEPT_ENCODING, CONNECT_CONTENT_ENCODING, CONNECT_TIMEOUT_MS, Codec, Compression,
    ConnectError, Deadline, negotiate_accept_encoding,
};
use http::{HeaderMap, header};

use crate::config::ServerConfig;
use crate::respond::{ACCEPT_POST_STREAMING, ACCEPT_POST_UNARY, unsupported_media_type};
use crate::router::RpcKind;

/// Header naming the Connect protocol revision.
pub(crate) const CONNECT_PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";

/// The protocol revision this engine speaks.
pub(crate) const CONNECT_PROTOCOL_VERSION: &str = "1";

/// The validated negotiation record for one call.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Negotiated {
    pub codec: Codec,
    pub request_compression: Compression,
    pub response_compression: Compression,
    pub deadline: Deadline,
}

/// A request turned away during validation.
///
/// `Bare` short-circuits with a raw HTTP response (415); `Connect` is a
/// protocol error still owed a Connect-shaped reply, whose wire form depends
/// on the RPC kind.
#[derive(Debug)]
pub(crate) enum Rejection {
    Bare(Response),
    Connect(ConnectError),
}

impl From<ConnectError> for Rejection {
    fn from(err: ConnectError) -> Self {
        Rejection::Connect(err)
    }
}

pub(crate) fn negotiate(
    headers: &HeaderMap,
    kind: RpcKind,
    config: &ServerConfig,
) -> Result<Negotiated, Rejection> {
    let codec = validate_content_type(headers, kind)?;
    validate_protocol_version(headers, config.require_protocol_version)?;

    let (request_compression, response_compression) = if kind.is_streaming() {
        (
            validate_compression(headers, CONNECT_CONTENT_ENCODING)?,
            negotiate_accept_encoding(header_str(headers, CONNECT_ACCEPT_ENCODING)),
        )
    } else {
        (
            validate_compression(headers, header::CONTENT_ENCODING.as_str())?,
            negotiate_accept_encoding(header_str(headers, header::ACCEPT_ENCODING.as_str())),
        )
    };

    let deadline = Deadline::from_timeout_header(header_str(headers, CONNECT_TIMEOUT_MS))?;

    Ok(Negotiated {
        codec,
        request_compression,
        response_compression,
        deadline,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Content-type rules per RPC kind.
///
/// Unary routes take `application/proto` or `application/json`; anything
/// else is a bare 415 advertising `Accept-Post`. Streaming routes take the
/// `application/connect+*` family: an unknown member of the family is
/// `unimplemented`, a type outside the family is a bare 415.
fn validate_content_type(headers: &HeaderMap, kind: RpcKind) -> Result<Codec, Rejection> {
    let content_type = header_str(headers, header::CONTENT_TYPE.as_str()).unwrap_or("");

    if kind.is_streaming() {
        if !content_type.starts_with("application/connect+") {
            return Err(Rejection::Bare(unsupported_media_type(ACCEPT_POST_STREAMING)));
        }
        if content_type.starts_with("application/connect+proto") {
            Ok(Codec::Proto)
        } else if content_type.starts_with("application/connect+json") {
            Ok(Codec::Json)
        } else {
            Err(ConnectError::unimplemented(format!(
                "{content_type} codec not implemented; only application/connect+proto and \
                 application/connect+json are supported"
            ))
            .into())
        }
    } else if content_type.starts_with("application/connect+") {
        Err(Rejection::Bare(unsupported_media_type(ACCEPT_POST_UNARY)))
    } else if content_type.starts_with("application/proto") {
        Ok(Codec::Proto)
    } else if content_type.starts_with("application/json") {
        Ok(Codec::Json)
    } else {
        Err(Rejection::Bare(unsupported_media_type(ACCEPT_POST_UNARY)))
    }
}

/// `Connect-Protocol-Version` must read "1" when present. Absence is
/// tolerated unless the engine is configured to insist.
fn validate_protocol_version(headers: &HeaderMap, require: bool) -> Result<(), ConnectError> {
    match header_str(headers, CONNECT_PROTOCOL_VERSION_HEADER) {
        Some(CONNECT_PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(ConnectError::invalid_argument(format!(
            "connect-protocol-version must be \"{CONNECT_PROTOCOL_VERSION}\": got \"{other}\""
        ))),
        None if require => Err(ConnectError::invalid_argument(format!(
            "missing required header: set {CONNECT_PROTOCOL_VERSION_HEADER} to \
             \"{CONNECT_PROTOCOL_VERSION}\""
        ))),
        None => Ok(()),
    }
}

fn validate_compression(headers: &HeaderMap, name: &str) -> Result<Compression, ConnectError> {
    let label = header_str(headers, name);
    Compression::from_label(label).ok_or_else(|| {
        ConnectError::unimplemented(format!(
            "{name} {} is not supported; supported encodings are {}",
            label.unwrap_or_default(),
            Compression::supported_labels()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use connect_rpc_core::Code;
    use http::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.append(
                http::HeaderName::try_from(*name).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn expect_connect_err(result: Result<Negotiated, Rejection>) -> ConnectError {
        match result {
            Err(Rejection::Connect(err)) => err,
            Err(Rejection::Bare(_)) => panic!("expected a Connect error, got a bare response"),
            Ok(_) => panic!("expected a rejection"),
        }
    }

    #[test]
    fn unary_accepts_both_codecs() {
        let config = ServerConfig::default();
        let n = negotiate(
            &headers(&[("content-type", "application/json")]),
            RpcKind::Unary,
            &config,
        )
        .unwrap();
        assert_eq!(n.codec, Codec::Json);

        let n = negotiate(
            &headers(&[("content-type", "application/proto")]),
            RpcKind::Unary,
            &config,
        )
        .unwrap();
        assert_eq!(n.codec, Codec::Proto);
    }

    #[test]
    fn unary_accepts_charset_parameter() {
        let n = negotiate(
            &headers(&[("content-type", "application/json; charset=utf-8")]),
            RpcKind::Unary,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.codec, Codec::Json);
    }

    #[test]
    fn unary_rejects_other_types_with_bare_415() {
        for bad in ["text/plain", "application/connect+proto", ""] {
            let result = negotiate(
                &headers(&[("content-type", bad)]),
                RpcKind::Unary,
                &ServerConfig::default(),
            );
            match result {
                Err(Rejection::Bare(response)) => {
                    assert_eq!(response.status(), http::StatusCode::UNSUPPORTED_MEDIA_TYPE);
                    assert_eq!(
                        response.headers().get("accept-post").unwrap(),
                        ACCEPT_POST_UNARY
                    );
                }
                _ => panic!("expected bare 415 for {bad:?}"),
            }
        }
    }

    #[test]
    fn streaming_accepts_connect_family() {
        let n = negotiate(
            &headers(&[("content-type", "application/connect+proto")]),
            RpcKind::ServerStreaming,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.codec, Codec::Proto);
    }

    #[test]
    fn streaming_unknown_family_member_is_unimplemented() {
        let err = expect_connect_err(negotiate(
            &headers(&[("content-type", "application/connect+flatbuffers")]),
            RpcKind::BidiStreaming,
            &ServerConfig::default(),
        ));
        assert_eq!(err.code(), Code::Unimplemented);
    }

    #[test]
    fn streaming_foreign_type_is_bare_415() {
        let result = negotiate(
            &headers(&[("content-type", "application/json")]),
            RpcKind::ClientStreaming,
            &ServerConfig::default(),
        );
        match result {
            Err(Rejection::Bare(response)) => {
                assert_eq!(
                    response.headers().get("accept-post").unwrap(),
                    ACCEPT_POST_STREAMING
                );
            }
            _ => panic!("expected bare 415"),
        }
    }

    #[test]
    fn protocol_version_tolerated_absent_validated_present() {
        let config = ServerConfig::default();
        assert!(negotiate(
            &headers(&[("content-type", "application/json")]),
            RpcKind::Unary,
            &config,
        )
        .is_ok());

        assert!(negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("connect-protocol-version", "1"),
            ]),
            RpcKind::Unary,
            &config,
        )
        .is_ok());

        let err = expect_connect_err(negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("connect-protocol-version", "2"),
            ]),
            RpcKind::Unary,
            &config,
        ));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn protocol_version_required_when_configured() {
        let config = ServerConfig::default().require_protocol_version(true);
        let err = expect_connect_err(negotiate(
            &headers(&[("content-type", "application/json")]),
            RpcKind::Unary,
            &config,
        ));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn unknown_compression_is_unimplemented() {
        let err = expect_connect_err(negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("content-encoding", "zstd"),
            ]),
            RpcKind::Unary,
            &ServerConfig::default(),
        ));
        assert_eq!(err.code(), Code::Unimplemented);
        assert!(err.message().unwrap().contains("gzip, identity"));
    }

    #[test]
    fn compression_header_is_per_kind() {
        // A streaming route ignores Content-Encoding and reads
        // Connect-Content-Encoding.
        let n = negotiate(
            &headers(&[
                ("content-type", "application/connect+json"),
                ("content-encoding", "zstd"),
            ]),
            RpcKind::ClientStreaming,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.request_compression, Compression::Identity);

        let n = negotiate(
            &headers(&[
                ("content-type", "application/connect+json"),
                ("connect-content-encoding", "gzip"),
            ]),
            RpcKind::ClientStreaming,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.request_compression, Compression::Gzip);
    }

    #[test]
    fn response_compression_follows_accept_headers() {
        let n = negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("accept-encoding", "gzip"),
            ]),
            RpcKind::Unary,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.response_compression, Compression::Gzip);

        let n = negotiate(
            &headers(&[
                ("content-type", "application/connect+json"),
                ("connect-accept-encoding", "gzip"),
            ]),
            RpcKind::ServerStreaming,
            &ServerConfig::default(),
        )
        .unwrap();
        assert_eq!(n.response_compression, Compression::Gzip);
    }

    #[test]
    fn bad_timeout_is_invalid_argument() {
        let err = expect_connect_err(negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("connect-timeout-ms", "soon"),
            ]),
            RpcKind::Unary,
            &ServerConfig::default(),
        ));
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[test]
    fn zero_timeout_arrives_expired() {
        let n = negotiate(
            &headers(&[
                ("content-type", "application/json"),
                ("connect-timeout-ms", "0"),
            ]),
            RpcKind::Unary,
            &ServerConfig::default(),
        )
        .unwrap();
        assert!(n.deadline.expired());
    }
}
