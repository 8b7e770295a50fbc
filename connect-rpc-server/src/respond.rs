//! Rendering of error and bare HTTP responses.
//!
//! Failures take one of three wire shapes:
//!
//! - bare HTTP responses (415, 405) with no Connect body at all,
//! - unary errors: the mapped HTTP status with a JSON error body, plus the
//!   error's metadata as headers,
//! - streaming errors: HTTP 200 with a single end-of-stream frame carrying
//!   the error, since a streaming response never fails at the HTTP layer.

use axum::body::Body;
use axum::response::Response;
use connect_rpc_core::{ConnectError, EndStream, ERROR_CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode, header};

/// `Accept-Post` value advertised when a unary route rejects a content
/// type.
pub(crate) const ACCEPT_POST_UNARY: &str = "application/json, application/proto";

/// `Accept-Post` value advertised when a streaming route rejects a content
/// type.
pub(crate) const ACCEPT_POST_STREAMING: &str =
    "application/connect+json, application/connect+proto";

/// Bare `415 Unsupported Media Type`: the advertised accept list and an
/// empty body, no Connect error JSON.
pub(crate) fn unsupported_media_type(accept_post: &'static str) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::UNSUPPORTED_MEDIA_TYPE;
    response
        .headers_mut()
        .insert("accept-post", HeaderValue::from_static(accept_post));
    response
}

/// Unary error: mapped status, JSON body, error metadata as headers.
pub(crate) fn unary_error(err: &ConnectError) -> Response {
    let mut response = Response::new(Body::from(err.to_wire_json()));
    *response.status_mut() = err.code().http_status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ERROR_CONTENT_TYPE),
    );
    response
        .headers_mut()
        .extend(err.metadata().iter().map(|(k, v)| (k.clone(), v.clone())));
    response
}

/// Streaming error: status 200, one end-of-stream frame, nothing else.
///
/// The error's metadata rides in the block's `metadata` member as trailing
/// metadata.
pub(crate) fn streaming_error(content_type: &str, err: ConnectError) -> Response {
    let metadata = err.metadata().clone();
    let frame = EndStream::failure(err, metadata).to_frame();

    let mut response = Response::new(Body::from(frame));
    let content_type = HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/connect+json"));
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, content_type);
    response
}

/// The streaming content type to answer with when negotiation failed before
/// a codec was agreed: echo the request's `application/connect+*` type if it
/// had one, else default to JSON framing.
pub(crate) fn streaming_reply_content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|ct| ct.starts_with("application/connect+"))
        .unwrap_or("application/connect+json")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use connect_rpc_core::Code;

    #[test]
    fn bare_415_has_accept_post_and_empty_body() {
        let response = unsupported_media_type(ACCEPT_POST_UNARY);
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            response.headers().get("accept-post").unwrap(),
            ACCEPT_POST_UNARY
        );
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn unary_error_maps_status_and_content_type() {
        let err = ConnectError::invalid_argument("bad");
        let response = unary_error(&err);
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn unary_error_carries_metadata_headers() {
        let err = ConnectError::new(Code::Unauthenticated, "who are you")
            .with_metadata("www-authenticate", "Bearer")
            .with_metadata("trailer-x-request-id", "r1");
        let response = unary_error(&err);
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
        assert_eq!(response.headers().get("trailer-x-request-id").unwrap(), "r1");
    }

    #[test]
    fn streaming_error_is_status_200() {
        let response = streaming_error(
            "application/connect+proto",
            ConnectError::unimplemented("no such codec"),
        );
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/connect+proto"
        );
    }

    #[test]
    fn reply_content_type_echoes_connect_families_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/connect+proto".parse().unwrap());
        assert_eq!(streaming_reply_content_type(&headers), "application/connect+proto");

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(streaming_reply_content_type(&headers), "application/connect+json");

        assert_eq!(
            streaming_reply_content_type(&HeaderMap::new()),
            "application/connect+json"
        );
    }
}
