//! Unary wire-shape tests driven through the router with tower's oneshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::body::Body;
use bytes::Bytes;
use connect_rpc_core::Compression;
use connect_rpc_server::{Code, ConnectError, RpcRequest, RpcResponse, RpcRouter, ServerConfig};
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use tower::ServiceExt;

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct EchoRequest {
    #[prost(string, tag = "1")]
    #[serde(default)]
    text: String,
}

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
struct EchoResponse {
    #[prost(string, tag = "1")]
    #[serde(default)]
    text: String,
}

async fn echo(req: RpcRequest<EchoRequest>) -> Result<RpcResponse<EchoResponse>, ConnectError> {
    Ok(RpcResponse::new(EchoResponse {
        text: req.message.text,
    }))
}

fn echo_router() -> axum::Router {
    RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", echo)
        .into_router()
}

fn json_request(path: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header("connect-protocol-version", "1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_body(response: axum::response::Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

#[tokio::test]
async fn unary_success_json() {
    let response = echo_router()
        .oneshot(json_request("/echo.v1.EchoService/Echo", r#"{"text":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    assert_eq!(&read_body(response).await[..], br#"{"text":"hi"}"#);
}

#[tokio::test]
async fn unary_success_proto() {
    use prost::Message;
    let payload = EchoRequest {
        text: "proto".to_string(),
    }
    .encode_to_vec();
    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "application/proto")
        .body(Body::from(payload))
        .unwrap();

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/proto"
    );
    let body = read_body(response).await;
    let decoded = EchoResponse::decode(&body[..]).unwrap();
    assert_eq!(decoded.text, "proto");
}

#[tokio::test]
async fn unary_error_maps_http_status() {
    async fn fail(_req: RpcRequest<EchoRequest>) -> Result<RpcResponse<EchoResponse>, ConnectError> {
        Err(ConnectError::invalid_argument("bad"))
    }
    let router = RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", fail)
        .into_router();

    let response = router
        .oneshot(json_request("/echo.v1.EchoService/Echo", r#"{"text":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(
        body,
        serde_json::json!({"code": "invalid_argument", "message": "bad"})
    );
}

#[tokio::test]
async fn unsupported_media_type_is_bare_415() {
    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("hello"))
        .unwrap();

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(
        response.headers().get("accept-post").unwrap(),
        "application/json, application/proto"
    );
    assert!(read_body(response).await.is_empty());
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let response = echo_router()
        .oneshot(json_request("/echo.v1.EchoService/Nope", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn non_post_method_is_405_with_allow() {
    let request = Request::builder()
        .method("GET")
        .uri("/echo.v1.EchoService/Echo")
        .body(Body::empty())
        .unwrap();

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = response.headers().get(header::ALLOW).unwrap().to_str().unwrap();
    assert!(allow.contains("POST"), "Allow header was {allow:?}");
}

#[tokio::test]
async fn wrong_protocol_version_rejected() {
    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert("connect-protocol-version", "2".parse().unwrap());

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "invalid_argument");
}

#[tokio::test]
async fn missing_protocol_version_tolerated_by_default() {
    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"text":"x"}"#))
        .unwrap();
    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_protocol_version_rejected_when_required() {
    let router = RpcRouter::with_config(ServerConfig::default().require_protocol_version(true))
        .unary("/echo.v1.EchoService/Echo", echo)
        .into_router();
    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_compression_is_unimplemented() {
    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert(header::CONTENT_ENCODING, "zstd".parse().unwrap());

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "unimplemented");
    assert!(body["message"].as_str().unwrap().contains("gzip, identity"));
}

#[tokio::test]
async fn gzip_request_and_response_round_trip() {
    let (zipped, was) = Compression::Gzip
        .maybe_compress(Bytes::from_static(br#"{"text":"zipped up text"}"#), 0)
        .unwrap();
    assert!(was);

    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(header::ACCEPT_ENCODING, "gzip")
        .body(Body::from(zipped))
        .unwrap();

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_ENCODING).unwrap(),
        "gzip"
    );
    let body = read_body(response).await;
    let plain = Compression::Gzip.decompress(&body).unwrap();
    assert_eq!(&plain[..], br#"{"text":"zipped up text"}"#);
}

#[tokio::test]
async fn handler_metadata_round_trips_headers_and_trailers() {
    async fn meta(req: RpcRequest<EchoRequest>) -> Result<RpcResponse<EchoResponse>, ConnectError> {
        // Inbound trailer-prefixed headers arrive with the prefix stripped.
        let seen = req
            .trailers
            .get("x-inbound")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("missing")
            .to_string();
        Ok(RpcResponse::new(EchoResponse { text: seen })
            .with_header("x-region", "eu")
            .with_trailer("x-request-id", "r-42"))
    }
    let router = RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", meta)
        .into_router();

    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert("trailer-x-inbound", "present".parse().unwrap());

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-region").unwrap(), "eu");
    assert_eq!(response.headers().get("trailer-x-request-id").unwrap(), "r-42");
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["text"], "present");
}

#[tokio::test]
async fn error_metadata_lands_on_the_response() {
    async fn fail(_req: RpcRequest<EchoRequest>) -> Result<RpcResponse<EchoResponse>, ConnectError> {
        Err(ConnectError::unauthenticated("login first")
            .with_metadata("www-authenticate", "Bearer")
            .with_metadata("trailer-x-hint", "token"))
    }
    let router = RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", fail)
        .into_router();

    let response = router
        .oneshot(json_request("/echo.v1.EchoService/Echo", "{}"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers().get("www-authenticate").unwrap(), "Bearer");
    assert_eq!(response.headers().get("trailer-x-hint").unwrap(), "token");
}

#[tokio::test]
async fn zero_timeout_expires_before_dispatch() {
    let dispatched = Arc::new(AtomicBool::new(false));
    let flag = dispatched.clone();
    let handler = move |_req: RpcRequest<EchoRequest>| {
        let flag = flag.clone();
        async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ConnectError>(RpcResponse::new(EchoResponse::default()))
        }
    };
    let router = RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", handler)
        .into_router();

    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert("connect-timeout-ms", "0".parse().unwrap());

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "deadline_exceeded");
    assert!(!dispatched.load(Ordering::SeqCst), "handler must not run");
}

#[tokio::test]
async fn malformed_timeout_rejected() {
    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert("connect-timeout-ms", "soon".parse().unwrap());

    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "invalid_argument");
}

#[tokio::test]
async fn slow_handler_hits_deadline() {
    async fn sleepy(
        _req: RpcRequest<EchoRequest>,
    ) -> Result<RpcResponse<EchoResponse>, ConnectError> {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        Ok(RpcResponse::new(EchoResponse::default()))
    }
    let router = RpcRouter::new()
        .unary("/echo.v1.EchoService/Echo", sleepy)
        .into_router();

    let mut request = json_request("/echo.v1.EchoService/Echo", "{}");
    request
        .headers_mut()
        .insert("connect-timeout-ms", "50".parse().unwrap());

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
    assert_eq!(body["code"], "deadline_exceeded");
}

#[tokio::test]
async fn empty_body_decodes_default_message() {
    let request = Request::builder()
        .method("POST")
        .uri("/echo.v1.EchoService/Echo")
        .header(header::CONTENT_TYPE, "application/proto")
        .body(Body::empty())
        .unwrap();
    let response = echo_router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    // Default message echoes back as the default (empty) response.
    assert!(read_body(response).await.is_empty());
}

#[tokio::test]
async fn every_code_maps_to_its_status() {
    let table = [
        (Code::Canceled, StatusCode::REQUEST_TIMEOUT),
        (Code::Unknown, StatusCode::INTERNAL_SERVER_ERROR),
        (Code::InvalidArgument, StatusCode::BAD_REQUEST),
        (Code::DeadlineExceeded, StatusCode::REQUEST_TIMEOUT),
        (Code::NotFound, StatusCode::NOT_FOUND),
        (Code::AlreadyExists, StatusCode::CONFLICT),
        (Code::PermissionDenied, StatusCode::FORBIDDEN),
        (Code::ResourceExhausted, StatusCode::TOO_MANY_REQUESTS),
        (Code::FailedPrecondition, StatusCode::PRECONDITION_FAILED),
        (Code::Aborted, StatusCode::CONFLICT),
        (Code::OutOfRange, StatusCode::BAD_REQUEST),
        (Code::Unimplemented, StatusCode::NOT_IMPLEMENTED),
        (Code::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        (Code::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
        (Code::DataLoss, StatusCode::INTERNAL_SERVER_ERROR),
        (Code::Unauthenticated, StatusCode::UNAUTHORIZED),
    ];

    for (code, status) in table {
        let handler = move |_req: RpcRequest<EchoRequest>| async move {
            Err::<RpcResponse<EchoResponse>, _>(ConnectError::new(code, "mapped"))
        };
        let router = RpcRouter::new()
            .unary("/echo.v1.EchoService/Echo", handler)
            .into_router();
        let response = router
            .oneshot(json_request("/echo.v1.EchoService/Echo", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), status, "code {code:?}");
        let body: serde_json::Value = serde_json::from_slice(&read_body(response).await).unwrap();
        assert_eq!(body["code"], code.as_wire(), "code {code:?}");
    }
}
