//! The RPC registry.
//!
//! An [`RpcRouter`] maps procedure paths (`/pkg.Service/Method`) to typed
//! handlers, one registration method per RPC kind, and builds the
//! `axum::Router` that serves them. Connect procedures are POST-only: any
//! other method on a registered path gets a bare `405` with `Allow: POST`,
//! and unknown paths get `not_found`.

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::response::Response;
use axum::routing::post_service;
use connect_rpc_core::ConnectError;
use http::{HeaderValue, Request, StatusCode, Uri, header};
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::ServerConfig;
use crate::handler::{
    serve_bidi_streaming, serve_client_streaming, serve_server_streaming, serve_unary,
};
use crate::request::{MessageStream, RpcRequest};
use crate::respond::unary_error;
use crate::response::{RpcResponse, StreamResponse};

/// The four RPC interaction shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

impl RpcKind {
    /// Whether this kind uses the enveloped `application/connect+*` wire
    /// shape.
    pub fn is_streaming(&self) -> bool {
        !matches!(self, RpcKind::Unary)
    }
}

/// Registry of Connect procedures, built into an `axum::Router`.
pub struct RpcRouter {
    router: axum::Router,
    config: Arc<ServerConfig>,
}

impl Default for RpcRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRouter {
    /// A registry with default [`ServerConfig`].
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// A registry with explicit configuration, shared by all routes.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            router: axum::Router::new(),
            config: Arc::new(config),
        }
    }

    /// Register a unary procedure.
    pub fn unary<I, O, F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        I: Message + DeserializeOwned + Default + Send + 'static,
        O: Message + Serialize + Send + 'static,
        F: Fn(RpcRequest<I>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<RpcResponse<O>, ConnectError>> + Send + 'static,
    {
        let config = self.config.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let handler = handler.clone();
            let config = config.clone();
            async move { Ok::<_, Infallible>(serve_unary(handler, config, request).await) }
        });
        self.router = self
            .router
            .route(path, post_service(service).fallback(method_not_allowed));
        self
    }

    /// Register a client-streaming procedure.
    pub fn client_streaming<I, O, F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        I: Message + DeserializeOwned + Default + Send + 'static,
        O: Message + Serialize + Send + 'static,
        F: Fn(RpcRequest<MessageStream<I>>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<RpcResponse<O>, ConnectError>> + Send + 'static,
    {
        let config = self.config.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let handler = handler.clone();
            let config = config.clone();
            async move {
                Ok::<_, Infallible>(serve_client_streaming(handler, config, request).await)
            }
        });
        self.router = self
            .router
            .route(path, post_service(service).fallback(method_not_allowed));
        self
    }

    /// Register a server-streaming procedure.
    pub fn server_streaming<I, O, F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        I: Message + DeserializeOwned + Default + Send + 'static,
        O: Message + Serialize + Send + 'static,
        F: Fn(RpcRequest<I>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamResponse<O>, ConnectError>> + Send + 'static,
    {
        let config = self.config.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let handler = handler.clone();
            let config = config.clone();
            async move {
                Ok::<_, Infallible>(serve_server_streaming(handler, config, request).await)
            }
        });
        self.router = self
            .router
            .route(path, post_service(service).fallback(method_not_allowed));
        self
    }

    /// Register a bidirectional-streaming procedure.
    pub fn bidi_streaming<I, O, F, Fut>(mut self, path: &str, handler: F) -> Self
    where
        I: Message + DeserializeOwned + Default + Send + 'static,
        O: Message + Serialize + Send + 'static,
        F: Fn(RpcRequest<MessageStream<I>>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamResponse<O>, ConnectError>> + Send + 'static,
    {
        let config = self.config.clone();
        let service = tower::service_fn(move |request: Request<Body>| {
            let handler = handler.clone();
            let config = config.clone();
            async move {
                Ok::<_, Infallible>(serve_bidi_streaming(handler, config, request).await)
            }
        });
        self.router = self
            .router
            .route(path, post_service(service).fallback(method_not_allowed));
        self
    }

    /// Finish registration and produce the router.
    pub fn into_router(self) -> axum::Router {
        self.router.fallback(unknown_path)
    }
}

impl From<RpcRouter> for axum::Router {
    fn from(router: RpcRouter) -> Self {
        router.into_router()
    }
}

async fn unknown_path(uri: Uri) -> Response {
    unary_error(&ConnectError::not_found(format!(
        "no procedure registered for path {}",
        uri.path()
    )))
}

/// Registered path, wrong method. Connect procedures are POST-only.
async fn method_not_allowed() -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static("POST"));
    response
}
