//! Connect RPC server engine on top of [axum].
//!
//! Register typed handlers for the four RPC shapes on an [`RpcRouter`] and
//! turn it into an `axum::Router`:
//!
//! ```rust,ignore
//! use connect_rpc_server::{RpcRouter, RpcRequest, RpcResponse, ConnectError};
//!
//! async fn echo(req: RpcRequest<EchoRequest>) -> Result<RpcResponse<EchoResponse>, ConnectError> {
//!     Ok(RpcResponse::new(EchoResponse { text: req.message.text }))
//! }
//!
//! let app: axum::Router = RpcRouter::new()
//!     .unary("/echo.v1.EchoService/Echo", echo)
//!     .into_router();
//! ```
//!
//! The engine performs the Connect negotiation (content type, compression,
//! timeout, protocol version), decodes request bodies into typed messages,
//! and renders handler results into the wire shape the RPC kind demands:
//! plain bodies with `trailer-`-prefixed trailing metadata for unary calls,
//! enveloped frames terminated by an end-of-stream block for streaming
//! calls.

mod config;
mod handler;
mod negotiate;
mod request;
mod respond;
mod response;
mod router;

pub use config::ServerConfig;
pub use request::{MessageStream, RpcRequest};
pub use response::{RpcResponse, StreamResponse};
pub use router::{RpcKind, RpcRouter};

pub use connect_rpc_core::{
    Code, Codec, Compression, ConnectError, Deadline, EndStream, ErrorDetail,
};
