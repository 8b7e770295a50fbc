//! Connect RPC client engine on top of [hyper].
//!
//! A [`ConnectClient`] exposes the four call primitives of the protocol:
//!
//! ```rust,ignore
//! use connect_rpc_client::ConnectClient;
//!
//! let client = ConnectClient::builder("http://localhost:3000").build();
//!
//! let reply = client
//!     .call_unary::<EchoRequest, EchoResponse>("echo.v1.EchoService/Echo", &request)
//!     .await?;
//! println!("{}", reply.message().text);
//! ```
//!
//! Streaming calls return a [`StreamingResponse`], a lazy message stream
//! that surfaces the server's terminal error (if any) as its last item and
//! exposes trailing metadata once the stream has been consumed. Request
//! streams are pulled on demand while the response is being read, so
//! full-duplex bidi calls work when the transport is HTTP/2
//! ([`ClientBuilder::http2_prior_knowledge`]).

mod builder;
mod call;
mod frame;
mod options;
mod response;
mod transport;

pub use builder::ClientBuilder;
pub use call::ConnectClient;
pub use options::CallOptions;
pub use response::{StreamingResponse, UnaryResponse};
pub use transport::{HttpClient, RequestBody};

pub use connect_rpc_core::{Code, Codec, Compression, ConnectError, ErrorDetail};
