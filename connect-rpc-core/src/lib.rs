//! Wire-level types for the Connect RPC protocol.
//!
//! This crate holds everything the server (`connect-rpc-server`) and client
//! (`connect-rpc-client`) engines share:
//!
//! - [`code`]: the closed set of error codes and their HTTP mapping
//! - [`error`]: [`ConnectError`] and its JSON wire form
//! - [`envelope`]: the 5-byte streaming frame and an incremental decoder
//! - [`codec`]: protobuf/JSON message serialization and content types
//! - [`compression`]: identity/gzip message compression and negotiation
//! - [`end_stream`]: the terminal frame carrying trailers and errors
//! - [`deadline`]: `Connect-Timeout-Ms` parsing and deadline arithmetic
//! - [`metadata`]: trailer-prefixed header handling

mod code;
mod codec;
mod compression;
mod deadline;
mod end_stream;
mod envelope;
mod error;
mod metadata;

pub use code::*;
pub use codec::*;
pub use compression::*;
pub use deadline::*;
pub use end_stream::*;
pub use envelope::*;
pub use error::*;
pub use metadata::*;
