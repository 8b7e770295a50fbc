//! Message serialization: protobuf binary and canonical JSON.
//!
//! A [`Codec`] binds a serialization to its two content types, one for the
//! unary wire shape and one for the enveloped streaming shape. End-of-stream
//! blocks are always JSON regardless of the message codec.

use bytes::Bytes;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ConnectError;

/// Content type of unary error response bodies, independent of the request
/// codec.
pub const ERROR_CONTENT_TYPE: &str = "application/json";

/// The two message serializations Connect defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Codec {
    #[default]
    Proto,
    Json,
}

impl Codec {
    /// Content type for unary requests and responses.
    pub fn unary_content_type(&self) -> &'static str {
        match self {
            Self::Proto => "application/proto",
            Self::Json => "application/json",
        }
    }

    /// Content type for streaming requests and responses.
    pub fn streaming_content_type(&self) -> &'static str {
        match self {
            Self::Proto => "application/connect+proto",
            Self::Json => "application/connect+json",
        }
    }

    /// Serialize an outbound message.
    pub fn encode<T>(&self, message: &T) -> Result<Bytes, ConnectError>
    where
        T: Message + Serialize,
    {
        match self {
            Self::Proto => Ok(Bytes::from(message.encode_to_vec())),
            Self::Json => serde_json::to_vec(message).map(Bytes::from).map_err(|e| {
                ConnectError::internal(format!("failed to encode JSON message: {e}"))
            }),
        }
    }

    /// Deserialize an inbound message. An empty protobuf payload yields the
    /// default-initialized message.
    pub fn decode<T>(&self, bytes: &[u8]) -> Result<T, ConnectError>
    where
        T: Message + DeserializeOwned + Default,
    {
        match self {
            Self::Proto => T::decode(bytes).map_err(|e| {
                ConnectError::invalid_argument(format!("failed to decode protobuf message: {e}"))
            }),
            Self::Json => serde_json::from_slice(bytes).map_err(|e| {
                ConnectError::invalid_argument(format!("failed to decode JSON message: {e}"))
            }),
        }
    }
}
