//! The end-of-stream block terminating every streaming response.
//!
//! The final envelope of a streaming response has flag `0x02` and carries a
//! JSON object with an optional `error` and optional `metadata` (the
//! trailers). It is always JSON, whatever the message codec, and this
//! implementation always writes it uncompressed.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::envelope::{encode_envelope, envelope_flags};
use crate::error::{ConnectError, WireError};
use crate::metadata::{metadata_from_json, metadata_to_json};

/// The contents of the terminal frame: an error (absent on success) and the
/// trailing metadata.
#[derive(Debug, Default)]
pub struct EndStream {
    pub error: Option<ConnectError>,
    pub metadata: http::HeaderMap,
}

#[derive(Serialize, Deserialize)]
struct EndStreamJson {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<BTreeMap<String, Vec<String>>>,
}

impl EndStream {
    /// A successful end with the given trailers.
    pub fn success(metadata: http::HeaderMap) -> Self {
        Self {
            error: None,
            metadata,
        }
    }

    /// A failed end carrying the error and the trailers accumulated so far.
    pub fn failure(error: ConnectError, metadata: http::HeaderMap) -> Self {
        Self {
            error: Some(error),
            metadata,
        }
    }

    /// Serialize into the terminal envelope frame.
    pub fn to_frame(&self) -> Bytes {
        let json = EndStreamJson {
            error: self.error.as_ref().map(WireError::from),
            metadata: if self.metadata.is_empty() {
                None
            } else {
                Some(metadata_to_json(&self.metadata))
            },
        };
        let payload = serde_json::to_vec(&json).unwrap_or_else(|_| b"{}".to_vec());
        encode_envelope(envelope_flags::END_STREAM, &payload)
    }

    /// Parse the payload of a terminal envelope. Empty payloads are a legal
    /// bare end-of-stream.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ConnectError> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        let json: EndStreamJson = serde_json::from_slice(payload).map_err(|e| {
            ConnectError::invalid_argument(format!("invalid end-of-stream JSON: {e}"))
        })?;
        Ok(Self {
            error: json.error.map(ConnectError::from),
            metadata: json.metadata.map(metadata_from_json).unwrap_or_default(),
        })
    }
}
