//! Connect streaming envelope framing.
//!
//! Streaming RPCs carry each message in a 5-byte-prefixed frame:
//!
//! ```text
//! [flags:1][length:4 big-endian][payload:length]
//! ```
//!
//! Two flag bits are defined; the rest are reserved, written as zero and
//! ignored on read.

use bytes::{Bytes, BytesMut};

use crate::compression::Compression;
use crate::error::ConnectError;

/// Envelope flag bits.
pub mod envelope_flags {
    /// Payload is compressed with the negotiated message compression.
    pub const COMPRESSED: u8 = 0x01;
    /// Terminal frame carrying the end-of-stream JSON block.
    pub const END_STREAM: u8 = 0x02;
}

/// Envelope header size: flags byte plus length word.
pub const ENVELOPE_HEAD_LEN: usize = 5;

/// Default cap on a single envelope payload (64 MiB).
pub const DEFAULT_MAX_ENVELOPE_LEN: usize = 64 * 1024 * 1024;

/// A parsed envelope: the flags byte and the raw (possibly compressed)
/// payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub flags: u8,
    pub payload: Bytes,
}

impl Envelope {
    /// Whether the compressed flag bit is set.
    pub fn is_compressed(&self) -> bool {
        self.flags & envelope_flags::COMPRESSED != 0
    }

    /// Whether this is the terminal end-of-stream frame.
    pub fn is_end_stream(&self) -> bool {
        self.flags & envelope_flags::END_STREAM != 0
    }
}

/// Frame a payload into envelope bytes.
pub fn encode_envelope(flags: u8, payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(ENVELOPE_HEAD_LEN + payload.len());
    frame.extend_from_slice(&[flags]);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame.freeze()
}

/// Incremental envelope parser.
///
/// Byte chunks arrive in arbitrary sizes from the HTTP body; the decoder
/// buffers them and yields complete envelopes. Both the server's inbound
/// message stream and the client's response stream sit on top of this.
#[derive(Debug)]
pub struct EnvelopeDecoder {
    buf: BytesMut,
    max_payload_len: usize,
}

impl EnvelopeDecoder {
    /// Create a decoder enforcing the given payload cap.
    pub fn new(max_payload_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_payload_len,
        }
    }

    /// Append a chunk of body bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete envelope, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A declared payload
    /// length above the cap fails immediately, before any payload bytes are
    /// buffered for it.
    pub fn next_envelope(&mut self) -> Result<Option<Envelope>, ConnectError> {
        if self.buf.len() < ENVELOPE_HEAD_LEN {
            return Ok(None);
        }

        let flags = self.buf[0];
        let length =
            u32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]) as usize;

        if length > self.max_payload_len {
            return Err(ConnectError::invalid_argument(format!(
                "envelope payload of {} bytes exceeds the {} byte limit",
                length, self.max_payload_len
            )));
        }

        if self.buf.len() < ENVELOPE_HEAD_LEN + length {
            self.buf.reserve(ENVELOPE_HEAD_LEN + length - self.buf.len());
            return Ok(None);
        }

        let payload = self
            .buf
            .split_to(ENVELOPE_HEAD_LEN + length)
            .split_off(ENVELOPE_HEAD_LEN)
            .freeze();
        Ok(Some(Envelope { flags, payload }))
    }

    /// Validate that the byte stream ended on an envelope boundary.
    ///
    /// EOF between envelopes is a legal stream end; EOF with buffered bytes
    /// means the peer truncated a frame.
    pub fn finish(&self) -> Result<(), ConnectError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ConnectError::invalid_argument(format!(
                "incomplete envelope: stream ended with {} trailing bytes",
                self.buf.len()
            )))
        }
    }

    /// Whether the decoder holds no buffered bytes.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Undo per-message compression on an envelope payload.
///
/// End-of-stream payloads are subject to the same flag; a compressed bit
/// under identity negotiation is a protocol violation.
pub fn open_payload(envelope: Envelope, compression: Compression) -> Result<Bytes, ConnectError> {
    if !envelope.is_compressed() {
        return Ok(envelope.payload);
    }
    if compression.is_identity() {
        return Err(ConnectError::invalid_argument(
            "protocol error: received a compressed envelope but compression is identity",
        ));
    }
    compression.decompress(&envelope.payload)
}
