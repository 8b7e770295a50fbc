//! Envelope frame decoding and encoding at the client edge.
//!
//! [`FrameDecoder`] adapts a response byte stream into typed messages,
//! capturing the trailers and error of the terminal end-of-stream frame.
//! [`encode_request_frames`] is its outbound mirror: a lazy message stream
//! becomes a lazy stream of envelope body frames, pulled only as the
//! transport drains them.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use connect_rpc_core::{
    Codec, Compression, ConnectError, EndStream, EnvelopeDecoder, encode_envelope, envelope_flags,
    open_payload,
};
use futures::{Stream, StreamExt};
use http::HeaderMap;
use http_body::Frame;
use prost::Message;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Decodes Connect envelopes from a byte stream into typed messages.
///
/// The stream yields each message in order. When the end-of-stream frame
/// arrives its trailers are stored and, if it carries an error, that error
/// is yielded as the final item. Running out of bytes without an
/// end-of-stream frame is a protocol error.
pub(crate) struct FrameDecoder<S, T> {
    stream: S,
    decoder: EnvelopeDecoder,
    codec: Codec,
    compression: Compression,
    trailers: Option<HeaderMap>,
    finished: bool,
    _marker: PhantomData<T>,
}

impl<S, T> FrameDecoder<S, T> {
    pub(crate) fn new(
        stream: S,
        codec: Codec,
        compression: Compression,
        max_receive_bytes: usize,
    ) -> Self {
        Self {
            stream,
            decoder: EnvelopeDecoder::new(max_receive_bytes),
            codec,
            compression,
            trailers: None,
            finished: false,
            _marker: PhantomData,
        }
    }

    /// Whether the end-of-stream frame has been read (or the stream died).
    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }

    /// Trailers from the end-of-stream frame, once the stream has finished.
    pub(crate) fn trailers(&self) -> Option<&HeaderMap> {
        self.trailers.as_ref()
    }

    fn finish_with(&mut self, err: ConnectError) -> Poll<Option<Result<T, ConnectError>>> {
        self.finished = true;
        Poll::Ready(Some(Err(err)))
    }
}

impl<S, T, E> Stream for FrameDecoder<S, T>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    T: Message + DeserializeOwned + Default + Unpin,
{
    type Item = Result<T, ConnectError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.decoder.next_envelope() {
                Ok(Some(envelope)) => {
                    if envelope.is_end_stream() {
                        let payload = match open_payload(envelope, this.compression) {
                            Ok(payload) => payload,
                            Err(err) => return this.finish_with(err),
                        };
                        let end = match EndStream::from_payload(&payload) {
                            Ok(end) => end,
                            Err(err) => return this.finish_with(err),
                        };
                        this.trailers = Some(end.metadata);
                        this.finished = true;
                        return match end.error {
                            Some(err) => Poll::Ready(Some(Err(err))),
                            None => Poll::Ready(None),
                        };
                    }

                    let message = open_payload(envelope, this.compression)
                        .and_then(|payload| this.codec.decode::<T>(&payload));
                    return match message {
                        Ok(message) => Poll::Ready(Some(Ok(message))),
                        Err(err) => this.finish_with(err),
                    };
                }
                Ok(None) => {}
                Err(err) => return this.finish_with(err),
            }

            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    this.decoder.push(&chunk);
                }
                Poll::Ready(Some(Err(err))) => {
                    return this.finish_with(ConnectError::unavailable(format!(
                        "response stream failed: {err}"
                    )));
                }
                Poll::Ready(None) => {
                    let err = match this.decoder.finish() {
                        // Mid-envelope EOF is the peer truncating a frame.
                        Err(err) => err,
                        // Clean EOF, but a response stream must end with an
                        // end-of-stream frame.
                        Ok(()) => ConnectError::internal(
                            "protocol error: response stream ended without an end-of-stream frame",
                        ),
                    };
                    return this.finish_with(err);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Envelope a lazy message stream into HTTP body frames.
///
/// Encoding or compression failures surface as a body error, which aborts
/// the request; the server sees a truncated stream.
pub(crate) fn encode_request_frames<S, T>(
    requests: S,
    codec: Codec,
    compression: Compression,
    compress_min_bytes: usize,
) -> impl Stream<Item = Result<Frame<Bytes>, ConnectError>> + Send + 'static
where
    S: Stream<Item = T> + Send + 'static,
    T: Message + Serialize,
{
    requests.map(move |message| {
        let payload = codec.encode(&message)?;
        let (payload, compressed) = compression.maybe_compress(payload, compress_min_bytes)?;
        let flags = if compressed {
            envelope_flags::COMPRESSED
        } else {
            0
        };
        Ok(Frame::data(encode_envelope(flags, &payload)))
    })
}

/// Envelope a single message for a server-streaming request body.
pub(crate) fn encode_single_frame<T>(
    message: &T,
    codec: Codec,
    compression: Compression,
    compress_min_bytes: usize,
) -> Result<Bytes, ConnectError>
where
    T: Message + Serialize,
{
    let payload = codec.encode(message)?;
    let (payload, compressed) = compression.maybe_compress(payload, compress_min_bytes)?;
    let flags = if compressed {
        envelope_flags::COMPRESSED
    } else {
        0
    };
    Ok(encode_envelope(flags, &payload))
}
