//! The canonical Connect error value and its JSON wire form.
//!
//! A [`ConnectError`] carries an error [`Code`], an optional message, a list
//! of `google.protobuf.Any`-packed [`ErrorDetail`]s, and metadata headers.
//! The same value is returned by handlers on the server, surfaced by call
//! primitives on the client, and serialized into unary error bodies and
//! end-of-stream frames.

use base64::Engine;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::code::Code;

/// Standard-alphabet base64, written unpadded, read either way.
///
/// Connect emits unpadded base64 in error details; peers are inconsistent
/// about padding on the inbound side.
const BASE64_STD_INDIFFERENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A self-describing error detail, equivalent to a packed
/// `google.protobuf.Any`.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorDetail {
    type_url: String,
    value: Vec<u8>,
    debug: Option<serde_json::Value>,
}

impl ErrorDetail {
    /// Create a detail from a type name and protobuf-encoded bytes.
    pub fn new<S: Into<String>>(type_url: S, value: Vec<u8>) -> Self {
        Self {
            type_url: type_url.into(),
            value,
            debug: None,
        }
    }

    /// Attach a free-form JSON rendering of the detail, carried next to the
    /// packed bytes for human consumption.
    pub fn with_debug(mut self, debug: serde_json::Value) -> Self {
        self.debug = Some(debug);
        self
    }

    /// The fully-qualified type name, without the `type.googleapis.com/`
    /// prefix.
    pub fn type_name(&self) -> &str {
        self.type_url
            .strip_prefix("type.googleapis.com/")
            .unwrap_or(&self.type_url)
    }

    /// The protobuf-encoded value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The free-form debug rendering, if the peer sent one.
    pub fn debug(&self) -> Option<&serde_json::Value> {
        self.debug.as_ref()
    }
}

/// The canonical Connect error.
#[derive(Clone, Debug)]
pub struct ConnectError {
    code: Code,
    message: Option<String>,
    details: Vec<ErrorDetail>,
    metadata: HeaderMap,
}

impl ConnectError {
    /// Create an error with a code and message.
    pub fn new<S: Into<String>>(code: Code, message: S) -> Self {
        Self {
            code,
            message: Some(message.into()),
            details: Vec::new(),
            metadata: HeaderMap::new(),
        }
    }

    /// Create an error with just a code.
    pub fn from_code(code: Code) -> Self {
        Self {
            code,
            message: None,
            details: Vec::new(),
            metadata: HeaderMap::new(),
        }
    }

    pub fn canceled<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Canceled, message)
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn deadline_exceeded<S: Into<String>>(message: S) -> Self {
        Self::new(Code::DeadlineExceeded, message)
    }

    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn resource_exhausted<S: Into<String>>(message: S) -> Self {
        Self::new(Code::ResourceExhausted, message)
    }

    pub fn unimplemented<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn unavailable<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn unauthenticated<S: Into<String>>(message: S) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn permission_denied<S: Into<String>>(message: S) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    /// The error code.
    pub fn code(&self) -> Code {
        self.code
    }

    /// The error message, if one was set.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// The attached error details.
    pub fn details(&self) -> &[ErrorDetail] {
        &self.details
    }

    /// Append an error detail built from a type name and encoded bytes.
    pub fn with_detail<S: Into<String>>(mut self, type_url: S, value: Vec<u8>) -> Self {
        self.details.push(ErrorDetail::new(type_url, value));
        self
    }

    /// Append a pre-built [`ErrorDetail`].
    pub fn with_error_detail(mut self, detail: ErrorDetail) -> Self {
        self.details.push(detail);
        self
    }

    /// Metadata carried alongside the error.
    ///
    /// On unary error responses these become HTTP headers; names with the
    /// `trailer-` prefix become trailing metadata on the client.
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Mutable access to the error metadata.
    pub fn metadata_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }

    /// Append a metadata entry, dropping values that are not legal HTTP
    /// header material.
    pub fn with_metadata<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        match (
            HeaderName::from_bytes(name.as_ref().as_bytes()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.metadata.append(name, value);
            }
            _ => {
                tracing::debug!(name = name.as_ref(), "invalid error metadata entry dropped");
            }
        }
        self
    }

    /// Replace the error metadata wholesale.
    pub fn set_metadata(&mut self, metadata: HeaderMap) {
        self.metadata = metadata;
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<std::convert::Infallible> for ConnectError {
    fn from(infallible: std::convert::Infallible) -> Self {
        match infallible {}
    }
}

// ============================================================================
// JSON wire form
// ============================================================================

/// The JSON body of a unary error response, and the `error` member of an
/// end-of-stream frame.
#[derive(Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<WireDetail>,
}

/// One entry of the `details` array on the wire.
#[derive(Serialize, Deserialize)]
pub struct WireDetail {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

impl From<&ConnectError> for WireError {
    fn from(err: &ConnectError) -> Self {
        WireError {
            code: err.code.as_wire().to_string(),
            message: err.message.clone(),
            details: err
                .details
                .iter()
                .map(|d| WireDetail {
                    type_name: d.type_name().to_string(),
                    value: BASE64_STD_INDIFFERENT.encode(&d.value),
                    debug: d.debug.clone(),
                })
                .collect(),
        }
    }
}

impl From<WireError> for ConnectError {
    fn from(wire: WireError) -> Self {
        // An unparseable code degrades to `unknown` rather than failing the
        // whole error.
        let code = Code::from_wire(&wire.code).unwrap_or(Code::Unknown);
        let mut err = match wire.message {
            Some(message) => ConnectError::new(code, message),
            None => ConnectError::from_code(code),
        };
        for detail in wire.details {
            let value = BASE64_STD_INDIFFERENT
                .decode(detail.value.as_bytes())
                .unwrap_or_default();
            let mut parsed = ErrorDetail::new(detail.type_name, value);
            if let Some(debug) = detail.debug {
                parsed = parsed.with_debug(debug);
            }
            err = err.with_error_detail(parsed);
        }
        err
    }
}

impl ConnectError {
    /// Serialize to the JSON wire body.
    pub fn to_wire_json(&self) -> Vec<u8> {
        serde_json::to_vec(&WireError::from(self)).unwrap_or_else(|_| {
            // A failure here means a non-serializable debug value slipped in;
            // degrade to the bare code.
            format!("{{\"code\":{:?}}}", self.code.as_wire()).into_bytes()
        })
    }

    /// Parse a JSON wire body into an error, if the bytes look like one.
    pub fn from_wire_json(body: &[u8]) -> Option<Self> {
        let wire: WireError = serde_json::from_slice(body).ok()?;
        Code::from_wire(&wire.code)?;
        Some(wire.into())
    }
}
