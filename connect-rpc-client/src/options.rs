//! Per-call options.

use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue};

/// Extra headers and a timeout override for a single call.
///
/// ```rust,ignore
/// let options = CallOptions::new()
///     .timeout(Duration::from_secs(5))
///     .header("authorization", "Bearer token");
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request header, dropping entries that are not legal HTTP
    /// header material.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        match (
            HeaderName::try_from(name.as_ref()),
            HeaderValue::from_str(value.as_ref()),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => {
                tracing::debug!(name = name.as_ref(), "invalid call header dropped");
            }
        }
        self
    }

    /// Override the client's default timeout for this call.
    ///
    /// Sent to the server as `Connect-Timeout-Ms` and enforced locally.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
