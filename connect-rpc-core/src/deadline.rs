//! Deadlines derived from the `Connect-Timeout-Ms` header.
//!
//! The header value is a non-negative integer of milliseconds. A value of
//! zero arrives already expired: the server must answer `deadline_exceeded`
//! without dispatching the handler.

use std::time::{Duration, Instant};

use crate::error::ConnectError;

/// Header carrying the client's timeout budget in milliseconds.
pub const CONNECT_TIMEOUT_MS: &str = "connect-timeout-ms";

/// An absolute per-call deadline; `unbounded` when the client sent no
/// timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A call with no time budget.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now. A span too large to represent as an
    /// instant is effectively unbounded.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// Parse a `Connect-Timeout-Ms` header value.
    ///
    /// Absent means unbounded; anything that is not a non-negative integer
    /// is an `invalid_argument`; zero is a deadline that has already passed.
    pub fn from_timeout_header(value: Option<&str>) -> Result<Self, ConnectError> {
        let Some(value) = value else {
            return Ok(Self::unbounded());
        };
        let ms: u64 = value.parse().map_err(|_| {
            ConnectError::invalid_argument(
                "connect-timeout-ms header must be a non-negative integer",
            )
        })?;
        Ok(Self {
            at: Instant::now().checked_add(Duration::from_millis(ms)),
        })
    }

    /// The absolute deadline instant, if bounded.
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before the deadline, `None` when unbounded. An expired
    /// deadline reports a zero remainder.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Render a client timeout as a `Connect-Timeout-Ms` header value.
///
/// Sub-millisecond timeouts round up so a positive budget never reads as
/// the already-expired zero.
pub fn timeout_header_value(timeout: Duration) -> String {
    u64::try_from(timeout.as_millis())
        .unwrap_or(u64::MAX)
        .max(1)
        .to_string()
}
