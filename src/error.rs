//! Crate-wide error type.
//!
//! Subsystems define their own small error enums (`Nip04Error`,
//! `Nip44Error`, ...) and convert upward into [`Error`], so callers only
//! ever match on one set of kinds.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed URL, bech32, hex or event fields. Never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Structural or cryptographic event validation failure.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// Relay is not open and could not be opened in time.
    #[error("relay disconnected")]
    Disconnected,

    /// Operation did not complete within its deadline.
    #[error("operation timed out")]
    Timeout,

    /// Client-side limiter tripped.
    #[error("rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    /// Relay returned OK with success=false, or a bunker returned an
    /// error response.
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// AUTH challenge from a relay, or an auth_url from a bunker.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Bunker refused a method or event kind.
    #[error("permission denied: {0}")]
    Permission(String),

    /// Primitive-level failure (MAC mismatch, bad signature). The
    /// message never contains key bytes.
    #[error("crypto error: {0}")]
    Crypto(String),
}

impl Error {
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn invalid_event(msg: impl Into<String>) -> Self {
        Error::InvalidEvent(msg.into())
    }

    pub(crate) fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
