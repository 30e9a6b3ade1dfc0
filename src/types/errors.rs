//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the sluice pipeline runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Startup configuration errors (fatal, abort with message).
    #[error("configuration error: {0}")]
    Config(String),

    /// Errors surfaced by plugin `init`/`run` (handled by the supervisor).
    #[error("plugin error: {0}")]
    Plugin(String),

    /// Named runner/plugin lookup failures.
    #[error("not found: {0}")]
    NotFound(String),

    /// Matcher expression parse errors (configuration time only).
    #[error("matcher parse error: {0}")]
    MatcherParse(String),

    /// Wire framing errors (oversize records, bad headers).
    #[error("framing error: {0}")]
    Framing(String),

    /// The process-wide shutdown signal is set.
    #[error("pipeline is shutting down")]
    ShuttingDown,

    /// A plugin exhausted its retry budget.
    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Frame header encoding errors.
    #[error("header encode error: {0}")]
    HeaderEncode(#[from] rmp_serde::encode::Error),

    /// Frame header decoding errors.
    #[error("header decode error: {0}")]
    HeaderDecode(#[from] rmp_serde::decode::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn plugin(msg: impl Into<String>) -> Self {
        Self::Plugin(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn matcher(msg: impl Into<String>) -> Self {
        Self::MatcherParse(msg.into())
    }

    pub fn framing(msg: impl Into<String>) -> Self {
        Self::Framing(msg.into())
    }

    pub fn retries_exhausted(msg: impl Into<String>) -> Self {
        Self::RetriesExhausted(msg.into())
    }
}
