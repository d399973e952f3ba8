//! Structured error types for the core crate.

use thiserror::Error;

/// Errors from the upstream control plane or event stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream returned {status} for {endpoint}")]
    Status {
        endpoint: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode upstream response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid upstream base url: {0}")]
    BaseUrl(String),
}

/// Validator outcomes for a single upstream event envelope.
///
/// Consumers treat every variant as "skip this event"; none of them
/// terminates the stream.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EventError {
    #[error("not a part update")]
    NotAPartUpdate,

    #[error("event belongs to another session")]
    SessionMismatch,

    #[error("part update missing message id")]
    MissingMessageId,

    #[error("part update missing part id")]
    MissingPartId,
}

/// Invalid arguments to the message-parts store.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("message id must not be empty")]
    EmptyMessageId,

    #[error("part id must not be empty")]
    EmptyPartId,
}
