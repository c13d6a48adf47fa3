//! Shared error types for the wire-frame grammar.

use thiserror::Error;

/// Errors raised while parsing a client-sent frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("handshake frame must contain a non-empty username")]
    EmptyHandshake,
    #[error("frame is missing required field: {0}")]
    MissingField(&'static str),
    #[error("frame exceeds the maximum allowed size")]
    TooLarge,
}
