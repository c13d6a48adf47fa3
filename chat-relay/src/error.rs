//! Crate-wide error types for the messaging relay.

use chat_core::FrameError;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
