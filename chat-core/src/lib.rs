//! Shared types, wire-frame grammar, and configuration for the snibble chat platform.
//!
//! This crate has no networking or SQL dependencies of its own; both `auth-service`
//! and `chat-relay` build on it so the wire grammar and data shapes stay in one place.

pub mod config;
pub mod error;
pub mod frame;
pub mod model;
pub mod token;

pub use config::Config;
pub use error::FrameError;
pub use model::{conversation_id, ConversationId, HistoryEntry, Message, MessageId, SpooledMessage, Username};
pub use token::{Claims, TokenError, TokenService};
