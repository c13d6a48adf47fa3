//! # Chat Relay
//!
//! The TCP messaging service: Message Log (C3), Presence Registry (C4), and
//! Connection Broker (C5). See `SPEC_FULL.md` for the full routing contract.

pub mod broker;
pub mod error;
pub mod presence;
pub mod store;

pub use broker::ConnectionBroker;
pub use error::BrokerError;
pub use presence::{ConnectionHandle, LoggingPresenceSink, PresenceRegistry, PresenceSink};
pub use store::MessageLog;
