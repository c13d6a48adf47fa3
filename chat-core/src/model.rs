//! Shared data model for users, messages, and conversations.
//!
//! These are the plain, storage-agnostic shapes both `auth-service` and
//! `chat-relay` build on; neither SQL row types nor HTTP request/response
//! bodies live here.

use chrono::{DateTime, Utc};

/// A username. Case-sensitive, 1-255 characters; uniqueness is enforced by
/// the Credential Store, not by this type.
pub type Username = String;

/// Canonical identifier for a pair of users: `min(a,b) + ":" + max(a,b)`.
pub type ConversationId = String;

/// Monotonic message id assigned by the Message Log on insert.
pub type MessageId = i64;

/// Computes the canonical conversation id for a pair of usernames.
///
/// `conversation_id(a, b) == conversation_id(b, a)` for all `a`, `b` — this is
/// the invariant I3 of the wider specification, and the reason `history`
/// queries can match rows with `sender`/`recipient` in either order.
pub fn conversation_id(a: &str, b: &str) -> ConversationId {
    if a < b {
        format!("{a}:{b}")
    } else {
        format!("{b}:{a}")
    }
}

/// A persisted message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub sender: Username,
    pub recipient: Username,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: ConversationId,
    pub delivered: bool,
}

/// A message returned from the Message Log's drain-undelivered-style operations
/// (`chat_relay::MessageLog::drain_undelivered`/`drain_and_mark`): the subset of
/// a [`Message`] needed to replay it on a freshly bound socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpooledMessage {
    pub sender: Username,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// A row as returned by a conversation history query: carries delivery state
/// and the full sender/recipient pair, unlike [`SpooledMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub sender: Username,
    pub recipient: Username,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub delivered: bool,
}
