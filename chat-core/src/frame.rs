//! The messaging wire protocol: newline-terminated, colon-delimited text frames.
//!
//! Parsing lives here so that `chat-relay`'s connection broker never touches a
//! raw `&str` directly — every line read off a socket is turned into one of
//! these types (or a [`FrameError`]) before any routing decision is made.

use chrono::{DateTime, Utc};

use crate::error::FrameError;
use crate::model::Username;

/// The first frame a client sends after connecting.
///
/// Plain form is just `<username>`. When [`chat_core::Config::require_handshake_token`]
/// is set, the frame is `<username>:<token>` instead; [`Handshake::parse`] accepts
/// both and leaves `token` as `None` when no colon is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub username: Username,
    pub token: Option<String>,
}

impl Handshake {
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(FrameError::EmptyHandshake);
        }
        match line.split_once(':') {
            Some((username, token)) if !username.is_empty() => Ok(Self {
                username: username.to_string(),
                token: Some(token.to_string()),
            }),
            Some(_) => Err(FrameError::EmptyHandshake),
            None => Ok(Self {
                username: line.to_string(),
                token: None,
            }),
        }
    }
}

/// A frame received after the handshake has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `GET_CONTACTS_FOR:<username>`
    GetContactsFor { username: Username },
    /// `GET_CHAT_HISTORY:<self>:<other>`
    GetChatHistory { me: Username, other: Username },
    /// `<sender>:<recipient>:<body>` — the `sender` field is parsed but SHOULD
    /// be discarded by the broker in favor of the handshake identity (see
    /// SPEC_FULL.md's Open Question decision in DESIGN.md).
    Send {
        sender: Username,
        recipient: Username,
        body: String,
    },
}

const GET_CONTACTS_PREFIX: &str = "GET_CONTACTS_FOR:";
const GET_HISTORY_PREFIX: &str = "GET_CHAT_HISTORY:";

impl ClientFrame {
    pub fn parse(line: &str) -> Result<Self, FrameError> {
        if let Some(rest) = line.strip_prefix(GET_CONTACTS_PREFIX) {
            let username = rest.trim();
            if username.is_empty() {
                return Err(FrameError::MissingField("username"));
            }
            return Ok(Self::GetContactsFor {
                username: username.to_string(),
            });
        }

        if let Some(rest) = line.strip_prefix(GET_HISTORY_PREFIX) {
            let (me, other) = rest.split_once(':').ok_or(FrameError::MissingField("other"))?;
            let (me, other) = (me.trim(), other.trim());
            if me.is_empty() || other.is_empty() {
                return Err(FrameError::MissingField("other"));
            }
            return Ok(Self::GetChatHistory {
                me: me.to_string(),
                other: other.to_string(),
            });
        }

        // `<sender>:<recipient>:<body>` — split on the first two colons only,
        // so a body containing `:` is preserved verbatim.
        let (sender, rest) = line.split_once(':').ok_or(FrameError::MissingField("recipient"))?;
        let (recipient, body) = rest.split_once(':').ok_or(FrameError::MissingField("body"))?;
        if sender.is_empty() || recipient.is_empty() {
            return Err(FrameError::MissingField("sender or recipient"));
        }
        Ok(Self::Send {
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            body: body.to_string(),
        })
    }
}

/// Formats the timestamp the way every `S→C` frame embeds it: RFC 3339.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

/// `<sender>: <body>` — a live-delivered message.
pub fn delivered_line(sender: &str, body: &str) -> String {
    format!("{sender}: {body}\n")
}

/// `Server: Message stored for offline user '<recipient>'.\n`
pub fn offline_ack(recipient: &str) -> String {
    format!("Server: Message stored for offline user '{recipient}'.\n")
}

/// `Server: You have <n> offline message(s):\n`
pub fn offline_flush_header(count: usize) -> String {
    format!("Server: You have {count} offline message(s):\n")
}

/// `[OFFLINE] <sender> (<ts>): <body>\n`
pub fn offline_flush_line(sender: &str, ts: DateTime<Utc>, body: &str) -> String {
    format!("[OFFLINE] {sender} ({}): {body}\n", fmt_ts(ts))
}

/// `CONTACTED_USERS:a,b,c\n`
pub fn contacted_users(contacts: &[String]) -> String {
    format!("CONTACTED_USERS:{}\n", contacts.join(","))
}

/// `CHAT_HISTORY_START:<a>:<b>\n`
pub fn chat_history_start(me: &str, other: &str) -> String {
    format!("CHAT_HISTORY_START:{me}:{other}\n")
}

/// `CHAT_HISTORY_MSG:<sender>:<recipient>:<body>:<ts>:<delivered>\n`
pub fn chat_history_msg(
    sender: &str,
    recipient: &str,
    body: &str,
    ts: DateTime<Utc>,
    delivered: bool,
) -> String {
    format!(
        "CHAT_HISTORY_MSG:{sender}:{recipient}:{body}:{}:{delivered}\n",
        fmt_ts(ts)
    )
}

/// `CHAT_HISTORY_END:<a>:<b>\n`
pub fn chat_history_end(me: &str, other: &str) -> String {
    format!("CHAT_HISTORY_END:{me}:{other}\n")
}

/// `CHAT_HISTORY_ERROR:<reason>\n`
pub fn chat_history_error(reason: &str) -> String {
    format!("CHAT_HISTORY_ERROR:{reason}\n")
}

/// `Server: Invalid or missing token.\n`
pub fn invalid_token_line() -> String {
    "Server: Invalid or missing token.\n".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_plain() {
        let h = Handshake::parse("alice\n").unwrap();
        assert_eq!(h.username, "alice");
        assert_eq!(h.token, None);
    }

    #[test]
    fn handshake_with_token() {
        let h = Handshake::parse("alice:sometoken").unwrap();
        assert_eq!(h.username, "alice");
        assert_eq!(h.token.as_deref(), Some("sometoken"));
    }

    #[test]
    fn handshake_rejects_empty() {
        assert!(Handshake::parse("").is_err());
        assert!(Handshake::parse("   ").is_err());
        assert!(Handshake::parse(":token").is_err());
    }

    #[test]
    fn client_frame_get_contacts() {
        let f = ClientFrame::parse("GET_CONTACTS_FOR:bob").unwrap();
        assert_eq!(f, ClientFrame::GetContactsFor { username: "bob".into() });
    }

    #[test]
    fn client_frame_get_history() {
        let f = ClientFrame::parse("GET_CHAT_HISTORY:bob:alice").unwrap();
        assert_eq!(
            f,
            ClientFrame::GetChatHistory {
                me: "bob".into(),
                other: "alice".into()
            }
        );
    }

    #[test]
    fn client_frame_send_splits_on_first_two_colons_only() {
        let f = ClientFrame::parse("alice:bob:hello: world: how are you").unwrap();
        assert_eq!(
            f,
            ClientFrame::Send {
                sender: "alice".into(),
                recipient: "bob".into(),
                body: "hello: world: how are you".into(),
            }
        );
    }

    #[test]
    fn client_frame_send_accepts_empty_body() {
        let f = ClientFrame::parse("alice:bob:").unwrap();
        assert_eq!(
            f,
            ClientFrame::Send {
                sender: "alice".into(),
                recipient: "bob".into(),
                body: String::new(),
            }
        );
    }

    #[test]
    fn client_frame_send_self_message_is_legal() {
        let f = ClientFrame::parse("alice:alice:hi").unwrap();
        assert_eq!(
            f,
            ClientFrame::Send {
                sender: "alice".into(),
                recipient: "alice".into(),
                body: "hi".into(),
            }
        );
    }

    #[test]
    fn client_frame_missing_recipient_is_error() {
        assert!(ClientFrame::parse("alice").is_err());
    }

    #[test]
    fn server_frame_formatting() {
        assert_eq!(delivered_line("alice", "hi"), "alice: hi\n");
        assert_eq!(
            offline_ack("bob"),
            "Server: Message stored for offline user 'bob'.\n"
        );
        assert_eq!(contacted_users(&["alice".into(), "bob".into()]), "CONTACTED_USERS:alice,bob\n");
        assert_eq!(contacted_users(&[]), "CONTACTED_USERS:\n");
    }
}
