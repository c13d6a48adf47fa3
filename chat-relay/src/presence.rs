//! Presence Registry (C4): the in-memory online-user directory and its
//! best-effort pub/sub side-channel.

use std::collections::HashMap;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifies one accepted TCP connection, independent of the username bound to it.
pub type ConnectionId = u64;

/// A frame queued for a connection's dedicated writer task.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// The handle a [`PresenceRegistry`] entry stores for a bound connection: the
/// sender half of that connection's outbound channel, drained by its writer task,
/// plus a `cancel` token the registry signals on eviction so the connection's
/// *reader* task — not just its writer — stops promptly (§4.4: "the existing
/// connection is evicted (socket closed, reader signaled to exit)").
#[derive(Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub sender: mpsc::Sender<OutboundFrame>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Joined,
    Left,
}

/// Injectable pub/sub collaborator. Presence publishes are best-effort and
/// never block routing — see SPEC_FULL.md §4.4's ambient detail and §9's
/// Design Notes on treating the pub/sub client as substitutable.
pub trait PresenceSink: Send + Sync {
    fn publish(&self, username: &str, event: PresenceEvent) -> impl std::future::Future<Output = ()> + Send;
    fn set_online(&self, username: &str, online: bool) -> impl std::future::Future<Output = ()> + Send;
}

/// Production sink: no real pub/sub reader exists within this core (SPEC_FULL.md
/// §9), so presence events are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingPresenceSink;

impl PresenceSink for LoggingPresenceSink {
    async fn publish(&self, username: &str, event: PresenceEvent) {
        debug!(username, ?event, "presence event");
    }

    async fn set_online(&self, username: &str, online: bool) {
        debug!(username, online, "presence set_online");
    }
}

/// Test/in-memory sink that records every call for assertions.
#[derive(Default)]
pub struct InMemoryPresenceSink {
    pub events: Mutex<Vec<(String, PresenceEvent)>>,
}

impl PresenceSink for InMemoryPresenceSink {
    async fn publish(&self, username: &str, event: PresenceEvent) {
        self.events.lock().await.push((username.to_string(), event));
    }

    async fn set_online(&self, _username: &str, _online: bool) {}
}

struct RegistryState {
    by_name: HashMap<String, ConnectionHandle>,
    by_id: HashMap<ConnectionId, String>,
}

/// Two in-memory maps guarded by a single mutex: `username → handle` and its
/// inverse. Holding one mutex across bind/unbind/lookup-and-send is the
/// literal, simplest-to-audit way to satisfy the ordering guarantee in
/// SPEC_FULL.md §5 — see the ambient detail in §4.4.
pub struct PresenceRegistry<S: PresenceSink> {
    state: Mutex<RegistryState>,
    sink: S,
}

impl<S: PresenceSink> PresenceRegistry<S> {
    pub fn new(sink: S) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                by_name: HashMap::new(),
                by_id: HashMap::new(),
            }),
            sink,
        }
    }

    /// Binds `username` to `handle`, atomically enqueueing `initial_frames`
    /// (the drained spool, if any) on its outbound channel before the lock is
    /// released. Atomicity matters: any `lookup_and_send` for this username
    /// also takes this same lock, so no live send can be enqueued ahead of the
    /// spool — preserving the §5(ii) ordering guarantee that spooled messages
    /// precede post-handshake live traffic.
    ///
    /// If `username` is already bound, the existing connection is evicted:
    /// its `cancel` token is triggered so its reader task exits immediately
    /// (rather than continuing to read and dispatch frames under a stale
    /// identity), and a `Close` frame is queued so its writer task closes the
    /// socket — before the new connection replaces it, guaranteeing at most
    /// one connection per username (I4).
    pub async fn bind(&self, username: &str, handle: ConnectionHandle, initial_frames: Vec<OutboundFrame>) {
        let evicted = {
            let mut state = self.state.lock().await;
            let evicted = state.by_name.remove(username);
            if let Some(ref existing) = evicted {
                state.by_id.remove(&existing.id);
            }
            state.by_id.insert(handle.id, username.to_string());
            state.by_name.insert(username.to_string(), handle.clone());
            for frame in initial_frames {
                let _ = handle.sender.send(frame).await;
            }
            evicted
        };
        if let Some(existing) = evicted {
            existing.cancel.cancel();
            let _ = existing.sender.send(OutboundFrame::Close).await;
        }
        self.sink.publish(username, PresenceEvent::Joined).await;
        self.sink.set_online(username, true).await;
    }

    /// Removes both directions for `id` if present. Idempotent under repeated
    /// termination — unbinding a connection already removed (or never bound,
    /// e.g. a handshake failure) is a no-op.
    pub async fn unbind(&self, id: ConnectionId) {
        let username = {
            let mut state = self.state.lock().await;
            let username = state.by_id.remove(&id);
            if let Some(ref username) = username {
                state.by_name.remove(username);
            }
            username
        };
        if let Some(username) = username {
            self.sink.publish(&username, PresenceEvent::Left).await;
            self.sink.set_online(&username, false).await;
        }
    }

    /// Looks up `recipient` and, if bound, queues `frame` on its outbound
    /// channel, all under one critical section — so two sends to the same
    /// recipient cannot have their socket writes interleaved. Returns whether
    /// delivery was attempted on a live connection.
    pub async fn lookup_and_send(&self, recipient: &str, frame: OutboundFrame) -> bool {
        let state = self.state.lock().await;
        match state.by_name.get(recipient) {
            Some(handle) => handle.sender.send(frame).await.is_ok(),
            None => false,
        }
    }

    pub async fn lookup(&self, username: &str) -> Option<ConnectionId> {
        self.state.lock().await.by_name.get(username).map(|h| h.id)
    }

    /// Sorted snapshot of currently bound usernames.
    pub async fn snapshot(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(id: ConnectionId) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle { id, sender: tx, cancel: CancellationToken::new() }, rx)
    }

    #[tokio::test]
    async fn bind_then_lookup_then_unbind() {
        let registry = PresenceRegistry::new(LoggingPresenceSink);
        let (h, _rx) = handle(1);
        registry.bind("alice", h, Vec::new()).await;
        assert_eq!(registry.lookup("alice").await, Some(1));
        assert_eq!(registry.snapshot().await, vec!["alice".to_string()]);

        registry.unbind(1).await;
        assert_eq!(registry.lookup("alice").await, None);
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn rebinding_the_same_username_evicts_the_previous_connection() {
        let registry = PresenceRegistry::new(LoggingPresenceSink);
        let (h1, mut rx1) = handle(1);
        let cancel1 = h1.cancel.clone();
        let (h2, _rx2) = handle(2);

        registry.bind("alice", h1, Vec::new()).await;
        registry.bind("alice", h2, Vec::new()).await;

        assert_eq!(registry.lookup("alice").await, Some(2));
        assert!(cancel1.is_cancelled(), "evicted connection's reader must be signaled to exit");
        assert!(matches!(rx1.recv().await, Some(OutboundFrame::Close)));
    }

    #[tokio::test]
    async fn unbind_is_idempotent() {
        let registry = PresenceRegistry::new(LoggingPresenceSink);
        registry.unbind(42).await;
        let (h, _rx) = handle(1);
        registry.bind("alice", h, Vec::new()).await;
        registry.unbind(1).await;
        registry.unbind(1).await;
        assert_eq!(registry.lookup("alice").await, None);
    }

    #[tokio::test]
    async fn publishes_join_and_leave_events() {
        let sink = InMemoryPresenceSink::default();
        let registry = PresenceRegistry::new(sink);
        let (h, _rx) = handle(1);
        registry.bind("alice", h, Vec::new()).await;
        registry.unbind(1).await;

        let events = registry.sink.events.lock().await;
        assert_eq!(
            *events,
            vec![
                ("alice".to_string(), PresenceEvent::Joined),
                ("alice".to_string(), PresenceEvent::Left),
            ]
        );
    }

    #[tokio::test]
    async fn lookup_and_send_delivers_to_a_bound_recipient_only() {
        let registry = PresenceRegistry::new(LoggingPresenceSink);
        assert!(!registry.lookup_and_send("bob", OutboundFrame::Text("hi".into())).await);

        let (h, mut rx) = handle(1);
        registry.bind("bob", h, Vec::new()).await;
        assert!(registry.lookup_and_send("bob", OutboundFrame::Text("hi".into())).await);
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Text(t)) if t == "hi"));
    }

    #[tokio::test]
    async fn bind_enqueues_initial_frames_before_releasing_the_lock() {
        // `initial_frames` (the drained spool) must land on the channel before
        // any send that acquires the lock afterward — bind() is the only place
        // that can guarantee that ordering, since lookup_and_send takes the
        // same lock (see the doc comment on `bind`).
        let registry = PresenceRegistry::new(LoggingPresenceSink);
        let (h, mut rx) = handle(1);
        let initial = vec![OutboundFrame::Text("spooled-one".into()), OutboundFrame::Text("spooled-two".into())];
        registry.bind("bob", h, initial).await;
        assert!(registry.lookup_and_send("bob", OutboundFrame::Text("live".into())).await);

        assert!(matches!(rx.recv().await, Some(OutboundFrame::Text(t)) if t == "spooled-one"));
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Text(t)) if t == "spooled-two"));
        assert!(matches!(rx.recv().await, Some(OutboundFrame::Text(t)) if t == "live"));
    }
}
