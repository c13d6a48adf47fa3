//! Connection Broker (C5): accepts sockets, performs the handshake, spawns a
//! reader/writer task pair per connection, parses framed requests, and
//! dispatches them onto the Message Log (C3) and Presence Registry (C4).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chat_core::frame::{self, ClientFrame, Handshake};
use chat_core::{Config, SpooledMessage, TokenService};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::BrokerError;
use crate::presence::{ConnectionHandle, ConnectionId, OutboundFrame, PresenceRegistry, PresenceSink};
use crate::store::MessageLog;

/// Capacity of each connection's outbound channel. Bounds backpressure, not
/// correctness — see SPEC_FULL.md §4.4's ambient detail on writer-task handles.
const OUTBOUND_CHANNEL_CAPACITY: usize = 64;

pub struct ConnectionBroker<S: PresenceSink + 'static> {
    config: Arc<Config>,
    registry: Arc<PresenceRegistry<S>>,
    log: MessageLog,
    tokens: Option<Arc<TokenService>>,
    next_id: AtomicU64,
}

impl<S: PresenceSink + 'static> ConnectionBroker<S> {
    pub fn new(config: Arc<Config>, registry: Arc<PresenceRegistry<S>>, log: MessageLog, tokens: Option<Arc<TokenService>>) -> Self {
        Self {
            config,
            registry,
            log,
            tokens,
            next_id: AtomicU64::new(1),
        }
    }

    /// Runs the accept loop until `shutdown` is cancelled, then joins every
    /// spawned per-connection task before returning.
    pub async fn run(self: Arc<Self>, listener: TcpListener, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("accept loop shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, addr)) => {
                            let broker = Arc::clone(&self);
                            let conn_token = shutdown.child_token();
                            tasks.spawn(async move { broker.handle_connection(socket, addr, conn_token).await; });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            }
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, addr: SocketAddr, shutdown: CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = socket.into_split();
        let mut reader = BufReader::new(read_half);
        let (tx, rx) = mpsc::channel::<OutboundFrame>(OUTBOUND_CHANNEL_CAPACITY);

        // A child of the per-accept shutdown token: cancels when the server
        // shuts down (inherited from the parent) *or* when this specific
        // connection is evicted by a same-username reconnect (§4.4's "reader
        // signaled to exit") — the registry cancels it directly in that case.
        let cancel = shutdown.child_token();

        let username = match self.handshake(&mut reader, write_half, addr, &cancel).await {
            Some((username, write_half)) => {
                tokio::spawn(run_writer(write_half, rx));
                username
            }
            None => return,
        };

        let handle = ConnectionHandle { id, sender: tx.clone(), cancel: cancel.clone() };
        let spool = self.drain_spool(&username).await;
        self.registry.bind(&username, handle, spool_frames(spool)).await;
        info!(username = %username, %addr, "connection bound");

        self.steady_state(&mut reader, &username, &tx, &cancel).await;

        self.registry.unbind(id).await;
        drop(tx);
        info!(username = %username, "connection closed");
    }

    /// Reads the first frame and, if `require_handshake_token` is set, verifies
    /// the carried token resolves to the same username. Returns the write half
    /// so the caller can spawn the writer task only once handshake succeeds.
    async fn handshake(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        mut write_half: OwnedWriteHalf,
        addr: SocketAddr,
        cancel: &CancellationToken,
    ) -> Option<(String, OwnedWriteHalf)> {
        let line = match read_line(reader, self.config.max_frame_bytes, cancel).await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!(%addr, "connection closed before handshake");
                return None;
            }
            Err(e) => {
                debug!(error = %e, %addr, "handshake read error");
                return None;
            }
        };

        let handshake = match Handshake::parse(&line) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, %addr, "bad handshake frame");
                return None;
            }
        };

        if self.config.require_handshake_token && !self.handshake_token_is_valid(&handshake) {
            let _ = write_half.write_all(frame::invalid_token_line().as_bytes()).await;
            return None;
        }

        Some((handshake.username, write_half))
    }

    fn handshake_token_is_valid(&self, handshake: &Handshake) -> bool {
        match (&handshake.token, &self.tokens) {
            (Some(token), Some(tokens)) => tokens.verify(token).map(|u| u == handshake.username).unwrap_or(false),
            _ => false,
        }
    }

    /// Drains and marks delivered the recipient's spool. The caller hands the
    /// result to [`PresenceRegistry::bind`], which enqueues it on the
    /// connection's outbound channel atomically with becoming reachable —
    /// see that method's doc comment for why this can't be a simple
    /// drain-then-send done *after* `bind` returns.
    async fn drain_spool(&self, username: &str) -> Vec<SpooledMessage> {
        match self.log.drain_and_mark(username).await {
            Ok(spooled) => spooled,
            Err(e) => {
                warn!(error = %e, username, "drain_and_mark failed");
                Vec::new()
            }
        }
    }

    async fn steady_state(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        me: &str,
        tx: &mpsc::Sender<OutboundFrame>,
        cancel: &CancellationToken,
    ) {
        loop {
            match read_line(reader, self.config.max_frame_bytes, cancel).await {
                Ok(Some(line)) => {
                    if let Err(e) = self.dispatch(&line, me, tx).await {
                        debug!(error = %e, username = me, "dispatch error");
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, username = me, "read error, closing connection");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, line: &str, me: &str, tx: &mpsc::Sender<OutboundFrame>) -> Result<(), BrokerError> {
        let parsed = ClientFrame::parse(line)?;
        match parsed {
            ClientFrame::GetContactsFor { .. } => self.handle_get_contacts(me, tx).await,
            ClientFrame::GetChatHistory { other, .. } => self.handle_get_history(me, &other, tx).await,
            // The frame's own `sender` field is parsed for wire compatibility but discarded:
            // the handshake-bound identity is substituted unconditionally (DESIGN.md's
            // Open Question decision), closing the spoofing gap the frame grammar alone leaves open.
            ClientFrame::Send { recipient, body, .. } => self.handle_send(me, &recipient, &body, tx).await,
        }
        Ok(())
    }

    async fn handle_get_contacts(&self, me: &str, tx: &mpsc::Sender<OutboundFrame>) {
        match self.log.contacts(me).await {
            Ok(contacts) => {
                let _ = tx.send(OutboundFrame::Text(frame::contacted_users(&contacts))).await;
            }
            Err(e) => warn!(error = %e, username = me, "contacts query failed"),
        }
    }

    async fn handle_get_history(&self, me: &str, other: &str, tx: &mpsc::Sender<OutboundFrame>) {
        let _ = tx.send(OutboundFrame::Text(frame::chat_history_start(me, other))).await;
        match self.log.history(me, other).await {
            Ok(rows) => {
                for row in rows {
                    let line = frame::chat_history_msg(&row.sender, &row.recipient, &row.body, row.timestamp, row.delivered);
                    let _ = tx.send(OutboundFrame::Text(line)).await;
                }
                let _ = tx.send(OutboundFrame::Text(frame::chat_history_end(me, other))).await;
            }
            Err(e) => {
                let _ = tx.send(OutboundFrame::Text(frame::chat_history_error(&e.to_string()))).await;
            }
        }
    }

    async fn handle_send(&self, me: &str, recipient: &str, body: &str, tx: &mpsc::Sender<OutboundFrame>) {
        let live_line = frame::delivered_line(me, body);
        let delivered = self.registry.lookup_and_send(recipient, OutboundFrame::Text(live_line)).await;

        if let Err(e) = self.log.append(me, recipient, body, delivered).await {
            warn!(error = %e, sender = me, recipient, "append failed");
        }

        if !delivered {
            let _ = tx.send(OutboundFrame::Text(frame::offline_ack(recipient))).await;
        }
    }
}

/// Builds the "offline flush" outbound frames for a drained spool: a header
/// line announcing the count, then one `[OFFLINE] ...` line per message, in
/// the order `drain_and_mark` returned them. Empty when there's nothing spooled.
fn spool_frames(spooled: Vec<SpooledMessage>) -> Vec<OutboundFrame> {
    if spooled.is_empty() {
        return Vec::new();
    }
    let mut frames = Vec::with_capacity(spooled.len() + 1);
    frames.push(OutboundFrame::Text(frame::offline_flush_header(spooled.len())));
    for msg in spooled {
        frames.push(OutboundFrame::Text(frame::offline_flush_line(&msg.sender, msg.timestamp, &msg.body)));
    }
    frames
}

async fn run_writer(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<OutboundFrame>) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Text(text) => {
                if write_half.write_all(text.as_bytes()).await.is_err() {
                    break;
                }
            }
            OutboundFrame::Close => break,
        }
    }
    let _ = write_half.shutdown().await;
}

/// Reads one newline-delimited frame, trimming the trailing `\n`/`\r\n`.
/// `Ok(None)` means EOF. Selects against `cancel` so a pending read is
/// abandoned promptly on server shutdown *or* on this connection being
/// evicted by a same-username reconnect (`ConnectionHandle::cancel`).
///
/// The read is bounded via `AsyncReadExt::take(max_bytes)` so a client that
/// never sends `\n` cannot grow the buffer past `max_bytes` before the limit
/// check runs — unlike a plain `read_line` into an unbounded `String`, which
/// would buffer the whole line (however large) before rejecting it.
async fn read_line(
    reader: &mut BufReader<OwnedReadHalf>,
    max_bytes: usize,
    cancel: &CancellationToken,
) -> std::io::Result<Option<String>> {
    let mut buf = Vec::new();
    let limit = max_bytes as u64;
    let n = tokio::select! {
        () = cancel.cancelled() => return Ok(None),
        result = (&mut *reader).take(limit).read_until(b'\n', &mut buf) => result?,
    };
    if n == 0 {
        return Ok(None);
    }
    // `take(limit)` caps `buf` at `max_bytes`; reaching that cap without ever
    // seeing the delimiter means the frame is oversize rather than complete.
    if !buf.ends_with(b"\n") && buf.len() as u64 >= limit {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame exceeds max_frame_bytes"));
    }
    let mut line = String::from_utf8(buf).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    while line.ends_with(['\n', '\r']) {
        line.pop();
    }
    Ok(Some(line))
}
