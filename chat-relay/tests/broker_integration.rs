//! End-to-end TCP tests for the Connection Broker (C5), exercising real
//! sockets against an in-memory Message Log and Presence Registry.

use std::sync::Arc;
use std::time::Duration;

use chat_core::Config;
use chat_relay::{ConnectionBroker, LoggingPresenceSink, MessageLog, PresenceRegistry};
use sqlx::SqlitePool;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

async fn spawn_broker() -> (std::net::SocketAddr, CancellationToken) {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let log = MessageLog::new(pool);

    let mut config = Config::from_env();
    config.require_handshake_token = false;
    let config = Arc::new(config);

    let registry = Arc::new(PresenceRegistry::new(LoggingPresenceSink));
    let broker = Arc::new(ConnectionBroker::new(Arc::clone(&config), registry, log, None));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let run_token = shutdown.clone();
    tokio::spawn(async move {
        broker.run(listener, run_token).await;
    });

    (addr, shutdown)
}

async fn connect(addr: std::net::SocketAddr, username: &str) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half.write_all(format!("{username}\n").as_bytes()).await.unwrap();
    (BufReader::new(read_half), write_half)
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    line
}

/// S1: two connected users exchange a message and it arrives live.
#[tokio::test]
async fn live_delivery_between_two_connected_users() {
    let (addr, _shutdown) = spawn_broker().await;

    let (_alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    alice_writer.write_all(b"alice:bob:hello bob\n").await.unwrap();

    let line = read_line(&mut bob_reader).await;
    assert_eq!(line, "alice: hello bob\n");
}

/// S2: a message sent to an offline user is spooled, then flushed on reconnect.
#[tokio::test]
async fn offline_message_is_spooled_then_flushed_on_reconnect() {
    let (addr, _shutdown) = spawn_broker().await;

    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    alice_writer.write_all(b"alice:bob:are you there\n").await.unwrap();

    let ack = read_line(&mut alice_reader).await;
    assert_eq!(ack, "Server: Message stored for offline user 'bob'.\n");

    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;
    let header = read_line(&mut bob_reader).await;
    assert_eq!(header, "Server: You have 1 offline message(s):\n");
    let spooled = read_line(&mut bob_reader).await;
    assert!(spooled.starts_with("[OFFLINE] alice ("));
    assert!(spooled.contains("are you there"));
}

/// S4: a second connection under the same username evicts the first.
#[tokio::test]
async fn reconnecting_as_the_same_user_evicts_the_previous_connection() {
    let (addr, _shutdown) = spawn_broker().await;

    let (mut first_reader, _first_writer) = connect(addr, "carol").await;
    let (_second_reader, _second_writer) = connect(addr, "carol").await;

    // The first connection's socket is closed by the broker; read_line observes EOF (0 bytes).
    let mut buf = String::new();
    let n = tokio::time::timeout(Duration::from_secs(2), first_reader.read_line(&mut buf))
        .await
        .expect("timed out waiting for eviction")
        .unwrap();
    assert_eq!(n, 0, "evicted connection should observe EOF");
}

/// S5: contacts and history reflect prior conversations, independent of lookup direction.
#[tokio::test]
async fn contacts_and_history_reflect_prior_conversations() {
    let (addr, _shutdown) = spawn_broker().await;

    {
        let (_reader, mut writer) = connect(addr, "dave").await;
        writer.write_all(b"dave:erin:hi erin\n").await.unwrap();
        writer.flush().await.unwrap();
    }

    let (mut erin_reader, mut erin_writer) = connect(addr, "erin").await;
    // The spool flush precedes anything we send, so drain it first.
    let _header = read_line(&mut erin_reader).await;
    let _spooled = read_line(&mut erin_reader).await;

    erin_writer.write_all(b"GET_CONTACTS_FOR:erin\n").await.unwrap();
    let contacts = read_line(&mut erin_reader).await;
    assert_eq!(contacts, "CONTACTED_USERS:dave\n");

    erin_writer.write_all(b"GET_CHAT_HISTORY:erin:dave\n").await.unwrap();
    let start = read_line(&mut erin_reader).await;
    assert_eq!(start, "CHAT_HISTORY_START:erin:dave\n");
    let msg = read_line(&mut erin_reader).await;
    assert!(msg.starts_with("CHAT_HISTORY_MSG:dave:erin:hi erin:"));
    let end = read_line(&mut erin_reader).await;
    assert_eq!(end, "CHAT_HISTORY_END:erin:dave\n");
}

/// The frame's own `sender` field is ignored in favor of the handshake identity.
#[tokio::test]
async fn send_frame_sender_field_is_overridden_by_handshake_identity() {
    let (addr, _shutdown) = spawn_broker().await;

    let (_alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    // alice claims to be "mallory" in the frame body; the broker must still
    // attribute the message to "alice", the handshake-bound identity.
    alice_writer.write_all(b"mallory:bob:spoofed?\n").await.unwrap();

    let line = read_line(&mut bob_reader).await;
    assert_eq!(line, "alice: spoofed?\n");
}
