//! Messaging relay binary: the TCP listener for C3 (Message Log), C4
//! (Presence Registry), and C5 (Connection Broker).

use std::sync::Arc;

use chat_core::{Config, TokenService};
use chat_relay::{ConnectionBroker, LoggingPresenceSink, MessageLog, PresenceRegistry};
use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(Config::from_env());
    info!(config = ?config.redacted(), "starting chat-relay");

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url())
        .await
        .expect("failed to connect to database");
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to run migrations");

    let log = MessageLog::new(pool);
    let registry = Arc::new(PresenceRegistry::new(LoggingPresenceSink));
    let tokens = Some(Arc::new(TokenService::new(
        &config.jwt_secret,
        config.token_ttl,
        config.token_clock_skew,
    )));

    let broker = Arc::new(ConnectionBroker::new(Arc::clone(&config), registry, log, tokens));

    let bind_addr = format!("{}:{}", config.socket_host, config.socket_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind to address");
    info!(addr = %bind_addr, "chat-relay listening");

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    broker.run(listener, shutdown).await;
    info!("chat-relay shut down cleanly");
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=debug")))
        .init();
}

/// Waits for either Ctrl-C or (on Unix) SIGTERM, whichever comes first.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let ctrl_c = tokio::signal::ctrl_c();
    let mut terminate = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
