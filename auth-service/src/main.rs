//! Auth HTTP gateway binary.

use auth_service::handlers::AppState;
use auth_service::store::CredentialStore;
use auth_service::build_router;
use axum::Router;
use chat_core::{Config, TokenService};
use secrecy::Secret;
use sqlx::sqlite::SqlitePoolOptions;
use tracing::info;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    info!(config = ?config.redacted(), "starting auth-service");

    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url())
        .await
        .expect("failed to connect to database");
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to run migrations");

    let store = CredentialStore::new(
        pool,
        Secret::new(config.secret_key.clone()),
        config.argon2_memory_kib,
        config.argon2_iterations,
    )
    .expect("invalid argon2 configuration");

    let tokens = TokenService::new(&config.jwt_secret, config.token_ttl, config.token_clock_skew);
    let state = AppState::new(store, tokens);

    let app = build_router(state);
    serve(app, config.port).await;
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("auth_service=debug,tower_http=info")))
        .init();
}

async fn serve(app: Router, port: u16) {
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind to address");
    info!(addr = %bind_addr, "auth-service listening");
    axum::serve(listener, app).await.expect("server error");
}
