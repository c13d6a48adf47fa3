//! # Auth Service
//!
//! HTTP gateway for the Credential Store (C1) and Token Service (C2): signup,
//! login, token verification, username search, and public-key storage.
//!
//! ## API Overview
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/signup` | POST | Create a user |
//! | `/login` | POST | Verify credentials, mint a bearer token |
//! | `/verify-token` | POST | Verify a bearer token |
//! | `/logout` | POST | Stateless no-op |
//! | `/search` | GET | Username search (contains-match, capped at 10) |
//! | `/store_public_key` | POST | Store a user's public key |
//! | `/get_public_key` | POST | Fetch a user's public key |

pub mod handlers;
pub mod store;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

pub use handlers::AppState;
pub use store::CredentialStore;

/// Request bodies are small (credentials, a search query, a public key) — 16 KiB is generous.
const MAX_BODY_SIZE: usize = 16 * 1024;

/// Builds the auth HTTP router. Exposed so both `main.rs` and integration tests
/// exercise the exact same route table and middleware stack.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/verify-token", post(handlers::verify_token))
        .route("/logout", post(handlers::logout))
        .route("/search", get(handlers::search))
        .route("/store_public_key", post(handlers::store_public_key))
        .route("/get_public_key", post(handlers::get_public_key))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
