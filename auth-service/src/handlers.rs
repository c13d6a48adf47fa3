//! HTTP handlers for the auth gateway: signup, login, token verification,
//! search, and public-key storage/lookup.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_core::TokenService;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::store::{CredentialStore, PublicKeyOutcome, SignupOutcome, StoreError, VerifyOutcome};

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: CredentialStore,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(store: CredentialStore, tokens: TokenService) -> Self {
        Self { store, tokens: Arc::new(tokens) }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Username already taken on signup. Spec maps this to 401, not 409.
    #[error("user already exists")]
    Conflict,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("bad request: {0}")]
    BadRequest(&'static str),
    #[error("invalid credentials")]
    Unauthorized,
    #[error("not found")]
    NotFound,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Conflict => (StatusCode::UNAUTHORIZED, "User Already Exist".to_string()),
            ApiError::Store(e) => {
                error!(error = %e, "store failure on HTTP path");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, (*m).to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "invalid credentials".to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    username: String,
    password: String,
}

pub async fn signup(State(state): State<AppState>, Json(req): Json<SignupRequest>) -> Result<StatusCode, ApiError> {
    match state.store.signup(&req.username, &req.password).await? {
        SignupOutcome::Ok => {
            info!(username = %req.username, "user signed up");
            Ok(StatusCode::CREATED)
        }
        SignupOutcome::Exists => Err(ApiError::Conflict),
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    message: String,
    token: String,
    username: String,
}

pub async fn login(State(state): State<AppState>, Json(req): Json<LoginRequest>) -> Result<Json<LoginResponse>, ApiError> {
    match state.store.verify(&req.username, &req.password).await? {
        VerifyOutcome::Ok => {
            let token = state.tokens.mint(&req.username);
            info!(username = %req.username, "login succeeded");
            Ok(Json(LoginResponse {
                message: "login successful".to_string(),
                token,
                username: req.username,
            }))
        }
        VerifyOutcome::BadUser => Err(ApiError::NotFound),
        VerifyOutcome::BadPassword => Err(ApiError::Unauthorized),
    }
}

#[derive(Debug, Serialize)]
pub struct VerifyTokenResponse {
    valid: bool,
    username: String,
    message: String,
}

pub async fn verify_token(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<VerifyTokenResponse>, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = extract_bearer_token(header).ok_or(ApiError::Unauthorized)?;
    let username = state.tokens.verify(token).map_err(|_| ApiError::Unauthorized)?;
    Ok(Json(VerifyTokenResponse {
        valid: true,
        username,
        message: "token valid".to_string(),
    }))
}

/// Token revocation is not in scope (see SPEC_FULL.md §9); this always succeeds.
pub async fn logout() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    q: String,
}

pub async fn search(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<Json<Vec<String>>, ApiError> {
    if q.q.len() < 2 {
        return Err(ApiError::BadRequest("q must be at least 2 characters"));
    }
    Ok(Json(state.store.search(&q.q).await?))
}

#[derive(Debug, Deserialize)]
pub struct StorePublicKeyRequest {
    username: String,
    public_key: String,
}

pub async fn store_public_key(
    State(state): State<AppState>,
    Json(req): Json<StorePublicKeyRequest>,
) -> Result<StatusCode, ApiError> {
    if req.username.is_empty() || req.public_key.is_empty() {
        return Err(ApiError::BadRequest("username and public_key are required"));
    }
    match state.store.store_public_key(&req.username, &req.public_key).await? {
        PublicKeyOutcome::Ok => Ok(StatusCode::OK),
        PublicKeyOutcome::NoSuchUser => Err(ApiError::BadRequest("no such user")),
    }
}

#[derive(Debug, Deserialize)]
pub struct GetPublicKeyRequest {
    recipient: String,
}

pub async fn get_public_key(State(state): State<AppState>, Json(req): Json<GetPublicKeyRequest>) -> Result<String, ApiError> {
    state.store.fetch_public_key(&req.recipient).await?.ok_or(ApiError::NotFound)
}

/// Extract a Bearer token from an `Authorization` header value.
fn extract_bearer_token(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ").or_else(|| authorization.strip_prefix("bearer "))
}
