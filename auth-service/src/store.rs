//! Credential Store (C1): password hashing/verification and user persistence.
//!
//! Passwords are never stored or compared directly. Every password is
//! concatenated with a process-wide pepper before being handed to Argon2id;
//! the resulting PHC string is the only thing that ever reaches the database.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier};
use secrecy::{ExposeSecret, Secret};
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database,
    #[error("password hashing failed")]
    Hashing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupOutcome {
    Ok,
    Exists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    BadUser,
    BadPassword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicKeyOutcome {
    Ok,
    NoSuchUser,
}

const SEARCH_LIMIT: i64 = 10;

/// Hashes, verifies, and persists user credentials and public keys.
#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
    pepper: Secret<String>,
    params: Params,
}

impl CredentialStore {
    /// `memory_kib`/`iterations` are the Argon2id moderate-preset knobs from `Config`.
    pub fn new(pool: SqlitePool, pepper: Secret<String>, memory_kib: u32, iterations: u32) -> Result<Self, StoreError> {
        let params = Params::new(memory_kib, iterations, 1, None).map_err(|e| {
            error!(error = %e, "invalid argon2 params");
            StoreError::Hashing
        })?;
        Ok(Self { pool, pepper, params })
    }

    #[instrument(name = "credential_store.signup", skip(self, password))]
    pub async fn signup(&self, username: &str, password: &str) -> Result<SignupOutcome, StoreError> {
        let hash = self.hash_password(password).await?;
        let now = chrono::Utc::now();
        let result = sqlx::query("INSERT INTO users (username, password_hash, created_at) VALUES (?, ?, ?)")
            .bind(username)
            .bind(&hash)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(SignupOutcome::Ok),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(SignupOutcome::Exists),
            Err(e) => {
                error!(error = %e, "signup failed");
                Err(StoreError::Database)
            }
        }
    }

    #[instrument(name = "credential_store.verify", skip(self, password))]
    pub async fn verify(&self, username: &str, password: &str) -> Result<VerifyOutcome, StoreError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT password_hash FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "verify lookup failed");
                StoreError::Database
            })?;

        let Some((stored_hash,)) = row else {
            return Ok(VerifyOutcome::BadUser);
        };

        let peppered = format!("{}{password}", self.pepper.expose_secret());
        let ok = spawn_blocking_with_tracing(move || verify_password(&peppered, &stored_hash))
            .await
            .map_err(|e| {
                error!(error = %e, "password verification task panicked");
                StoreError::Hashing
            })??;

        Ok(if ok { VerifyOutcome::Ok } else { VerifyOutcome::BadPassword })
    }

    pub async fn exists(&self, username: &str) -> Result<bool, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "exists lookup failed");
                StoreError::Database
            })?;
        Ok(row.is_some())
    }

    /// Case-insensitive contains-match, capped at 10 results, ordered by username ascending.
    pub async fn search(&self, query: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("%{}%", query.to_lowercase().replace('%', "\\%").replace('_', "\\_"));
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT username FROM users WHERE LOWER(username) LIKE ? ESCAPE '\\' ORDER BY username ASC LIMIT ?",
        )
        .bind(pattern)
        .bind(SEARCH_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "search failed");
            StoreError::Database
        })?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }

    pub async fn store_public_key(&self, username: &str, public_key: &str) -> Result<PublicKeyOutcome, StoreError> {
        let result = sqlx::query("UPDATE users SET public_key = ? WHERE username = ?")
            .bind(public_key)
            .bind(username)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "store_public_key failed");
                StoreError::Database
            })?;
        if result.rows_affected() == 0 {
            Ok(PublicKeyOutcome::NoSuchUser)
        } else {
            Ok(PublicKeyOutcome::Ok)
        }
    }

    pub async fn fetch_public_key(&self, username: &str) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT public_key FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, "fetch_public_key failed");
                StoreError::Database
            })?;
        Ok(row.and_then(|(pk,)| pk))
    }

    async fn hash_password(&self, password: &str) -> Result<String, StoreError> {
        let peppered = format!("{}{password}", self.pepper.expose_secret());
        let params = self.params.clone();
        spawn_blocking_with_tracing(move || hash_password(&peppered, params))
            .await
            .map_err(|e| {
                error!(error = %e, "password hashing task panicked");
                StoreError::Hashing
            })?
    }
}

/// CPU-bound Argon2id work is moved off the async executor, matching the
/// spawn-and-instrument pattern the corpus uses around blocking password work.
fn spawn_blocking_with_tracing<F, R>(f: F) -> tokio::task::JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(f))
}

fn hash_password(peppered: &str, params: Params) -> Result<String, StoreError> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
    argon2
        .hash_password(peppered.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password failed");
            StoreError::Hashing
        })
}

fn verify_password(peppered: &str, stored_hash: &str) -> Result<bool, StoreError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|e| {
        error!(error = %e, "stored password hash is not a valid PHC string");
        StoreError::Hashing
    })?;
    Ok(Argon2::default().verify_password(peppered.as_bytes(), &parsed).is_ok())
}
