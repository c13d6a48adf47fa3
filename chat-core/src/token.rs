//! Bearer token minting and verification (C2).
//!
//! Shared between `auth-service` (which mints tokens at `/login` and verifies
//! them at `/verify-token`) and `chat-relay` (which verifies a token carried
//! on the handshake frame when [`Config::require_handshake_token`] is set).

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Username;

const ISSUER: &str = "snibble-auth";
const TOKEN_TYPE: &str = "JWT";

/// Claims embedded in every minted token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub typ: String,
    pub sub: Username,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("bad signature")]
    BadSignature,
    #[error("malformed token")]
    Malformed,
}

/// Mints and verifies HMAC-SHA256 bearer tokens binding a username.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    clock_skew: Duration,
}

impl TokenService {
    pub fn new(secret: &str, ttl: Duration, clock_skew: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            clock_skew,
        }
    }

    /// Produces a signed bearer token for `username`, valid for `ttl` from now.
    pub fn mint(&self, username: &str) -> String {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(self.ttl).unwrap_or(ChronoDuration::hours(120));
        let claims = Claims {
            iss: ISSUER.to_string(),
            typ: TOKEN_TYPE.to_string(),
            sub: username.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        // HS256 encoding only fails on a malformed key, which `from_secret` never produces.
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .expect("HS256 token encoding is infallible for an in-process key")
    }

    /// Verifies `token`, returning the bound username on success.
    pub fn verify(&self, token: &str) -> Result<Username, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.leeway = self.clock_skew.as_secs();

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature | ErrorKind::InvalidIssuer => TokenError::BadSignature,
            _ => TokenError::Malformed,
        })?;

        if data.claims.typ != TOKEN_TYPE {
            return Err(TokenError::Malformed);
        }
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new("test-secret", Duration::from_secs(120 * 3600), Duration::from_secs(60))
    }

    #[test]
    fn round_trips_the_subject() {
        let svc = service();
        let token = svc.mint("alice");
        assert_eq!(svc.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn rejects_a_token_signed_with_a_different_secret() {
        let svc = service();
        let other = TokenService::new("different-secret", Duration::from_secs(3600), Duration::from_secs(60));
        let token = other.mint("alice");
        assert_eq!(svc.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let svc = service();
        let now = Utc::now();
        let claims = Claims {
            iss: ISSUER.to_string(),
            typ: TOKEN_TYPE.to_string(),
            sub: "alice".to_string(),
            iat: (now - ChronoDuration::hours(121)).timestamp(),
            exp: (now - ChronoDuration::hours(1) - ChronoDuration::seconds(61)).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &svc.encoding_key).unwrap();
        assert_eq!(svc.verify(&token), Err(TokenError::Expired));
    }

    #[test]
    fn wrong_issuer_is_bad_signature() {
        let svc = service();
        let now = Utc::now();
        let claims = Claims {
            iss: "someone-else".to_string(),
            typ: TOKEN_TYPE.to_string(),
            sub: "alice".to_string(),
            iat: now.timestamp(),
            exp: (now + ChronoDuration::hours(1)).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &svc.encoding_key).unwrap();
        assert_eq!(svc.verify(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn wrong_type_is_malformed() {
        let svc = service();
        let now = Utc::now();
        let claims = Claims {
            iss: ISSUER.to_string(),
            typ: "refresh".to_string(),
            sub: "alice".to_string(),
            iat: now.timestamp(),
            exp: (now + ChronoDuration::hours(1)).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &svc.encoding_key).unwrap();
        assert_eq!(svc.verify(&token), Err(TokenError::Malformed));
    }
}
