//! Session Token Validation
//!
//! The server does not issue credentials; an external identity service does.
//! It only verifies the HS256 token supplied once at connect time and trusts
//! the user id inside. A connection that fails validation is terminated
//! before any gateway event is accepted.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token is expired, malformed, or has a bad signature.
    #[error("Invalid session token")]
    InvalidToken,

    /// Token subject is not a valid user id.
    #[error("Invalid user id in token")]
    InvalidSubject,
}

/// JWT claims carried by a session token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID as UUID string).
    pub sub: String,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
    /// Issued at (Unix timestamp).
    pub iat: i64,
}

/// Validate a session token and extract the authenticated user id.
pub fn authenticate(token: &str, secret: &str) -> Result<Uuid, AuthError> {
    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AuthError::InvalidToken)?
    .claims;

    Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidSubject)
}

/// Issue a session token for a user.
///
/// The production identity service signs tokens with the same secret; this
/// exists for local development and tests.
pub fn issue_token(user_id: Uuid, secret: &str, expiry_seconds: i64) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (now + Duration::seconds(expiry_seconds)).timestamp(),
        iat: now.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|_| AuthError::InvalidToken)
}
