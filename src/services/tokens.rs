// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Access token signing and verification, plus refresh token minting.
//!
//! Access tokens are HS256 JWTs carrying `{id, email, role, iat, exp}`.
//! Refresh tokens are opaque: 64 random bytes, hex-encoded. Only their
//! SHA-256 digest is ever persisted.

use crate::config::Config;
use crate::error::AppError;
use crate::models::{Role, User};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Raw refresh token length before hex encoding.
pub const REFRESH_TOKEN_BYTES: usize = 64;

/// Access token claims.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AccessClaims {
    /// User id
    pub id: String,
    pub email: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Why an access token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    /// Signature good, `exp` in the past.
    Expired,
    /// Signature, algorithm or claims check failed.
    Invalid,
    /// Not a JWT at all (wrong segment count, bad base64, bad JSON).
    Malformed,
}

impl From<&jsonwebtoken::errors::Error> for TokenRejection {
    fn from(err: &jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenRejection::Expired,
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => TokenRejection::Malformed,
            _ => TokenRejection::Invalid,
        }
    }
}

impl From<TokenRejection> for AppError {
    fn from(rejection: TokenRejection) -> Self {
        match rejection {
            TokenRejection::Expired => AppError::TokenExpired,
            TokenRejection::Invalid | TokenRejection::Malformed => AppError::InvalidToken,
        }
    }
}

/// Signs and verifies access tokens with the configured shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(config: &Config) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(&config.access_token_secret),
            decoding_key: DecodingKey::from_secret(&config.access_token_secret),
            access_ttl: config.access_token_ttl,
            refresh_ttl: config.refresh_token_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign a fresh access token for `user`.
    pub fn issue_access_token(&self, user: &User) -> Result<String, AppError> {
        self.issue_access_token_at(user, Utc::now())
    }

    /// Sign an access token as if issued at `now`.
    pub fn issue_access_token_at(
        &self,
        user: &User,
        now: DateTime<Utc>,
    ) -> Result<String, AppError> {
        let iat = now.timestamp();
        let exp = i64::try_from(self.access_ttl.as_secs())
            .ok()
            .and_then(|ttl| iat.checked_add(ttl))
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Access token TTL out of range")))?;
        let claims = AccessClaims {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            iat,
            exp,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to sign access token: {}", e)))
    }

    /// Verify signature and expiry.
    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, TokenRejection> {
        self.decode_with(token, true)
    }

    /// Verify the signature only; an expired token still decodes.
    ///
    /// Used to identify the caller when minting a replacement access token.
    pub fn decode_ignoring_expiry(&self, token: &str) -> Result<AccessClaims, TokenRejection> {
        self.decode_with(token, false)
    }

    fn decode_with(&self, token: &str, check_exp: bool) -> Result<AccessClaims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_exp;
        if !check_exp {
            validation.required_spec_claims.remove("exp");
        }

        decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let rejection = TokenRejection::from(&e);
                tracing::debug!(error = %e, ?rejection, "Access token rejected");
                rejection
            })
    }
}

/// Mint a new opaque refresh token.
pub fn generate_refresh_token() -> Result<String, AppError> {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    Ok(hex::encode(bytes))
}

/// Digest under which a refresh token is stored and looked up.
pub fn hash_refresh_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}
