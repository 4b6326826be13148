// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Password hashing at rest.
//!
//! Stored format is `salt:digest`, where `salt` is 16 random bytes
//! hex-encoded and `digest` is the hex PBKDF2-HMAC-SHA256 output
//! (1000 iterations, 64 bytes) keyed with the salt's hex text.

use crate::error::AppError;
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use std::num::NonZeroU32;

pub const PBKDF2_ITERATIONS: u32 = 1000;
pub const DIGEST_LEN: usize = 64;
pub const SALT_LEN: usize = 16;

static ALGORITHM: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

fn iterations() -> NonZeroU32 {
    NonZeroU32::new(PBKDF2_ITERATIONS).unwrap_or(NonZeroU32::MIN)
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt = [0u8; SALT_LEN];
    SystemRandom::new()
        .fill(&mut salt)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG failure")))?;
    let salt = hex::encode(salt);

    let mut digest = [0u8; DIGEST_LEN];
    pbkdf2::derive(
        ALGORITHM,
        iterations(),
        salt.as_bytes(),
        password.as_bytes(),
        &mut digest,
    );

    Ok(format!("{}:{}", salt, hex::encode(digest)))
}

/// Check `password` against a stored `salt:digest`.
///
/// Absent or malformed stored values verify as `false`.
pub fn verify_password(password: &str, stored: Option<&str>) -> bool {
    let Some((salt, digest_hex)) = stored.and_then(|s| s.split_once(':')) else {
        return false;
    };
    if salt.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(digest_hex) else {
        return false;
    };
    if expected.len() != DIGEST_LEN {
        return false;
    }

    // Constant-time comparison inside ring.
    pbkdf2::verify(
        ALGORITHM,
        iterations(),
        salt.as_bytes(),
        password.as_bytes(),
        &expected,
    )
    .is_ok()
}

/// [`hash_password`] off the async executor.
pub async fn hash_password_blocking(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Hashing task failed: {}", e)))?
}

/// [`verify_password`] off the async executor.
pub async fn verify_password_blocking(password: String, stored: Option<String>) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, stored.as_deref()))
        .await
        .unwrap_or(false)
}
