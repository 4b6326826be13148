// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Refresh-token ledger operations.
//!
//! Raw tokens never reach the store: every operation hashes first. Each
//! mutation is a single [`UserStore::update_user`] call, so a rotation
//! either replaces the presented record or fails, and two concurrent
//! rotations of the same token cannot both succeed.

use crate::db::{UpdateOutcome, UserStore};
use crate::error::AppError;
use crate::models::{RefreshTokenRecord, User};
use crate::services::tokens::hash_refresh_token;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RefreshTokenLedger {
    store: Arc<dyn UserStore>,
}

fn valid_until(ttl: Duration) -> Result<chrono::DateTime<Utc>, AppError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Refresh token TTL out of range")))
}

impl RefreshTokenLedger {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// Record a new session for `user_id` that lives for `ttl`.
    pub async fn add(&self, user_id: &str, raw_token: &str, ttl: Duration) -> Result<User, AppError> {
        let record = RefreshTokenRecord {
            token: hash_refresh_token(raw_token),
            valid_until: valid_until(ttl)?,
        };

        let outcome = self
            .store
            .update_user(user_id, &|user: &mut User| {
                user.push_refresh_token(record.clone(), Utc::now());
                true
            })
            .await?;

        outcome
            .into_user()
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// The user whose ledger contains `raw_token`, whether or not it has expired.
    pub async fn find_owner(&self, raw_token: &str) -> Result<Option<User>, AppError> {
        let hash = hash_refresh_token(raw_token);
        let owner = self.store.find_user_by_refresh_hash(&hash).await?;

        // Guard against a stale index entry.
        Ok(owner.filter(|user| user.find_refresh_token(&hash).is_some()))
    }

    /// Replace the still-valid record for `old_raw` with one for `new_raw`.
    ///
    /// Fails with [`AppError::RefreshTokenExpired`] if the old record is
    /// absent or expired, including when a concurrent rotation got there first.
    pub async fn rotate(
        &self,
        user_id: &str,
        old_raw: &str,
        new_raw: &str,
        ttl: Duration,
    ) -> Result<User, AppError> {
        let old_hash = hash_refresh_token(old_raw);
        let replacement = RefreshTokenRecord {
            token: hash_refresh_token(new_raw),
            valid_until: valid_until(ttl)?,
        };

        let outcome = self
            .store
            .update_user(user_id, &|user: &mut User| {
                user.rotate_refresh_token(&old_hash, replacement.clone(), Utc::now())
            })
            .await?;

        match outcome {
            UpdateOutcome::Updated(user) => {
                tracing::debug!(user_id = %user_id, "Refresh token rotated");
                Ok(user)
            }
            UpdateOutcome::Unchanged(_) | UpdateOutcome::Missing => {
                tracing::info!(user_id = %user_id, "Refresh token rotation refused");
                Err(AppError::RefreshTokenExpired)
            }
        }
    }

    /// Drop the record for `raw_token`. Returns whether one was removed.
    pub async fn revoke(&self, user_id: &str, raw_token: &str) -> Result<bool, AppError> {
        let hash = hash_refresh_token(raw_token);
        let outcome = self
            .store
            .update_user(user_id, &|user: &mut User| user.remove_refresh_token(&hash))
            .await?;

        Ok(matches!(outcome, UpdateOutcome::Updated(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDb;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    async fn setup() -> (Arc<MemoryDb>, RefreshTokenLedger, User) {
        let store = Arc::new(MemoryDb::new());
        let user = User::new_local("a@b.com", "ann", "s:h".to_string(), Utc::now());
        store.create_user(&user).await.unwrap();
        let ledger = RefreshTokenLedger::new(store.clone());
        (store, ledger, user)
    }

    #[tokio::test]
    async fn test_add_stores_only_digest() {
        let (store, ledger, user) = setup().await;
        ledger.add(&user.id, "raw-token", WEEK).await.unwrap();

        let stored = store.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_tokens.len(), 1);
        assert_eq!(stored.refresh_tokens[0].token, hash_refresh_token("raw-token"));
        assert!(stored.refresh_tokens.iter().all(|r| r.token != "raw-token"));
    }

    #[tokio::test]
    async fn test_add_with_oversized_ttl() {
        let (store, ledger, user) = setup().await;
        let err = ledger
            .add(&user.id, "raw", Duration::from_secs(i64::MAX as u64))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let stored = store.get_user(&user.id).await.unwrap().unwrap();
        assert!(stored.refresh_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_add_for_missing_user() {
        let (_, ledger, _) = setup().await;
        let err = ledger.add("ghost", "raw", WEEK).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_rotation_is_single_use() {
        let (_, ledger, user) = setup().await;
        ledger.add(&user.id, "r1", WEEK).await.unwrap();

        let owner = ledger.find_owner("r1").await.unwrap().unwrap();
        assert_eq!(owner.id, user.id);

        ledger.rotate(&user.id, "r1", "r2", WEEK).await.unwrap();

        assert!(ledger.find_owner("r1").await.unwrap().is_none());
        assert!(ledger.find_owner("r2").await.unwrap().is_some());

        let err = ledger.rotate(&user.id, "r1", "r3", WEEK).await.unwrap_err();
        assert!(matches!(err, AppError::RefreshTokenExpired));
    }

    #[tokio::test]
    async fn test_rotate_expired_record_fails() {
        let (store, ledger, user) = setup().await;
        let stale = RefreshTokenRecord {
            token: hash_refresh_token("stale"),
            valid_until: Utc::now() - chrono::Duration::seconds(5),
        };
        store
            .update_user(&user.id, &|u: &mut User| {
                u.refresh_tokens.push(stale.clone());
                true
            })
            .await
            .unwrap();

        // Expired records are still found, but cannot be rotated.
        assert!(ledger.find_owner("stale").await.unwrap().is_some());
        let err = ledger.rotate(&user.id, "stale", "fresh", WEEK).await.unwrap_err();
        assert!(matches!(err, AppError::RefreshTokenExpired));
    }

    #[tokio::test]
    async fn test_revoke_then_rotate_fails() {
        let (_, ledger, user) = setup().await;
        ledger.add(&user.id, "r1", WEEK).await.unwrap();
        ledger.add(&user.id, "other-device", WEEK).await.unwrap();

        assert!(ledger.revoke(&user.id, "r1").await.unwrap());
        assert!(!ledger.revoke(&user.id, "r1").await.unwrap());

        assert!(ledger.find_owner("r1").await.unwrap().is_none());
        assert!(ledger.rotate(&user.id, "r1", "r2", WEEK).await.is_err());

        // Other sessions are untouched.
        assert!(ledger.find_owner("other-device").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_rotations_single_winner() {
        let (_, ledger, user) = setup().await;
        ledger.add(&user.id, "shared", WEEK).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let ledger = ledger.clone();
            let id = user.id.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .rotate(&id, "shared", &format!("next-{i}"), WEEK)
                    .await
                    .is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
