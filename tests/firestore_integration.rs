// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore integration tests.
//!
//! These tests require the Firestore emulator to be running
//! (`FIRESTORE_EMULATOR_HOST`); they are skipped otherwise.
//!
//! Every test uses fresh random emails and ids, so reruns against a
//! long-lived emulator do not collide.

use chrono::{Duration, Utc};
use reelreview::db::{UpdateOutcome, UserStore};
use reelreview::error::AppError;
use reelreview::models::{AuthProvider, RefreshTokenRecord, User};
use reelreview::services::tokens::hash_refresh_token;
use reelreview::services::RefreshTokenLedger;
use std::sync::Arc;

mod common;
use common::test_db;

fn unique_email(tag: &str) -> String {
    format!("{}-{}@example.com", tag, uuid::Uuid::new_v4().simple())
}

fn local_user(email: &str) -> User {
    User::new_local(email, "Test User", "salt:hash".to_string(), Utc::now())
}

// ═══════════════════════════════════════════════════════════════════════════
// USER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_create_and_lookup_user() {
    require_emulator!();

    let db = test_db().await;
    let email = unique_email("create");
    let user = local_user(&email);

    assert!(db.get_user(&user.id).await.unwrap().is_none());
    db.create_user(&user).await.unwrap();

    let by_id = db.get_user(&user.id).await.unwrap().expect("user by id");
    assert_eq!(by_id.email, email);
    assert_eq!(by_id.provider, AuthProvider::Local);

    let by_email = db
        .find_user_by_email(&email.to_uppercase())
        .await
        .unwrap()
        .expect("user by email");
    assert_eq!(by_email.id, user.id);
}

#[tokio::test]
async fn test_duplicate_email_conflicts() {
    require_emulator!();

    let db = test_db().await;
    let email = unique_email("dup");
    db.create_user(&local_user(&email)).await.unwrap();

    let err = db.create_user(&local_user(&email)).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn test_update_user_outcomes() {
    require_emulator!();

    let db = test_db().await;
    let user = local_user(&unique_email("update"));
    db.create_user(&user).await.unwrap();

    let unchanged = db.update_user(&user.id, &|_: &mut User| false).await.unwrap();
    assert!(matches!(unchanged, UpdateOutcome::Unchanged(ref u) if u.version == 0));

    let updated = db
        .update_user(&user.id, &|u: &mut User| {
            u.username = "Renamed".to_string();
            true
        })
        .await
        .unwrap();
    assert!(matches!(updated, UpdateOutcome::Updated(ref u) if u.version == 1));

    let missing = db
        .update_user("no-such-user", &|_: &mut User| true)
        .await
        .unwrap();
    assert!(matches!(missing, UpdateOutcome::Missing));
}

#[tokio::test]
async fn test_delete_user_frees_email() {
    require_emulator!();

    let db = test_db().await;
    let email = unique_email("delete");
    let mut user = local_user(&email);
    user.refresh_tokens.push(RefreshTokenRecord {
        token: hash_refresh_token(&uuid::Uuid::new_v4().to_string()),
        valid_until: Utc::now() + Duration::days(1),
    });
    let digest = user.refresh_tokens[0].token.clone();
    db.create_user(&user).await.unwrap();

    assert!(db.delete_user(&user.id).await.unwrap());
    assert!(!db.delete_user(&user.id).await.unwrap());
    assert!(db.find_user_by_email(&email).await.unwrap().is_none());
    assert!(db.find_user_by_refresh_hash(&digest).await.unwrap().is_none());

    db.create_user(&local_user(&email)).await.unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════
// LEDGER TESTS
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_ledger_rotation_on_firestore() {
    require_emulator!();

    let db = Arc::new(test_db().await);
    let user = local_user(&unique_email("ledger"));
    db.create_user(&user).await.unwrap();

    let ledger = RefreshTokenLedger::new(db.clone());
    let week = std::time::Duration::from_secs(7 * 24 * 60 * 60);
    let r1 = uuid::Uuid::new_v4().to_string();
    let r2 = uuid::Uuid::new_v4().to_string();

    ledger.add(&user.id, &r1, week).await.unwrap();
    let owner = ledger.find_owner(&r1).await.unwrap().expect("owner");
    assert_eq!(owner.id, user.id);

    ledger.rotate(&user.id, &r1, &r2, week).await.unwrap();
    assert!(ledger.find_owner(&r1).await.unwrap().is_none());
    assert!(ledger.find_owner(&r2).await.unwrap().is_some());

    let err = ledger.rotate(&user.id, &r1, "r3", week).await.unwrap_err();
    assert!(matches!(err, AppError::RefreshTokenExpired));

    assert!(ledger.revoke(&user.id, &r2).await.unwrap());
    assert!(ledger.find_owner(&r2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_rotation_single_winner_on_firestore() {
    require_emulator!();

    let db = Arc::new(test_db().await);
    let user = local_user(&unique_email("race"));
    db.create_user(&user).await.unwrap();

    let ledger = RefreshTokenLedger::new(db.clone());
    let week = std::time::Duration::from_secs(7 * 24 * 60 * 60);
    let shared = uuid::Uuid::new_v4().to_string();
    ledger.add(&user.id, &shared, week).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let ledger = ledger.clone();
        let id = user.id.clone();
        let shared = shared.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .rotate(&id, &shared, &format!("{shared}-next-{i}"), week)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => winners += 1,
            // Losers either see the record gone or exhaust contention retries.
            Err(AppError::RefreshTokenExpired) | Err(AppError::Database(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(winners, 1);

    let stored = db.get_user(&user.id).await.unwrap().unwrap();
    assert_eq!(stored.refresh_tokens.len(), 1);
}
