// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (profile, credentials, refresh-token ledger)
//! - Email index (uniqueness)
//! - Refresh-token index (digest -> owner lookup)
//!
//! Every write runs in a Firestore transaction whose reads are performed
//! inside the transaction, so Firestore serializes conflicting writers.

use crate::db::{collections, ledger_diff, UpdateOutcome, UserMutation, UserStore};
use crate::error::AppError;
use crate::models::{normalize_email, User};
use async_trait::async_trait;
use chrono::Utc;
use firestore::FirestoreConsistencySelector;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Commit attempts before giving up on a contended document.
const MAX_TRANSACTION_ATTEMPTS: u32 = 3;

/// Index document pointing back at a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRef {
    user_id: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: firestore::FirestoreDb,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        // If the emulator environment variable is set, use unauthenticated connection
        // to avoid local credential warnings and leakage.
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self { client })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self { client })
    }

    async fn get_user_ref(&self, collection: &str, key: &str) -> Result<Option<UserRef>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collection)
            .obj()
            .one(key)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

/// Document id for the email uniqueness index.
///
/// Hashed because raw emails may contain characters Firestore rejects in ids.
fn email_key(email: &str) -> String {
    hex::encode(Sha256::digest(normalize_email(email).as_bytes()))
}

#[async_trait]
impl UserStore for FirestoreDb {
    // ─── Reads ───────────────────────────────────────────────────

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        self.client
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        match self
            .get_user_ref(collections::USER_EMAILS, &email_key(email))
            .await?
        {
            Some(user_ref) => self.get_user(&user_ref.user_id).await,
            None => Ok(None),
        }
    }

    async fn find_user_by_refresh_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, AppError> {
        match self
            .get_user_ref(collections::REFRESH_TOKENS, token_hash)
            .await?
        {
            Some(user_ref) => self.get_user(&user_ref.user_id).await,
            None => Ok(None),
        }
    }

    // ─── Transactional writes ────────────────────────────────────

    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        let key = email_key(&user.email);
        let user_ref = UserRef {
            user_id: user.id.clone(),
        };
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut transaction = self
                .client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
            let tx_db = self.client.clone_with_consistency_selector(
                FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
            );

            // Reading the index inside the transaction locks it against a
            // concurrent signup for the same email.
            let existing: Option<UserRef> = tx_db
                .fluent()
                .select()
                .by_id_in(collections::USER_EMAILS)
                .obj()
                .one(&key)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            if existing.is_some() {
                let _ = transaction.rollback().await;
                return Err(AppError::Conflict("Email already registered".to_string()));
            }

            self.client
                .fluent()
                .update()
                .in_col(collections::USER_EMAILS)
                .document_id(&key)
                .object(&user_ref)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add email index to transaction: {}", e))
                })?;

            self.client
                .fluent()
                .update()
                .in_col(collections::USERS)
                .document_id(&user.id)
                .object(user)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add user to transaction: {}", e))
                })?;

            for record in &user.refresh_tokens {
                self.client
                    .fluent()
                    .update()
                    .in_col(collections::REFRESH_TOKENS)
                    .document_id(&record.token)
                    .object(&user_ref)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add ledger index to transaction: {}",
                            e
                        ))
                    })?;
            }

            match transaction.commit().await {
                Ok(_) => {
                    tracing::info!(user_id = %user.id, "User created");
                    return Ok(());
                }
                Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "User creation commit failed, retrying");
                }
                Err(e) => {
                    return Err(AppError::Database(format!(
                        "Transaction commit failed: {}",
                        e
                    )))
                }
            }
        }
    }

    async fn update_user(
        &self,
        id: &str,
        apply: UserMutation<'_>,
    ) -> Result<UpdateOutcome, AppError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            let mut transaction = self
                .client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
            let tx_db = self.client.clone_with_consistency_selector(
                FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
            );

            // 1. Read the current document within the transaction
            let current: Option<User> = tx_db
                .fluent()
                .select()
                .by_id_in(collections::USERS)
                .obj()
                .one(id)
                .await
                .map_err(|e| {
                    AppError::Database(format!("Failed to read user in transaction: {}", e))
                })?;

            let Some(current) = current else {
                let _ = transaction.rollback().await;
                return Ok(UpdateOutcome::Missing);
            };

            // 2. Apply the mutation in memory
            let mut updated = current.clone();
            if !apply(&mut updated) {
                let _ = transaction.rollback().await;
                return Ok(UpdateOutcome::Unchanged(current));
            }
            updated.touch(Utc::now());

            // 3. Stage the document write
            self.client
                .fluent()
                .update()
                .in_col(collections::USERS)
                .document_id(id)
                .object(&updated)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!("Failed to add user to transaction: {}", e))
                })?;

            // 4. Stage ledger index changes
            let (added, removed) = ledger_diff(&current, &updated);
            for hash in &removed {
                self.client
                    .fluent()
                    .delete()
                    .from(collections::REFRESH_TOKENS)
                    .document_id(hash)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add ledger removal to transaction: {}",
                            e
                        ))
                    })?;
            }
            let user_ref = UserRef {
                user_id: id.to_string(),
            };
            for hash in &added {
                self.client
                    .fluent()
                    .update()
                    .in_col(collections::REFRESH_TOKENS)
                    .document_id(hash)
                    .object(&user_ref)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add ledger index to transaction: {}",
                            e
                        ))
                    })?;
            }

            // 5. Commit; a concurrent writer makes this fail and we re-read
            match transaction.commit().await {
                Ok(_) => {
                    tracing::debug!(
                        user_id = %id,
                        version = updated.version,
                        ledger_added = added.len(),
                        ledger_removed = removed.len(),
                        "User updated"
                    );
                    return Ok(UpdateOutcome::Updated(updated));
                }
                Err(e) if attempt < MAX_TRANSACTION_ATTEMPTS => {
                    tracing::warn!(user_id = %id, attempt, error = %e, "User update conflicted, retrying");
                }
                Err(e) => {
                    return Err(AppError::Database(format!(
                        "Transaction commit failed: {}",
                        e
                    )))
                }
            }
        }
    }

    async fn delete_user(&self, id: &str) -> Result<bool, AppError> {
        let mut transaction = self
            .client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;
        let tx_db = self.client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );

        let current: Option<User> = tx_db
            .fluent()
            .select()
            .by_id_in(collections::USERS)
            .obj()
            .one(id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let Some(user) = current else {
            let _ = transaction.rollback().await;
            return Ok(false);
        };

        let mut doomed: Vec<(&str, String)> = vec![
            (collections::USERS, id.to_string()),
            (collections::USER_EMAILS, email_key(&user.email)),
        ];
        doomed.extend(
            user.refresh_tokens
                .iter()
                .map(|r| (collections::REFRESH_TOKENS, r.token.clone())),
        );

        for (collection, doc_id) in &doomed {
            self.client
                .fluent()
                .delete()
                .from(*collection)
                .document_id(doc_id)
                .add_to_transaction(&mut transaction)
                .map_err(|e| {
                    AppError::Database(format!(
                        "Failed to add deletion to transaction for {}: {}",
                        collection, e
                    ))
                })?;
        }

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Failed to commit user deletion: {}", e)))?;

        tracing::info!(user_id = %id, documents = doomed.len(), "User deleted");
        Ok(true)
    }
}
