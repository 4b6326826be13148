// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process user store for local development and tests.
//!
//! Atomicity comes from `DashMap` shard guards: `update_user` holds the
//! write guard of the user's entry for the whole check-and-replace.

use crate::db::{ledger_diff, UpdateOutcome, UserMutation, UserStore};
use crate::error::AppError;
use crate::models::{normalize_email, User};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// In-memory store keyed by user id, with email and ledger indexes.
#[derive(Default)]
pub struct MemoryDb {
    users: DashMap<String, User>,
    /// normalized email -> user id
    emails: DashMap<String, String>,
    /// refresh token digest -> user id
    refresh_index: DashMap<String, String>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for MemoryDb {
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let Some(id) = self.emails.get(&normalize_email(email)).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get_user(&id).await
    }

    async fn find_user_by_refresh_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<User>, AppError> {
        let Some(id) = self.refresh_index.get(token_hash).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get_user(&id).await
    }

    async fn create_user(&self, user: &User) -> Result<(), AppError> {
        match self.emails.entry(normalize_email(&user.email)) {
            Entry::Occupied(_) => Err(AppError::Conflict("Email already registered".to_string())),
            Entry::Vacant(slot) => {
                for record in &user.refresh_tokens {
                    self.refresh_index
                        .insert(record.token.clone(), user.id.clone());
                }
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                tracing::debug!(user_id = %user.id, "User created in memory store");
                Ok(())
            }
        }
    }

    async fn update_user(
        &self,
        id: &str,
        apply: UserMutation<'_>,
    ) -> Result<UpdateOutcome, AppError> {
        let Some(mut entry) = self.users.get_mut(id) else {
            return Ok(UpdateOutcome::Missing);
        };

        let mut updated = entry.clone();
        if !apply(&mut updated) {
            return Ok(UpdateOutcome::Unchanged(updated));
        }
        updated.touch(Utc::now());

        let (added, removed) = ledger_diff(&entry, &updated);
        for hash in removed {
            self.refresh_index.remove(&hash);
        }
        for hash in added {
            self.refresh_index.insert(hash, id.to_string());
        }

        *entry = updated.clone();
        Ok(UpdateOutcome::Updated(updated))
    }

    async fn delete_user(&self, id: &str) -> Result<bool, AppError> {
        let Some((_, user)) = self.users.remove(id) else {
            return Ok(false);
        };

        self.emails.remove(&normalize_email(&user.email));
        for record in &user.refresh_tokens {
            self.refresh_index.remove(&record.token);
        }

        tracing::debug!(user_id = %id, "User deleted from memory store");
        Ok(true)
    }
}
