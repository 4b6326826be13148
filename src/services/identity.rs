// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Resolve a Google credential to a local user account.
//!
//! Accounts are keyed by email. An existing Google account is reused as-is,
//! an existing local account is linked, and an unknown email provisions a
//! new Google account.

use crate::db::UserStore;
use crate::error::AppError;
use crate::models::{AuthProvider, User};
use crate::services::google_oidc::{GoogleIdentity, IdTokenVerifier, OidcError};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct IdentityBridge {
    store: Arc<dyn UserStore>,
    verifier: Arc<dyn IdTokenVerifier>,
}

impl IdentityBridge {
    pub fn new(store: Arc<dyn UserStore>, verifier: Arc<dyn IdTokenVerifier>) -> Self {
        Self { store, verifier }
    }

    /// Verify `credential` and return the matching user, creating or
    /// linking as needed.
    pub async fn resolve(&self, credential: &str) -> Result<User, AppError> {
        let identity = self
            .verifier
            .verify_id_token(credential)
            .await
            .map_err(|e| match e {
                OidcError::Forbidden(reason) => {
                    tracing::warn!(reason = %reason, "Google credential rejected");
                    AppError::InvalidAssertion("Invalid Google credential".to_string())
                }
                OidcError::Transient(reason) => {
                    AppError::Internal(anyhow::anyhow!("Google verification unavailable: {reason}"))
                }
            })?;

        self.resolve_identity(&identity).await
    }

    /// Map an already verified identity to a user.
    pub async fn resolve_identity(&self, identity: &GoogleIdentity) -> Result<User, AppError> {
        if let Some(existing) = self.store.find_user_by_email(&identity.email).await? {
            return self.link(existing, identity).await;
        }

        let user = User::new_google(
            &identity.email,
            &identity.subject,
            identity.name.as_deref(),
            identity.picture.as_deref(),
            Utc::now(),
        );

        match self.store.create_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, "Provisioned user from Google sign-in");
                Ok(user)
            }
            Err(AppError::Conflict(_)) => {
                // Another request created this email first; use theirs.
                let existing = self
                    .store
                    .find_user_by_email(&identity.email)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal(anyhow::anyhow!("Email index points at no user"))
                    })?;
                self.link(existing, identity).await
            }
            Err(e) => Err(e),
        }
    }

    async fn link(&self, existing: User, identity: &GoogleIdentity) -> Result<User, AppError> {
        if existing.provider == AuthProvider::Google {
            if existing.provider_id.as_deref() != Some(identity.subject.as_str()) {
                tracing::warn!(
                    user_id = %existing.id,
                    "Google subject differs from the one on record"
                );
            }
            return Ok(existing);
        }

        let outcome = self
            .store
            .update_user(&existing.id, &|user: &mut User| {
                user.link_google(
                    &identity.subject,
                    identity.name.as_deref(),
                    identity.picture.as_deref(),
                )
            })
            .await?;

        let user = outcome
            .into_user()
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
        tracing::info!(user_id = %user.id, "Linked local account to Google");
        Ok(user)
    }
}
