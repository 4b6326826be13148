//! User model for storage and API.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Authorization role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// How the account authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Local,
    Google,
}

/// One active refresh session. Only the SHA-256 digest of the raw token is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    /// Hex SHA-256 digest of the raw refresh token
    pub token: String,
    /// Absolute expiry
    pub valid_until: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

/// User document stored in Firestore (document ID = `id`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    /// Display name; empty when never set
    #[serde(default)]
    pub username: String,
    /// Lowercased, unique across users
    pub email: String,
    #[serde(default)]
    pub profile_picture: Option<String>,
    /// `salt:hash`, present only for locally created accounts
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub provider: AuthProvider,
    /// Google subject identifier, set only when `provider` is Google
    #[serde(default)]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshTokenRecord>,
    pub created_at: String,
    pub updated_at: String,
    /// Bumped on every write.
    #[serde(default)]
    pub version: u64,
}

impl User {
    /// New password-authenticated account.
    pub fn new_local(
        email: &str,
        username: &str,
        password_hash: String,
        now: DateTime<Utc>,
    ) -> Self {
        let ts = rfc3339(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.trim().to_string(),
            email: normalize_email(email),
            profile_picture: None,
            password_hash: Some(password_hash),
            provider: AuthProvider::Local,
            provider_id: None,
            role: Role::User,
            refresh_tokens: Vec::new(),
            created_at: ts.clone(),
            updated_at: ts,
            version: 0,
        }
    }

    /// New account provisioned from a Google identity. No password is set.
    pub fn new_google(
        email: &str,
        subject: &str,
        name: Option<&str>,
        picture: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        let ts = rfc3339(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: name.unwrap_or_default().trim().to_string(),
            email: normalize_email(email),
            profile_picture: picture.filter(|p| !p.is_empty()).map(str::to_string),
            password_hash: None,
            provider: AuthProvider::Google,
            provider_id: Some(subject.to_string()),
            role: Role::User,
            refresh_tokens: Vec::new(),
            created_at: ts.clone(),
            updated_at: ts,
            version: 0,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Link this account to a Google subject.
    ///
    /// Display fields are only backfilled when empty. Returns `true` if the
    /// document changed.
    pub fn link_google(&mut self, subject: &str, name: Option<&str>, picture: Option<&str>) -> bool {
        if self.provider == AuthProvider::Google {
            return false;
        }

        self.provider = AuthProvider::Google;
        self.provider_id = Some(subject.to_string());

        if self.username.trim().is_empty() {
            if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
                self.username = name.trim().to_string();
            }
        }

        let has_picture = self
            .profile_picture
            .as_deref()
            .is_some_and(|p| !p.is_empty());
        if !has_picture {
            if let Some(picture) = picture.filter(|p| !p.is_empty()) {
                self.profile_picture = Some(picture.to_string());
            }
        }

        true
    }

    /// Mark the document as written at `now`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = rfc3339(now);
        self.version += 1;
    }

    // ─── Refresh-token ledger ────────────────────────────────────

    /// Append a record, dropping records that have already expired.
    pub fn push_refresh_token(&mut self, record: RefreshTokenRecord, now: DateTime<Utc>) {
        self.refresh_tokens.retain(|r| r.is_valid_at(now));
        self.refresh_tokens.retain(|r| r.token != record.token);
        self.refresh_tokens.push(record);
    }

    /// Replace, in place, the still-valid record whose digest is `old_hash`.
    ///
    /// Returns `false` when no such record exists or it has expired.
    pub fn rotate_refresh_token(
        &mut self,
        old_hash: &str,
        replacement: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> bool {
        match self
            .refresh_tokens
            .iter_mut()
            .find(|r| r.token == old_hash && r.is_valid_at(now))
        {
            Some(slot) => {
                *slot = replacement;
                true
            }
            None => false,
        }
    }

    /// Remove the record with digest `hash`. Returns whether one was removed.
    pub fn remove_refresh_token(&mut self, hash: &str) -> bool {
        let before = self.refresh_tokens.len();
        self.refresh_tokens.retain(|r| r.token != hash);
        self.refresh_tokens.len() != before
    }

    pub fn find_refresh_token(&self, hash: &str) -> Option<&RefreshTokenRecord> {
        self.refresh_tokens.iter().find(|r| r.token == hash)
    }

    pub fn has_valid_refresh_token(&self, now: DateTime<Utc>) -> bool {
        self.refresh_tokens.iter().any(|r| r.is_valid_at(now))
    }

    /// Apply a profile edit. Returns `true` if anything changed.
    pub fn apply_update(&mut self, update: &ProfileUpdate) -> bool {
        let mut changed = false;

        if let Some(username) = &update.username {
            if self.username != *username {
                self.username = username.clone();
                changed = true;
            }
        }
        if let Some(picture) = &update.profile_picture {
            if self.profile_picture != *picture {
                self.profile_picture = picture.clone();
                changed = true;
            }
        }
        if let Some(hash) = &update.password_hash {
            self.password_hash = Some(hash.clone());
            changed = true;
        }
        if let Some(role) = update.role {
            if self.role != role {
                self.role = role;
                changed = true;
            }
        }

        changed
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            username: self.username.clone(),
            profile_picture: self.profile_picture.clone(),
            role: self.role,
            provider: self.provider,
        }
    }
}

/// Fields a profile edit may touch; `None` leaves the field alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    /// `Some(None)` clears the picture.
    pub profile_picture: Option<Option<String>>,
    /// Already hashed.
    pub password_hash: Option<String>,
    pub role: Option<Role>,
}

/// Public view of a user. Never carries the password hash or the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub email: String,
    pub username: String,
    pub profile_picture: Option<String>,
    pub role: Role,
    pub provider: AuthProvider,
}

/// RFC3339 with a `Z` suffix, second precision.
fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Canonical form used for uniqueness checks and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
