//! Database layer: the `UserStore` abstraction and its backends.
//!
//! Both backends expose a single atomic read-modify-write primitive,
//! [`UserStore::update_user`]. Ledger rotation, revocation, account linking
//! and profile edits all go through it, so none of them can lose a
//! concurrent update to the same user document.

pub mod firestore;
pub mod memory;

pub use self::firestore::FirestoreDb;
pub use memory::MemoryDb;

use crate::error::AppError;
use crate::models::User;
use async_trait::async_trait;
use std::collections::HashSet;

/// Collection names as constants.
pub mod collections {
    pub const USERS: &str = "users";
    /// Uniqueness index: sha256(email) -> user id
    pub const USER_EMAILS: &str = "user_emails";
    /// Ledger index: refresh token digest -> user id
    pub const REFRESH_TOKENS: &str = "refresh_tokens";
}

/// Mutation callback for [`UserStore::update_user`].
///
/// Returns `true` if it changed the user and the change must be persisted.
/// May be invoked more than once when a backend retries on contention.
pub type UserMutation<'a> = &'a (dyn Fn(&mut User) -> bool + Send + Sync);

/// Result of an atomic update.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// No user with that id.
    Missing,
    /// The mutation declined to change anything; carries the current document.
    Unchanged(User),
    /// The mutation was applied and persisted; carries the new document.
    Updated(User),
}

impl UpdateOutcome {
    pub fn into_user(self) -> Option<User> {
        match self {
            UpdateOutcome::Missing => None,
            UpdateOutcome::Unchanged(user) | UpdateOutcome::Updated(user) => Some(user),
        }
    }
}

/// Persistence for user documents and their refresh-token ledgers.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;

    /// Look up by email (normalized by the caller or the backend).
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    /// Find the user whose ledger holds `token_hash`, expired or not.
    async fn find_user_by_refresh_hash(&self, token_hash: &str)
        -> Result<Option<User>, AppError>;

    /// Insert a new user. Fails with [`AppError::Conflict`] if the email is taken.
    async fn create_user(&self, user: &User) -> Result<(), AppError>;

    /// Atomically apply `apply` to the stored user.
    async fn update_user(&self, id: &str, apply: UserMutation<'_>)
        -> Result<UpdateOutcome, AppError>;

    /// Hard-delete a user and its index entries. Returns whether it existed.
    async fn delete_user(&self, id: &str) -> Result<bool, AppError>;
}

/// Ledger digests present in `after` but not `before`, and vice versa.
pub(crate) fn ledger_diff(before: &User, after: &User) -> (Vec<String>, Vec<String>) {
    let old: HashSet<&str> = before.refresh_tokens.iter().map(|r| r.token.as_str()).collect();
    let new: HashSet<&str> = after.refresh_tokens.iter().map(|r| r.token.as_str()).collect();

    let added = new.difference(&old).map(|s| s.to_string()).collect();
    let removed = old.difference(&new).map(|s| s.to_string()).collect();
    (added, removed)
}
