//! Persistence seam for users and the short-lived OTP records.
//!
//! Every user lookup only sees rows with `deleted = false`; soft-deleted users
//! are invisible to the auth flows.

mod memory;
mod models;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::{
    Credentials, NewUser, PasswordReset, PendingActivation, Role, User, UserPatch, UserProfile,
};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("email already in use")]
    DuplicateEmail,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credentials>, StoreError>;

    async fn list_users(
        &self,
        role: Option<Role>,
        skip: i64,
        take: i64,
    ) -> Result<Vec<User>, StoreError>;

    /// Live users matching the same filter as `list_users`, ignoring the window.
    async fn count_users(&self, role: Option<Role>) -> Result<i64, StoreError>;

    /// Fails with `DuplicateEmail` when a live user already owns the email.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Deletes the pending activation for `user.email` and inserts the user as
    /// one operation. On `DuplicateEmail` nothing changes.
    async fn create_user_from_pending(&self, user: NewUser) -> Result<User, StoreError>;

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<User, StoreError>;

    /// Writes both token hashes in one update. Returns `false` when no live user matched.
    async fn set_token_hashes(
        &self,
        id: Uuid,
        hashed_at: Option<&str>,
        hashed_rt: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Marks the user deleted and clears both token hashes.
    async fn soft_delete_user(&self, id: Uuid, deleted_by: Uuid) -> Result<User, StoreError>;

    /// Removes any previous pending activation for the email and stores this one.
    async fn replace_pending_activation(
        &self,
        pending: &PendingActivation,
    ) -> Result<(), StoreError>;

    async fn find_pending_activation(
        &self,
        email: &str,
    ) -> Result<Option<PendingActivation>, StoreError>;

    async fn delete_pending_activation(&self, email: &str) -> Result<(), StoreError>;

    /// Removes any previous reset request for the email and stores this one.
    async fn replace_password_reset(&self, reset: &PasswordReset) -> Result<(), StoreError>;

    async fn find_password_reset(&self, email: &str)
        -> Result<Option<PasswordReset>, StoreError>;

    async fn delete_password_reset(&self, email: &str) -> Result<(), StoreError>;

    /// Deletes the reset request and stores the new password hash as one operation.
    async fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError>;
}
