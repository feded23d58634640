use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dto::UserListResponse;
use crate::{
    auth::password::Hasher,
    cache::SessionCache,
    error::AuthError,
    store::{CredentialStore, Role, UserPatch, UserProfile},
};

/// User reads and updates that must keep the session cache honest.
pub struct UserService {
    store: Arc<dyn CredentialStore>,
    cache: SessionCache,
    hasher: Hasher,
}

impl UserService {
    pub fn new(store: Arc<dyn CredentialStore>, cache: SessionCache, hasher: Hasher) -> Self {
        Self {
            store,
            cache,
            hasher,
        }
    }

    /// Read-through: cached projection first, store on miss.
    #[instrument(skip(self))]
    pub async fn profile(&self, id: Uuid) -> Result<UserProfile, AuthError> {
        if let Some(profile) = self.cache.get_user(id).await {
            return Ok(profile);
        }
        let user = self
            .store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".into()))?;
        let profile = UserProfile::from(&user);
        self.cache.put_user(&profile).await;
        Ok(profile)
    }

    /// Admin lookup of any live user, same read-through path as `profile`.
    #[instrument(skip(self))]
    pub async fn find_one(&self, id: Uuid) -> Result<UserProfile, AuthError> {
        self.profile(id).await
    }

    #[instrument(skip(self))]
    pub async fn list(
        &self,
        role: Option<Role>,
        skip: i64,
        take: i64,
    ) -> Result<UserListResponse, AuthError> {
        let users = self.store.list_users(role, skip, take).await?;
        let total_count = self.store.count_users(role).await?;
        Ok(UserListResponse {
            total_count,
            users: users.iter().map(UserProfile::from).collect(),
        })
    }

    #[instrument(skip(self))]
    pub async fn update_profile(
        &self,
        id: Uuid,
        name: Option<String>,
        avatar: Option<String>,
    ) -> Result<UserProfile, AuthError> {
        let patch = UserPatch {
            name,
            avatar,
            ..UserPatch::default()
        };
        let user = self.store.update_user(id, patch).await?;
        self.cache.evict_profile(id).await;
        info!("profile updated");
        Ok(UserProfile::from(&user))
    }

    /// Changing the password ends the current session.
    #[instrument(skip(self, current, new_password))]
    pub async fn update_password(
        &self,
        id: Uuid,
        current: &str,
        new_password: &str,
    ) -> Result<bool, AuthError> {
        let user = self
            .store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".into()))?;
        if !self.hasher.verify(current, &user.password_hash)? {
            warn!("password change with wrong current password");
            return Err(AuthError::PasswordIncorrect);
        }

        let patch = UserPatch {
            password_hash: Some(self.hasher.hash(new_password)?),
            ..UserPatch::default()
        };
        self.store.update_user(id, patch).await?;
        self.revoke_session(id).await?;
        info!("password changed");
        Ok(true)
    }

    /// Admin edit. Tokens carry the role, so a role change also ends the session.
    #[instrument(skip(self))]
    pub async fn admin_update(
        &self,
        id: Uuid,
        name: Option<String>,
        role: Option<Role>,
        avatar: Option<String>,
    ) -> Result<UserProfile, AuthError> {
        let before = self
            .store
            .find_user_by_id(id)
            .await?
            .ok_or_else(|| AuthError::NotFound("User".into()))?;
        let patch = UserPatch {
            name,
            avatar,
            role,
            ..UserPatch::default()
        };
        let user = self.store.update_user(id, patch).await?;
        if user.role != before.role {
            self.revoke_session(id).await?;
            info!(from = %before.role, to = %user.role, "role changed");
        } else {
            self.cache.evict_profile(id).await;
        }
        Ok(UserProfile::from(&user))
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, id: Uuid, deleted_by: Uuid) -> Result<UserProfile, AuthError> {
        let user = self.store.soft_delete_user(id, deleted_by).await?;
        self.cache.evict_user(id).await;
        info!("user soft-deleted");
        Ok(UserProfile::from(&user))
    }

    async fn revoke_session(&self, id: Uuid) -> Result<(), AuthError> {
        self.store.set_token_hashes(id, None, None).await?;
        self.cache.evict_user(id).await;
        Ok(())
    }
}
