use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CredentialStore, Credentials, NewUser, PasswordReset, PendingActivation, Role, StoreError,
    User, UserPatch,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    next_seq: i64,
    activations: HashMap<String, PendingActivation>,
    resets: HashMap<String, PasswordReset>,
}

impl Inner {
    fn live_by_email(&self, email: &str) -> Option<&User> {
        self.users.values().find(|u| !u.deleted && u.email == email)
    }

    fn live_by_id_mut(&mut self, id: Uuid) -> Option<&mut User> {
        self.users.get_mut(&id).filter(|u| !u.deleted)
    }

    fn insert(&mut self, new: NewUser) -> Result<User, StoreError> {
        if self.live_by_email(&new.email).is_some() {
            return Err(StoreError::DuplicateEmail);
        }
        self.next_seq += 1;
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            seq: self.next_seq,
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            avatar: None,
            hashed_at: None,
            hashed_rt: None,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }
}

/// In-process store for local runs and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn expire_pending_activation(&self, email: &str) {
        let mut inner = self.inner.write().await;
        if let Some(p) = inner.activations.get_mut(email) {
            p.expires_at = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        }
    }

    #[cfg(test)]
    pub async fn expire_password_reset(&self, email: &str) {
        let mut inner = self.inner.write().await;
        if let Some(r) = inner.resets.get_mut(email) {
            r.expires_at = OffsetDateTime::now_utc() - time::Duration::seconds(1);
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.users.get(&id).filter(|u| !u.deleted).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.live_by_email(email).cloned())
    }

    async fn find_credentials_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Credentials>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.live_by_email(email).map(|u| Credentials {
            id: u.id,
            email: u.email.clone(),
            password_hash: u.password_hash.clone(),
            role: u.role,
        }))
    }

    async fn list_users(
        &self,
        role: Option<Role>,
        skip: i64,
        take: i64,
    ) -> Result<Vec<User>, StoreError> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| !u.deleted && role.map_or(true, |r| u.role == r))
            .cloned()
            .collect();
        users.sort_by_key(|u| u.seq);
        Ok(users
            .into_iter()
            .skip(skip.max(0) as usize)
            .take(take.max(0) as usize)
            .collect())
    }

    async fn count_users(&self, role: Option<Role>) -> Result<i64, StoreError> {
        let inner = self.inner.read().await;
        let count = inner
            .users
            .values()
            .filter(|u| !u.deleted && role.map_or(true, |r| u.role == r))
            .count();
        Ok(count as i64)
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        inner.insert(user)
    }

    async fn create_user_from_pending(&self, user: NewUser) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let email = user.email.clone();
        let created = inner.insert(user)?;
        inner.activations.remove(&email);
        Ok(created)
    }

    async fn update_user(&self, id: Uuid, patch: UserPatch) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.live_by_id_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(avatar) = patch.avatar {
            user.avatar = Some(avatar);
        }
        if let Some(hash) = patch.password_hash {
            user.password_hash = hash;
        }
        if let Some(role) = patch.role {
            user.role = role;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }

    async fn set_token_hashes(
        &self,
        id: Uuid,
        hashed_at: Option<&str>,
        hashed_rt: Option<&str>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.live_by_id_mut(id) {
            Some(user) => {
                user.hashed_at = hashed_at.map(str::to_owned);
                user.hashed_rt = hashed_rt.map(str::to_owned);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn soft_delete_user(&self, id: Uuid, deleted_by: Uuid) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let user = inner.live_by_id_mut(id).ok_or(StoreError::NotFound)?;
        let now = OffsetDateTime::now_utc();
        user.deleted = true;
        user.deleted_at = Some(now);
        user.deleted_by = Some(deleted_by);
        user.hashed_at = None;
        user.hashed_rt = None;
        user.updated_at = now;
        Ok(user.clone())
    }

    async fn replace_pending_activation(
        &self,
        pending: &PendingActivation,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .activations
            .insert(pending.email.clone(), pending.clone());
        Ok(())
    }

    async fn find_pending_activation(
        &self,
        email: &str,
    ) -> Result<Option<PendingActivation>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.activations.get(email).cloned())
    }

    async fn delete_pending_activation(&self, email: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.activations.remove(email);
        Ok(())
    }

    async fn replace_password_reset(&self, reset: &PasswordReset) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.resets.insert(reset.email.clone(), reset.clone());
        Ok(())
    }

    async fn find_password_reset(
        &self,
        email: &str,
    ) -> Result<Option<PasswordReset>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.resets.get(email).cloned())
    }

    async fn delete_password_reset(&self, email: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.resets.remove(email);
        Ok(())
    }

    async fn complete_password_reset(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner
            .live_by_email(email)
            .map(|u| u.id)
            .ok_or(StoreError::NotFound)?;
        inner.resets.remove(email);
        let user = inner.live_by_id_mut(id).ok_or(StoreError::NotFound)?;
        user.password_hash = password_hash.to_owned();
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::Customer,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_live_email() {
        let store = MemoryStore::new();
        store.create_user(new_user("a@x.com")).await.unwrap();
        let err = store.create_user(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn soft_deleted_users_are_invisible_and_free_their_email() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@x.com")).await.unwrap();
        store.set_token_hashes(user.id, Some("at"), Some("rt")).await.unwrap();

        let deleted = store.soft_delete_user(user.id, user.id).await.unwrap();
        assert!(deleted.deleted);
        assert!(deleted.hashed_at.is_none() && deleted.hashed_rt.is_none());

        assert!(store.find_user_by_id(user.id).await.unwrap().is_none());
        assert!(store.find_user_by_email("a@x.com").await.unwrap().is_none());
        assert!(!store.set_token_hashes(user.id, Some("at"), None).await.unwrap());
        store.create_user(new_user("a@x.com")).await.expect("email reusable");
    }

    #[tokio::test]
    async fn create_from_pending_consumes_the_pending_row() {
        let store = MemoryStore::new();
        let now = OffsetDateTime::now_utc();
        store
            .replace_pending_activation(&PendingActivation {
                email: "a@x.com".into(),
                name: "A".into(),
                password_hash: "hash".into(),
                otp_hash: "otp".into(),
                expires_at: now,
                created_at: now,
            })
            .await
            .unwrap();
        store.create_user_from_pending(new_user("a@x.com")).await.unwrap();
        assert!(store.find_pending_activation("a@x.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_sequence_and_filters_role() {
        let store = MemoryStore::new();
        for i in 0..4 {
            store.create_user(new_user(&format!("u{i}@x.com"))).await.unwrap();
        }
        let mut admin = new_user("admin@x.com");
        admin.role = Role::Admin;
        store.create_user(admin).await.unwrap();

        let page = store.list_users(Some(Role::Customer), 1, 2).await.unwrap();
        let emails: Vec<_> = page.iter().map(|u| u.email.as_str()).collect();
        assert_eq!(emails, vec!["u1@x.com", "u2@x.com"]);

        let admins = store.list_users(Some(Role::Admin), 0, 10).await.unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(store.count_users(Some(Role::Admin)).await.unwrap(), 1);
        assert_eq!(store.count_users(Some(Role::Customer)).await.unwrap(), 4);
        assert_eq!(store.count_users(None).await.unwrap(), 5);
    }
}
