//! Auth engine: signup with OTP activation, signin, token rotation, logout and
//! the forgot/reset password flow.
//!
//! Raw tokens are only ever returned to the caller. The user row keeps Argon2
//! hashes of the current access and refresh token, and a presented token is
//! valid only while it matches that hash, so issuing a new pair (or logging
//! out) revokes the previous one. The cache mirrors those hashes to keep the
//! per-request access check off the database.

use std::sync::Arc;

use anyhow::anyhow;
use time::{Duration, OffsetDateTime};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    claims::TokenKind,
    jwt::TokenCodec,
    otp,
    password::Hasher,
};
use crate::{
    cache::SessionCache,
    error::AuthError,
    mail::{Notifier, OtpPurpose},
    store::{
        CredentialStore, NewUser, PasswordReset, PendingActivation, Role, StoreError, UserProfile,
    },
};

/// Raw tokens handed to the caller once, at issuance.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: Uuid,
}

pub struct AuthEngine {
    store: Arc<dyn CredentialStore>,
    cache: SessionCache,
    codec: TokenCodec,
    hasher: Hasher,
    notifier: Arc<dyn Notifier>,
    otp_ttl: Duration,
}

impl AuthEngine {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        cache: SessionCache,
        codec: TokenCodec,
        hasher: Hasher,
        notifier: Arc<dyn Notifier>,
        otp_ttl: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            codec,
            hasher,
            notifier,
            otp_ttl,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    #[instrument(skip(self, name, password))]
    pub async fn signup(&self, name: &str, email: &str, password: &str) -> Result<(), AuthError> {
        if self.store.find_user_by_email(email).await?.is_some() {
            warn!("signup for an email that already has an account");
            return Err(AuthError::DuplicateEmail);
        }

        let password_hash = self.hasher.hash(password)?;
        let code = otp::generate();
        let otp_hash = self.hasher.hash(&code)?;
        let now = OffsetDateTime::now_utc();

        self.store
            .replace_pending_activation(&PendingActivation {
                email: email.to_owned(),
                name: name.to_owned(),
                password_hash,
                otp_hash,
                expires_at: now + self.otp_ttl,
                created_at: now,
            })
            .await?;

        if let Err(e) = self
            .notifier
            .send_otp(email, name, &code, OtpPurpose::Activation)
            .await
        {
            warn!(error = %e, "activation code delivery failed");
        }
        info!("signup pending activation");
        Ok(())
    }

    #[instrument(skip(self, code))]
    pub async fn activate_account(
        &self,
        email: &str,
        code: &str,
    ) -> Result<SessionTokens, AuthError> {
        let Some(pending) = self.store.find_pending_activation(email).await? else {
            warn!("activation without a pending signup");
            return Err(AuthError::OtpExpired);
        };
        if otp::is_expired(pending.expires_at, OffsetDateTime::now_utc()) {
            warn!("activation code expired");
            self.store.delete_pending_activation(email).await?;
            return Err(AuthError::OtpExpired);
        }
        if !self.hasher.verify(code, &pending.otp_hash)? {
            warn!("activation code incorrect");
            return Err(AuthError::OtpIncorrect);
        }

        let new_user = NewUser {
            name: pending.name,
            email: pending.email,
            password_hash: pending.password_hash,
            role: Role::Customer,
        };
        let user = match self.store.create_user_from_pending(new_user).await {
            Ok(user) => user,
            Err(StoreError::DuplicateEmail) => {
                warn!("activation lost a race against another activation");
                self.store.delete_pending_activation(email).await?;
                return Err(AuthError::CredentialsConflict);
            }
            Err(e) => return Err(e.into()),
        };

        let tokens = self.issue_and_record(user.id, user.role).await?;
        self.cache.put_user(&UserProfile::from(&user)).await;
        info!(user_id = %user.id, "account activated");
        Ok(tokens)
    }

    /// Internally distinguishes an unknown email from a wrong password; the
    /// transport layer conceals the difference.
    #[instrument(skip(self, password))]
    pub async fn signin_local(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AuthError> {
        let Some(creds) = self.store.find_credentials_by_email(email).await? else {
            // Same Argon2 work as a wrong password.
            let _ = self.hasher.verify(password, &self.hasher.dummy_hash())?;
            warn!("signin for unknown email");
            return Err(AuthError::EmailNotFound);
        };
        if !self.hasher.verify(password, &creds.password_hash)? {
            warn!(user_id = %creds.id, "signin with wrong password");
            return Err(AuthError::PasswordIncorrect);
        }
        let tokens = self.issue_and_record(creds.id, creds.role).await?;
        info!(user_id = %creds.id, "user signed in");
        Ok(tokens)
    }

    /// Rotates the session: the presented refresh token must match the stored
    /// hash, and the new pair overwrites it.
    #[instrument(skip(self, presented))]
    pub async fn refresh_tokens(
        &self,
        user_id: Uuid,
        presented: &str,
    ) -> Result<SessionTokens, AuthError> {
        let Some((role, stored)) = self.refresh_state(user_id).await? else {
            warn!("refresh without an active session");
            return Err(AuthError::AccessDenied);
        };
        if !self.hasher.verify(presented, &stored)? {
            warn!("refresh token does not match the current session");
            return Err(AuthError::AccessDenied);
        }
        let tokens = self.issue_and_record(user_id, role).await?;
        info!("session rotated");
        Ok(tokens)
    }

    /// Role and stored refresh hash, cache first.
    async fn refresh_state(&self, user_id: Uuid) -> Result<Option<(Role, String)>, AuthError> {
        let cached_hash = self.cache.get_token_hash(TokenKind::Refresh, user_id).await;
        let cached_user = self.cache.get_user(user_id).await;
        if let (Some(hash), Some(profile)) = (cached_hash, cached_user) {
            return Ok(Some((profile.role, hash)));
        }

        let Some(user) = self.store.find_user_by_id(user_id).await? else {
            return Ok(None);
        };
        let Some(hashed_rt) = user.hashed_rt.clone() else {
            return Ok(None);
        };
        self.cache
            .put_token_hash(TokenKind::Refresh, user_id, &hashed_rt)
            .await;
        if let Some(hashed_at) = &user.hashed_at {
            self.cache
                .put_token_hash(TokenKind::Access, user_id, hashed_at)
                .await;
        }
        self.cache.put_user(&UserProfile::from(&user)).await;
        Ok(Some((user.role, hashed_rt)))
    }

    /// Clears both hashes and the cached state. Logging out twice is fine.
    #[instrument(skip(self))]
    pub async fn logout(&self, user_id: Uuid) -> Result<bool, AuthError> {
        let cleared = self.store.set_token_hashes(user_id, None, None).await?;
        self.cache.evict_user(user_id).await;
        info!(cleared, "user logged out");
        Ok(true)
    }

    #[instrument(skip(self))]
    pub async fn forget_password(&self, email: &str) -> Result<(), AuthError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            warn!("password reset for unknown email");
            return Err(AuthError::EmailNotFound);
        };

        let code = otp::generate();
        let now = OffsetDateTime::now_utc();
        self.store
            .replace_password_reset(&PasswordReset {
                email: user.email.clone(),
                otp_hash: self.hasher.hash(&code)?,
                expires_at: now + self.otp_ttl,
                created_at: now,
            })
            .await?;

        if let Err(e) = self
            .notifier
            .send_otp(&user.email, &user.name, &code, OtpPurpose::PasswordReset)
            .await
        {
            warn!(error = %e, "reset code delivery failed");
        }
        info!(user_id = %user.id, "password reset requested");
        Ok(())
    }

    /// Consumes the reset request, stores the new password and signs the user in.
    #[instrument(skip(self, code, new_password, new_password_confirm))]
    pub async fn reset_password(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
        new_password_confirm: &str,
    ) -> Result<SessionTokens, AuthError> {
        if new_password != new_password_confirm {
            return Err(AuthError::Validation(vec![crate::error::FieldError::new(
                "password_confirm",
                "passwords do not match",
            )]));
        }

        let Some(reset) = self.store.find_password_reset(email).await? else {
            warn!("reset without a pending request");
            return Err(AuthError::OtpExpired);
        };
        if otp::is_expired(reset.expires_at, OffsetDateTime::now_utc()) {
            warn!("reset code expired");
            self.store.delete_password_reset(email).await?;
            return Err(AuthError::OtpExpired);
        }
        if !self.hasher.verify(code, &reset.otp_hash)? {
            warn!("reset code incorrect");
            return Err(AuthError::OtpIncorrect);
        }

        let password_hash = self.hasher.hash(new_password)?;
        let user = match self.store.complete_password_reset(email, &password_hash).await {
            Ok(user) => user,
            Err(StoreError::NotFound) => {
                warn!("reset for an account that no longer exists");
                return Err(AuthError::AccessDenied);
            }
            Err(e) => return Err(e.into()),
        };

        self.cache.evict_profile(user.id).await;
        let tokens = self.issue_and_record(user.id, user.role).await?;
        self.cache.put_user(&UserProfile::from(&user)).await;
        info!(user_id = %user.id, "password reset");
        Ok(tokens)
    }

    /// Request gate: the presented access token must match the stored hash.
    #[instrument(skip(self, presented))]
    pub async fn valid_access_token(&self, user_id: Uuid, presented: &str) -> Result<(), AuthError> {
        let stored = match self.cache.get_token_hash(TokenKind::Access, user_id).await {
            Some(hash) => hash,
            None => {
                let hashed_at = self
                    .store
                    .find_user_by_id(user_id)
                    .await?
                    .and_then(|u| u.hashed_at)
                    .ok_or(AuthError::AccessDenied)?;
                self.cache
                    .put_token_hash(TokenKind::Access, user_id, &hashed_at)
                    .await;
                hashed_at
            }
        };
        if !self.hasher.verify(presented, &stored)? {
            warn!("access token does not match the current session");
            return Err(AuthError::AccessDenied);
        }
        Ok(())
    }

    /// Hashes both tokens and writes them in one update, then refreshes the
    /// cached hashes. A failed write fails the caller: otherwise the previous
    /// pair would stay valid.
    pub async fn update_token_hashes(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<(), AuthError> {
        let hashed_at = self.hasher.hash(access_token)?;
        let hashed_rt = self.hasher.hash(refresh_token)?;

        let updated = self
            .store
            .set_token_hashes(user_id, Some(&hashed_at), Some(&hashed_rt))
            .await
            .map_err(|e| AuthError::Internal(anyhow!("recording token hashes failed: {e}")))?;
        if !updated {
            return Err(AuthError::Internal(anyhow!(
                "user {user_id} vanished while recording token hashes"
            )));
        }

        self.cache
            .put_token_hash(TokenKind::Access, user_id, &hashed_at)
            .await;
        self.cache
            .put_token_hash(TokenKind::Refresh, user_id, &hashed_rt)
            .await;
        Ok(())
    }

    async fn issue_and_record(&self, user_id: Uuid, role: Role) -> Result<SessionTokens, AuthError> {
        let pair = self.codec.issue_session_tokens(user_id, role)?;
        self.update_token_hashes(user_id, &pair.access_token, &pair.refresh_token)
            .await?;
        Ok(SessionTokens {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            user_id,
        })
    }
}
