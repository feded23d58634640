use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::postgres::PgPoolOptions;

use crate::{
    auth::{claims::TokenKind, jwt::TokenCodec, password::Hasher, service::AuthEngine},
    cache::{Cache, MemoryCache, SessionCache},
    config::AppConfig,
    mail::{LogNotifier, Notifier},
    store::{CredentialStore, PgStore},
    users::service::UserService,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthEngine>,
    pub users: Arc<UserService>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        Ok(Self::assemble(
            config,
            Arc::new(PgStore::new(db)),
            Arc::new(MemoryCache::new()),
            Arc::new(LogNotifier),
            Hasher::default(),
        ))
    }

    /// Wires the engine and user service from explicit collaborators.
    pub fn assemble(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn Notifier>,
        hasher: Hasher,
    ) -> Self {
        let codec = TokenCodec::from_config(&config.jwt);
        let session_cache = SessionCache::new(
            cache,
            Duration::from_secs(config.cache.user_ttl_seconds),
            codec.ttl(TokenKind::Access).unsigned_abs(),
            codec.ttl(TokenKind::Refresh).unsigned_abs(),
        );
        let auth = Arc::new(AuthEngine::new(
            store.clone(),
            session_cache.clone(),
            codec,
            hasher.clone(),
            notifier,
            time::Duration::minutes(config.otp.ttl_minutes),
        ));
        let users = Arc::new(UserService::new(store, session_cache, hasher));
        Self {
            config,
            auth,
            users,
        }
    }
}

impl FromRef<AppState> for Arc<AuthEngine> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for Arc<UserService> {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}
