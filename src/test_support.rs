use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;

use crate::{
    auth::{password::Hasher, service::AuthEngine},
    cache::{Cache, MemoryCache},
    config::test_config,
    mail::{Notifier, OtpPurpose},
    state::AppState,
    store::MemoryStore,
    users::service::UserService,
};

#[derive(Debug, Clone)]
pub struct SentOtp {
    pub to_email: String,
    pub otp: String,
    pub purpose: OtpPurpose,
}

/// Notifier that keeps every code it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentOtp>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    fn last(&self, email: &str) -> Option<SentOtp> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|s| s.to_email == email)
            .cloned()
    }

    pub fn last_code(&self, email: &str) -> Option<String> {
        self.last(email).map(|s| s.otp)
    }

    pub fn last_purpose(&self, email: &str) -> Option<OtpPurpose> {
        self.last(email).map(|s| s.purpose)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_otp(
        &self,
        to_email: &str,
        _to_name: &str,
        otp: &str,
        purpose: OtpPurpose,
    ) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(SentOtp {
            to_email: to_email.to_string(),
            otp: otp.to_string(),
            purpose,
        });
        Ok(())
    }
}

/// Cache backend whose every call fails.
pub struct BrokenCache;

#[async_trait]
impl Cache for BrokenCache {
    async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
        Err(anyhow!("connection reset"))
    }
    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> anyhow::Result<()> {
        Err(anyhow!("connection reset"))
    }
    async fn del(&self, _key: &str) -> anyhow::Result<()> {
        Err(anyhow!("connection reset"))
    }
}

/// App state wired to in-memory collaborators, with handles to inspect them.
pub struct Harness {
    pub state: AppState,
    pub engine: Arc<AuthEngine>,
    pub users: Arc<UserService>,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(RecordingNotifier::default()))
    }

    pub fn with_notifier(notifier: Arc<RecordingNotifier>) -> Self {
        let cache = Arc::new(MemoryCache::new());
        Self::build(notifier, cache.clone(), cache)
    }

    /// Engine runs on a failing cache backend; `cache` is a detached empty map.
    pub fn with_broken_cache() -> Self {
        Self::build(
            Arc::new(RecordingNotifier::default()),
            Arc::new(MemoryCache::new()),
            Arc::new(BrokenCache),
        )
    }

    fn build(
        notifier: Arc<RecordingNotifier>,
        cache: Arc<MemoryCache>,
        backend: Arc<dyn Cache>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::assemble(
            Arc::new(test_config()),
            store.clone(),
            backend,
            notifier.clone(),
            Hasher::fast(),
        );
        Self {
            engine: state.auth.clone(),
            users: state.users.clone(),
            state,
            store,
            cache,
            notifier,
        }
    }
}
