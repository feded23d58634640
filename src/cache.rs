//! Read-through cache for hot user records and session token hashes.
//!
//! The cache is an accelerator, never a source of truth: `SessionCache` turns
//! every backend failure into a logged miss or a no-op.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{auth::claims::TokenKind, store::UserProfile};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;
    async fn del(&self, key: &str) -> anyhow::Result<()>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

const SWEEP_THRESHOLD: usize = 4096;

/// In-process key/value cache with a TTL per key. Expired entries are dropped
/// on read, and swept on write once the map grows past a threshold.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
    sweep_threshold: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_sweep_threshold(SWEEP_THRESHOLD)
    }

    pub fn with_sweep_threshold(sweep_threshold: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sweep_threshold,
        }
    }
}

fn sweep_expired(entries: &mut HashMap<String, Entry>) {
    let before = entries.len();
    let now = Instant::now();
    entries.retain(|_, e| e.expires_at > now);
    debug!(removed = before - entries.len(), "cache sweep");
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| anyhow!("cache lock poisoned"))?;
            match entries.get(key) {
                None => return Ok(None),
                Some(e) if e.expires_at > Instant::now() => return Ok(Some(e.value.clone())),
                Some(_) => {}
            }
        }
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache lock poisoned"))?;
        if entries.get(key).is_some_and(|e| e.expires_at <= Instant::now()) {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache lock poisoned"))?;
        if entries.len() >= self.sweep_threshold {
            sweep_expired(&mut entries);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("cache lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

pub fn user_key(id: Uuid) -> String {
    format!("user_{id}")
}

pub fn token_hash_key(kind: TokenKind, id: Uuid) -> String {
    match kind {
        TokenKind::Access => format!("hashedAT_{id}"),
        TokenKind::Refresh => format!("hashedRT_{id}"),
    }
}

/// Typed, failure-tolerant view over a [`Cache`].
#[derive(Clone)]
pub struct SessionCache {
    inner: Arc<dyn Cache>,
    user_ttl: Duration,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionCache {
    pub fn new(
        inner: Arc<dyn Cache>,
        user_ttl: Duration,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            inner,
            user_ttl,
            access_ttl,
            refresh_ttl,
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        match self.inner.get(key).await {
            Ok(v) => {
                debug!(key, hit = v.is_some(), "cache lookup");
                v
            }
            Err(e) => {
                warn!(error = %e, key, "cache read failed, treating as miss");
                None
            }
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) {
        if let Err(e) = self.inner.set(key, value, ttl).await {
            warn!(error = %e, key, "cache write failed");
        }
    }

    async fn del_raw(&self, key: &str) {
        if let Err(e) = self.inner.del(key).await {
            warn!(error = %e, key, "cache delete failed");
        }
    }

    pub async fn get_user(&self, id: Uuid) -> Option<UserProfile> {
        let raw = self.get_raw(&user_key(id)).await?;
        match serde_json::from_str(&raw) {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, user_id = %id, "corrupt cached user, ignoring");
                None
            }
        }
    }

    pub async fn put_user(&self, profile: &UserProfile) {
        match serde_json::to_string(profile) {
            Ok(json) => {
                self.set_raw(&user_key(profile.id), &json, self.user_ttl)
                    .await
            }
            Err(e) => warn!(error = %e, user_id = %profile.id, "serialize user for cache failed"),
        }
    }

    pub async fn get_token_hash(&self, kind: TokenKind, id: Uuid) -> Option<String> {
        self.get_raw(&token_hash_key(kind, id)).await
    }

    pub async fn put_token_hash(&self, kind: TokenKind, id: Uuid, hash: &str) {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        self.set_raw(&token_hash_key(kind, id), hash, ttl).await
    }

    /// Drops the cached profile only.
    pub async fn evict_profile(&self, id: Uuid) {
        self.del_raw(&user_key(id)).await
    }

    /// Drops the profile and both token hashes.
    pub async fn evict_user(&self, id: Uuid) {
        self.del_raw(&user_key(id)).await;
        self.del_raw(&token_hash_key(TokenKind::Access, id)).await;
        self.del_raw(&token_hash_key(TokenKind::Refresh, id)).await;
    }
}
