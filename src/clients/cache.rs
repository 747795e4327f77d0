use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Best-effort key-value cache. Every caller treats an error from either
/// operation as a cache miss and falls back to the source of truth; the
/// cache must never be able to fail a balance or accrual read.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// In-process cache with per-entry expiry. Expired entries are dropped
/// lazily on read.
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Utc::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(0));
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }
}

/// A cache whose every operation fails; used to exercise the fallback path.
pub struct UnavailableCache;

#[async_trait]
impl Cache for UnavailableCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        anyhow::bail!("cache unavailable")
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<()> {
        anyhow::bail!("cache unavailable")
    }
}
