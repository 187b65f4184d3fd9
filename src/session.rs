//! Short-lived cache of an instance and its binary data for the duration of a
//! locked processing session, keyed by the session's lock token.
//!
//! The cache is an optimisation only. Backend errors and corrupt entries are
//! logged and treated as misses; nothing here fails the caller.

use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;
use uuid::Uuid;

use crate::instance::Instance;

/// Default sliding expiry of session entries.
pub const DEFAULT_SLIDING_EXPIRY: Duration = Duration::from_secs(600);

fn instance_key(lock_token: &str) -> String {
    format!("session:{lock_token}:instance")
}

fn data_key(lock_token: &str, data_element_id: Uuid) -> String {
    format!("session:{lock_token}:data:{data_element_id}")
}

#[async_trait]
pub trait ProcessingSessionCache: Send + Sync {
    async fn get_instance(&self, lock_token: &str) -> Option<Instance>;

    async fn set_instance(&self, lock_token: &str, instance: &Instance);

    async fn get_binary_data(&self, lock_token: &str, data_element_id: Uuid) -> Option<Vec<u8>>;

    async fn set_binary_data(&self, lock_token: &str, data_element_id: Uuid, data: &[u8]);

    async fn remove_binary_data(&self, lock_token: &str, data_element_id: Uuid);

    async fn invalidate_session(&self, lock_token: &str);
}

/// Byte store with sliding expiry backing a [`SessionCache`].
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    /// Value for `key`; a hit refreshes its expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, sliding_expiry: Duration) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key starting with `prefix`. Backends that cannot do this
    /// leave the entries to expire.
    async fn remove_prefix(&self, prefix: &str) -> Result<()>;
}

/// [`ProcessingSessionCache`] over any [`KeyValueCache`].
pub struct SessionCache<C> {
    cache: C,
    sliding_expiry: Duration,
}

impl<C: KeyValueCache> SessionCache<C> {
    pub fn new(cache: C) -> Self {
        Self {
            cache,
            sliding_expiry: DEFAULT_SLIDING_EXPIRY,
        }
    }

    pub fn with_sliding_expiry(mut self, sliding_expiry: Duration) -> Self {
        self.sliding_expiry = sliding_expiry;
        self
    }

    pub fn sliding_expiry(&self) -> Duration {
        self.sliding_expiry
    }
}

#[async_trait]
impl<C: KeyValueCache> ProcessingSessionCache for SessionCache<C> {
    async fn get_instance(&self, lock_token: &str) -> Option<Instance> {
        let key = instance_key(lock_token);
        let bytes = match self.cache.get(&key).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(error = %e, "Session cache error reading instance");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(instance) => Some(instance),
            Err(e) => {
                warn!(error = %e, "Corrupt cached instance, dropping entry");
                if let Err(e) = self.cache.remove(&key).await {
                    warn!(error = %e, "Failed to drop corrupt session entry");
                }
                None
            }
        }
    }

    async fn set_instance(&self, lock_token: &str, instance: &Instance) {
        let bytes = match serde_json::to_vec(instance) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Could not serialize instance for session cache");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .set(&instance_key(lock_token), bytes, self.sliding_expiry)
            .await
        {
            warn!(error = %e, "Session cache error writing instance");
        }
    }

    async fn get_binary_data(&self, lock_token: &str, data_element_id: Uuid) -> Option<Vec<u8>> {
        match self.cache.get(&data_key(lock_token, data_element_id)).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, data_element = %data_element_id, "Session cache error reading data");
                None
            }
        }
    }

    async fn set_binary_data(&self, lock_token: &str, data_element_id: Uuid, data: &[u8]) {
        if let Err(e) = self
            .cache
            .set(&data_key(lock_token, data_element_id), data.to_vec(), self.sliding_expiry)
            .await
        {
            warn!(error = %e, data_element = %data_element_id, "Session cache error writing data");
        }
    }

    async fn remove_binary_data(&self, lock_token: &str, data_element_id: Uuid) {
        if let Err(e) = self.cache.remove(&data_key(lock_token, data_element_id)).await {
            warn!(error = %e, data_element = %data_element_id, "Session cache error removing data");
        }
    }

    async fn invalidate_session(&self, lock_token: &str) {
        if let Err(e) = self.cache.remove_prefix(&format!("session:{lock_token}:")).await {
            warn!(error = %e, "Session cache error invalidating session");
        }
    }
}

struct Entry {
    value: Vec<u8>,
    sliding_expiry: Duration,
    expires_at: Instant,
}

/// Process-local [`KeyValueCache`].
#[derive(Default)]
pub struct InMemoryCache {
    entries: DashMap<String, Entry>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KeyValueCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.expires_at = now + entry.sliding_expiry;
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, sliding_expiry: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                sliding_expiry,
                expires_at: Instant::now() + sliding_expiry,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<()> {
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

/// The default session cache: in memory with a ten minute sliding expiry.
pub type InMemorySessionCache = SessionCache<InMemoryCache>;

impl Default for InMemorySessionCache {
    fn default() -> Self {
        SessionCache::new(InMemoryCache::new())
    }
}
