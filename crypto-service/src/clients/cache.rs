//! Client shim for the remote cache collaborator.
//!
//! Keys are namespaced under a configured prefix and values carry an
//! optional TTL. The remote side is untrusted: key-material values are
//! sealed by the key cache before they ever reach this client. The
//! in-memory backend stands in for the network service in tests and
//! single-node deployments.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crypto_service_common::error::CryptoResult;
use crypto_service_keys::cache::RemoteCache;

#[derive(Debug, Clone)]
pub struct CacheClientConfig {
    /// Prefix applied to every key.
    pub key_prefix: String,
    /// TTL applied when the caller does not supply one.
    pub default_ttl: Option<Duration>,
}

impl Default for CacheClientConfig {
    fn default() -> Self {
        Self { key_prefix: "crypto:".to_string(), default_ttl: Some(Duration::from_secs(300)) }
    }
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// In-memory cache backend implementing the collaborator contract.
pub struct InMemoryCacheClient {
    config: CacheClientConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheClient {
    pub fn new(config: CacheClientConfig) -> Self {
        Self { config, entries: Mutex::new(HashMap::new()) }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{key}", self.config.key_prefix)
    }

    /// Fetch several keys at once; missing or expired keys come back as
    /// `None` in order.
    pub fn get_many(&self, keys: &[&str]) -> CryptoResult<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Store several key/value pairs with the default TTL.
    pub fn set_many(&self, pairs: &[(&str, &[u8])]) -> CryptoResult<()> {
        for (key, value) in pairs {
            self.set(key, value, None)?;
        }
        Ok(())
    }

    /// Delete several keys at once.
    pub fn del_many(&self, keys: &[&str]) -> CryptoResult<()> {
        for key in keys {
            self.del(key)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for InMemoryCacheClient {
    fn default() -> Self {
        Self::new(CacheClientConfig::default())
    }
}

impl RemoteCache for InMemoryCacheClient {
    fn get(&self, key: &str) -> CryptoResult<Option<Vec<u8>>> {
        let full = self.full_key(key);
        let mut entries = self.entries.lock();
        match entries.get(&full) {
            Some(entry) if !entry.is_expired() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(&full);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CryptoResult<()> {
        let ttl = ttl.or(self.config.default_ttl);
        self.entries.lock().insert(
            self.full_key(key),
            Entry { value: value.to_vec(), expires_at: ttl.map(|ttl| Instant::now() + ttl) },
        );
        Ok(())
    }

    fn del(&self, key: &str) -> CryptoResult<()> {
        self.entries.lock().remove(&self.full_key(key));
        Ok(())
    }

    fn exists(&self, key: &str) -> CryptoResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
