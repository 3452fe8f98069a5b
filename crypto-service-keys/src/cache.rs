//! Two-tier cache of unwrapped key material.
//!
//! Tier 1 is a process-local LRU of secure buffers; eviction zeroes the
//! buffer. Tier 2 is an optional remote cache reached through a client
//! shim; values sent there are AES-256-GCM sealed under a dedicated
//! cache-encryption key, so the remote side only ever holds ciphertext.
//! Cache failures are never fatal: every error degrades silently to a
//! miss and the caller falls through to the store.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crypto_service_common::error::CryptoResult;
use crypto_service_common::metrics::metrics;
use crypto_service_common::secure::SecureBuffer;
use crypto_service_engine::aes::{AesEngine, GCM_IV_LEN, GCM_TAG_LEN};

use crate::types::KeyId;

/// Namespace prefix for key-material entries in the remote tier.
pub const CACHE_KEY_PREFIX: &str = "keymaterial:";

/// Client contract for the remote cache collaborator. The remote side is
/// untrusted; callers hand it only pre-encrypted values.
pub trait RemoteCache: Send + Sync {
    fn get(&self, key: &str) -> CryptoResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CryptoResult<()>;
    fn del(&self, key: &str) -> CryptoResult<()>;
    fn exists(&self, key: &str) -> CryptoResult<bool>;
}

#[derive(Debug, Clone)]
pub struct KeyCacheConfig {
    /// Local tier capacity in entries.
    pub capacity: usize,
    /// Entry time-to-live, applied to both tiers.
    pub ttl: Option<Duration>,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self { capacity: 1024, ttl: Some(Duration::from_secs(300)) }
    }
}

struct LocalEntry {
    material: SecureBuffer,
    expires_at: Option<Instant>,
}

impl LocalEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Two-tier cache of unwrapped key material.
pub struct KeyCache {
    local: Mutex<LruCache<String, LocalEntry>>,
    remote: Option<Arc<dyn RemoteCache>>,
    seal_key: Option<SecureBuffer>,
    ttl: Option<Duration>,
}

impl KeyCache {
    /// Local tier only.
    pub fn local_only(config: KeyCacheConfig) -> Self {
        Self {
            local: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.capacity.max(1)).expect("non-zero capacity"),
            )),
            remote: None,
            seal_key: None,
            ttl: config.ttl,
        }
    }

    /// Local tier plus a remote tier. `seal_key` is the 32-byte
    /// cache-encryption key used to seal values before they leave the
    /// process.
    pub fn with_remote(
        config: KeyCacheConfig,
        remote: Arc<dyn RemoteCache>,
        seal_key: SecureBuffer,
    ) -> Self {
        let mut cache = Self::local_only(config);
        cache.remote = Some(remote);
        cache.seal_key = Some(seal_key);
        cache
    }

    fn cache_key(id: &KeyId) -> String {
        format!("{CACHE_KEY_PREFIX}{id}")
    }

    /// Look up unwrapped material. Local tier first, then the remote
    /// tier; a remote hit repopulates the local tier.
    pub fn get(&self, id: &KeyId) -> Option<SecureBuffer> {
        let key = Self::cache_key(id);

        {
            let mut local = self.local.lock();
            match local.get(&key) {
                Some(entry) if !entry.is_expired() => {
                    match entry.material.try_clone() {
                        Ok(clone) => return Some(clone),
                        Err(_) => return None,
                    }
                }
                Some(_) => {
                    // Expired: drop the buffer, which zeroes it.
                    local.pop(&key);
                }
                None => {}
            }
        }

        let material = self.remote_get(&key)?;
        self.local_put(key, &material);
        Some(material)
    }

    /// Insert material into both tiers. The buffer is moved in, never
    /// copied into an unlocked allocation.
    pub fn put(&self, id: &KeyId, material: SecureBuffer) {
        let key = Self::cache_key(id);
        self.remote_put(&key, &material);
        self.local.lock().put(
            key,
            LocalEntry { material, expires_at: self.ttl.map(|ttl| Instant::now() + ttl) },
        );
    }

    /// Remove an entry from both tiers. Dropping the local buffer zeroes
    /// its pages.
    pub fn invalidate(&self, id: &KeyId) {
        let key = Self::cache_key(id);
        self.local.lock().pop(&key);
        if let Some(remote) = &self.remote {
            if let Err(err) = remote.del(&key) {
                debug!("remote cache invalidation degraded: {}", err.to_log_string());
            }
        }
    }

    /// Drop every local entry.
    pub fn clear(&self) {
        self.local.lock().clear();
    }

    pub fn local_len(&self) -> usize {
        self.local.lock().len()
    }

    fn local_put(&self, key: String, material: &SecureBuffer) {
        if let Ok(clone) = material.try_clone() {
            self.local.lock().put(
                key,
                LocalEntry {
                    material: clone,
                    expires_at: self.ttl.map(|ttl| Instant::now() + ttl),
                },
            );
        }
    }

    fn remote_get(&self, key: &str) -> Option<SecureBuffer> {
        let remote = self.remote.as_ref()?;
        let seal_key = self.seal_key.as_ref()?;

        let sealed = match remote.get(key) {
            Ok(Some(sealed)) => sealed,
            Ok(None) => return None,
            Err(err) => {
                metrics().cache_service_connected.set_connected(false);
                debug!("remote cache read degraded: {}", err.to_log_string());
                return None;
            }
        };

        if sealed.len() < GCM_IV_LEN + GCM_TAG_LEN {
            return None;
        }
        let (iv, rest) = sealed.split_at(GCM_IV_LEN);
        let (tag, ciphertext) = rest.split_at(GCM_TAG_LEN);

        match AesEngine::decrypt_gcm(ciphertext, seal_key.as_slice(), iv, tag, &[]) {
            Ok(material) => SecureBuffer::from_vec(material).ok(),
            Err(err) => {
                debug!("remote cache entry rejected: {}", err.to_log_string());
                None
            }
        }
    }

    fn remote_put(&self, key: &str, material: &SecureBuffer) {
        let (Some(remote), Some(seal_key)) = (self.remote.as_ref(), self.seal_key.as_ref()) else {
            return;
        };

        let sealed = match AesEngine::encrypt_gcm(material.as_slice(), seal_key.as_slice(), &[]) {
            Ok(result) => {
                let tag = result.tag.expect("AEAD encryption produces a tag");
                let mut sealed =
                    Vec::with_capacity(result.iv.len() + tag.len() + result.ciphertext.len());
                sealed.extend_from_slice(&result.iv);
                sealed.extend_from_slice(&tag);
                sealed.extend_from_slice(&result.ciphertext);
                sealed
            }
            Err(err) => {
                debug!("remote cache seal degraded: {}", err.to_log_string());
                return;
            }
        };

        if let Err(err) = remote.set(key, &sealed, self.ttl) {
            metrics().cache_service_connected.set_connected(false);
            debug!("remote cache write degraded: {}", err.to_log_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_service_common::error::{Error, ErrorCode};
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;

    fn material(byte: u8) -> SecureBuffer {
        SecureBuffer::from_slice(&[byte; 32]).unwrap()
    }

    #[derive(Default)]
    struct FakeRemote {
        entries: PlMutex<HashMap<String, Vec<u8>>>,
        failing: PlMutex<bool>,
    }

    impl FakeRemote {
        fn fail(&self, failing: bool) {
            *self.failing.lock() = failing;
        }

        fn raw(&self, key: &str) -> Option<Vec<u8>> {
            self.entries.lock().get(key).cloned()
        }
    }

    impl RemoteCache for FakeRemote {
        fn get(&self, key: &str) -> CryptoResult<Option<Vec<u8>>> {
            if *self.failing.lock() {
                return Err(Error::new(ErrorCode::CacheUnavailable, "Cache unavailable"));
            }
            Ok(self.entries.lock().get(key).cloned())
        }

        fn set(&self, key: &str, value: &[u8], _ttl: Option<Duration>) -> CryptoResult<()> {
            if *self.failing.lock() {
                return Err(Error::new(ErrorCode::CacheUnavailable, "Cache unavailable"));
            }
            self.entries.lock().insert(key.to_string(), value.to_vec());
            Ok(())
        }

        fn del(&self, key: &str) -> CryptoResult<()> {
            self.entries.lock().remove(key);
            Ok(())
        }

        fn exists(&self, key: &str) -> CryptoResult<bool> {
            Ok(self.entries.lock().contains_key(key))
        }
    }

    #[test]
    fn test_local_hit_returns_identical_bytes() {
        let cache = KeyCache::local_only(KeyCacheConfig::default());
        let id = KeyId::generate("auth");

        cache.put(&id, material(0x42));
        let hit = cache.get(&id).unwrap();
        assert_eq!(hit.as_slice(), &[0x42; 32]);
    }

    #[test]
    fn test_miss_returns_none() {
        let cache = KeyCache::local_only(KeyCacheConfig::default());
        assert!(cache.get(&KeyId::generate("auth")).is_none());
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = KeyCache::local_only(KeyCacheConfig::default());
        let id = KeyId::generate("auth");
        cache.put(&id, material(0x42));
        cache.invalidate(&id);
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn test_lru_eviction_bounds_local_tier() {
        let cache =
            KeyCache::local_only(KeyCacheConfig { capacity: 2, ttl: None });
        let first = KeyId::generate("auth");
        let second = KeyId::generate("auth");
        let third = KeyId::generate("auth");

        cache.put(&first, material(1));
        cache.put(&second, material(2));
        cache.put(&third, material(3));

        assert_eq!(cache.local_len(), 2);
        assert!(cache.get(&first).is_none());
        assert!(cache.get(&third).is_some());
    }

    #[test]
    fn test_expired_entries_are_misses() {
        let cache = KeyCache::local_only(KeyCacheConfig {
            capacity: 8,
            ttl: Some(Duration::from_millis(10)),
        });
        let id = KeyId::generate("auth");
        cache.put(&id, material(7));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get(&id).is_none());
    }

    #[test]
    fn test_remote_tier_holds_only_ciphertext() {
        let remote = Arc::new(FakeRemote::default());
        let cache = KeyCache::with_remote(
            KeyCacheConfig::default(),
            remote.clone(),
            SecureBuffer::from_slice(&[9u8; 32]).unwrap(),
        );
        let id = KeyId::generate("auth");

        cache.put(&id, material(0x42));

        let stored = remote.raw(&format!("keymaterial:{id}")).unwrap();
        // Sealed form: iv || tag || ciphertext, never the raw material.
        assert_eq!(stored.len(), GCM_IV_LEN + GCM_TAG_LEN + 32);
        assert!(!stored.windows(4).any(|w| w == [0x42; 4]));
    }

    #[test]
    fn test_remote_hit_repopulates_local_tier() {
        let remote = Arc::new(FakeRemote::default());
        let seal = SecureBuffer::from_slice(&[9u8; 32]).unwrap();
        let cache = KeyCache::with_remote(
            KeyCacheConfig::default(),
            remote.clone(),
            seal.try_clone().unwrap(),
        );
        let id = KeyId::generate("auth");
        cache.put(&id, material(0x55));

        // Simulate a cold process: empty local tier, remote retained.
        cache.clear();
        assert_eq!(cache.local_len(), 0);

        let hit = cache.get(&id).unwrap();
        assert_eq!(hit.as_slice(), &[0x55; 32]);
        assert_eq!(cache.local_len(), 1);
    }

    #[test]
    fn test_remote_failures_degrade_silently() {
        let remote = Arc::new(FakeRemote::default());
        let cache = KeyCache::with_remote(
            KeyCacheConfig::default(),
            remote.clone(),
            SecureBuffer::from_slice(&[9u8; 32]).unwrap(),
        );
        let id = KeyId::generate("auth");

        remote.fail(true);
        // Writes and reads both degrade; the local tier still works.
        cache.put(&id, material(0x11));
        let hit = cache.get(&id).unwrap();
        assert_eq!(hit.as_slice(), &[0x11; 32]);
    }

    #[test]
    fn test_corrupted_remote_entry_is_a_miss() {
        let remote = Arc::new(FakeRemote::default());
        let cache = KeyCache::with_remote(
            KeyCacheConfig::default(),
            remote.clone(),
            SecureBuffer::from_slice(&[9u8; 32]).unwrap(),
        );
        let id = KeyId::generate("auth");
        cache.put(&id, material(0x33));
        cache.clear();

        // Corrupt the sealed value in the remote tier.
        let key = format!("keymaterial:{id}");
        let mut sealed = remote.raw(&key).unwrap();
        *sealed.last_mut().unwrap() ^= 0xFF;
        remote.set(&key, &sealed, None).unwrap();

        assert!(cache.get(&id).is_none());
    }
}
