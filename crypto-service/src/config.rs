//! Construction-time configuration.
//!
//! The core reads no environment variables; the outer facade parses its
//! environment and hands a fully-populated [`CryptoServiceConfig`] to the
//! builder.

use std::path::PathBuf;
use std::time::Duration;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_keys::cache::KeyCacheConfig;

use crate::clients::logging::LoggingClientConfig;

/// Which key store backs the service.
#[derive(Debug, Clone)]
pub enum KeyStoreBackend {
    /// In-memory store; used by tests and ephemeral deployments.
    Memory,
    /// Local on-disk store rooted at the given directory.
    File { path: PathBuf },
}

/// Key cache settings.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Local tier capacity in entries.
    pub capacity: usize,
    /// Entry time-to-live for both tiers.
    pub ttl: Option<Duration>,
    /// 256-bit key that seals values bound for the remote tier. Required
    /// when a remote cache is attached.
    pub encryption_key: Option<Vec<u8>>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { capacity: 1024, ttl: Some(Duration::from_secs(300)), encryption_key: None }
    }
}

impl CacheSettings {
    pub(crate) fn to_cache_config(&self) -> KeyCacheConfig {
        KeyCacheConfig { capacity: self.capacity, ttl: self.ttl }
    }

    /// Move the cache-encryption key into a secure buffer, validating its
    /// size.
    pub(crate) fn take_encryption_key(&mut self) -> CryptoResult<Option<SecureBuffer>> {
        match self.encryption_key.take() {
            Some(bytes) => {
                if bytes.len() != 32 {
                    return Err(Error::new(
                        ErrorCode::ConfigInvalid,
                        "Cache encryption key must be 256 bits",
                    ));
                }
                Ok(Some(SecureBuffer::from_vec(bytes)?))
            }
            None => Ok(None),
        }
    }
}

/// Full configuration for the service core.
#[derive(Debug, Clone)]
pub struct CryptoServiceConfig {
    pub service_name: String,
    /// Master wrapping key, 256 bits. Provisioned at deploy time; the
    /// core never persists it.
    pub master_key: Vec<u8>,
    /// Identifier recorded in wrapped records for the master key.
    pub master_kek_id: String,
    pub key_store: KeyStoreBackend,
    pub cache: CacheSettings,
    pub logging: LoggingClientConfig,
    /// Chunk size recorded in file envelope headers.
    pub file_chunk_size: u32,
    /// How long shutdown waits for in-flight requests to drain.
    pub shutdown_timeout: Duration,
}

impl CryptoServiceConfig {
    /// Minimal configuration around a master key, with in-memory storage.
    pub fn new(service_name: impl Into<String>, master_key: Vec<u8>) -> Self {
        Self {
            service_name: service_name.into(),
            master_key,
            master_kek_id: "master-kek-1".to_string(),
            key_store: KeyStoreBackend::Memory,
            cache: CacheSettings::default(),
            logging: LoggingClientConfig::default(),
            file_chunk_size: 64 * 1024,
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn validate(&self) -> CryptoResult<()> {
        if self.service_name.is_empty() {
            return Err(Error::new(ErrorCode::ConfigMissing, "Service name is required"));
        }
        if self.master_key.len() != 32 {
            return Err(Error::new(ErrorCode::ConfigInvalid, "Master key must be 256 bits"));
        }
        if self.file_chunk_size == 0 {
            return Err(Error::new(ErrorCode::ConfigInvalid, "Chunk size must be non-zero"));
        }
        Ok(())
    }
}

impl std::fmt::Display for KeyStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStoreBackend::Memory => write!(f, "memory"),
            KeyStoreBackend::File { path } => write!(f, "file:{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = CryptoServiceConfig::new("crypto-service", vec![0u8; 32]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_short_master_key_rejected() {
        let config = CryptoServiceConfig::new("crypto-service", vec![0u8; 16]);
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_empty_service_name_rejected() {
        let config = CryptoServiceConfig::new("", vec![0u8; 32]);
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::ConfigMissing);
    }

    #[test]
    fn test_cache_encryption_key_size_enforced() {
        let mut settings = CacheSettings { encryption_key: Some(vec![0u8; 16]), ..Default::default() };
        assert!(settings.take_encryption_key().is_err());

        let mut settings = CacheSettings { encryption_key: Some(vec![0u8; 32]), ..Default::default() };
        let key = settings.take_encryption_key().unwrap().unwrap();
        assert_eq!(key.len(), 32);
        // The key is moved out, not copied.
        assert!(settings.encryption_key.is_none());
    }
}
