//! Network cryptographic service core.
//!
//! Ties the primitive engines and the key service together behind the
//! operation services (encrypt, sign, file envelopes), and provides the
//! process substrate around them: collaborator client shims, the
//! lifecycle coordinator, and construction-time configuration. Transport
//! facades, admission control, and the audit store live outside this
//! crate and route calls into it.

pub mod clients;
pub mod config;
pub mod envelope;
pub mod lifecycle;
pub mod services;

pub use clients::cache::{CacheClientConfig, InMemoryCacheClient};
pub use clients::logging::{
    LogEntry, LogLevel, LogSink, LoggingClient, LoggingClientConfig, TracingLogSink,
};
pub use config::{CacheSettings, CryptoServiceConfig, KeyStoreBackend};
pub use envelope::{FileEncryptionService, FileEnvelopeHeader, ENVELOPE_MAGIC, ENVELOPE_VERSION};
pub use lifecycle::{coordinator, LifecycleCoordinator, RequestGuard};
pub use services::encryption::EncryptionService;
pub use services::signature::{SignatureService, VerificationResult};
pub use services::OperationContext;

use std::sync::Arc;

use crypto_service_common::error::CryptoResult;
use crypto_service_common::secure::SecureBuffer;
use crypto_service_keys::cache::KeyCache;
use crypto_service_keys::service::KeyService;
use crypto_service_keys::store::{FileKeyStore, KeyStore, MemoryKeyStore};

/// Assembled service core. Construct one with [`CryptoService::builder`].
pub struct CryptoService {
    keys: Arc<KeyService>,
    encryption: EncryptionService,
    signature: SignatureService,
    files: FileEncryptionService,
    logging: Option<Arc<LoggingClient>>,
}

impl CryptoService {
    pub fn builder(config: CryptoServiceConfig) -> CryptoServiceBuilder {
        CryptoServiceBuilder::new(config)
    }

    pub fn keys(&self) -> &Arc<KeyService> {
        &self.keys
    }

    pub fn encryption(&self) -> &EncryptionService {
        &self.encryption
    }

    pub fn signature(&self) -> &SignatureService {
        &self.signature
    }

    pub fn files(&self) -> &FileEncryptionService {
        &self.files
    }

    pub fn logging(&self) -> Option<&Arc<LoggingClient>> {
        self.logging.as_ref()
    }
}

/// Builder assembling the core from deploy-time configuration.
pub struct CryptoServiceBuilder {
    config: CryptoServiceConfig,
    remote_cache: Option<Arc<dyn crypto_service_keys::cache::RemoteCache>>,
    log_sink: Option<Arc<dyn LogSink>>,
}

impl CryptoServiceBuilder {
    pub fn new(config: CryptoServiceConfig) -> Self {
        Self { config, remote_cache: None, log_sink: None }
    }

    /// Attach a remote cache tier. Requires a cache-encryption key in the
    /// configuration.
    pub fn with_remote_cache(
        mut self,
        remote: Arc<dyn crypto_service_keys::cache::RemoteCache>,
    ) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    /// Attach a logging sink; a background client is started around it.
    pub fn with_log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn build(self) -> CryptoResult<CryptoService> {
        let mut config = self.config;
        config.validate()?;

        let store: Arc<dyn KeyStore> = match &config.key_store {
            KeyStoreBackend::Memory => Arc::new(MemoryKeyStore::new()),
            KeyStoreBackend::File { path } => Arc::new(FileKeyStore::new(path.clone())?),
        };

        let cache_config = config.cache.to_cache_config();
        let cache = match (self.remote_cache, config.cache.take_encryption_key()?) {
            (Some(remote), Some(seal_key)) => KeyCache::with_remote(cache_config, remote, seal_key),
            _ => KeyCache::local_only(cache_config),
        };

        let master_key = SecureBuffer::from_vec(std::mem::take(&mut config.master_key))?;
        let keys =
            Arc::new(KeyService::new(store, cache, master_key, config.master_kek_id.clone())?);

        let logging = self.log_sink.map(|sink| {
            Arc::new(LoggingClient::start(config.logging.clone(), sink))
        });

        Ok(CryptoService {
            encryption: EncryptionService::new(keys.clone(), logging.clone()),
            signature: SignatureService::new(keys.clone(), logging.clone()),
            files: FileEncryptionService::new(keys.clone(), logging.clone(), config.file_chunk_size),
            keys,
            logging,
        })
    }
}
