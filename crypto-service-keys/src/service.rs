//! The key service: generation, rotation, deprecation, lookup.
//!
//! Key material is generated in process, wrapped under the master key
//! with AES-256-GCM, and persisted through a [`KeyStore`]. The master key
//! is provided at construction, is process-private, and never reaches the
//! store or the cache. Mutating operations are serialized under a single
//! per-instance mutex; reads go through the cache path.

use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::metrics::{metrics, LatencyTimer};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;
use crypto_service_engine::aes::AesEngine;
use crypto_service_engine::ecdsa::EcdsaKeyPair;
use crypto_service_engine::rsa::RsaKeyPair;

use crate::cache::KeyCache;
use crate::store::KeyStore;
use crate::types::{KeyAlgorithm, KeyId, KeyMetadata, KeyState, KeyType, WrappedKey};

const MASTER_KEY_LEN: usize = 32;

/// Parameters for [`KeyService::generate`].
#[derive(Debug, Clone)]
pub struct KeyGenerationParams {
    pub namespace: String,
    pub algorithm: KeyAlgorithm,
    pub owner_service: String,
    pub validity: Duration,
    pub allowed_operations: Vec<String>,
}

impl KeyGenerationParams {
    pub fn new(namespace: impl Into<String>, algorithm: KeyAlgorithm) -> Self {
        Self {
            namespace: namespace.into(),
            algorithm,
            owner_service: String::new(),
            validity: Duration::days(365),
            allowed_operations: default_operations(algorithm),
        }
    }
}

fn default_operations(algorithm: KeyAlgorithm) -> Vec<String> {
    if algorithm.is_symmetric() {
        vec!["encrypt".to_string(), "decrypt".to_string()]
    } else if algorithm.ec_curve().is_some() {
        vec!["sign".to_string(), "verify".to_string()]
    } else {
        // RSA keys serve both roles depending on padding.
        vec![
            "encrypt".to_string(),
            "decrypt".to_string(),
            "sign".to_string(),
            "verify".to_string(),
        ]
    }
}

/// Lifecycle manager for cryptographic keys.
pub struct KeyService {
    store: Arc<dyn KeyStore>,
    cache: KeyCache,
    master_key: SecureBuffer,
    master_kek_id: String,
    write_lock: Mutex<()>,
}

impl KeyService {
    /// Build a key service around a store and cache. The master key must
    /// be 256 bits.
    pub fn new(
        store: Arc<dyn KeyStore>,
        cache: KeyCache,
        master_key: SecureBuffer,
        master_kek_id: impl Into<String>,
    ) -> CryptoResult<Self> {
        if master_key.len() != MASTER_KEY_LEN {
            return Err(Error::new(ErrorCode::ConfigInvalid, "Master key must be 256 bits"));
        }
        Ok(Self {
            store,
            cache,
            master_key,
            master_kek_id: master_kek_id.into(),
            write_lock: Mutex::new(()),
        })
    }

    /// Generate a new key and return its identifier. Material never
    /// leaves the process unwrapped.
    pub fn generate(&self, params: &KeyGenerationParams) -> CryptoResult<KeyId> {
        let _guard = self.write_lock.lock();
        let _timer = LatencyTimer::new(&metrics().key_operation_latency);
        metrics().key_generate_total.inc();

        if params.namespace.is_empty() {
            return Err(Error::new(ErrorCode::InvalidInput, "Namespace must be non-empty"));
        }

        let id = KeyId::generate(params.namespace.clone());
        let material = Self::generate_raw_material(params.algorithm)?;

        let now = Utc::now();
        let metadata = KeyMetadata {
            id: id.clone(),
            algorithm: params.algorithm,
            key_type: if params.algorithm.is_symmetric() {
                KeyType::Symmetric
            } else {
                KeyType::Private
            },
            state: KeyState::Active,
            created_at: now,
            expires_at: now + params.validity,
            rotated_at: None,
            previous_version_id: None,
            owner_service: params.owner_service.clone(),
            allowed_operations: params.allowed_operations.clone(),
            usage_count: 0,
        };
        metadata.validate()?;

        let wrapped = self.wrap_material(&material, metadata)?;
        self.store.store(&id, &wrapped)?;
        self.cache.put(&id, material);

        info!(key_id = %id, algorithm = %params.algorithm, "generated key");
        Ok(id)
    }

    /// Rotate an active key: a new key with the same algorithm and
    /// namespace, incremented version, linked back to the old one. The
    /// old key moves to Deprecated; if that transition fails the new
    /// record is rolled back.
    pub fn rotate(&self, old_id: &KeyId) -> CryptoResult<KeyId> {
        let _guard = self.write_lock.lock();
        let _timer = LatencyTimer::new(&metrics().key_operation_latency);
        metrics().key_rotate_total.inc();

        let old_record = self.store.retrieve(old_id)?;
        let old_metadata = &old_record.metadata;

        if old_metadata.state != KeyState::Active {
            return Err(Error::new(
                ErrorCode::KeyRotationFailed,
                "Only active keys can be rotated",
            ));
        }

        let material = Self::generate_raw_material(old_metadata.algorithm)?;

        let new_id =
            KeyId::new(old_id.namespace.clone(), uuid::Uuid::new_v4().to_string(), old_id.version + 1);

        let now = Utc::now();
        let validity = old_metadata.expires_at - old_metadata.created_at;
        let new_metadata = KeyMetadata {
            id: new_id.clone(),
            algorithm: old_metadata.algorithm,
            key_type: old_metadata.key_type,
            state: KeyState::Active,
            created_at: now,
            expires_at: now + validity,
            rotated_at: Some(now),
            previous_version_id: Some(old_id.clone()),
            owner_service: old_metadata.owner_service.clone(),
            allowed_operations: old_metadata.allowed_operations.clone(),
            usage_count: 0,
        };
        new_metadata.validate()?;

        let wrapped = self.wrap_material(&material, new_metadata)?;
        self.store.store(&new_id, &wrapped)?;

        if let Err(err) = self.deprecate_locked(old_id) {
            // Roll the new record back so rotation is all-or-nothing.
            let _ = self.store.remove(&new_id);
            return Err(Error::new(ErrorCode::KeyRotationFailed, err.message));
        }

        self.cache.invalidate(old_id);
        self.cache.put(&new_id, material);

        info!(old_key_id = %old_id, new_key_id = %new_id, "rotated key");
        Ok(new_id)
    }

    /// Move an active key to Deprecated.
    pub fn deprecate(&self, id: &KeyId) -> CryptoResult<()> {
        let _guard = self.write_lock.lock();
        let _timer = LatencyTimer::new(&metrics().key_operation_latency);
        metrics().key_deprecate_total.inc();
        self.deprecate_locked(id)
    }

    fn deprecate_locked(&self, id: &KeyId) -> CryptoResult<()> {
        let record = self.store.retrieve(id)?;
        let mut metadata = record.metadata;

        if metadata.state != KeyState::Active {
            return Err(Error::new(
                ErrorCode::KeyInvalidState,
                "Only active keys can be deprecated",
            ));
        }
        debug_assert!(metadata.state.can_transition_to(KeyState::Deprecated));

        metadata.state = KeyState::Deprecated;
        self.store.update_metadata(id, &metadata)?;
        debug!(key_id = %id, "deprecated key");
        Ok(())
    }

    /// Read metadata straight from the store; the cache is bypassed so
    /// the answer is always authoritative.
    pub fn get_metadata(&self, id: &KeyId) -> CryptoResult<KeyMetadata> {
        Ok(self.store.retrieve(id)?.metadata)
    }

    /// Resolve an identifier to live key material. Cache-first; a miss
    /// unwraps the stored record under the master key and repopulates the
    /// cache.
    ///
    /// Internal API: only the primitive engines within this process call
    /// it, and the material never crosses a public interface.
    pub fn get_material(&self, id: &KeyId) -> CryptoResult<SecureBuffer> {
        if let Some(material) = self.cache.get(id) {
            return Ok(material);
        }

        let record = self.store.retrieve(id)?;
        if matches!(record.metadata.state, KeyState::Destroyed | KeyState::PendingDestruction) {
            return Err(Error::new(
                ErrorCode::KeyInvalidState,
                "Key is no longer available for use",
            ));
        }

        let material = self.unwrap_material(&record)?;
        if let Ok(clone) = material.try_clone() {
            self.cache.put(id, clone);
        }
        Ok(material)
    }

    /// Remove a key entirely: cache entries first, then the record.
    pub fn delete(&self, id: &KeyId) -> CryptoResult<()> {
        let _guard = self.write_lock.lock();
        let _timer = LatencyTimer::new(&metrics().key_operation_latency);
        metrics().key_delete_total.inc();

        self.cache.invalidate(id);
        self.store.remove(id)?;
        info!(key_id = %id, "deleted key");
        Ok(())
    }

    /// Enumerate identifiers without touching material.
    pub fn list(&self, namespace_prefix: Option<&str>) -> CryptoResult<Vec<KeyId>> {
        self.store.list(namespace_prefix)
    }

    /// Derive the public half of a stored asymmetric key as DER. The
    /// private key itself never leaves the service.
    pub fn public_key_der(&self, id: &KeyId) -> CryptoResult<Vec<u8>> {
        let metadata = self.get_metadata(id)?;
        let material = self.get_material(id)?;

        if let Some(curve) = metadata.algorithm.ec_curve() {
            let pair = EcdsaKeyPair::from_pkcs8_der(curve, material.as_slice())?;
            return pair.public_key_der();
        }
        if metadata.algorithm.rsa_key_size().is_some() {
            let pair = RsaKeyPair::from_pkcs8_der(material.as_slice())?;
            return pair.public_key_der();
        }

        Err(Error::new(ErrorCode::InvalidKeyType, "Key has no public half"))
    }

    fn generate_raw_material(algorithm: KeyAlgorithm) -> CryptoResult<SecureBuffer> {
        if let Some(size) = algorithm.aes_key_size() {
            return AesEngine::generate_key(size);
        }
        if let Some(size) = algorithm.rsa_key_size() {
            let pair = RsaKeyPair::generate(size)?;
            return pair.to_pkcs8_der();
        }
        if let Some(curve) = algorithm.ec_curve() {
            let pair = EcdsaKeyPair::generate(curve)?;
            return pair.to_pkcs8_der();
        }
        Err(Error::new(ErrorCode::InvalidInput, "Unsupported algorithm"))
    }

    fn wrap_material(
        &self,
        material: &SecureBuffer,
        metadata: KeyMetadata,
    ) -> CryptoResult<WrappedKey> {
        validate::validate_key_material_size(material.len())?;

        let sealed = AesEngine::encrypt_gcm(material.as_slice(), self.master_key.as_slice(), &[])?;
        Ok(WrappedKey {
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            tag: sealed.tag.expect("AEAD encryption produces a tag"),
            kek_id: self.master_kek_id.clone(),
            metadata,
        })
    }

    fn unwrap_material(&self, record: &WrappedKey) -> CryptoResult<SecureBuffer> {
        let material = AesEngine::decrypt_gcm(
            &record.ciphertext,
            self.master_key.as_slice(),
            &record.iv,
            &record.tag,
            &[],
        )?;
        SecureBuffer::from_vec(material)
    }
}

impl std::fmt::Debug for KeyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyService")
            .field("master_kek_id", &self.master_kek_id)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
