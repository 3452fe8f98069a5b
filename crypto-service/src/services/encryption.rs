//! Symmetric and hybrid encryption against managed keys.
//!
//! Each operation resolves the key identifier through the key service,
//! enforces the key-state rules (encrypt requires Active; decrypt also
//! accepts Deprecated), runs the primitive engine, and records metrics
//! and one log line.

use std::sync::Arc;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::metrics::{metrics, LatencyTimer};
use crypto_service_engine::aes::AesEngine;
use crypto_service_engine::hybrid::HybridEngine;
use crypto_service_engine::rsa::{RsaEngine, RsaKeyPair};
use crypto_service_engine::types::{EncryptResult, HashAlgorithm, HybridResult};
use crypto_service_keys::service::KeyService;
use crypto_service_keys::types::{KeyId, KeyMetadata};

use crate::clients::logging::LoggingClient;
use crate::services::{fail, succeed, OperationContext};

/// Encryption operations over managed keys.
pub struct EncryptionService {
    keys: Arc<KeyService>,
    logging: Option<Arc<LoggingClient>>,
}

impl EncryptionService {
    pub fn new(keys: Arc<KeyService>, logging: Option<Arc<LoggingClient>>) -> Self {
        Self { keys, logging }
    }

    fn check_encrypt(&self, metadata: &KeyMetadata) -> CryptoResult<()> {
        if metadata.is_expired() {
            return Err(Error::new(ErrorCode::KeyExpired, "Key has expired"));
        }
        if !metadata.can_encrypt() {
            return Err(Error::new(
                ErrorCode::KeyInvalidState,
                "Key does not permit encryption",
            ));
        }
        Ok(())
    }

    fn check_decrypt(&self, metadata: &KeyMetadata) -> CryptoResult<()> {
        if metadata.is_expired() {
            return Err(Error::new(ErrorCode::KeyExpired, "Key has expired"));
        }
        if !metadata.can_decrypt() {
            return Err(Error::new(
                ErrorCode::KeyInvalidState,
                "Key does not permit decryption",
            ));
        }
        Ok(())
    }

    fn aes_key_check(metadata: &KeyMetadata) -> CryptoResult<()> {
        if metadata.algorithm.aes_key_size().is_none() {
            return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an AES key"));
        }
        Ok(())
    }

    /// AES-GCM encryption under a managed key.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        key_id: &KeyId,
        aad: &[u8],
        ctx: &OperationContext,
    ) -> CryptoResult<EncryptResult> {
        let _timer = LatencyTimer::new(&metrics().encrypt_latency);
        metrics().encrypt_total.inc();

        self.encrypt_inner(plaintext, key_id, aad)
            .map(|result| {
                succeed(self.logging.as_ref(), "encrypt", Some(key_id), ctx);
                result
            })
            .map_err(|err| fail(self.logging.as_ref(), "encrypt", Some(key_id), ctx, err))
    }

    fn encrypt_inner(
        &self,
        plaintext: &[u8],
        key_id: &KeyId,
        aad: &[u8],
    ) -> CryptoResult<EncryptResult> {
        let metadata = self.keys.get_metadata(key_id)?;
        self.check_encrypt(&metadata)?;
        Self::aes_key_check(&metadata)?;

        let key = self.keys.get_material(key_id)?;
        AesEngine::encrypt_gcm(plaintext, key.as_slice(), aad)
    }

    /// AES-GCM decryption under a managed key.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().decrypt_latency);
        metrics().decrypt_total.inc();

        self.decrypt_inner(ciphertext, iv, tag, aad, key_id)
            .map(|plaintext| {
                succeed(self.logging.as_ref(), "decrypt", Some(key_id), ctx);
                plaintext
            })
            .map_err(|err| fail(self.logging.as_ref(), "decrypt", Some(key_id), ctx, err))
    }

    fn decrypt_inner(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
        key_id: &KeyId,
    ) -> CryptoResult<Vec<u8>> {
        let metadata = self.keys.get_metadata(key_id)?;
        self.check_decrypt(&metadata)?;
        Self::aes_key_check(&metadata)?;

        let key = self.keys.get_material(key_id)?;
        AesEngine::decrypt_gcm(ciphertext, key.as_slice(), iv, tag, aad)
    }

    /// AES-CBC encryption; compatibility path, confidentiality only.
    pub fn encrypt_cbc(
        &self,
        plaintext: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<EncryptResult> {
        let _timer = LatencyTimer::new(&metrics().encrypt_latency);
        metrics().encrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_encrypt(&metadata)?;
            Self::aes_key_check(&metadata)?;
            let key = self.keys.get_material(key_id)?;
            AesEngine::encrypt_cbc(plaintext, key.as_slice())
        })();

        result
            .map(|result| {
                succeed(self.logging.as_ref(), "encrypt_cbc", Some(key_id), ctx);
                result
            })
            .map_err(|err| fail(self.logging.as_ref(), "encrypt_cbc", Some(key_id), ctx, err))
    }

    /// AES-CBC decryption.
    pub fn decrypt_cbc(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().decrypt_latency);
        metrics().decrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_decrypt(&metadata)?;
            Self::aes_key_check(&metadata)?;
            let key = self.keys.get_material(key_id)?;
            AesEngine::decrypt_cbc(ciphertext, key.as_slice(), iv)
        })();

        result
            .map(|plaintext| {
                succeed(self.logging.as_ref(), "decrypt_cbc", Some(key_id), ctx);
                plaintext
            })
            .map_err(|err| fail(self.logging.as_ref(), "decrypt_cbc", Some(key_id), ctx, err))
    }

    /// Hybrid encryption: the payload is sealed under a fresh AES-256
    /// key, which is RSA-OAEP wrapped under the managed RSA key.
    pub fn encrypt_hybrid(
        &self,
        plaintext: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<HybridResult> {
        let _timer = LatencyTimer::new(&metrics().encrypt_latency);
        metrics().encrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_encrypt(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }

            let der = self.keys.public_key_der(key_id)?;
            let public = RsaKeyPair::public_from_der(&der)?;
            HybridEngine::encrypt(plaintext, &public, HashAlgorithm::Sha256)
        })();

        result
            .map(|result| {
                succeed(self.logging.as_ref(), "encrypt_hybrid", Some(key_id), ctx);
                result
            })
            .map_err(|err| fail(self.logging.as_ref(), "encrypt_hybrid", Some(key_id), ctx, err))
    }

    /// Hybrid decryption with the managed RSA private key.
    pub fn decrypt_hybrid(
        &self,
        wrapped_key: &[u8],
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().decrypt_latency);
        metrics().decrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_decrypt(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }

            let material = self.keys.get_material(key_id)?;
            let pair = RsaKeyPair::from_pkcs8_der(material.as_slice())?;
            HybridEngine::decrypt(wrapped_key, ciphertext, iv, tag, &pair, HashAlgorithm::Sha256)
        })();

        result
            .map(|plaintext| {
                succeed(self.logging.as_ref(), "decrypt_hybrid", Some(key_id), ctx);
                plaintext
            })
            .map_err(|err| fail(self.logging.as_ref(), "decrypt_hybrid", Some(key_id), ctx, err))
    }

    /// RSA-OAEP encryption of a short payload directly under a managed
    /// RSA key.
    pub fn encrypt_rsa(
        &self,
        plaintext: &[u8],
        key_id: &KeyId,
        hash: HashAlgorithm,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().encrypt_latency);
        metrics().encrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_encrypt(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }
            let der = self.keys.public_key_der(key_id)?;
            let public = RsaKeyPair::public_from_der(&der)?;
            RsaEngine::encrypt_oaep(plaintext, &public, hash)
        })();

        result
            .map(|ciphertext| {
                succeed(self.logging.as_ref(), "encrypt_rsa", Some(key_id), ctx);
                ciphertext
            })
            .map_err(|err| fail(self.logging.as_ref(), "encrypt_rsa", Some(key_id), ctx, err))
    }

    /// RSA-OAEP decryption under a managed RSA key.
    pub fn decrypt_rsa(
        &self,
        ciphertext: &[u8],
        key_id: &KeyId,
        hash: HashAlgorithm,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().decrypt_latency);
        metrics().decrypt_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            self.check_decrypt(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }
            let material = self.keys.get_material(key_id)?;
            let pair = RsaKeyPair::from_pkcs8_der(material.as_slice())?;
            RsaEngine::decrypt_oaep(ciphertext, &pair, hash)
        })();

        result
            .map(|plaintext| {
                succeed(self.logging.as_ref(), "decrypt_rsa", Some(key_id), ctx);
                plaintext
            })
            .map_err(|err| fail(self.logging.as_ref(), "decrypt_rsa", Some(key_id), ctx, err))
    }
}
