//! Digital signatures against managed keys.
//!
//! RSA-PSS with a configurable hash and ECDSA with the curve-fixed hash.
//! Signing requires an Active key; verification also accepts Deprecated
//! keys so earlier signatures keep verifying after rotation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::metrics::{metrics, LatencyTimer};
use crypto_service_engine::ecdsa::{EcdsaEngine, EcdsaKeyPair};
use crypto_service_engine::rsa::{RsaEngine, RsaKeyPair};
use crypto_service_engine::types::HashAlgorithm;
use crypto_service_keys::service::KeyService;
use crypto_service_keys::types::{KeyId, KeyMetadata};

use crate::clients::logging::LoggingClient;
use crate::services::{fail, succeed, OperationContext};

/// Outcome of a verification. `valid == false` means the signature is
/// cryptographically wrong; errors are reserved for internal failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub algorithm: String,
}

/// Signing and verification over managed keys.
pub struct SignatureService {
    keys: Arc<KeyService>,
    logging: Option<Arc<LoggingClient>>,
}

impl SignatureService {
    pub fn new(keys: Arc<KeyService>, logging: Option<Arc<LoggingClient>>) -> Self {
        Self { keys, logging }
    }

    fn check_sign(metadata: &KeyMetadata) -> CryptoResult<()> {
        if metadata.is_expired() {
            return Err(Error::new(ErrorCode::KeyExpired, "Key has expired"));
        }
        if !metadata.can_sign() {
            return Err(Error::new(ErrorCode::KeyInvalidState, "Key does not permit signing"));
        }
        Ok(())
    }

    fn check_verify(metadata: &KeyMetadata) -> CryptoResult<()> {
        if metadata.is_expired() {
            return Err(Error::new(ErrorCode::KeyExpired, "Key has expired"));
        }
        if !metadata.can_verify() {
            return Err(Error::new(
                ErrorCode::KeyInvalidState,
                "Key does not permit verification",
            ));
        }
        Ok(())
    }

    /// RSA-PSS signature; the salt length equals the hash length.
    pub fn sign_rsa(
        &self,
        data: &[u8],
        key_id: &KeyId,
        hash: HashAlgorithm,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().sign_latency);
        metrics().sign_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            Self::check_sign(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }
            let material = self.keys.get_material(key_id)?;
            let pair = RsaKeyPair::from_pkcs8_der(material.as_slice())?;
            RsaEngine::sign_pss(data, &pair, hash)
        })();

        result
            .map(|signature| {
                succeed(self.logging.as_ref(), "sign_rsa", Some(key_id), ctx);
                signature
            })
            .map_err(|err| fail(self.logging.as_ref(), "sign_rsa", Some(key_id), ctx, err))
    }

    /// RSA-PSS verification.
    pub fn verify_rsa(
        &self,
        data: &[u8],
        signature: &[u8],
        key_id: &KeyId,
        hash: HashAlgorithm,
        ctx: &OperationContext,
    ) -> CryptoResult<VerificationResult> {
        let _timer = LatencyTimer::new(&metrics().verify_latency);
        metrics().verify_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            Self::check_verify(&metadata)?;
            if metadata.algorithm.rsa_key_size().is_none() {
                return Err(Error::new(ErrorCode::InvalidKeyType, "Key is not an RSA key"));
            }
            let der = self.keys.public_key_der(key_id)?;
            let public = RsaKeyPair::public_from_der(&der)?;
            let valid = RsaEngine::verify_pss(data, signature, &public, hash)?;
            Ok(VerificationResult { valid, algorithm: format!("RSA-PSS-{hash}") })
        })();

        result
            .map(|outcome| {
                succeed(self.logging.as_ref(), "verify_rsa", Some(key_id), ctx);
                outcome
            })
            .map_err(|err| fail(self.logging.as_ref(), "verify_rsa", Some(key_id), ctx, err))
    }

    /// ECDSA signature; the hash is fixed by the key's curve.
    pub fn sign_ecdsa(
        &self,
        data: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<Vec<u8>> {
        let _timer = LatencyTimer::new(&metrics().sign_latency);
        metrics().sign_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            Self::check_sign(&metadata)?;
            let curve = metadata
                .algorithm
                .ec_curve()
                .ok_or_else(|| Error::new(ErrorCode::InvalidKeyType, "Key is not an ECDSA key"))?;
            let material = self.keys.get_material(key_id)?;
            let pair = EcdsaKeyPair::from_pkcs8_der(curve, material.as_slice())?;
            EcdsaEngine::sign(data, &pair)
        })();

        result
            .map(|signature| {
                succeed(self.logging.as_ref(), "sign_ecdsa", Some(key_id), ctx);
                signature
            })
            .map_err(|err| fail(self.logging.as_ref(), "sign_ecdsa", Some(key_id), ctx, err))
    }

    /// ECDSA verification.
    pub fn verify_ecdsa(
        &self,
        data: &[u8],
        signature: &[u8],
        key_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<VerificationResult> {
        let _timer = LatencyTimer::new(&metrics().verify_latency);
        metrics().verify_total.inc();

        let result = (|| {
            let metadata = self.keys.get_metadata(key_id)?;
            Self::check_verify(&metadata)?;
            let curve = metadata
                .algorithm
                .ec_curve()
                .ok_or_else(|| Error::new(ErrorCode::InvalidKeyType, "Key is not an ECDSA key"))?;
            let der = self.keys.public_key_der(key_id)?;
            let valid = EcdsaEngine::verify(data, signature, curve, &der)?;
            Ok(VerificationResult { valid, algorithm: format!("ECDSA-{curve}") })
        })();

        result
            .map(|outcome| {
                succeed(self.logging.as_ref(), "verify_ecdsa", Some(key_id), ctx);
                outcome
            })
            .map_err(|err| fail(self.logging.as_ref(), "verify_ecdsa", Some(key_id), ctx, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_service_common::secure::SecureBuffer;
    use crypto_service_keys::cache::{KeyCache, KeyCacheConfig};
    use crypto_service_keys::service::KeyGenerationParams;
    use crypto_service_keys::store::MemoryKeyStore;
    use crypto_service_keys::types::KeyAlgorithm;

    fn setup() -> (Arc<KeyService>, SignatureService) {
        let keys = Arc::new(
            KeyService::new(
                Arc::new(MemoryKeyStore::new()),
                KeyCache::local_only(KeyCacheConfig::default()),
                SecureBuffer::from_slice(&[0x4D; 32]).unwrap(),
                "master-kek-1",
            )
            .unwrap(),
        );
        let service = SignatureService::new(keys.clone(), None);
        (keys, service)
    }

    fn ctx() -> OperationContext {
        OperationContext::new("0af7651916cd43dd")
    }

    #[test]
    fn test_ecdsa_sign_verify_roundtrip() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::EcdsaP256)).unwrap();

        let signature = service.sign_ecdsa(b"signed payload", &id, &ctx()).unwrap();
        let outcome = service.verify_ecdsa(b"signed payload", &signature, &id, &ctx()).unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.algorithm, "ECDSA-P-256");
    }

    #[test]
    fn test_ecdsa_wrong_data_not_valid() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::EcdsaP384)).unwrap();

        let signature = service.sign_ecdsa(b"one", &id, &ctx()).unwrap();
        let outcome = service.verify_ecdsa(b"two", &signature, &id, &ctx()).unwrap();
        assert!(!outcome.valid);
    }

    #[test]
    fn test_rsa_pss_sign_verify_roundtrip() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::Rsa2048)).unwrap();

        let signature =
            service.sign_rsa(b"document", &id, HashAlgorithm::Sha256, &ctx()).unwrap();
        let outcome = service
            .verify_rsa(b"document", &signature, &id, HashAlgorithm::Sha256, &ctx())
            .unwrap();
        assert!(outcome.valid);
        assert_eq!(outcome.algorithm, "RSA-PSS-SHA-256");
    }

    #[test]
    fn test_sign_requires_active_key() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::EcdsaP256)).unwrap();
        keys.deprecate(&id).unwrap();

        let err = service.sign_ecdsa(b"data", &id, &ctx()).unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyInvalidState);
    }

    #[test]
    fn test_deprecated_key_still_verifies() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::EcdsaP256)).unwrap();
        let signature = service.sign_ecdsa(b"pre-rotation", &id, &ctx()).unwrap();

        keys.deprecate(&id).unwrap();

        let outcome = service.verify_ecdsa(b"pre-rotation", &signature, &id, &ctx()).unwrap();
        assert!(outcome.valid);
    }

    #[test]
    fn test_aes_key_rejected_for_signing() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("auth", KeyAlgorithm::Aes256Gcm)).unwrap();
        let err = service.sign_ecdsa(b"data", &id, &ctx()).unwrap_err();
        // AES keys never carry the sign permission.
        assert_eq!(err.code, ErrorCode::KeyInvalidState);
    }

    #[test]
    fn test_rsa_hash_variants() {
        let (keys, service) = setup();
        let id = keys.generate(&KeyGenerationParams::new("sig", KeyAlgorithm::Rsa2048)).unwrap();

        for hash in [HashAlgorithm::Sha256, HashAlgorithm::Sha384, HashAlgorithm::Sha512] {
            let signature = service.sign_rsa(b"multi-hash", &id, hash, &ctx()).unwrap();
            let outcome =
                service.verify_rsa(b"multi-hash", &signature, &id, hash, &ctx()).unwrap();
            assert!(outcome.valid);
        }
    }
}
