//! Hybrid encryption: RSA-OAEP-wrapped AES-256-GCM.
//!
//! Each encryption generates a fresh 256-bit AES key, seals the payload
//! with AES-256-GCM, and wraps the AES key under the recipient's RSA
//! public key with OAEP.

use rsa::RsaPublicKey;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;

use crate::aes::AesEngine;
use crate::rsa::{RsaEngine, RsaKeyPair};
use crate::types::{AesKeySize, HashAlgorithm, HybridResult};

const DEK_LEN: usize = 32;

/// Stateless hybrid engine. Safe for concurrent use.
pub struct HybridEngine;

impl HybridEngine {
    pub fn encrypt(
        plaintext: &[u8],
        recipient: &RsaPublicKey,
        hash: HashAlgorithm,
    ) -> CryptoResult<HybridResult> {
        validate::validate_plaintext_size(plaintext.len())?;

        let dek = AesEngine::generate_key(AesKeySize::Aes256)?;
        let sealed = AesEngine::encrypt_gcm(plaintext, dek.as_slice(), &[])?;
        let wrapped_key = RsaEngine::encrypt_oaep(dek.as_slice(), recipient, hash)?;

        Ok(HybridResult {
            wrapped_key,
            ciphertext: sealed.ciphertext,
            iv: sealed.iv,
            // GCM always yields a tag.
            tag: sealed.tag.expect("AEAD encryption produces a tag"),
        })
    }

    pub fn decrypt(
        wrapped_key: &[u8],
        ciphertext: &[u8],
        iv: &[u8],
        tag: &[u8],
        keypair: &RsaKeyPair,
        hash: HashAlgorithm,
    ) -> CryptoResult<Vec<u8>> {
        validate::validate_ciphertext_size(ciphertext.len())?;

        let dek = Self::unwrap_key(wrapped_key, keypair, hash)?;
        AesEngine::decrypt_gcm(ciphertext, dek.as_slice(), iv, tag, &[])
    }

    /// Unwrap and shape-check the symmetric key.
    fn unwrap_key(
        wrapped_key: &[u8],
        keypair: &RsaKeyPair,
        hash: HashAlgorithm,
    ) -> CryptoResult<SecureBuffer> {
        let dek = RsaEngine::decrypt_oaep_to_secure(wrapped_key, keypair, hash)?;
        if dek.len() != DEK_LEN {
            return Err(Error::new(ErrorCode::InvalidKeySize, "Unwrapped key has invalid size"));
        }
        Ok(dek)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RsaKeySize;

    #[test]
    fn test_hybrid_roundtrip() {
        let pair = RsaKeyPair::generate(RsaKeySize::Rsa2048).unwrap();
        let plaintext = b"payload far larger than any OAEP bound would permit on its own";

        let result =
            HybridEngine::encrypt(plaintext, pair.public_key(), HashAlgorithm::Sha256).unwrap();
        assert_eq!(result.wrapped_key.len(), pair.key_bytes());
        assert_eq!(result.iv.len(), 12);
        assert_eq!(result.tag.len(), 16);

        let decrypted = HybridEngine::decrypt(
            &result.wrapped_key,
            &result.ciphertext,
            &result.iv,
            &result.tag,
            &pair,
            HashAlgorithm::Sha256,
        )
        .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_wrapped_keys_differ_per_encryption() {
        let pair = RsaKeyPair::generate(RsaKeySize::Rsa2048).unwrap();
        let a = HybridEngine::encrypt(b"same", pair.public_key(), HashAlgorithm::Sha256).unwrap();
        let b = HybridEngine::encrypt(b"same", pair.public_key(), HashAlgorithm::Sha256).unwrap();
        assert_ne!(a.wrapped_key, b.wrapped_key);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_payload_fails_with_integrity_error() {
        let pair = RsaKeyPair::generate(RsaKeySize::Rsa2048).unwrap();
        let result =
            HybridEngine::encrypt(b"protected", pair.public_key(), HashAlgorithm::Sha256).unwrap();

        let mut ciphertext = result.ciphertext.clone();
        ciphertext[0] ^= 0xFF;

        let err = HybridEngine::decrypt(
            &result.wrapped_key,
            &ciphertext,
            &result.iv,
            &result.tag,
            &pair,
            HashAlgorithm::Sha256,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntegrityError);
    }

    #[test]
    fn test_tampered_wrapped_key_fails() {
        let pair = RsaKeyPair::generate(RsaKeySize::Rsa2048).unwrap();
        let result =
            HybridEngine::encrypt(b"protected", pair.public_key(), HashAlgorithm::Sha256).unwrap();

        let mut wrapped = result.wrapped_key.clone();
        wrapped[10] ^= 0x01;

        let err = HybridEngine::decrypt(
            &wrapped,
            &result.ciphertext,
            &result.iv,
            &result.tag,
            &pair,
            HashAlgorithm::Sha256,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::DecryptionFailed);
    }

    #[test]
    fn test_wrong_size_unwrapped_key_rejected() {
        let pair = RsaKeyPair::generate(RsaKeySize::Rsa2048).unwrap();
        // Wrap a 16-byte value instead of a 256-bit key.
        let wrapped =
            RsaEngine::encrypt_oaep(&[0u8; 16], pair.public_key(), HashAlgorithm::Sha256).unwrap();

        let err = HybridEngine::decrypt(
            &wrapped,
            b"ct",
            &[0u8; 12],
            &[0u8; 16],
            &pair,
            HashAlgorithm::Sha256,
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidKeySize);
    }
}
