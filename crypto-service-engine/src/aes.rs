//! AES engines: GCM (authenticated) and CBC (compatibility only).
//!
//! GCM always produces a fresh 96-bit IV and a 128-bit tag; any mismatch
//! in ciphertext, iv, tag, or aad during decryption yields the single
//! opaque integrity error. The explicit-IV entry points exist only to
//! support deterministic test vectors.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;

use crate::types::{AesKeySize, EncryptResult};

pub const GCM_IV_LEN: usize = validate::limits::GCM_IV_SIZE;
pub const GCM_TAG_LEN: usize = validate::limits::GCM_TAG_SIZE;
pub const CBC_IV_LEN: usize = validate::limits::CBC_IV_SIZE;
pub const BLOCK_LEN: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn gcm_seal<C>(key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>>
where
    C: Aead + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| Error::safe(ErrorCode::EncryptionFailed))?;
    cipher
        .encrypt(Nonce::from_slice(iv), Payload { msg: plaintext, aad })
        .map_err(|_| Error::safe(ErrorCode::EncryptionFailed))
}

fn gcm_open<C>(key: &[u8], iv: &[u8], sealed: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>>
where
    C: Aead + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| Error::safe(ErrorCode::DecryptionFailed))?;
    cipher
        .decrypt(Nonce::from_slice(iv), Payload { msg: sealed, aad })
        .map_err(|_| Error::safe(ErrorCode::IntegrityError))
}

/// Stateless AES engine. Safe for concurrent use.
pub struct AesEngine;

impl AesEngine {
    /// Fresh CSPRNG IV of the given length.
    pub fn generate_iv(len: usize) -> CryptoResult<Vec<u8>> {
        let mut iv = vec![0u8; len];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to generate random IV"))?;
        Ok(iv)
    }

    /// Fresh CSPRNG key in a secure buffer.
    pub fn generate_key(size: AesKeySize) -> CryptoResult<SecureBuffer> {
        let mut key = SecureBuffer::new(size.bytes())?;
        OsRng.try_fill_bytes(key.as_mut_slice()).map_err(|_| {
            Error::new(ErrorCode::KeyGenerationFailed, "Failed to generate random key")
        })?;
        Ok(key)
    }

    /// AES-GCM encryption with a fresh random IV. This is the production
    /// entry point.
    pub fn encrypt_gcm(plaintext: &[u8], key: &[u8], aad: &[u8]) -> CryptoResult<EncryptResult> {
        let iv = Self::generate_iv(GCM_IV_LEN)?;
        Self::encrypt_gcm_with_iv(plaintext, key, &iv, aad)
    }

    /// AES-GCM encryption with a caller-supplied IV. Exists to support
    /// deterministic test vectors; production paths use
    /// [`AesEngine::encrypt_gcm`].
    pub fn encrypt_gcm_with_iv(
        plaintext: &[u8],
        key: &[u8],
        iv: &[u8],
        aad: &[u8],
    ) -> CryptoResult<EncryptResult> {
        validate::validate_plaintext_size(plaintext.len())?;
        validate::validate_aad_size(aad.len())?;
        validate::validate_aes_key_size(key.len())?;
        validate::validate_gcm_iv_size(iv.len())?;

        let mut sealed = match key.len() {
            16 => gcm_seal::<Aes128Gcm>(key, iv, plaintext, aad)?,
            _ => gcm_seal::<Aes256Gcm>(key, iv, plaintext, aad)?,
        };

        // The AEAD implementation appends the tag; split it back out.
        let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

        Ok(EncryptResult { ciphertext: sealed, iv: iv.to_vec(), tag: Some(tag) })
    }

    /// AES-GCM decryption. The aad must match the value supplied at
    /// encryption time.
    pub fn decrypt_gcm(
        ciphertext: &[u8],
        key: &[u8],
        iv: &[u8],
        tag: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        validate::validate_ciphertext_size(ciphertext.len())?;
        validate::validate_aad_size(aad.len())?;
        validate::validate_aes_key_size(key.len())?;
        validate::validate_gcm_iv_size(iv.len())?;
        validate::validate_gcm_tag_size(tag.len())?;

        let mut sealed = Vec::with_capacity(ciphertext.len() + tag.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        match key.len() {
            16 => gcm_open::<Aes128Gcm>(key, iv, &sealed, aad),
            _ => gcm_open::<Aes256Gcm>(key, iv, &sealed, aad),
        }
    }

    /// AES-CBC encryption with PKCS#7 padding and a fresh random IV.
    /// Confidentiality only; kept for compatibility with existing data.
    pub fn encrypt_cbc(plaintext: &[u8], key: &[u8]) -> CryptoResult<EncryptResult> {
        let iv = Self::generate_iv(CBC_IV_LEN)?;
        Self::encrypt_cbc_with_iv(plaintext, key, &iv)
    }

    /// AES-CBC encryption with a caller-supplied IV, for deterministic
    /// test vectors.
    pub fn encrypt_cbc_with_iv(
        plaintext: &[u8],
        key: &[u8],
        iv: &[u8],
    ) -> CryptoResult<EncryptResult> {
        validate::validate_plaintext_size(plaintext.len())?;
        validate::validate_aes_key_size(key.len())?;
        validate::validate_cbc_iv_size(iv.len())?;

        let ciphertext = match key.len() {
            16 => Aes128CbcEnc::new_from_slices(key, iv)
                .map_err(|_| Error::safe(ErrorCode::EncryptionFailed))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            _ => Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| Error::safe(ErrorCode::EncryptionFailed))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        };

        Ok(EncryptResult { ciphertext, iv: iv.to_vec(), tag: None })
    }

    /// AES-CBC decryption with PKCS#7 unpadding.
    pub fn decrypt_cbc(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> CryptoResult<Vec<u8>> {
        validate::validate_ciphertext_size(ciphertext.len())?;
        validate::validate_aes_key_size(key.len())?;
        validate::validate_cbc_iv_size(iv.len())?;

        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(Error::new(
                ErrorCode::InvalidInput,
                "Ciphertext must be a multiple of the block size",
            ));
        }

        let plaintext = match key.len() {
            16 => Aes128CbcDec::new_from_slices(key, iv)
                .map_err(|_| Error::safe(ErrorCode::DecryptionFailed))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            _ => Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| Error::safe(ErrorCode::DecryptionFailed))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        };

        plaintext.map_err(|_| Error::new(ErrorCode::PaddingError, "Invalid padding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key256() -> Vec<u8> {
        vec![0u8; 32]
    }

    #[test]
    fn test_gcm_roundtrip() {
        let key = key256();
        let plaintext = b"hello world";

        let result = AesEngine::encrypt_gcm(plaintext, &key, &[]).unwrap();
        assert_eq!(result.iv.len(), GCM_IV_LEN);
        assert_eq!(result.tag.as_ref().unwrap().len(), GCM_TAG_LEN);
        assert_eq!(result.ciphertext.len(), plaintext.len());

        let decrypted = AesEngine::decrypt_gcm(
            &result.ciphertext,
            &key,
            &result.iv,
            result.tag.as_ref().unwrap(),
            &[],
        )
        .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_gcm_roundtrip_aes128() {
        let key = vec![7u8; 16];
        let plaintext = b"sixteen byte key";
        let result = AesEngine::encrypt_gcm(plaintext, &key, b"aad").unwrap();
        let decrypted = AesEngine::decrypt_gcm(
            &result.ciphertext,
            &key,
            &result.iv,
            result.tag.as_ref().unwrap(),
            b"aad",
        )
        .unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_gcm_fresh_iv_per_encryption() {
        let key = key256();
        let a = AesEngine::encrypt_gcm(b"same plaintext", &key, &[]).unwrap();
        let b = AesEngine::encrypt_gcm(b"same plaintext", &key, &[]).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_gcm_tampered_ciphertext_fails() {
        let key = key256();
        let result = AesEngine::encrypt_gcm(b"hello world", &key, &[]).unwrap();

        let mut tampered = result.ciphertext.clone();
        *tampered.last_mut().unwrap() ^= 0x01;

        let err = AesEngine::decrypt_gcm(
            &tampered,
            &key,
            &result.iv,
            result.tag.as_ref().unwrap(),
            &[],
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntegrityError);
        assert_eq!(err.message, "Data integrity verification failed");
    }

    #[test]
    fn test_gcm_every_field_is_authenticated() {
        let key = key256();
        let aad = b"header";
        let result = AesEngine::encrypt_gcm(b"payload bytes", &key, aad).unwrap();
        let tag = result.tag.as_ref().unwrap();

        // Flip one bit in each field in turn.
        let mut iv = result.iv.clone();
        iv[0] ^= 0x80;
        assert_eq!(
            AesEngine::decrypt_gcm(&result.ciphertext, &key, &iv, tag, aad).unwrap_err().code,
            ErrorCode::IntegrityError
        );

        let mut bad_tag = tag.clone();
        bad_tag[15] ^= 0x01;
        assert_eq!(
            AesEngine::decrypt_gcm(&result.ciphertext, &key, &result.iv, &bad_tag, aad)
                .unwrap_err()
                .code,
            ErrorCode::IntegrityError
        );

        assert_eq!(
            AesEngine::decrypt_gcm(&result.ciphertext, &key, &result.iv, tag, b"hexder")
                .unwrap_err()
                .code,
            ErrorCode::IntegrityError
        );
    }

    #[test]
    fn test_gcm_aad_mismatch_fails() {
        let key = key256();
        let result = AesEngine::encrypt_gcm(b"data", &key, b"aad-one").unwrap();
        let err = AesEngine::decrypt_gcm(
            &result.ciphertext,
            &key,
            &result.iv,
            result.tag.as_ref().unwrap(),
            b"aad-two",
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::IntegrityError);
    }

    #[test]
    fn test_gcm_explicit_iv_is_deterministic() {
        let key = key256();
        let iv = [0x24u8; 12];
        let a = AesEngine::encrypt_gcm_with_iv(b"vector", &key, &iv, &[]).unwrap();
        let b = AesEngine::encrypt_gcm_with_iv(b"vector", &key, &iv, &[]).unwrap();
        assert_eq!(a.ciphertext, b.ciphertext);
        assert_eq!(a.tag, b.tag);
    }

    #[test]
    fn test_gcm_rejects_bad_shapes() {
        let key = key256();
        assert_eq!(
            AesEngine::encrypt_gcm(b"x", &[0u8; 20], &[]).unwrap_err().code,
            ErrorCode::InvalidKeySize
        );
        assert_eq!(
            AesEngine::encrypt_gcm_with_iv(b"x", &key, &[0u8; 16], &[]).unwrap_err().code,
            ErrorCode::InvalidIvSize
        );
        assert_eq!(
            AesEngine::decrypt_gcm(b"ct", &key, &[0u8; 12], &[0u8; 12], &[]).unwrap_err().code,
            ErrorCode::InvalidTagSize
        );
    }

    #[test]
    fn test_gcm_empty_plaintext_roundtrip() {
        let key = key256();
        let result = AesEngine::encrypt_gcm(&[], &key, &[]).unwrap();
        assert!(result.ciphertext.is_empty());
        let decrypted = AesEngine::decrypt_gcm(
            &result.ciphertext,
            &key,
            &result.iv,
            result.tag.as_ref().unwrap(),
            &[],
        )
        .unwrap();
        assert!(decrypted.is_empty());
    }

    #[test]
    fn test_cbc_roundtrip() {
        let key = key256();
        let plaintext = b"cbc compatibility path";
        let result = AesEngine::encrypt_cbc(plaintext, &key).unwrap();
        assert_eq!(result.iv.len(), CBC_IV_LEN);
        assert!(result.tag.is_none());
        assert_eq!(result.ciphertext.len() % BLOCK_LEN, 0);

        let decrypted = AesEngine::decrypt_cbc(&result.ciphertext, &key, &result.iv).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_cbc_block_aligned_input_gains_full_padding_block() {
        let key = key256();
        let plaintext = [0u8; 32];
        let result = AesEngine::encrypt_cbc(&plaintext, &key).unwrap();
        assert_eq!(result.ciphertext.len(), 48);
    }

    #[test]
    fn test_cbc_rejects_partial_blocks() {
        let key = key256();
        let err = AesEngine::decrypt_cbc(&[0u8; 17], &key, &[0u8; 16]).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_cbc_truncated_ciphertext_yields_padding_error() {
        let key = key256();
        let iv = [0u8; 16];
        // Keeping only the first block makes the final decrypted byte
        // 0x00, which is never a valid PKCS#7 padding length.
        let sealed = AesEngine::encrypt_cbc_with_iv(&[0u8; 16], &key, &iv).unwrap();
        let err = AesEngine::decrypt_cbc(&sealed.ciphertext[..16], &key, &iv).unwrap_err();
        assert_eq!(err.code, ErrorCode::PaddingError);
    }

    #[test]
    fn test_oversize_plaintext_short_circuits() {
        let key = key256();
        // One byte past 64 MiB. Allocation is cheap; the cipher is never
        // invoked.
        let oversized = vec![0u8; validate::limits::MAX_PLAINTEXT_SIZE + 1];
        let err = AesEngine::encrypt_gcm(&oversized, &key, &[]).unwrap_err();
        assert_eq!(err.code, ErrorCode::SizeLimitExceeded);
    }

    #[test]
    fn test_generated_keys_differ() {
        let a = AesEngine::generate_key(AesKeySize::Aes256).unwrap();
        let b = AesEngine::generate_key(AesKeySize::Aes256).unwrap();
        assert_eq!(a.len(), 32);
        assert!(!a.ct_eq(b.as_slice()));
    }
}
