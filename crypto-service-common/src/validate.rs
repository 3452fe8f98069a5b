//! Input validation applied before any cryptographic work.
//!
//! Pure size/shape checks with generic error messages. Validation failures
//! short-circuit before a primitive engine ever touches the input.

use crate::error::{CryptoResult, Error, ErrorCode};

pub mod limits {
    /// Maximum plaintext for symmetric encryption (64 MiB).
    pub const MAX_PLAINTEXT_SIZE: usize = 64 * 1024 * 1024;

    /// Maximum ciphertext for decryption (64 MiB plus padding/tag overhead).
    pub const MAX_CIPHERTEXT_SIZE: usize = 64 * 1024 * 1024 + 1024;

    /// Maximum data size for signing (16 MiB).
    pub const MAX_SIGN_DATA_SIZE: usize = 16 * 1024 * 1024;

    /// Maximum file size for envelope encryption (1 GiB).
    pub const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024;

    /// Maximum AAD for AEAD modes (64 KiB).
    pub const MAX_AAD_SIZE: usize = 64 * 1024;

    /// Maximum key material size (8 KiB).
    pub const MAX_KEY_SIZE: usize = 8 * 1024;

    /// Maximum signature size (1 KiB).
    pub const MAX_SIGNATURE_SIZE: usize = 1024;

    pub const GCM_IV_SIZE: usize = 12;
    pub const GCM_TAG_SIZE: usize = 16;
    pub const CBC_IV_SIZE: usize = 16;
}

pub fn validate_plaintext_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_PLAINTEXT_SIZE {
        return Err(Error::new(ErrorCode::SizeLimitExceeded, "Input exceeds maximum allowed size"));
    }
    Ok(())
}

pub fn validate_ciphertext_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_CIPHERTEXT_SIZE {
        return Err(Error::new(
            ErrorCode::SizeLimitExceeded,
            "Ciphertext exceeds maximum allowed size",
        ));
    }
    Ok(())
}

pub fn validate_sign_data_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_SIGN_DATA_SIZE {
        return Err(Error::new(
            ErrorCode::SizeLimitExceeded,
            "Data exceeds maximum size for signing",
        ));
    }
    Ok(())
}

pub fn validate_file_size(size: u64) -> CryptoResult<()> {
    if size > limits::MAX_FILE_SIZE {
        return Err(Error::new(ErrorCode::SizeLimitExceeded, "File exceeds maximum allowed size"));
    }
    Ok(())
}

pub fn validate_aad_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_AAD_SIZE {
        return Err(Error::new(ErrorCode::SizeLimitExceeded, "AAD exceeds maximum allowed size"));
    }
    Ok(())
}

pub fn validate_key_material_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_KEY_SIZE {
        return Err(Error::new(
            ErrorCode::SizeLimitExceeded,
            "Key material exceeds maximum allowed size",
        ));
    }
    Ok(())
}

pub fn validate_signature_size(size: usize) -> CryptoResult<()> {
    if size > limits::MAX_SIGNATURE_SIZE {
        return Err(Error::new(
            ErrorCode::SizeLimitExceeded,
            "Signature exceeds maximum allowed size",
        ));
    }
    Ok(())
}

pub fn validate_aes_key_size(size: usize) -> CryptoResult<()> {
    if size != 16 && size != 32 {
        return Err(Error::new(ErrorCode::InvalidKeySize, "AES key must be 128 or 256 bits"));
    }
    Ok(())
}

pub fn validate_rsa_key_size(bits: usize) -> CryptoResult<()> {
    if bits != 2048 && bits != 3072 && bits != 4096 {
        return Err(Error::new(
            ErrorCode::InvalidKeySize,
            "RSA key must be 2048, 3072, or 4096 bits",
        ));
    }
    Ok(())
}

pub fn validate_gcm_iv_size(size: usize) -> CryptoResult<()> {
    if size != limits::GCM_IV_SIZE {
        return Err(Error::new(ErrorCode::InvalidIvSize, "GCM IV must be 96 bits"));
    }
    Ok(())
}

pub fn validate_gcm_tag_size(size: usize) -> CryptoResult<()> {
    if size != limits::GCM_TAG_SIZE {
        return Err(Error::new(ErrorCode::InvalidTagSize, "GCM tag must be 128 bits"));
    }
    Ok(())
}

pub fn validate_cbc_iv_size(size: usize) -> CryptoResult<()> {
    if size != limits::CBC_IV_SIZE {
        return Err(Error::new(ErrorCode::InvalidIvSize, "CBC IV must be 128 bits"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_limit_boundary() {
        assert!(validate_plaintext_size(limits::MAX_PLAINTEXT_SIZE).is_ok());
        let err = validate_plaintext_size(limits::MAX_PLAINTEXT_SIZE + 1).unwrap_err();
        assert_eq!(err.code, ErrorCode::SizeLimitExceeded);
    }

    #[test]
    fn test_aes_key_sizes() {
        assert!(validate_aes_key_size(16).is_ok());
        assert!(validate_aes_key_size(32).is_ok());
        for bad in [0, 8, 24, 31, 33, 64] {
            assert_eq!(validate_aes_key_size(bad).unwrap_err().code, ErrorCode::InvalidKeySize);
        }
    }

    #[test]
    fn test_rsa_key_sizes() {
        for good in [2048, 3072, 4096] {
            assert!(validate_rsa_key_size(good).is_ok());
        }
        for bad in [1024, 2047, 2049, 8192] {
            assert!(validate_rsa_key_size(bad).is_err());
        }
    }

    #[test]
    fn test_iv_and_tag_shapes() {
        assert!(validate_gcm_iv_size(12).is_ok());
        assert_eq!(validate_gcm_iv_size(16).unwrap_err().code, ErrorCode::InvalidIvSize);
        assert!(validate_gcm_tag_size(16).is_ok());
        assert_eq!(validate_gcm_tag_size(12).unwrap_err().code, ErrorCode::InvalidTagSize);
        assert!(validate_cbc_iv_size(16).is_ok());
        assert_eq!(validate_cbc_iv_size(12).unwrap_err().code, ErrorCode::InvalidIvSize);
    }

    #[test]
    fn test_messages_are_generic() {
        let err = validate_aad_size(limits::MAX_AAD_SIZE + 1).unwrap_err();
        // No offsets or dumps: the message names the limit, not the input.
        assert_eq!(err.message, "AAD exceeds maximum allowed size");
    }

    #[test]
    fn test_file_size_limit() {
        assert!(validate_file_size(limits::MAX_FILE_SIZE).is_ok());
        assert!(validate_file_size(limits::MAX_FILE_SIZE + 1).is_err());
    }
}
