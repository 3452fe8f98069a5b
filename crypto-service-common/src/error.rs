//! Unified result and error types.
//!
//! Every fallible operation in the core returns [`CryptoResult`]. Errors
//! carry a categorical code, a generic message, and the correlation id of
//! the request that produced them. Messages never contain key material,
//! plaintext, byte positions, or hex dumps.

use thiserror::Error as ThisError;

pub type CryptoResult<T> = Result<T, Error>;

/// Categorical error codes for all core operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Input
    InvalidInput,
    InvalidKeySize,
    InvalidIvSize,
    InvalidTagSize,
    SizeLimitExceeded,

    // Crypto
    CryptoError,
    IntegrityError,
    PaddingError,
    SignatureInvalid,
    EncryptionFailed,
    DecryptionFailed,
    KeyGenerationFailed,
    InvalidKeyType,

    // Key lifecycle
    KeyNotFound,
    KeyDeprecated,
    KeyRotationFailed,
    KeyExpired,
    KeyInvalidState,

    // Collaborators
    ServiceUnavailable,
    Timeout,
    KmsUnavailable,
    CacheMiss,
    CacheError,
    CacheUnavailable,
    LoggingError,
    LoggingUnavailable,

    // Policy
    AuthenticationFailed,
    AuthorizationFailed,
    PermissionDenied,

    // Configuration
    ConfigError,
    ConfigMissing,
    ConfigInvalid,
}

impl ErrorCode {
    /// Stable string form used for metric labels and log fields.
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InvalidKeySize => "INVALID_KEY_SIZE",
            ErrorCode::InvalidIvSize => "INVALID_IV_SIZE",
            ErrorCode::InvalidTagSize => "INVALID_TAG_SIZE",
            ErrorCode::SizeLimitExceeded => "SIZE_LIMIT_EXCEEDED",
            ErrorCode::CryptoError => "CRYPTO_ERROR",
            ErrorCode::IntegrityError => "INTEGRITY_ERROR",
            ErrorCode::PaddingError => "PADDING_ERROR",
            ErrorCode::SignatureInvalid => "SIGNATURE_INVALID",
            ErrorCode::EncryptionFailed => "ENCRYPTION_FAILED",
            ErrorCode::DecryptionFailed => "DECRYPTION_FAILED",
            ErrorCode::KeyGenerationFailed => "KEY_GENERATION_FAILED",
            ErrorCode::InvalidKeyType => "INVALID_KEY_TYPE",
            ErrorCode::KeyNotFound => "KEY_NOT_FOUND",
            ErrorCode::KeyDeprecated => "KEY_DEPRECATED",
            ErrorCode::KeyRotationFailed => "KEY_ROTATION_FAILED",
            ErrorCode::KeyExpired => "KEY_EXPIRED",
            ErrorCode::KeyInvalidState => "KEY_INVALID_STATE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::KmsUnavailable => "KMS_UNAVAILABLE",
            ErrorCode::CacheMiss => "CACHE_MISS",
            ErrorCode::CacheError => "CACHE_ERROR",
            ErrorCode::CacheUnavailable => "CACHE_UNAVAILABLE",
            ErrorCode::LoggingError => "LOGGING_ERROR",
            ErrorCode::LoggingUnavailable => "LOGGING_UNAVAILABLE",
            ErrorCode::AuthenticationFailed => "AUTHENTICATION_FAILED",
            ErrorCode::AuthorizationFailed => "AUTHORIZATION_FAILED",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::ConfigError => "CONFIG_ERROR",
            ErrorCode::ConfigMissing => "CONFIG_MISSING",
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
        }
    }

    /// Whether an operation failing with this code can be retried.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::ServiceUnavailable
                | ErrorCode::Timeout
                | ErrorCode::KmsUnavailable
                | ErrorCode::CacheUnavailable
                | ErrorCode::LoggingUnavailable
        )
    }

    /// Whether this code reflects bad caller input rather than a fault in
    /// the service.
    pub const fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidInput
                | ErrorCode::InvalidKeySize
                | ErrorCode::InvalidIvSize
                | ErrorCode::InvalidTagSize
                | ErrorCode::SizeLimitExceeded
                | ErrorCode::AuthenticationFailed
                | ErrorCode::AuthorizationFailed
                | ErrorCode::PermissionDenied
                | ErrorCode::KeyNotFound
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed messages for failures whose details must not leak.
///
/// Integrity and signature failures always use the same message no matter
/// which of ciphertext, iv, tag, or aad mismatched.
pub mod safe_messages {
    pub const ENCRYPTION_FAILED: &str = "Encryption operation failed";
    pub const DECRYPTION_FAILED: &str = "Decryption operation failed";
    pub const SIGNATURE_FAILED: &str = "Signature operation failed";
    pub const VERIFICATION_FAILED: &str = "Signature verification failed";
    pub const INTEGRITY_FAILED: &str = "Data integrity verification failed";
    pub const KEY_OPERATION_FAILED: &str = "Key operation failed";
}

/// Error carried by every failed core operation.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
#[error("[{code}] {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub correlation_id: Option<String>,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), correlation_id: None }
    }

    /// Build an error with the fixed non-leaky message for its code.
    pub fn safe(code: ErrorCode) -> Self {
        let message = match code {
            ErrorCode::EncryptionFailed => safe_messages::ENCRYPTION_FAILED,
            ErrorCode::DecryptionFailed => safe_messages::DECRYPTION_FAILED,
            ErrorCode::SignatureInvalid => safe_messages::VERIFICATION_FAILED,
            ErrorCode::IntegrityError => safe_messages::INTEGRITY_FAILED,
            _ => "Operation failed",
        };
        Self::new(code, message)
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_client_error(&self) -> bool {
        self.code.is_client_error()
    }

    /// Render the error for log output, including the correlation id when
    /// one is attached.
    pub fn to_log_string(&self) -> String {
        match &self.correlation_id {
            Some(id) => format!("[{}] {} (correlation_id={})", self.code, self.message, id),
            None => format!("[{}] {}", self.code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ErrorCode::ServiceUnavailable.is_retryable());
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::CacheUnavailable.is_retryable());
        assert!(!ErrorCode::IntegrityError.is_retryable());
        assert!(!ErrorCode::InvalidInput.is_retryable());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ErrorCode::InvalidKeySize.is_client_error());
        assert!(ErrorCode::SizeLimitExceeded.is_client_error());
        assert!(ErrorCode::KeyNotFound.is_client_error());
        assert!(!ErrorCode::CryptoError.is_client_error());
        assert!(!ErrorCode::ServiceUnavailable.is_client_error());
    }

    #[test]
    fn test_safe_messages_are_fixed() {
        let err = Error::safe(ErrorCode::IntegrityError);
        assert_eq!(err.message, "Data integrity verification failed");

        let err = Error::safe(ErrorCode::SignatureInvalid);
        assert_eq!(err.message, "Signature verification failed");
    }

    #[test]
    fn test_correlation_id_in_log_string() {
        let err = Error::new(ErrorCode::KeyNotFound, "Key not found")
            .with_correlation_id("0af7651916cd43dd");
        assert!(err.to_log_string().contains("correlation_id=0af7651916cd43dd"));
        assert!(err.to_log_string().contains("KEY_NOT_FOUND"));
    }

    #[test]
    fn test_display_includes_code() {
        let err = Error::new(ErrorCode::ConfigMissing, "missing master key");
        assert_eq!(format!("{err}"), "[CONFIG_MISSING] missing master key");
    }
}
