//! Engine-level types and parameters.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hash functions used with RSA-OAEP, RSA-PSS, and MGF1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub const fn len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "SHA-256"),
            HashAlgorithm::Sha384 => write!(f, "SHA-384"),
            HashAlgorithm::Sha512 => write!(f, "SHA-512"),
        }
    }
}

/// AES key sizes supported by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AesKeySize {
    Aes128,
    Aes256,
}

impl AesKeySize {
    pub const fn bytes(self) -> usize {
        match self {
            AesKeySize::Aes128 => 16,
            AesKeySize::Aes256 => 32,
        }
    }
}

/// RSA modulus sizes supported by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RsaKeySize {
    Rsa2048,
    Rsa3072,
    Rsa4096,
}

impl RsaKeySize {
    pub const fn bits(self) -> usize {
        match self {
            RsaKeySize::Rsa2048 => 2048,
            RsaKeySize::Rsa3072 => 3072,
            RsaKeySize::Rsa4096 => 4096,
        }
    }

    pub const fn bytes(self) -> usize {
        self.bits() / 8
    }
}

/// NIST curves for ECDSA. The hash partner is fixed by the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub const fn hash(self) -> HashAlgorithm {
        match self {
            EcCurve::P256 => HashAlgorithm::Sha256,
            EcCurve::P384 => HashAlgorithm::Sha384,
            EcCurve::P521 => HashAlgorithm::Sha512,
        }
    }

    /// Field element length in bytes.
    pub const fn field_bytes(self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
            EcCurve::P521 => 66,
        }
    }
}

impl fmt::Display for EcCurve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EcCurve::P256 => write!(f, "P-256"),
            EcCurve::P384 => write!(f, "P-384"),
            EcCurve::P521 => write!(f, "P-521"),
        }
    }
}

/// Output of a symmetric encryption. The tag is present only for AEAD
/// modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptResult {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Option<Vec<u8>>,
}

/// Output of a hybrid encryption: an RSA-OAEP-wrapped AES-256 key plus
/// the AES-256-GCM payload sealed under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridResult {
    pub wrapped_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
}
