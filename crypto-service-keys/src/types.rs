//! Key data model: identifiers, algorithms, states, and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_engine::types::{AesKeySize, EcCurve, RsaKeySize};

/// Algorithms a managed key can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
    Aes128Cbc,
    Aes256Cbc,
    Rsa2048,
    Rsa3072,
    Rsa4096,
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
}

impl KeyAlgorithm {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyAlgorithm::Aes128Gcm => "AES_128_GCM",
            KeyAlgorithm::Aes256Gcm => "AES_256_GCM",
            KeyAlgorithm::Aes128Cbc => "AES_128_CBC",
            KeyAlgorithm::Aes256Cbc => "AES_256_CBC",
            KeyAlgorithm::Rsa2048 => "RSA_2048",
            KeyAlgorithm::Rsa3072 => "RSA_3072",
            KeyAlgorithm::Rsa4096 => "RSA_4096",
            KeyAlgorithm::EcdsaP256 => "ECDSA_P256",
            KeyAlgorithm::EcdsaP384 => "ECDSA_P384",
            KeyAlgorithm::EcdsaP521 => "ECDSA_P521",
        }
    }

    pub fn parse(s: &str) -> CryptoResult<Self> {
        match s {
            "AES_128_GCM" => Ok(KeyAlgorithm::Aes128Gcm),
            "AES_256_GCM" => Ok(KeyAlgorithm::Aes256Gcm),
            "AES_128_CBC" => Ok(KeyAlgorithm::Aes128Cbc),
            "AES_256_CBC" => Ok(KeyAlgorithm::Aes256Cbc),
            "RSA_2048" => Ok(KeyAlgorithm::Rsa2048),
            "RSA_3072" => Ok(KeyAlgorithm::Rsa3072),
            "RSA_4096" => Ok(KeyAlgorithm::Rsa4096),
            "ECDSA_P256" => Ok(KeyAlgorithm::EcdsaP256),
            "ECDSA_P384" => Ok(KeyAlgorithm::EcdsaP384),
            "ECDSA_P521" => Ok(KeyAlgorithm::EcdsaP521),
            _ => Err(Error::new(ErrorCode::InvalidInput, "Unknown key algorithm")),
        }
    }

    /// Stable numeric tag used in wire formats and the on-disk store.
    pub const fn tag(self) -> u16 {
        match self {
            KeyAlgorithm::Aes128Gcm => 1,
            KeyAlgorithm::Aes256Gcm => 2,
            KeyAlgorithm::Aes128Cbc => 3,
            KeyAlgorithm::Aes256Cbc => 4,
            KeyAlgorithm::Rsa2048 => 5,
            KeyAlgorithm::Rsa3072 => 6,
            KeyAlgorithm::Rsa4096 => 7,
            KeyAlgorithm::EcdsaP256 => 8,
            KeyAlgorithm::EcdsaP384 => 9,
            KeyAlgorithm::EcdsaP521 => 10,
        }
    }

    pub fn from_tag(tag: u16) -> CryptoResult<Self> {
        match tag {
            1 => Ok(KeyAlgorithm::Aes128Gcm),
            2 => Ok(KeyAlgorithm::Aes256Gcm),
            3 => Ok(KeyAlgorithm::Aes128Cbc),
            4 => Ok(KeyAlgorithm::Aes256Cbc),
            5 => Ok(KeyAlgorithm::Rsa2048),
            6 => Ok(KeyAlgorithm::Rsa3072),
            7 => Ok(KeyAlgorithm::Rsa4096),
            8 => Ok(KeyAlgorithm::EcdsaP256),
            9 => Ok(KeyAlgorithm::EcdsaP384),
            10 => Ok(KeyAlgorithm::EcdsaP521),
            _ => Err(Error::new(ErrorCode::InvalidInput, "Unknown algorithm tag")),
        }
    }

    pub const fn is_symmetric(self) -> bool {
        matches!(
            self,
            KeyAlgorithm::Aes128Gcm
                | KeyAlgorithm::Aes256Gcm
                | KeyAlgorithm::Aes128Cbc
                | KeyAlgorithm::Aes256Cbc
        )
    }

    pub const fn is_asymmetric(self) -> bool {
        !self.is_symmetric()
    }

    /// Raw key material length in bytes for symmetric algorithms;
    /// field/modulus size for asymmetric ones.
    pub const fn key_len(self) -> usize {
        match self {
            KeyAlgorithm::Aes128Gcm | KeyAlgorithm::Aes128Cbc => 16,
            KeyAlgorithm::Aes256Gcm | KeyAlgorithm::Aes256Cbc => 32,
            KeyAlgorithm::Rsa2048 => 256,
            KeyAlgorithm::Rsa3072 => 384,
            KeyAlgorithm::Rsa4096 => 512,
            KeyAlgorithm::EcdsaP256 => 32,
            KeyAlgorithm::EcdsaP384 => 48,
            KeyAlgorithm::EcdsaP521 => 66,
        }
    }

    pub const fn aes_key_size(self) -> Option<AesKeySize> {
        match self {
            KeyAlgorithm::Aes128Gcm | KeyAlgorithm::Aes128Cbc => Some(AesKeySize::Aes128),
            KeyAlgorithm::Aes256Gcm | KeyAlgorithm::Aes256Cbc => Some(AesKeySize::Aes256),
            _ => None,
        }
    }

    pub const fn rsa_key_size(self) -> Option<RsaKeySize> {
        match self {
            KeyAlgorithm::Rsa2048 => Some(RsaKeySize::Rsa2048),
            KeyAlgorithm::Rsa3072 => Some(RsaKeySize::Rsa3072),
            KeyAlgorithm::Rsa4096 => Some(RsaKeySize::Rsa4096),
            _ => None,
        }
    }

    pub const fn ec_curve(self) -> Option<EcCurve> {
        match self {
            KeyAlgorithm::EcdsaP256 => Some(EcCurve::P256),
            KeyAlgorithm::EcdsaP384 => Some(EcCurve::P384),
            KeyAlgorithm::EcdsaP521 => Some(EcCurve::P521),
            _ => None,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the stored material is meant to be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    Symmetric,
    Public,
    Private,
}

impl KeyType {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyType::Symmetric => "SYMMETRIC",
            KeyType::Public => "PUBLIC",
            KeyType::Private => "PRIVATE",
        }
    }
}

/// Key lifecycle states. Transitions are one-way forward; `Destroyed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyState {
    PendingActivation,
    Active,
    Deprecated,
    PendingDestruction,
    Destroyed,
}

impl KeyState {
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyState::PendingActivation => "PENDING_ACTIVATION",
            KeyState::Active => "ACTIVE",
            KeyState::Deprecated => "DEPRECATED",
            KeyState::PendingDestruction => "PENDING_DESTRUCTION",
            KeyState::Destroyed => "DESTROYED",
        }
    }

    /// Stable numeric tag used in the on-disk store.
    pub const fn tag(self) -> u32 {
        match self {
            KeyState::PendingActivation => 0,
            KeyState::Active => 1,
            KeyState::Deprecated => 2,
            KeyState::PendingDestruction => 3,
            KeyState::Destroyed => 4,
        }
    }

    pub fn from_tag(tag: u32) -> CryptoResult<Self> {
        match tag {
            0 => Ok(KeyState::PendingActivation),
            1 => Ok(KeyState::Active),
            2 => Ok(KeyState::Deprecated),
            3 => Ok(KeyState::PendingDestruction),
            4 => Ok(KeyState::Destroyed),
            _ => Err(Error::new(ErrorCode::InvalidInput, "Unknown key state tag")),
        }
    }

    /// Whether the state machine permits moving to `next`. Any strictly
    /// forward move is legal; nothing leaves `Destroyed`.
    pub fn can_transition_to(self, next: KeyState) -> bool {
        self != KeyState::Destroyed && next > self
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key identifier: `(namespace, uuid, version)`, serialized as
/// `namespace:uuid:version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId {
    pub namespace: String,
    pub uuid: String,
    pub version: u32,
}

impl KeyId {
    pub fn new(namespace: impl Into<String>, uuid: impl Into<String>, version: u32) -> Self {
        Self { namespace: namespace.into(), uuid: uuid.into(), version }
    }

    /// Fresh identifier at version 1.
    pub fn generate(namespace: impl Into<String>) -> Self {
        Self::new(namespace, Uuid::new_v4().to_string(), 1)
    }

    /// Parse the textual form. The namespace must be non-empty, the uuid
    /// the canonical 36-character hyphenated form, and the version a
    /// positive integer.
    pub fn parse(s: &str) -> CryptoResult<Self> {
        let invalid = || Error::new(ErrorCode::InvalidInput, "Invalid key identifier");

        let mut parts = s.split(':');
        let namespace = parts.next().ok_or_else(invalid)?;
        let uuid = parts.next().ok_or_else(invalid)?;
        let version = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() || namespace.is_empty() {
            return Err(invalid());
        }

        if uuid.len() != 36 {
            return Err(invalid());
        }
        let parsed = Uuid::try_parse(uuid).map_err(|_| invalid())?;
        if parsed.hyphenated().to_string() != uuid {
            return Err(invalid());
        }

        let version: u32 = version.parse().map_err(|_| invalid())?;
        if version == 0 {
            return Err(invalid());
        }

        Ok(Self::new(namespace, uuid, version))
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.uuid, self.version)
    }
}

/// Metadata describing a managed key. Mutated only through the key
/// service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub id: KeyId,
    pub algorithm: KeyAlgorithm,
    pub key_type: KeyType,
    pub state: KeyState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub previous_version_id: Option<KeyId>,
    pub owner_service: String,
    pub allowed_operations: Vec<String>,
    pub usage_count: u64,
}

impl KeyMetadata {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_active(&self) -> bool {
        self.state == KeyState::Active && !self.is_expired()
    }

    fn allows(&self, operation: &str) -> bool {
        self.allowed_operations.iter().any(|op| op == operation)
    }

    /// Encryption and new-use signing require an active key.
    pub fn can_encrypt(&self) -> bool {
        self.is_active() && self.allows("encrypt")
    }

    /// Deprecated keys keep decrypting previously produced output until
    /// they expire or are destroyed.
    pub fn can_decrypt(&self) -> bool {
        matches!(self.state, KeyState::Active | KeyState::Deprecated)
            && !self.is_expired()
            && self.allows("decrypt")
    }

    pub fn can_sign(&self) -> bool {
        self.is_active() && self.allows("sign")
    }

    pub fn can_verify(&self) -> bool {
        matches!(self.state, KeyState::Active | KeyState::Deprecated)
            && !self.is_expired()
            && self.allows("verify")
    }

    /// Structural invariants: timestamps ordered, rotation fields set
    /// together.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.created_at > self.expires_at {
            return Err(Error::new(
                ErrorCode::InvalidInput,
                "Key creation time is after its expiry",
            ));
        }
        if self.rotated_at.is_some() != self.previous_version_id.is_some() {
            return Err(Error::new(
                ErrorCode::InvalidInput,
                "Rotation timestamp and previous version must be set together",
            ));
        }
        Ok(())
    }
}

/// A key record as persisted: the raw material (or DER private key)
/// sealed under the master wrapping key with AES-256-GCM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub kek_id: String,
    pub metadata: KeyMetadata,
}
