//! Stateless cryptographic primitive engines.
//!
//! AES (GCM and CBC), RSA (OAEP and PSS), ECDSA over the NIST curves, and
//! the hybrid RSA-wrapped-AES construction. Every engine is thread-safe,
//! validates its inputs before touching bytes, and returns errors that
//! never describe which part of an input failed.

pub mod aes;
pub mod ecdsa;
pub mod hybrid;
pub mod rsa;
pub mod types;

pub use aes::AesEngine;
pub use ecdsa::{EcdsaEngine, EcdsaKeyPair};
pub use hybrid::HybridEngine;
pub use rsa::{RsaEngine, RsaKeyPair};
pub use types::{AesKeySize, EcCurve, EncryptResult, HashAlgorithm, HybridResult, RsaKeySize};
