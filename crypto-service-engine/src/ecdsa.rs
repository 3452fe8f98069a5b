//! ECDSA engine over the NIST curves P-256, P-384, and P-521.
//!
//! The hash is fixed by the curve (SHA-256/384/512 respectively) and
//! signatures are DER-encoded. Verification follows the three-outcome
//! contract: valid, not-valid without error, or an internal error.

use rand::rngs::OsRng;

use p256::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;

use crate::types::EcCurve;

enum CurveKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
    P521(p521::SecretKey),
}

/// An ECDSA key pair held in process memory.
pub struct EcdsaKeyPair {
    key: CurveKey,
}

impl EcdsaKeyPair {
    /// Generate a fresh key pair on the given curve.
    pub fn generate(curve: EcCurve) -> CryptoResult<Self> {
        let key = match curve {
            EcCurve::P256 => CurveKey::P256(p256::SecretKey::random(&mut OsRng)),
            EcCurve::P384 => CurveKey::P384(p384::SecretKey::random(&mut OsRng)),
            EcCurve::P521 => CurveKey::P521(p521::SecretKey::random(&mut OsRng)),
        };
        Ok(Self { key })
    }

    pub fn curve(&self) -> EcCurve {
        match self.key {
            CurveKey::P256(_) => EcCurve::P256,
            CurveKey::P384(_) => EcCurve::P384,
            CurveKey::P521(_) => EcCurve::P521,
        }
    }

    /// Private key as PKCS#8 DER, in a secure buffer.
    pub fn to_pkcs8_der(&self) -> CryptoResult<SecureBuffer> {
        let doc = match &self.key {
            CurveKey::P256(key) => key.to_pkcs8_der(),
            CurveKey::P384(key) => key.to_pkcs8_der(),
            CurveKey::P521(key) => key.to_pkcs8_der(),
        }
        .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to serialize private key"))?;
        SecureBuffer::from_slice(doc.as_bytes())
    }

    /// Parse a PKCS#8 DER private key for the given curve.
    pub fn from_pkcs8_der(curve: EcCurve, der: &[u8]) -> CryptoResult<Self> {
        validate::validate_key_material_size(der.len())?;
        let key = match curve {
            EcCurve::P256 => CurveKey::P256(
                p256::SecretKey::from_pkcs8_der(der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse private key"))?,
            ),
            EcCurve::P384 => CurveKey::P384(
                p384::SecretKey::from_pkcs8_der(der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse private key"))?,
            ),
            EcCurve::P521 => CurveKey::P521(
                p521::SecretKey::from_pkcs8_der(der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse private key"))?,
            ),
        };
        Ok(Self { key })
    }

    /// Public key as SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = match &self.key {
            CurveKey::P256(key) => key.public_key().to_public_key_der(),
            CurveKey::P384(key) => key.public_key().to_public_key_der(),
            CurveKey::P521(key) => key.public_key().to_public_key_der(),
        }
        .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to serialize public key"))?;
        Ok(doc.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for EcdsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdsaKeyPair")
            .field("curve", &self.curve())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Stateless ECDSA engine. Safe for concurrent use.
pub struct EcdsaEngine;

impl EcdsaEngine {
    /// Sign with the curve-determined hash; the signature is DER-encoded.
    pub fn sign(data: &[u8], keypair: &EcdsaKeyPair) -> CryptoResult<Vec<u8>> {
        validate::validate_sign_data_size(data.len())?;

        let der = match &keypair.key {
            CurveKey::P256(key) => {
                use p256::ecdsa::signature::Signer;
                let signing_key = p256::ecdsa::SigningKey::from(key.clone());
                let signature: p256::ecdsa::Signature = signing_key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
            CurveKey::P384(key) => {
                use p384::ecdsa::signature::Signer;
                let signing_key = p384::ecdsa::SigningKey::from(key.clone());
                let signature: p384::ecdsa::Signature = signing_key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
            CurveKey::P521(key) => {
                use p521::ecdsa::signature::Signer;
                let signing_key = p521::ecdsa::SigningKey::from_bytes(&key.to_bytes())
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to derive signing key"))?;
                let signature: p521::ecdsa::Signature = signing_key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
        };

        Ok(der)
    }

    /// Verify a DER signature against a SubjectPublicKeyInfo DER public
    /// key. Returns `Ok(false)` for wrong or unparseable signatures.
    pub fn verify(
        data: &[u8],
        signature: &[u8],
        curve: EcCurve,
        public_key_der: &[u8],
    ) -> CryptoResult<bool> {
        validate::validate_sign_data_size(data.len())?;
        validate::validate_signature_size(signature.len())?;

        let valid = match curve {
            EcCurve::P256 => {
                use p256::ecdsa::signature::Verifier;
                let public = p256::PublicKey::from_public_key_der(public_key_der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse public key"))?;
                let verifying_key = p256::ecdsa::VerifyingKey::from(public);
                match p256::ecdsa::Signature::from_der(signature) {
                    Ok(signature) => verifying_key.verify(data, &signature).is_ok(),
                    Err(_) => false,
                }
            }
            EcCurve::P384 => {
                use p384::ecdsa::signature::Verifier;
                let public = p384::PublicKey::from_public_key_der(public_key_der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse public key"))?;
                let verifying_key = p384::ecdsa::VerifyingKey::from(public);
                match p384::ecdsa::Signature::from_der(signature) {
                    Ok(signature) => verifying_key.verify(data, &signature).is_ok(),
                    Err(_) => false,
                }
            }
            EcCurve::P521 => {
                use p521::ecdsa::signature::Verifier;
                use p521::elliptic_curve::sec1::ToEncodedPoint;
                let public = p521::PublicKey::from_public_key_der(public_key_der)
                    .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse public key"))?;
                let verifying_key =
                    p521::ecdsa::VerifyingKey::from_sec1_bytes(public.to_encoded_point(false).as_bytes())
                        .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse public key"))?;
                match p521::ecdsa::Signature::from_der(signature) {
                    Ok(signature) => verifying_key.verify(data, &signature).is_ok(),
                    Err(_) => false,
                }
            }
        };

        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_all_curves() {
        for curve in [EcCurve::P256, EcCurve::P384, EcCurve::P521] {
            let pair = EcdsaKeyPair::generate(curve).unwrap();
            assert_eq!(pair.curve(), curve);

            let data = b"curve-bound message";
            let signature = EcdsaEngine::sign(data, &pair).unwrap();
            let public = pair.public_key_der().unwrap();

            assert!(EcdsaEngine::verify(data, &signature, curve, &public).unwrap());
        }
    }

    #[test]
    fn test_wrong_data_is_not_valid() {
        let pair = EcdsaKeyPair::generate(EcCurve::P256).unwrap();
        let signature = EcdsaEngine::sign(b"first", &pair).unwrap();
        let public = pair.public_key_der().unwrap();

        let valid = EcdsaEngine::verify(b"second", &signature, EcCurve::P256, &public).unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_garbage_signature_is_not_valid() {
        let pair = EcdsaKeyPair::generate(EcCurve::P256).unwrap();
        let public = pair.public_key_der().unwrap();

        let valid = EcdsaEngine::verify(b"data", &[0x30, 0x01, 0x00], EcCurve::P256, &public)
            .unwrap();
        assert!(!valid);
    }

    #[test]
    fn test_pkcs8_der_roundtrip() {
        for curve in [EcCurve::P256, EcCurve::P384, EcCurve::P521] {
            let pair = EcdsaKeyPair::generate(curve).unwrap();
            let der = pair.to_pkcs8_der().unwrap();

            let restored = EcdsaKeyPair::from_pkcs8_der(curve, der.as_slice()).unwrap();
            let signature = EcdsaEngine::sign(b"restored", &restored).unwrap();
            let public = pair.public_key_der().unwrap();
            assert!(EcdsaEngine::verify(b"restored", &signature, curve, &public).unwrap());
        }
    }

    #[test]
    fn test_bad_public_key_is_an_error() {
        let err = EcdsaEngine::verify(b"data", &[0u8; 8], EcCurve::P256, b"not a key")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::CryptoError);
    }

    #[test]
    fn test_signatures_fit_signature_limit() {
        let pair = EcdsaKeyPair::generate(EcCurve::P521).unwrap();
        let signature = EcdsaEngine::sign(b"large curve", &pair).unwrap();
        assert!(signature.len() <= validate::limits::MAX_SIGNATURE_SIZE);
    }
}
