//! RSA engine: OAEP encryption and PSS signatures.
//!
//! Key pairs are generated at 2048/3072/4096 bits and serialized as
//! PKCS#8 DER. OAEP and PSS take a configurable hash (the same hash is
//! used for MGF1; the PSS salt length equals the hash length).

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::pss;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;

use crate::types::{HashAlgorithm, RsaKeySize};

fn oaep_padding(hash: HashAlgorithm) -> Oaep {
    match hash {
        HashAlgorithm::Sha256 => Oaep::new::<Sha256>(),
        HashAlgorithm::Sha384 => Oaep::new::<Sha384>(),
        HashAlgorithm::Sha512 => Oaep::new::<Sha512>(),
    }
}

/// An RSA key pair held in process memory.
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a fresh key pair of the given modulus size.
    pub fn generate(size: RsaKeySize) -> CryptoResult<Self> {
        validate::validate_rsa_key_size(size.bits())?;
        let private = RsaPrivateKey::new(&mut OsRng, size.bits()).map_err(|_| {
            Error::new(ErrorCode::KeyGenerationFailed, "Failed to generate RSA key pair")
        })?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Modulus size in bits.
    pub fn key_bits(&self) -> usize {
        self.private.n().bits()
    }

    /// Modulus size in bytes.
    pub fn key_bytes(&self) -> usize {
        self.private.size()
    }

    /// Largest plaintext OAEP can seal under this key with the given
    /// hash: `key_bytes − 2·hash_bytes − 2`.
    pub fn max_oaep_plaintext(&self, hash: HashAlgorithm) -> usize {
        self.key_bytes().saturating_sub(2 * hash.len() + 2)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Private key as PKCS#8 DER, in a secure buffer.
    pub fn to_pkcs8_der(&self) -> CryptoResult<SecureBuffer> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to serialize private key"))?;
        SecureBuffer::from_slice(doc.as_bytes())
    }

    /// Public key as SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> CryptoResult<Vec<u8>> {
        let doc = self
            .public
            .to_public_key_der()
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to serialize public key"))?;
        Ok(doc.as_bytes().to_vec())
    }

    pub fn from_pkcs8_der(der: &[u8]) -> CryptoResult<Self> {
        validate::validate_key_material_size(der.len())?;
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse private key"))?;
        validate::validate_rsa_key_size(private.n().bits())?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    pub fn public_from_der(der: &[u8]) -> CryptoResult<RsaPublicKey> {
        validate::validate_key_material_size(der.len())?;
        RsaPublicKey::from_public_key_der(der)
            .map_err(|_| Error::new(ErrorCode::CryptoError, "Failed to parse public key"))
    }
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("bits", &self.key_bits())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Stateless RSA engine. Safe for concurrent use.
pub struct RsaEngine;

impl RsaEngine {
    /// RSA-OAEP encryption under the recipient public key. Inputs past
    /// the OAEP bound are rejected without producing partial output.
    pub fn encrypt_oaep(
        plaintext: &[u8],
        public: &RsaPublicKey,
        hash: HashAlgorithm,
    ) -> CryptoResult<Vec<u8>> {
        let max = public.size().saturating_sub(2 * hash.len() + 2);
        if plaintext.len() > max {
            return Err(Error::new(
                ErrorCode::SizeLimitExceeded,
                "Input exceeds maximum size for RSA encryption",
            ));
        }

        public
            .encrypt(&mut OsRng, oaep_padding(hash), plaintext)
            .map_err(|_| Error::safe(ErrorCode::EncryptionFailed))
    }

    /// RSA-OAEP decryption with the private key.
    pub fn decrypt_oaep(
        ciphertext: &[u8],
        keypair: &RsaKeyPair,
        hash: HashAlgorithm,
    ) -> CryptoResult<Vec<u8>> {
        validate::validate_ciphertext_size(ciphertext.len())?;
        keypair
            .private
            .decrypt(oaep_padding(hash), ciphertext)
            .map_err(|_| Error::safe(ErrorCode::DecryptionFailed))
    }

    /// RSA-PSS signature. The salt length equals the hash length.
    pub fn sign_pss(
        data: &[u8],
        keypair: &RsaKeyPair,
        hash: HashAlgorithm,
    ) -> CryptoResult<Vec<u8>> {
        validate::validate_sign_data_size(data.len())?;

        let signature = match hash {
            HashAlgorithm::Sha256 => {
                let key = pss::SigningKey::<Sha256>::new(keypair.private.clone());
                key.sign_with_rng(&mut OsRng, data).to_vec()
            }
            HashAlgorithm::Sha384 => {
                let key = pss::SigningKey::<Sha384>::new(keypair.private.clone());
                key.sign_with_rng(&mut OsRng, data).to_vec()
            }
            HashAlgorithm::Sha512 => {
                let key = pss::SigningKey::<Sha512>::new(keypair.private.clone());
                key.sign_with_rng(&mut OsRng, data).to_vec()
            }
        };

        Ok(signature)
    }

    /// RSA-PSS verification. Returns `Ok(false)` for signatures that are
    /// well-formed-but-wrong or unparseable; errors are reserved for
    /// internal failures.
    pub fn verify_pss(
        data: &[u8],
        signature: &[u8],
        public: &RsaPublicKey,
        hash: HashAlgorithm,
    ) -> CryptoResult<bool> {
        validate::validate_sign_data_size(data.len())?;
        validate::validate_signature_size(signature.len())?;

        let signature = match pss::Signature::try_from(signature) {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };

        let valid = match hash {
            HashAlgorithm::Sha256 => {
                pss::VerifyingKey::<Sha256>::new(public.clone()).verify(data, &signature).is_ok()
            }
            HashAlgorithm::Sha384 => {
                pss::VerifyingKey::<Sha384>::new(public.clone()).verify(data, &signature).is_ok()
            }
            HashAlgorithm::Sha512 => {
                pss::VerifyingKey::<Sha512>::new(public.clone()).verify(data, &signature).is_ok()
            }
        };

        Ok(valid)
    }

    /// Decrypt OAEP output straight into a secure buffer. Used when the
    /// plaintext is key material.
    pub fn decrypt_oaep_to_secure(
        ciphertext: &[u8],
        keypair: &RsaKeyPair,
        hash: HashAlgorithm,
    ) -> CryptoResult<SecureBuffer> {
        let plaintext = Zeroizing::new(Self::decrypt_oaep(ciphertext, keypair, hash)?);
        SecureBuffer::from_slice(&plaintext)
    }
}
