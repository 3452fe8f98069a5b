//! File envelope codec and streaming file encryption.
//!
//! A single on-disk container: a length-prefixed header naming the KEK
//! and carrying the wrapped per-file DEK, followed by the AES-256-GCM
//! payload. The DEK is wrapped through the key service: AES-GCM under a
//! symmetric KEK, RSA-OAEP under an RSA KEK. Decryption parses and
//! sanity-checks the header first and emits no partial output on
//! failure.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};
use crypto_service_common::metrics::{metrics, LatencyTimer};
use crypto_service_common::secure::SecureBuffer;
use crypto_service_common::validate;
use crypto_service_engine::aes::{AesEngine, GCM_IV_LEN, GCM_TAG_LEN};
use crypto_service_engine::rsa::{RsaEngine, RsaKeyPair};
use crypto_service_engine::types::{AesKeySize, HashAlgorithm};
use crypto_service_keys::service::KeyService;
use crypto_service_keys::types::{KeyId, KeyMetadata};

use crate::clients::logging::LoggingClient;
use crate::services::{fail, succeed, OperationContext};

/// `"CRYP"` interpreted as a little-endian u32.
pub const ENVELOPE_MAGIC: u32 = 0x4352_5950;
pub const ENVELOPE_VERSION: u16 = 1;

/// Largest length any single header field may claim; keeps a corrupted
/// header from driving huge allocations.
const MAX_HEADER_FIELD_LEN: u32 = 64 * 1024;

/// Parsed envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEnvelopeHeader {
    /// Algorithm tag of the KEK (see `KeyAlgorithm::tag`).
    pub algorithm: u16,
    pub kek_id: KeyId,
    pub wrapped_dek: Vec<u8>,
    pub iv: Vec<u8>,
    pub tag: Vec<u8>,
    pub original_size: u64,
    pub chunk_size: u32,
}

impl FileEnvelopeHeader {
    /// Wire layout, all integers little-endian:
    /// `magic | version | algo | id_len | id | wrap_len | wrap |
    ///  iv_len | iv | tag_len | tag | original_size | chunk_size`.
    pub fn serialize(&self) -> Vec<u8> {
        let id = self.kek_id.to_string();
        let mut out = Vec::with_capacity(
            28 + id.len() + self.wrapped_dek.len() + self.iv.len() + self.tag.len(),
        );

        out.extend_from_slice(&ENVELOPE_MAGIC.to_le_bytes());
        out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.algorithm.to_le_bytes());

        for field in [id.as_bytes(), &self.wrapped_dek, &self.iv, &self.tag] {
            out.extend_from_slice(&(field.len() as u32).to_le_bytes());
            out.extend_from_slice(field);
        }

        out.extend_from_slice(&self.original_size.to_le_bytes());
        out.extend_from_slice(&self.chunk_size.to_le_bytes());
        out
    }

    /// Parse a header from the front of a stream, leaving the reader
    /// positioned at the first ciphertext byte.
    pub fn parse(reader: &mut dyn Read) -> CryptoResult<Self> {
        let bad_header = || Error::new(ErrorCode::InvalidInput, "Invalid envelope header");

        let magic = read_u32(reader)?;
        if magic != ENVELOPE_MAGIC {
            return Err(bad_header());
        }
        let version = read_u16(reader)?;
        if version != ENVELOPE_VERSION {
            return Err(bad_header());
        }
        let algorithm = read_u16(reader)?;

        let id_bytes = read_field(reader)?;
        let id_str = String::from_utf8(id_bytes).map_err(|_| bad_header())?;
        let kek_id = KeyId::parse(&id_str)?;

        let wrapped_dek = read_field(reader)?;
        let iv = read_field(reader)?;
        let tag = read_field(reader)?;

        let original_size = read_u64(reader)?;
        let chunk_size = read_u32(reader)?;

        if iv.len() != GCM_IV_LEN || tag.len() != GCM_TAG_LEN || wrapped_dek.is_empty() {
            return Err(bad_header());
        }
        validate::validate_file_size(original_size)?;
        if chunk_size == 0 {
            return Err(bad_header());
        }

        Ok(Self { algorithm, kek_id, wrapped_dek, iv, tag, original_size, chunk_size })
    }
}

fn read_exact(reader: &mut dyn Read, buf: &mut [u8]) -> CryptoResult<()> {
    reader
        .read_exact(buf)
        .map_err(|_| Error::new(ErrorCode::InvalidInput, "Invalid envelope header"))
}

fn read_u16(reader: &mut dyn Read) -> CryptoResult<u16> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut dyn Read) -> CryptoResult<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut dyn Read) -> CryptoResult<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_field(reader: &mut dyn Read) -> CryptoResult<Vec<u8>> {
    let len = read_u32(reader)?;
    if len > MAX_HEADER_FIELD_LEN {
        return Err(Error::new(ErrorCode::InvalidInput, "Invalid envelope header"));
    }
    let mut buf = vec![0u8; len as usize];
    read_exact(reader, &mut buf)?;
    Ok(buf)
}

/// Streaming file encryption through the key service.
pub struct FileEncryptionService {
    keys: Arc<KeyService>,
    logging: Option<Arc<LoggingClient>>,
    chunk_size: u32,
}

impl FileEncryptionService {
    pub fn new(keys: Arc<KeyService>, logging: Option<Arc<LoggingClient>>, chunk_size: u32) -> Self {
        Self { keys, logging, chunk_size: chunk_size.max(1) }
    }

    /// Encrypt a stream into an envelope under the given KEK. Returns
    /// the number of payload bytes consumed.
    pub fn encrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        kek_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<u64> {
        let _timer = LatencyTimer::new(&metrics().encrypt_latency);
        metrics().encrypt_total.inc();

        self.encrypt_stream_inner(input, output, kek_id)
            .map(|written| {
                succeed(self.logging.as_ref(), "encrypt_file", Some(kek_id), ctx);
                written
            })
            .map_err(|err| fail(self.logging.as_ref(), "encrypt_file", Some(kek_id), ctx, err))
    }

    fn encrypt_stream_inner(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        kek_id: &KeyId,
    ) -> CryptoResult<u64> {
        let metadata = self.keys.get_metadata(kek_id)?;
        if metadata.is_expired() {
            return Err(Error::new(ErrorCode::KeyExpired, "Key has expired"));
        }
        if !metadata.can_encrypt() {
            return Err(Error::new(ErrorCode::KeyInvalidState, "Key does not permit encryption"));
        }

        // Bounded read: one byte past the limit turns into a size error.
        let mut plaintext = Vec::new();
        let limit = validate::limits::MAX_FILE_SIZE;
        let read = input
            .take(limit + 1)
            .read_to_end(&mut plaintext)
            .map_err(|_| Error::new(ErrorCode::ServiceUnavailable, "Failed to read input"))?;
        validate::validate_file_size(read as u64)?;

        let dek = AesEngine::generate_key(AesKeySize::Aes256)?;
        let wrapped_dek = self.wrap_dek(&dek, kek_id, &metadata)?;

        let sealed = AesEngine::encrypt_gcm(&plaintext, dek.as_slice(), &[])?;

        let header = FileEnvelopeHeader {
            algorithm: metadata.algorithm.tag(),
            kek_id: kek_id.clone(),
            wrapped_dek,
            iv: sealed.iv,
            tag: sealed.tag.expect("AEAD encryption produces a tag"),
            original_size: plaintext.len() as u64,
            chunk_size: self.chunk_size,
        };

        let io_err = || Error::new(ErrorCode::ServiceUnavailable, "Failed to write output");
        output.write_all(&header.serialize()).map_err(|_| io_err())?;
        output.write_all(&sealed.ciphertext).map_err(|_| io_err())?;
        output.flush().map_err(|_| io_err())?;

        Ok(plaintext.len() as u64)
    }

    /// Decrypt an envelope stream. The header is parsed and checked
    /// first; nothing is written unless the whole payload authenticates.
    pub fn decrypt_stream(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
        ctx: &OperationContext,
    ) -> CryptoResult<u64> {
        let _timer = LatencyTimer::new(&metrics().decrypt_latency);
        metrics().decrypt_total.inc();

        match self.decrypt_stream_inner(input, output) {
            Ok((kek_id, written)) => {
                succeed(self.logging.as_ref(), "decrypt_file", Some(&kek_id), ctx);
                Ok(written)
            }
            Err((kek_id, err)) => {
                Err(fail(self.logging.as_ref(), "decrypt_file", kek_id.as_ref(), ctx, err))
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn decrypt_stream_inner(
        &self,
        input: &mut dyn Read,
        output: &mut dyn Write,
    ) -> Result<(KeyId, u64), (Option<KeyId>, Error)> {
        let header = FileEnvelopeHeader::parse(input).map_err(|err| (None, err))?;
        let kek_id = header.kek_id.clone();
        let attach = |err: Error| (Some(kek_id.clone()), err);

        let metadata = self.keys.get_metadata(&kek_id).map_err(attach)?;
        if metadata.algorithm.tag() != header.algorithm {
            return Err(attach(Error::new(
                ErrorCode::InvalidInput,
                "Invalid envelope header",
            )));
        }
        if metadata.is_expired() {
            return Err(attach(Error::new(ErrorCode::KeyExpired, "Key has expired")));
        }
        if !metadata.can_decrypt() {
            return Err(attach(Error::new(
                ErrorCode::KeyInvalidState,
                "Key does not permit decryption",
            )));
        }

        let dek = self.unwrap_dek(&header.wrapped_dek, &kek_id, &metadata).map_err(attach)?;

        let mut ciphertext = Vec::new();
        input
            .take(validate::limits::MAX_FILE_SIZE + GCM_TAG_LEN as u64 + 1)
            .read_to_end(&mut ciphertext)
            .map_err(|_| attach(Error::new(ErrorCode::ServiceUnavailable, "Failed to read input")))?;

        if ciphertext.len() as u64 != header.original_size {
            return Err(attach(Error::safe(ErrorCode::IntegrityError)));
        }

        let plaintext =
            AesEngine::decrypt_gcm(&ciphertext, dek.as_slice(), &header.iv, &header.tag, &[])
                .map_err(attach)?;

        output.write_all(&plaintext).map_err(|_| {
            attach(Error::new(ErrorCode::ServiceUnavailable, "Failed to write output"))
        })?;
        output.flush().map_err(|_| {
            attach(Error::new(ErrorCode::ServiceUnavailable, "Failed to write output"))
        })?;

        Ok((kek_id, plaintext.len() as u64))
    }

    /// Encrypt one file into another.
    pub fn encrypt_file(
        &self,
        input_path: &Path,
        output_path: &Path,
        kek_id: &KeyId,
        ctx: &OperationContext,
    ) -> CryptoResult<u64> {
        let input = File::open(input_path)
            .map_err(|_| Error::new(ErrorCode::InvalidInput, "Cannot open input file"))?;
        let output = File::create(output_path)
            .map_err(|_| Error::new(ErrorCode::ServiceUnavailable, "Cannot create output file"))?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);
        self.encrypt_stream(&mut reader, &mut writer, kek_id, ctx)
    }

    /// Decrypt one envelope file into another.
    pub fn decrypt_file(
        &self,
        input_path: &Path,
        output_path: &Path,
        ctx: &OperationContext,
    ) -> CryptoResult<u64> {
        let input = File::open(input_path)
            .map_err(|_| Error::new(ErrorCode::InvalidInput, "Cannot open input file"))?;
        let output = File::create(output_path)
            .map_err(|_| Error::new(ErrorCode::ServiceUnavailable, "Cannot create output file"))?;

        let mut reader = BufReader::new(input);
        let mut writer = BufWriter::new(output);
        self.decrypt_stream(&mut reader, &mut writer, ctx)
    }

    /// Read just the header of an envelope file.
    pub fn read_header(&self, path: &Path) -> CryptoResult<FileEnvelopeHeader> {
        let input = File::open(path)
            .map_err(|_| Error::new(ErrorCode::InvalidInput, "Cannot open input file"))?;
        let mut reader = BufReader::new(input);
        FileEnvelopeHeader::parse(&mut reader)
    }

    /// Wrap the DEK under the KEK: AES-GCM (`iv || tag || ct`) for
    /// symmetric KEKs, RSA-OAEP for RSA KEKs.
    fn wrap_dek(
        &self,
        dek: &SecureBuffer,
        kek_id: &KeyId,
        metadata: &KeyMetadata,
    ) -> CryptoResult<Vec<u8>> {
        if metadata.algorithm.aes_key_size().is_some() {
            let kek = self.keys.get_material(kek_id)?;
            let sealed = AesEngine::encrypt_gcm(dek.as_slice(), kek.as_slice(), &[])?;
            let tag = sealed.tag.expect("AEAD encryption produces a tag");
            let mut wrapped =
                Vec::with_capacity(sealed.iv.len() + tag.len() + sealed.ciphertext.len());
            wrapped.extend_from_slice(&sealed.iv);
            wrapped.extend_from_slice(&tag);
            wrapped.extend_from_slice(&sealed.ciphertext);
            return Ok(wrapped);
        }

        if metadata.algorithm.rsa_key_size().is_some() {
            let der = self.keys.public_key_der(kek_id)?;
            let public = RsaKeyPair::public_from_der(&der)?;
            return RsaEngine::encrypt_oaep(dek.as_slice(), &public, HashAlgorithm::Sha256);
        }

        Err(Error::new(ErrorCode::InvalidKeyType, "Key cannot wrap data keys"))
    }

    fn unwrap_dek(
        &self,
        wrapped: &[u8],
        kek_id: &KeyId,
        metadata: &KeyMetadata,
    ) -> CryptoResult<SecureBuffer> {
        if metadata.algorithm.aes_key_size().is_some() {
            if wrapped.len() < GCM_IV_LEN + GCM_TAG_LEN {
                return Err(Error::new(ErrorCode::InvalidInput, "Invalid envelope header"));
            }
            let (iv, rest) = wrapped.split_at(GCM_IV_LEN);
            let (tag, ciphertext) = rest.split_at(GCM_TAG_LEN);
            let kek = self.keys.get_material(kek_id)?;
            let dek = AesEngine::decrypt_gcm(ciphertext, kek.as_slice(), iv, tag, &[])?;
            return SecureBuffer::from_vec(dek);
        }

        if metadata.algorithm.rsa_key_size().is_some() {
            let material = self.keys.get_material(kek_id)?;
            let pair = RsaKeyPair::from_pkcs8_der(material.as_slice())?;
            let dek = RsaEngine::decrypt_oaep_to_secure(wrapped, &pair, HashAlgorithm::Sha256)?;
            if dek.len() != 32 {
                return Err(Error::new(ErrorCode::InvalidKeySize, "Unwrapped key has invalid size"));
            }
            return Ok(dek);
        }

        Err(Error::new(ErrorCode::InvalidKeyType, "Key cannot wrap data keys"))
    }
}
