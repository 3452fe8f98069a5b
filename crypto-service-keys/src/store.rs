//! Key record persistence.
//!
//! Two implementations of the [`KeyStore`] contract: an in-memory map for
//! tests and a local on-disk store that serializes wrapped records with a
//! fixed length-prefixed layout. Stores never decrypt and never see the
//! master key.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crypto_service_common::error::{CryptoResult, Error, ErrorCode};

use crate::types::{KeyAlgorithm, KeyId, KeyMetadata, KeyState, KeyType, WrappedKey};

/// Persistence contract for wrapped key records. Implementations
/// serialize concurrent access internally.
pub trait KeyStore: Send + Sync {
    fn store(&self, id: &KeyId, key: &WrappedKey) -> CryptoResult<()>;
    fn retrieve(&self, id: &KeyId) -> CryptoResult<WrappedKey>;
    fn remove(&self, id: &KeyId) -> CryptoResult<()>;
    fn exists(&self, id: &KeyId) -> CryptoResult<bool>;
    /// Enumerate identifiers, optionally filtered by namespace prefix.
    fn list(&self, namespace_prefix: Option<&str>) -> CryptoResult<Vec<KeyId>>;
    fn update_metadata(&self, id: &KeyId, metadata: &KeyMetadata) -> CryptoResult<()>;
}

fn key_not_found() -> Error {
    Error::new(ErrorCode::KeyNotFound, "Key not found")
}

fn matches_namespace(id: &KeyId, namespace_prefix: Option<&str>) -> bool {
    match namespace_prefix {
        Some(prefix) => id.namespace.starts_with(prefix),
        None => true,
    }
}

/// In-memory store used by tests and single-process deployments.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, WrappedKey>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn store(&self, id: &KeyId, key: &WrappedKey) -> CryptoResult<()> {
        self.keys.lock().insert(id.to_string(), key.clone());
        Ok(())
    }

    fn retrieve(&self, id: &KeyId) -> CryptoResult<WrappedKey> {
        self.keys.lock().get(&id.to_string()).cloned().ok_or_else(key_not_found)
    }

    fn remove(&self, id: &KeyId) -> CryptoResult<()> {
        self.keys.lock().remove(&id.to_string()).map(|_| ()).ok_or_else(key_not_found)
    }

    fn exists(&self, id: &KeyId) -> CryptoResult<bool> {
        Ok(self.keys.lock().contains_key(&id.to_string()))
    }

    fn list(&self, namespace_prefix: Option<&str>) -> CryptoResult<Vec<KeyId>> {
        let keys = self.keys.lock();
        let mut result = Vec::new();
        for key in keys.keys() {
            if let Ok(id) = KeyId::parse(key) {
                if matches_namespace(&id, namespace_prefix) {
                    result.push(id);
                }
            }
        }
        Ok(result)
    }

    fn update_metadata(&self, id: &KeyId, metadata: &KeyMetadata) -> CryptoResult<()> {
        let mut keys = self.keys.lock();
        let record = keys.get_mut(&id.to_string()).ok_or_else(key_not_found)?;
        record.metadata = metadata.clone();
        Ok(())
    }
}

// On-disk record layout, little-endian length prefixes:
// [u32 iv_len][iv][u32 tag_len][tag][u32 ct_len][ct][u32 algo_tag][u32 state_tag]

fn write_prefixed(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn read_u32(data: &[u8], offset: &mut usize) -> CryptoResult<u32> {
    let end = offset.checked_add(4).filter(|&end| end <= data.len()).ok_or_else(|| {
        Error::new(ErrorCode::InvalidInput, "Corrupted key record")
    })?;
    let value = u32::from_le_bytes(data[*offset..end].try_into().expect("four bytes"));
    *offset = end;
    Ok(value)
}

fn read_prefixed(data: &[u8], offset: &mut usize) -> CryptoResult<Vec<u8>> {
    let len = read_u32(data, offset)? as usize;
    let end = offset.checked_add(len).filter(|&end| end <= data.len()).ok_or_else(|| {
        Error::new(ErrorCode::InvalidInput, "Corrupted key record")
    })?;
    let bytes = data[*offset..end].to_vec();
    *offset = end;
    Ok(bytes)
}

/// Local on-disk store. One file per key, named after the identifier with
/// colons replaced by underscores.
pub struct FileKeyStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn new(root: impl Into<PathBuf>) -> CryptoResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|_| {
            Error::new(ErrorCode::ServiceUnavailable, "Failed to create key store directory")
        })?;
        Ok(Self { root, lock: Mutex::new(()) })
    }

    fn key_path(&self, id: &KeyId) -> PathBuf {
        let filename = id.to_string().replace(':', "_");
        self.root.join(format!("{filename}.key"))
    }

    fn serialize(key: &WrappedKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            key.iv.len() + key.tag.len() + key.ciphertext.len() + 5 * 4,
        );
        write_prefixed(&mut out, &key.iv);
        write_prefixed(&mut out, &key.tag);
        write_prefixed(&mut out, &key.ciphertext);
        out.extend_from_slice(&u32::from(key.metadata.algorithm.tag()).to_le_bytes());
        out.extend_from_slice(&key.metadata.state.tag().to_le_bytes());
        out
    }

    fn deserialize(id: &KeyId, data: &[u8]) -> CryptoResult<WrappedKey> {
        let mut offset = 0;
        let iv = read_prefixed(data, &mut offset)?;
        let tag = read_prefixed(data, &mut offset)?;
        let ciphertext = read_prefixed(data, &mut offset)?;
        let algorithm = KeyAlgorithm::from_tag(read_u32(data, &mut offset)? as u16)?;
        let state = KeyState::from_tag(read_u32(data, &mut offset)?)?;

        // Only the algorithm and state survive the on-disk layout; the
        // remaining metadata fields are reconstructed with defaults.
        let now = Utc::now();
        let metadata = KeyMetadata {
            id: id.clone(),
            algorithm,
            key_type: if algorithm.is_symmetric() { KeyType::Symmetric } else { KeyType::Private },
            state,
            created_at: now,
            expires_at: now + Duration::days(365),
            rotated_at: None,
            previous_version_id: None,
            owner_service: String::new(),
            allowed_operations: Vec::new(),
            usage_count: 0,
        };

        Ok(WrappedKey { ciphertext, iv, tag, kek_id: String::new(), metadata })
    }

    fn read_record(&self, id: &KeyId) -> CryptoResult<WrappedKey> {
        let path = self.key_path(id);
        let mut file = fs::File::open(&path).map_err(|_| key_not_found())?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|_| Error::new(ErrorCode::ServiceUnavailable, "Failed to read key record"))?;
        Self::deserialize(id, &data)
    }

    fn write_record(&self, id: &KeyId, key: &WrappedKey) -> CryptoResult<()> {
        let path = self.key_path(id);
        let mut file = fs::File::create(&path).map_err(|_| {
            Error::new(ErrorCode::ServiceUnavailable, "Failed to write key record")
        })?;
        file.write_all(&Self::serialize(key)).map_err(|_| {
            Error::new(ErrorCode::ServiceUnavailable, "Failed to write key record")
        })?;
        Ok(())
    }
}

impl KeyStore for FileKeyStore {
    fn store(&self, id: &KeyId, key: &WrappedKey) -> CryptoResult<()> {
        let _guard = self.lock.lock();
        self.write_record(id, key)?;
        debug!(key_id = %id, "stored wrapped key record");
        Ok(())
    }

    fn retrieve(&self, id: &KeyId) -> CryptoResult<WrappedKey> {
        let _guard = self.lock.lock();
        self.read_record(id)
    }

    fn remove(&self, id: &KeyId) -> CryptoResult<()> {
        let _guard = self.lock.lock();
        let path = self.key_path(id);
        fs::remove_file(path).map_err(|_| key_not_found())
    }

    fn exists(&self, id: &KeyId) -> CryptoResult<bool> {
        let _guard = self.lock.lock();
        Ok(self.key_path(id).exists())
    }

    fn list(&self, namespace_prefix: Option<&str>) -> CryptoResult<Vec<KeyId>> {
        let _guard = self.lock.lock();
        let mut result = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(|_| {
            Error::new(ErrorCode::ServiceUnavailable, "Failed to list key store directory")
        })?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("key") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                if let Ok(id) = KeyId::parse(&stem.replace('_', ":")) {
                    if matches_namespace(&id, namespace_prefix) {
                        result.push(id);
                    }
                }
            }
        }
        Ok(result)
    }

    fn update_metadata(&self, id: &KeyId, metadata: &KeyMetadata) -> CryptoResult<()> {
        let _guard = self.lock.lock();
        let mut record = self.read_record(id)?;
        record.metadata = metadata.clone();
        self.write_record(id, &record)
    }
}

impl std::fmt::Debug for FileKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKeyStore").field("root", &self.root).finish()
    }
}
