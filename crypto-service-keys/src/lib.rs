//! Key lifecycle management.
//!
//! Generation, rotation, deprecation, and retrieval of key material.
//! Material is persisted only as master-key-wrapped ciphertext; a
//! two-tier cache holds unwrapped material in secure buffers. Clients
//! reference keys by opaque identifiers and never see raw bytes.

pub mod cache;
pub mod service;
pub mod store;
pub mod types;

pub use cache::{KeyCache, KeyCacheConfig, RemoteCache, CACHE_KEY_PREFIX};
pub use service::{KeyGenerationParams, KeyService};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore};
pub use types::{KeyAlgorithm, KeyId, KeyMetadata, KeyState, KeyType, WrappedKey};
