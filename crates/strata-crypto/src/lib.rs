//! strata-crypto: chunked, authenticated AES-CTR for large files
//!
//! Pipeline: plaintext → fixed-size chunks → AES-256-CTR (per-chunk nonce) →
//! HMAC-SHA256 over each ciphertext chunk → `CTRCH` container + JSON manifest
//!
//! Nonce layout per chunk:
//! ```text
//! base_nonce[0..8] || chunk_index (8 bytes, big-endian)
//! ```
//!
//! Key material:
//! ```text
//! Run Key (256-bit random, one per batch, wrapped at rest by strata-vault)
//!   ├── Chunk cipher: AES-256-CTR (key=run_key, iv=chunk nonce)
//!   └── Auth Key = SHA-256(run_key || "auth_key") → HMAC-SHA256 per chunk
//! ```

pub mod chunk;
pub mod engine;
pub mod format;
pub mod keys;
pub mod manifest;
pub mod oneshot;

pub use chunk::{chunk_nonce, decrypt_chunk, encrypt_chunk, tag_chunk, verify_chunk};
pub use engine::{
    decrypt_file, encrypt_file, manifest_path_for, split_chunks, DecryptOutcome, EncryptOutcome,
};
pub use keys::{generate_run_key, RunKey};
pub use manifest::{ChunkManifest, SidecarProbe};
pub use oneshot::{decrypt_stream, encrypt_stream, OneShotMeta, MODE_GCM};

/// Size of a run key in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Size of the per-file base nonce and of each derived CTR IV
pub const NONCE_SIZE: usize = 16;

/// Size of an HMAC-SHA256 tag
pub const TAG_SIZE: usize = 32;

/// Vault mode recorded for keys registered by the chunked engine
pub const VAULT_MODE: &str = "ctr";
