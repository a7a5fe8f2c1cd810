//! Chunk manifest sidecar
//!
//! A manifest records everything needed to verify and decrypt a `CTRCH` file
//! except the key itself:
//! - base nonce (hex) and chunk size
//! - key id to recover the run key from the vault
//! - one HMAC-SHA256 tag (hex) per ciphertext chunk, index-aligned
//!
//! It is written once, after the ciphertext has been published, through a
//! temp file and rename.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use strata_core::{StrataError, StrataResult};

use crate::{NONCE_SIZE, TAG_SIZE};

/// Mode string for chunked CTR manifests
pub const MODE_CTR_CHUNKED: &str = "CTR_CHUNKED";

/// Current manifest format version
pub const MANIFEST_VERSION: u32 = 1;

/// `chunk_count` is a u32 on disk; larger files cannot be described.
fn chunk_count(chunks: usize) -> StrataResult<u32> {
    u32::try_from(chunks).map_err(|_| {
        StrataError::Format(format!(
            "{chunks} chunks exceed the manifest limit of {}",
            u32::MAX
        ))
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    /// Always `CTR_CHUNKED`
    pub mode: String,
    /// Per-file base nonce (hex, 16 bytes)
    pub base_nonce: String,
    /// Plaintext chunk size in bytes (0 = whole file as one chunk)
    pub chunk_size: u64,
    /// Number of ciphertext chunks
    pub chunk_count: u32,
    /// Vault id of the run key
    pub key_id: String,
    /// HMAC-SHA256 of each ciphertext chunk (hex), in chunk order
    pub chunk_hmacs: Vec<String>,
    /// Manifest format version
    pub version: u32,
}

impl ChunkManifest {
    pub fn new(
        base_nonce: &[u8; NONCE_SIZE],
        chunk_size: u64,
        key_id: &str,
        tags: &[[u8; TAG_SIZE]],
    ) -> StrataResult<Self> {
        Ok(Self {
            mode: MODE_CTR_CHUNKED.to_string(),
            base_nonce: hex::encode(base_nonce),
            chunk_size,
            chunk_count: chunk_count(tags.len())?,
            key_id: key_id.to_string(),
            chunk_hmacs: tags.iter().map(hex::encode).collect(),
            version: MANIFEST_VERSION,
        })
    }

    /// Decode the hex base nonce.
    pub fn base_nonce_bytes(&self) -> StrataResult<[u8; NONCE_SIZE]> {
        let raw = hex::decode(&self.base_nonce)
            .map_err(|e| StrataError::Format(format!("manifest base_nonce: {e}")))?;
        raw.try_into().map_err(|v: Vec<u8>| {
            StrataError::Format(format!(
                "manifest base_nonce is {} bytes (expected {NONCE_SIZE})",
                v.len()
            ))
        })
    }

    /// Decode the tag for chunk `index`.
    pub fn tag(&self, index: usize) -> StrataResult<Vec<u8>> {
        let hex_tag = self.chunk_hmacs.get(index).ok_or_else(|| {
            StrataError::Format(format!("manifest has no tag for chunk {index}"))
        })?;
        hex::decode(hex_tag)
            .map_err(|e| StrataError::Format(format!("manifest tag {index}: {e}")))
    }

    /// Structural checks that do not need the ciphertext.
    pub fn validate(&self) -> StrataResult<()> {
        if self.mode != MODE_CTR_CHUNKED {
            return Err(StrataError::Format(format!(
                "manifest mode is {:?} (expected {MODE_CTR_CHUNKED})",
                self.mode
            )));
        }
        if self.version != MANIFEST_VERSION {
            return Err(StrataError::Format(format!(
                "unsupported manifest version {}",
                self.version
            )));
        }
        if self.chunk_hmacs.len() != self.chunk_count as usize {
            return Err(StrataError::Format(format!(
                "manifest lists {} tags for {} chunks",
                self.chunk_hmacs.len(),
                self.chunk_count
            )));
        }
        self.base_nonce_bytes().map(|_| ())
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> StrataResult<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StrataError::Format(format!("manifest serialization: {e}")))
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(data: &[u8]) -> StrataResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| StrataError::Format(format!("manifest deserialization: {e}")))
    }

    /// Load a manifest; a missing file is `MissingManifest`.
    pub fn load(path: &Path) -> StrataResult<Self> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StrataError::MissingManifest(path.to_path_buf()))
            }
            Err(e) => return Err(StrataError::io_at(path, e)),
        };
        Self::from_bytes(&data)
    }

    /// Publish the manifest via write-then-rename.
    pub fn write_atomic(&self, path: &Path) -> StrataResult<()> {
        write_bytes_atomic(path, &self.to_bytes()?)
    }
}

/// The fields every sidecar shares, enough to route a ciphertext to the
/// right decryptor without committing to a full schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SidecarProbe {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub key_id: Option<String>,
    /// Original file name, recorded by the single-shot cipher only
    #[serde(default)]
    pub src: Option<String>,
}

impl SidecarProbe {
    /// Read the sidecar at `path`; a missing file is `MissingManifest`.
    pub fn read(path: &Path) -> StrataResult<Self> {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StrataError::MissingManifest(path.to_path_buf()))
            }
            Err(e) => return Err(StrataError::io_at(path, e)),
        };
        serde_json::from_slice(&data)
            .map_err(|e| StrataError::Format(format!("{}: {e}", path.display())))
    }

    pub fn is_chunked(&self) -> bool {
        self.mode == MODE_CTR_CHUNKED
    }
}

/// Write `bytes` to `<path>.tmp` and rename it over `path`.
pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> StrataResult<()> {
    let tmp = tmp_path(path);
    if let Err(e) = std::fs::write(&tmp, bytes) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StrataError::io_at(&tmp, e));
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        StrataError::io_at(path, e)
    })
}

/// `<path>.tmp`, next to the target so the rename stays on one filesystem.
pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
