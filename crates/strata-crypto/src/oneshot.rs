//! Single-shot AES-256-GCM for files below the chunking threshold
//!
//! Ciphertext layout:
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//! The sidecar `<out>.meta.json` records the original file name so a batch
//! decrypt can restore it.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use strata_core::{KeyRing, StrataError, StrataResult};

use crate::engine::{manifest_path_for, publish};
use crate::keys::RunKey;
use crate::manifest::write_bytes_atomic;

/// Mode string recorded in single-shot sidecars
pub const MODE_GCM: &str = "GCM";

const GCM_NONCE_SIZE: usize = 12;
const GCM_TAG_SIZE: usize = 16;
const ONESHOT_VERSION: u32 = 1;

/// Sidecar metadata of a single-shot ciphertext
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneShotMeta {
    /// File name of the plaintext, without directories
    pub src: String,
    pub key_id: String,
    pub mode: String,
    pub version: u32,
}

/// Encrypt `path` in one AEAD call and write `out_path` plus its sidecar.
pub fn encrypt_stream(
    path: &Path,
    out_path: &Path,
    key_id: &str,
    key: &RunKey,
) -> StrataResult<OneShotMeta> {
    let plaintext = std::fs::read(path).map_err(|e| StrataError::io_at(path, e))?;

    let mut nonce = [0u8; GCM_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
        .map_err(|e| StrataError::Crypto(format!("GCM encryption failed: {e}")))?;

    publish(out_path, |w| {
        w.write_all(&nonce)?;
        w.write_all(&ciphertext)
    })?;

    let meta = OneShotMeta {
        src: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        key_id: key_id.to_string(),
        mode: MODE_GCM.to_string(),
        version: ONESHOT_VERSION,
    };
    let sidecar = serde_json::to_vec_pretty(&meta)
        .map_err(|e| StrataError::Format(format!("sidecar serialization: {e}")))?;
    if let Err(e) = write_bytes_atomic(&manifest_path_for(out_path), &sidecar) {
        let _ = std::fs::remove_file(out_path);
        return Err(e);
    }

    debug!(src = %path.display(), dst = %out_path.display(), bytes = plaintext.len(), "one-shot encrypt committed");
    Ok(meta)
}

/// Decrypt a file written by [`encrypt_stream`].
///
/// `key_id` overrides the sidecar's key id when given. A failed tag check is
/// reported as an integrity failure of chunk 0.
pub fn decrypt_stream(
    ct_path: &Path,
    out_path: &Path,
    ring: &dyn KeyRing,
    key_id: Option<&str>,
) -> StrataResult<OneShotMeta> {
    let sidecar_path = manifest_path_for(ct_path);
    let raw_meta = match std::fs::read(&sidecar_path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StrataError::MissingManifest(sidecar_path))
        }
        Err(e) => return Err(StrataError::io_at(&sidecar_path, e)),
    };
    let meta: OneShotMeta = serde_json::from_slice(&raw_meta)
        .map_err(|e| StrataError::Format(format!("{}: {e}", sidecar_path.display())))?;
    if meta.mode != MODE_GCM {
        return Err(StrataError::Format(format!(
            "sidecar mode is {:?} (expected {MODE_GCM})",
            meta.mode
        )));
    }

    let (raw_key, _mode) = ring.load(key_id.unwrap_or(&meta.key_id))?;
    let key = RunKey::from_slice(&raw_key)?;

    let data = std::fs::read(ct_path).map_err(|e| StrataError::io_at(ct_path, e))?;
    if data.len() < GCM_NONCE_SIZE + GCM_TAG_SIZE {
        return Err(StrataError::Format(format!(
            "{}: {} bytes is too short for a GCM ciphertext",
            ct_path.display(),
            data.len()
        )));
    }
    let (nonce, ciphertext) = data.split_at(GCM_NONCE_SIZE);

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StrataError::Integrity {
            path: ct_path.to_path_buf(),
            chunk: 0,
        })?;

    publish(out_path, |w| w.write_all(&plaintext))?;
    Ok(meta)
}
