//! Chunked CTR engine: whole-file encrypt/decrypt with parallel chunk fan-out
//!
//! Encrypt: read → split → CTR per chunk on a rayon pool → HMAC per chunk →
//! `<dst>.tmp` → rename ciphertext → `<dst>.meta.json.tmp` → rename manifest
//! (the ciphertext is removed if this fails) → register the run key with the
//! key ring (best effort).
//!
//! Decrypt: manifest → key ring → header checks → read frames → verify every
//! tag → CTR per chunk on a rayon pool → `<dst>.tmp` → rename.
//!
//! Chunk tasks are addressed by index and write into a fixed slot, so output
//! order never depends on which worker finishes first. A failure at any step
//! leaves no destination file behind and registers no key.

use rand::RngCore;
use rayon::prelude::*;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use strata_core::{KeyRing, StrataError, StrataResult};

use crate::chunk::{decrypt_chunk, encrypt_chunk, tag_chunk, verify_chunk};
use crate::format::{read_frames, read_header, write_frame, write_header, Header};
use crate::keys::RunKey;
use crate::manifest::{tmp_path, ChunkManifest};
use crate::{NONCE_SIZE, TAG_SIZE, VAULT_MODE};

/// Result of a chunked encryption.
///
/// The ciphertext and manifest are authoritative once this is returned;
/// `key_registration` reports separately whether the key ring accepted the
/// run key. When it did not, the caller must keep the key some other way.
#[derive(Debug)]
pub struct EncryptOutcome {
    pub chunk_count: u32,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub manifest_path: PathBuf,
    pub key_registration: StrataResult<()>,
}

/// Result of a chunked decryption
#[derive(Debug, Clone)]
pub struct DecryptOutcome {
    pub chunk_count: u32,
    pub bytes_out: u64,
}

/// Sidecar manifest location: `<path>.meta.json`
pub fn manifest_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Split `data` into `chunk_size` pieces; the last may be shorter.
///
/// `chunk_size == 0` is the degenerate single-chunk mode: the whole input is
/// one chunk, even when empty. Otherwise an empty input has no chunks.
pub fn split_chunks(data: &[u8], chunk_size: u64) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    let size = usize::try_from(chunk_size).unwrap_or(usize::MAX);
    data.chunks(size).collect()
}

/// Encrypt `src` into a `CTRCH` file at `dst` plus `<dst>.meta.json`.
pub fn encrypt_file(
    src: &Path,
    dst: &Path,
    key: &RunKey,
    key_id: &str,
    chunk_size: u64,
    workers: usize,
    ring: &dyn KeyRing,
) -> StrataResult<EncryptOutcome> {
    let started = Instant::now();
    let data = std::fs::read(src).map_err(|e| StrataError::io_at(src, e))?;
    let chunks = split_chunks(&data, chunk_size);

    let mut base_nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut base_nonce);

    debug!(
        path = %src.display(),
        chunks = chunks.len(),
        chunk_size,
        workers,
        "encrypt: chunk fan-out"
    );
    let pool = build_pool(workers)?;
    let ciphertexts = fan_out(&pool, &chunks, |index, plaintext| {
        encrypt_chunk(key, &base_nonce, index, plaintext)
    });

    let auth_key = key.auth_key();
    let tags = ciphertexts
        .iter()
        .map(|ct| tag_chunk(&auth_key, ct))
        .collect::<StrataResult<Vec<[u8; TAG_SIZE]>>>()?;

    let manifest = ChunkManifest::new(&base_nonce, chunk_size, key_id, &tags)?;
    let manifest_path = manifest_path_for(dst);

    let header = Header {
        base_nonce,
        chunk_size,
    };
    let bytes_out = publish(dst, |w| {
        write_header(w, &header)?;
        for ct in &ciphertexts {
            write_frame(w, ct)?;
        }
        Ok(())
    })?;

    if let Err(e) = manifest.write_atomic(&manifest_path) {
        // A ciphertext without its manifest cannot be decrypted
        let _ = std::fs::remove_file(dst);
        return Err(e);
    }

    let key_registration = ring.store(key_id, key.as_bytes(), VAULT_MODE);
    if let Err(e) = &key_registration {
        warn!(
            path = %dst.display(),
            key_id,
            error = %e,
            "ciphertext committed but key registration failed"
        );
    }

    info!(
        src = %src.display(),
        dst = %dst.display(),
        chunks = manifest.chunk_count,
        bytes = data.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "encrypt: committed"
    );

    Ok(EncryptOutcome {
        chunk_count: manifest.chunk_count,
        bytes_in: data.len() as u64,
        bytes_out,
        manifest_path,
        key_registration,
    })
}

/// Decrypt a `CTRCH` file produced by [`encrypt_file`].
///
/// `key_id` overrides the manifest's key id when given.
pub fn decrypt_file(
    src: &Path,
    dst: &Path,
    key_id: Option<&str>,
    workers: usize,
    ring: &dyn KeyRing,
) -> StrataResult<DecryptOutcome> {
    let started = Instant::now();
    let manifest = ChunkManifest::load(&manifest_path_for(src))?;
    manifest.validate()?;
    let manifest_nonce = manifest.base_nonce_bytes()?;

    let key_id = key_id.unwrap_or(&manifest.key_id);
    let (raw, _mode) = ring.load(key_id)?;
    let key = RunKey::from_slice(&raw)?;

    let file = File::open(src).map_err(|e| StrataError::io_at(src, e))?;
    let file_len = file
        .metadata()
        .map_err(|e| StrataError::io_at(src, e))?
        .len();
    let mut reader = BufReader::new(file);

    let header = read_header(&mut reader)?;
    if header.base_nonce != manifest_nonce {
        return Err(StrataError::Format(format!(
            "{}: base nonce does not match its manifest",
            src.display()
        )));
    }
    if header.chunk_size != manifest.chunk_size {
        return Err(StrataError::Format(format!(
            "{}: header chunk size {} does not match manifest chunk size {}",
            src.display(),
            header.chunk_size,
            manifest.chunk_size
        )));
    }

    let frames = read_frames(&mut reader, file_len)?;
    if frames.len() != manifest.chunk_count as usize {
        return Err(StrataError::Format(format!(
            "{}: {} chunks on disk, manifest lists {}",
            src.display(),
            frames.len(),
            manifest.chunk_count
        )));
    }

    let auth_key = key.auth_key();
    for (index, ct) in frames.iter().enumerate() {
        let expected = manifest.tag(index)?;
        if !verify_chunk(&auth_key, ct, &expected)? {
            warn!(path = %src.display(), chunk = index, "chunk authentication failed");
            return Err(StrataError::Integrity {
                path: src.to_path_buf(),
                chunk: index,
            });
        }
    }
    debug!(path = %src.display(), chunks = frames.len(), "decrypt: all tags verified");

    let inputs: Vec<&[u8]> = frames.iter().map(Vec::as_slice).collect();
    let pool = build_pool(workers)?;
    let plaintexts = fan_out(&pool, &inputs, |index, ciphertext| {
        decrypt_chunk(&key, &manifest_nonce, index, ciphertext)
    });

    let bytes_out = publish(dst, |w| {
        for pt in &plaintexts {
            w.write_all(pt)?;
        }
        Ok(())
    })?;

    info!(
        src = %src.display(),
        dst = %dst.display(),
        chunks = manifest.chunk_count,
        bytes = bytes_out,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "decrypt: committed"
    );

    Ok(DecryptOutcome {
        chunk_count: manifest.chunk_count,
        bytes_out,
    })
}

/// Run `task` for every input on `pool`, each result landing in the slot of
/// its index.
fn fan_out<F>(pool: &rayon::ThreadPool, inputs: &[&[u8]], task: F) -> Vec<Vec<u8>>
where
    F: Fn(u64, &[u8]) -> Vec<u8> + Sync,
{
    let mut slots: Vec<Vec<u8>> = vec![Vec::new(); inputs.len()];
    pool.install(|| {
        slots
            .par_iter_mut()
            .zip(inputs.par_iter())
            .enumerate()
            .for_each(|(index, (slot, input))| *slot = task(index as u64, input));
    });
    slots
}

fn build_pool(workers: usize) -> StrataResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("strata-ctr-{i}"))
        .build()
        .map_err(|e| StrataError::Other(anyhow::anyhow!("building worker pool: {e}")))
}

/// Write through `<dst>.tmp`, fsync, then rename over `dst`. Returns the
/// number of bytes written. The temp file is removed on any failure.
pub(crate) fn publish<F>(dst: &Path, write: F) -> StrataResult<u64>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let tmp = tmp_path(dst);
    let result = (|| -> std::io::Result<u64> {
        let mut w = BufWriter::new(File::create(&tmp)?);
        write(&mut w)?;
        let file = w.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(file.metadata()?.len())
    })();

    match result {
        Ok(len) => {
            std::fs::rename(&tmp, dst).map_err(|e| {
                let _ = std::fs::remove_file(&tmp);
                StrataError::io_at(dst, e)
            })?;
            Ok(len)
        }
        Err(e) => {
            let _ = std::fs::remove_file(&tmp);
            Err(StrataError::io_at(&tmp, e))
        }
    }
}
