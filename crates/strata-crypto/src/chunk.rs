//! Per-chunk AES-256-CTR encryption and HMAC-SHA256 tagging
//!
//! Each chunk gets its own 16-byte CTR IV:
//! ```text
//! [8 bytes: base_nonce[0..8]][8 bytes: chunk_index, big-endian]
//! ```
//! The IV is used as a 128-bit big-endian counter block, so the keystream of
//! chunk `i` starts at `(prefix, i) << 64` and never overlaps another chunk of
//! the same file unless a chunk exceeds 2^64 blocks.
//!
//! CTR gives no authenticity; every ciphertext chunk carries an HMAC tag that
//! must verify before the chunk is decrypted.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use strata_core::{StrataError, StrataResult};

use crate::keys::{AuthKey, RunKey};
use crate::{NONCE_SIZE, TAG_SIZE};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Derive the CTR IV for `index`: first 8 bytes of the base nonce, then the
/// big-endian chunk index.
pub fn chunk_nonce(base_nonce: &[u8; NONCE_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..8].copy_from_slice(&base_nonce[..8]);
    nonce[8..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Encrypt one chunk. Ciphertext has the same length as the plaintext.
pub fn encrypt_chunk(
    key: &RunKey,
    base_nonce: &[u8; NONCE_SIZE],
    index: u64,
    plaintext: &[u8],
) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    apply_keystream(key, base_nonce, index, &mut buf);
    buf
}

/// Decrypt one chunk. CTR decryption is the same keystream XOR as encryption.
pub fn decrypt_chunk(
    key: &RunKey,
    base_nonce: &[u8; NONCE_SIZE],
    index: u64,
    ciphertext: &[u8],
) -> Vec<u8> {
    encrypt_chunk(key, base_nonce, index, ciphertext)
}

fn apply_keystream(key: &RunKey, base_nonce: &[u8; NONCE_SIZE], index: u64, buf: &mut [u8]) {
    let nonce = chunk_nonce(base_nonce, index);
    let mut cipher = Aes256Ctr::new(key.as_bytes().into(), (&nonce).into());
    cipher.apply_keystream(buf);
}

/// HMAC-SHA256 over a ciphertext chunk.
pub fn tag_chunk(auth_key: &AuthKey, ciphertext: &[u8]) -> StrataResult<[u8; TAG_SIZE]> {
    let mut mac = new_mac(auth_key)?;
    mac.update(ciphertext);
    Ok(mac.finalize().into_bytes().into())
}

/// Verify a chunk tag in constant time.
pub fn verify_chunk(auth_key: &AuthKey, ciphertext: &[u8], expected: &[u8]) -> StrataResult<bool> {
    let mut mac = new_mac(auth_key)?;
    mac.update(ciphertext);
    Ok(mac.verify_slice(expected).is_ok())
}

fn new_mac(auth_key: &AuthKey) -> StrataResult<HmacSha256> {
    <HmacSha256 as Mac>::new_from_slice(auth_key.as_bytes())
        .map_err(|e| StrataError::Crypto(format!("HMAC key setup failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_run_key;

    const BASE: [u8; NONCE_SIZE] = [
        0xB0, 0xB1, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xBB, 0xBC, 0xBD, 0xBE,
        0xBF,
    ];

    #[test]
    fn test_chunk_nonce_layout() {
        let nonce = chunk_nonce(&BASE, 2);
        assert_eq!(&nonce[..8], &BASE[..8]);
        assert_eq!(&nonce[8..], &[0, 0, 0, 0, 0, 0, 0, 2]);
    }

    #[test]
    fn test_chunk_nonces_distinct() {
        let nonces: std::collections::HashSet<_> =
            (0..1000u64).map(|i| chunk_nonce(&BASE, i)).collect();
        assert_eq!(nonces.len(), 1000);
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_run_key();
        let plaintext = b"hello, chunked counter mode!";

        let ct = encrypt_chunk(&key, &BASE, 5, plaintext);
        assert_eq!(ct.len(), plaintext.len());
        assert_ne!(&ct[..], &plaintext[..]);

        let pt = decrypt_chunk(&key, &BASE, 5, &ct);
        assert_eq!(&pt[..], &plaintext[..]);
    }

    #[test]
    fn test_wrong_index_garbles() {
        let key = generate_run_key();
        let ct = encrypt_chunk(&key, &BASE, 0, b"secret data");
        let pt = decrypt_chunk(&key, &BASE, 1, &ct);
        assert_ne!(&pt[..], b"secret data");
    }

    #[test]
    fn test_same_plaintext_different_index() {
        let key = generate_run_key();
        let data = vec![0u8; 64];
        let a = encrypt_chunk(&key, &BASE, 0, &data);
        let b = encrypt_chunk(&key, &BASE, 1, &data);
        assert_ne!(a, b, "keystreams of distinct chunks must differ");
    }

    #[test]
    fn test_tag_verify() {
        let key = generate_run_key();
        let auth = key.auth_key();
        let ct = encrypt_chunk(&key, &BASE, 0, b"payload");
        let tag = tag_chunk(&auth, &ct).unwrap();

        assert!(verify_chunk(&auth, &ct, &tag).unwrap());

        let mut tampered = ct.clone();
        tampered[0] ^= 0x01;
        assert!(
            !verify_chunk(&auth, &tampered, &tag).unwrap(),
            "tampered chunk must fail"
        );

        let other = generate_run_key().auth_key();
        assert!(
            !verify_chunk(&other, &ct, &tag).unwrap(),
            "wrong auth key must fail"
        );

        assert!(
            !verify_chunk(&auth, &ct, &tag[..16]).unwrap(),
            "truncated tag must fail"
        );
    }

    #[test]
    fn test_empty_chunk() {
        let key = generate_run_key();
        let ct = encrypt_chunk(&key, &BASE, 0, b"");
        assert!(ct.is_empty());
        let tag = tag_chunk(&key.auth_key(), &ct).unwrap();
        assert!(verify_chunk(&key.auth_key(), &ct, &tag).unwrap());
    }
}
