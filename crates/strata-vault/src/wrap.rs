//! Key wrapping: PBKDF2-HMAC-SHA256 → AES-256-CBC with PKCS7 padding

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroizing;

use strata_core::{StrataError, StrataResult};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub const SALT_SIZE: usize = 16;
pub const IV_SIZE: usize = 16;
pub const WRAP_KEY_SIZE: usize = 32;

/// PBKDF2 rounds used unless configured otherwise
pub const DEFAULT_ITERATIONS: u32 = 200_000;

/// Derive the 256-bit wrap key from the master secret and a record's salt.
pub fn derive_wrap_key(
    secret: &SecretString,
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; WRAP_KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; WRAP_KEY_SIZE]);
    pbkdf2::pbkdf2_hmac::<Sha256>(
        secret.expose_secret().as_bytes(),
        salt,
        iterations,
        key.as_mut(),
    );
    key
}

/// Encrypt `raw_key` under the wrap key. Output is padded to the block size.
pub fn wrap_key(wrap_key: &[u8; WRAP_KEY_SIZE], iv: &[u8; IV_SIZE], raw_key: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(wrap_key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(raw_key)
}

/// Reverse [`wrap_key`]. Bad padding is reported as a key recovery failure,
/// which is what a wrong master secret almost always produces.
pub fn unwrap_key(
    wrap_key: &[u8; WRAP_KEY_SIZE],
    iv: &[u8; IV_SIZE],
    wrapped: &[u8],
) -> StrataResult<Zeroizing<Vec<u8>>> {
    Aes256CbcDec::new(wrap_key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(wrapped)
        .map(Zeroizing::new)
        .map_err(|_| {
            StrataError::KeyRecovery("wrapped key failed padding validation".into())
        })
}
