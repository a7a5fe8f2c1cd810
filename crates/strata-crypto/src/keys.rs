//! Run keys: generation, recovery from vault bytes, auth key derivation

use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use strata_core::{StrataError, StrataResult};

use crate::KEY_SIZE;

/// Domain suffix hashed with the run key to derive the HMAC key
const AUTH_KEY_SUFFIX: &[u8] = b"auth_key";

/// A 256-bit AES key shared by every file of one batch run. Zeroized on drop.
#[derive(Clone)]
pub struct RunKey {
    bytes: [u8; KEY_SIZE],
}

impl RunKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Rebuild a key from bytes recovered out of a key ring.
    pub fn from_slice(raw: &[u8]) -> StrataResult<Self> {
        let bytes: [u8; KEY_SIZE] = raw.try_into().map_err(|_| {
            StrataError::KeyRecovery(format!(
                "recovered key has wrong size: {} bytes (expected {KEY_SIZE})",
                raw.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// `SHA-256(key || "auth_key")`. Deterministic, never persisted.
    pub fn auth_key(&self) -> AuthKey {
        let mut hasher = Sha256::new();
        hasher.update(self.bytes);
        hasher.update(AUTH_KEY_SUFFIX);
        AuthKey {
            bytes: hasher.finalize().into(),
        }
    }
}

impl Drop for RunKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// HMAC-SHA256 key derived from a [`RunKey`]. Zeroized on drop.
pub struct AuthKey {
    bytes: [u8; 32],
}

impl AuthKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Drop for AuthKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit run key from the OS CSPRNG.
pub fn generate_run_key() -> RunKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    RunKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_key_generation() {
        let k1 = generate_run_key();
        let k2 = generate_run_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_auth_key_matches_definition() {
        let key = RunKey::from_bytes([7u8; KEY_SIZE]);

        let mut expected = Sha256::new();
        expected.update([7u8; KEY_SIZE]);
        expected.update(b"auth_key");
        let expected: [u8; 32] = expected.finalize().into();

        assert_eq!(key.auth_key().as_bytes(), &expected);
        assert_eq!(
            key.auth_key().as_bytes(),
            key.auth_key().as_bytes(),
            "auth key derivation must be deterministic"
        );
    }

    #[test]
    fn test_from_slice_wrong_length() {
        let err = RunKey::from_slice(&[1u8; 16]).unwrap_err();
        assert!(matches!(err, StrataError::KeyRecovery(_)));

        let ok = RunKey::from_slice(&[1u8; KEY_SIZE]).unwrap();
        assert_eq!(ok.as_bytes(), &[1u8; KEY_SIZE]);
    }

    #[test]
    fn test_debug_redacts() {
        let key = generate_run_key();
        let shown = format!("{key:?} {:?}", key.auth_key());
        assert!(shown.contains("REDACTED"));
    }
}
