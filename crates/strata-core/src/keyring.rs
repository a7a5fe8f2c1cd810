//! The seam between the cipher engine and key storage.
//!
//! The chunked engine registers the run key after a successful encryption and
//! recovers it before decryption. `strata-vault::KeyVault` is the production
//! implementation; tests can plug in anything that satisfies the contract.

use zeroize::Zeroizing;

use crate::StrataResult;

pub trait KeyRing: Send + Sync {
    /// Persist `raw_key` under `key_id`. Last write wins for a given id.
    fn store(&self, key_id: &str, raw_key: &[u8], mode: &str) -> StrataResult<()>;

    /// Recover the raw key and the mode it was stored with.
    ///
    /// Fails with `KeyNotFound` for unknown ids and `KeyRecovery` when the
    /// stored bytes cannot be unwrapped.
    fn load(&self, key_id: &str) -> StrataResult<(Zeroizing<Vec<u8>>, String)>;
}

impl<T: KeyRing + ?Sized> KeyRing for std::sync::Arc<T> {
    fn store(&self, key_id: &str, raw_key: &[u8], mode: &str) -> StrataResult<()> {
        (**self).store(key_id, raw_key, mode)
    }

    fn load(&self, key_id: &str) -> StrataResult<(Zeroizing<Vec<u8>>, String)> {
        (**self).load(key_id)
    }
}
