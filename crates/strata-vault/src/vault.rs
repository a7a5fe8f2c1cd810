use rand::RngCore;
use secrecy::SecretString;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;
use zeroize::Zeroizing;

use strata_core::{KeyRing, StrataError, StrataResult};

use crate::secret::SecretProvider;
use crate::store::{KeySummary, SqliteStore, VaultRecord, VaultStore};
use crate::wrap::{derive_wrap_key, unwrap_key, wrap_key, DEFAULT_ITERATIONS, IV_SIZE, SALT_SIZE};

/// Wraps run keys under a master secret and persists them by id.
pub struct KeyVault<S: VaultStore = SqliteStore> {
    store: S,
    secret: Box<dyn SecretProvider>,
    iterations: u32,
}

impl KeyVault<SqliteStore> {
    /// Open a SQLite-backed vault at `db_path`.
    pub fn open(
        db_path: &Path,
        secret: impl SecretProvider + 'static,
        iterations: u32,
    ) -> StrataResult<Self> {
        Ok(Self::new(SqliteStore::open(db_path)?, secret).with_iterations(iterations))
    }
}

impl<S: VaultStore> KeyVault<S> {
    pub fn new(store: S, secret: impl SecretProvider + 'static) -> Self {
        Self {
            store,
            secret: Box::new(secret),
            iterations: DEFAULT_ITERATIONS,
        }
    }

    /// Override the PBKDF2 round count. Records must be loaded with the
    /// count they were stored with.
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    fn master_secret(&self) -> StrataResult<SecretString> {
        self.secret.master_secret().ok_or_else(|| {
            StrataError::Config(format!(
                "vault master secret is not set ({})",
                self.secret.source()
            ))
        })
    }

    /// Wrap `raw_key` with a fresh salt and IV and upsert it under `key_id`.
    pub fn store_key(&self, key_id: &str, raw_key: &[u8], mode: &str) -> StrataResult<()> {
        let secret = self.master_secret()?;

        let mut salt = [0u8; SALT_SIZE];
        let mut iv = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        rand::rngs::OsRng.fill_bytes(&mut iv);

        let wrap = derive_wrap_key(&secret, &salt, self.iterations);
        let wrapped_key = wrap_key(&wrap, &iv, raw_key);

        self.store.upsert(&VaultRecord {
            id: key_id.to_string(),
            created_at: unix_now(),
            salt: salt.to_vec(),
            iv: iv.to_vec(),
            wrapped_key,
            mode: mode.to_string(),
        })?;
        debug!(key_id, mode, "stored wrapped key");
        Ok(())
    }

    /// Recover `(raw_key, mode)` for `key_id`.
    pub fn load_key(&self, key_id: &str) -> StrataResult<(Zeroizing<Vec<u8>>, String)> {
        let secret = self.master_secret()?;
        let record = self
            .store
            .fetch(key_id)?
            .ok_or_else(|| StrataError::KeyNotFound(key_id.to_string()))?;

        let iv: [u8; IV_SIZE] = record.iv.as_slice().try_into().map_err(|_| {
            StrataError::KeyRecovery(format!(
                "record {key_id} has a {}-byte IV (expected {IV_SIZE})",
                record.iv.len()
            ))
        })?;

        let wrap = derive_wrap_key(&secret, &record.salt, self.iterations);
        let raw = unwrap_key(&wrap, &iv, &record.wrapped_key).map_err(|e| match e {
            StrataError::KeyRecovery(msg) => StrataError::KeyRecovery(format!("{key_id}: {msg}")),
            other => other,
        })?;
        debug!(key_id, mode = %record.mode, "recovered key");
        Ok((raw, record.mode))
    }

    /// Stored ids, modes and timestamps. Needs no master secret.
    pub fn list(&self) -> StrataResult<Vec<KeySummary>> {
        self.store.list()
    }

    pub fn backend(&self) -> &S {
        &self.store
    }
}

impl<S: VaultStore> KeyRing for KeyVault<S> {
    fn store(&self, key_id: &str, raw_key: &[u8], mode: &str) -> StrataResult<()> {
        self.store_key(key_id, raw_key, mode)
    }

    fn load(&self, key_id: &str) -> StrataResult<(Zeroizing<Vec<u8>>, String)> {
        self.load_key(key_id)
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{EnvSecret, StaticSecret};
    use crate::store::MemoryStore;
    use proptest::prelude::*;

    const FAST: u32 = 1_000;

    fn vault(secret: &str) -> KeyVault<MemoryStore> {
        KeyVault::new(MemoryStore::new(), StaticSecret::new(secret)).with_iterations(FAST)
    }

    #[test]
    fn test_store_load_roundtrip() {
        let v = vault("master-secret-of-sufficient-length");
        let key = [0xA5u8; 32];
        v.store_key("run-1", &key, "ctr").unwrap();

        let (raw, mode) = v.load_key("run-1").unwrap();
        assert_eq!(raw.as_slice(), &key);
        assert_eq!(mode, "ctr");
    }

    #[test]
    fn test_same_key_wraps_differently() {
        let v = vault("master");
        let key = [7u8; 32];
        v.store_key("a", &key, "ctr").unwrap();
        v.store_key("b", &key, "ctr").unwrap();

        let a = v.backend().fetch("a").unwrap().unwrap();
        let b = v.backend().fetch("b").unwrap().unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.wrapped_key, b.wrapped_key);
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let v = vault("master");
        v.store_key("run", &[1u8; 32], "ctr").unwrap();
        v.store_key("run", &[2u8; 32], "gcm").unwrap();

        let (raw, mode) = v.load_key("run").unwrap();
        assert_eq!(raw.as_slice(), &[2u8; 32]);
        assert_eq!(mode, "gcm");
        assert_eq!(v.list().unwrap().len(), 1);
    }

    #[test]
    fn test_missing_id() {
        let err = vault("master").load_key("nope").unwrap_err();
        assert!(matches!(err, StrataError::KeyNotFound(ref id) if id == "nope"));
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let v = KeyVault::new(
            MemoryStore::new(),
            EnvSecret::new("STRATA_TEST_MASTER_NEVER_SET"),
        )
        .with_iterations(FAST);

        let err = v.store_key("run", &[0u8; 32], "ctr").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
        let err = v.load_key("run").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
        // listing reads no key material
        assert!(v.list().unwrap().is_empty());
    }

    #[test]
    fn test_wrong_secret_never_returns_the_key() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let key = [0x3Cu8; 32];

        let writer = KeyVault::new(ArcStore(store.clone()), StaticSecret::new("right"))
            .with_iterations(FAST);
        writer.store_key("run", &key, "ctr").unwrap();

        let reader =
            KeyVault::new(ArcStore(store), StaticSecret::new("wrong")).with_iterations(FAST);
        match reader.load_key("run") {
            Err(StrataError::KeyRecovery(_)) => {}
            Ok((raw, _)) => assert_ne!(raw.as_slice(), &key),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sqlite_backed_vault() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("vault.db");
        {
            let v = KeyVault::open(&db, StaticSecret::new("m"), FAST).unwrap();
            v.store_key("run-9", &[9u8; 32], "ctr").unwrap();
        }
        let v = KeyVault::open(&db, StaticSecret::new("m"), FAST).unwrap();
        let (raw, _) = v.load_key("run-9").unwrap();
        assert_eq!(raw.as_slice(), &[9u8; 32]);

        let listed = v.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "run-9");
        assert!(listed[0].created_at > 0);
    }

    /// Shares one store between two vaults with different secrets.
    struct ArcStore(std::sync::Arc<MemoryStore>);

    impl VaultStore for ArcStore {
        fn upsert(&self, record: &VaultRecord) -> StrataResult<()> {
            self.0.upsert(record)
        }
        fn fetch(&self, id: &str) -> StrataResult<Option<VaultRecord>> {
            self.0.fetch(id)
        }
        fn list(&self) -> StrataResult<Vec<KeySummary>> {
            self.0.list()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn roundtrip_any_key(
            key in proptest::collection::vec(any::<u8>(), 0..=64),
            mode in "[a-z]{1,8}",
        ) {
            let v = vault("prop-master");
            v.store_key("k", &key, &mode).unwrap();
            let (raw, got_mode) = v.load_key("k").unwrap();
            prop_assert_eq!(raw.as_slice(), key.as_slice());
            prop_assert_eq!(got_mode, mode);
        }
    }
}
