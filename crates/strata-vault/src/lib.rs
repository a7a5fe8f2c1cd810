//! strata-vault: at-rest protection for per-run keys
//!
//! ```text
//! master secret (SecretProvider, read at call time)
//!   └── PBKDF2-HMAC-SHA256(secret, random salt) → wrap key
//!         └── AES-256-CBC/PKCS7(wrap key, random IV) → wrapped run key
//! ```
//!
//! Each record stores `{id, created_at, salt, iv, wrapped_key, mode}` and is
//! replaced wholesale on a repeated id. There is no deletion.

pub mod secret;
pub mod store;
pub mod vault;
pub mod wrap;

pub use secret::{EnvSecret, SecretProvider, StaticSecret};
pub use store::{KeySummary, MemoryStore, SqliteStore, VaultRecord, VaultStore};
pub use vault::KeyVault;
pub use wrap::DEFAULT_ITERATIONS;
