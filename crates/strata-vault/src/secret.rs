//! Master secret sources
//!
//! The vault never caches the secret: every store/load asks its provider
//! again, so a process can start before the secret is configured.

use secrecy::{ExposeSecret, SecretString};

pub trait SecretProvider: Send + Sync {
    /// The current master secret, or `None` when it is not configured.
    fn master_secret(&self) -> Option<SecretString>;

    /// Where the secret is expected to come from, for error messages.
    fn source(&self) -> String;
}

/// Reads an environment variable at every call. Empty values count as unset.
#[derive(Debug, Clone)]
pub struct EnvSecret {
    var: String,
}

impl EnvSecret {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl SecretProvider for EnvSecret {
    fn master_secret(&self) -> Option<SecretString> {
        std::env::var(&self.var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    }

    fn source(&self) -> String {
        format!("environment variable {}", self.var)
    }
}

/// A fixed secret, for tests and embedding.
pub struct StaticSecret(SecretString);

impl StaticSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(SecretString::from(secret.into()))
    }
}

impl SecretProvider for StaticSecret {
    fn master_secret(&self) -> Option<SecretString> {
        Some(SecretString::from(self.0.expose_secret().to_owned()))
    }

    fn source(&self) -> String {
        "static secret".into()
    }
}

impl std::fmt::Debug for StaticSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticSecret([REDACTED])")
    }
}
