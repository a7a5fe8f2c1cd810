use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::MIB;

/// Top-level configuration (loaded from strata.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    pub engine: EngineConfig,
    pub scheduler: SchedulerConfig,
    pub vault: VaultConfig,
    pub log: LogConfig,
}

impl StrataConfig {
    /// Parse a TOML document; missing sections and keys fall back to defaults.
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        toml::from_str(s).map_err(|e| anyhow::anyhow!("parsing config: {e}"))
    }
}

/// Host calibration: chunk size and worker pool width for the cipher engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Chunk size in bytes (default: 8 MiB). Files smaller than this take
    /// the single-shot path.
    pub chunk_size: u64,
    /// Worker thread count (0 = available parallelism)
    pub workers: usize,
}

impl EngineConfig {
    /// Resolve `workers = 0` to the host's parallelism.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    /// Shortest predicted duration first
    Priority,
    /// Listing order
    Fifo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Exponential smoothing factor for throughput observations
    pub alpha: f64,
    /// Throughput assumed for an extension never observed (bytes/s)
    pub default_rate: f64,
    /// Batches with at most this many files run in listing order
    pub fifo_max_files: usize,
    /// Batches whose total size is below this run in listing order
    pub min_total_bytes: u64,
    /// Batches where every file is below this run in listing order
    pub small_file_bytes: u64,
    /// Ordering policy
    pub policy: Policy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// SQLite database holding wrapped keys
    pub db_path: PathBuf,
    /// Environment variable read (at call time) for the master secret
    pub master_env: String,
    /// PBKDF2-HMAC-SHA256 iteration count
    pub pbkdf2_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8 * MIB,
            workers: 0,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.25,
            default_rate: 20.0 * MIB as f64,
            fifo_max_files: 2,
            min_total_bytes: 4 * MIB,
            small_file_bytes: 256 * 1024,
            policy: Policy::Priority,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("~/.local/share/strata/vault.db"),
            master_env: "STRATA_MASTER".into(),
            pbkdf2_iterations: 200_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
