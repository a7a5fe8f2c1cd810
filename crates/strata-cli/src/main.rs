//! strata: encrypt and decrypt directory trees under per-run keys
//!
//! Commands:
//!   encrypt --in DIR --out DIR   - encrypt a tree into DIR/<rel>.enc
//!   decrypt --in DIR --out DIR   - restore a tree from its .enc files
//!   keys list                    - show vault records (no key material)
//!   calibrate                    - measure chunk size / worker count
//!   config show                  - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use strata_batch::{run_decrypt, run_encrypt, BatchOptions, BatchReport, ProgressFn};
use strata_core::config::{EngineConfig, Policy, StrataConfig};
use strata_core::MIB;
use strata_sched::calibrate::{worker_candidates, DEFAULT_CHUNK_CANDIDATES, DEFAULT_SAMPLE_BYTES};
use strata_sched::Scheduler;
use strata_vault::{EnvSecret, KeyVault};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "strata",
    version,
    about = "Chunked file encryption with a local key vault",
    long_about = "strata: encrypt directory trees with per-run keys, schedule work by predicted \
                  duration, and keep run keys wrapped in a local vault"
)]
struct Cli {
    /// Path to strata.toml configuration file
    #[arg(long, short = 'c', env = "STRATA_CONFIG", default_value = "strata.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides log.level
    #[arg(long, env = "STRATA_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides log.format
    #[arg(long, env = "STRATA_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq)]
enum PolicyArg {
    /// Shortest predicted duration first
    Priority,
    /// Listing order
    Fifo,
}

impl From<PolicyArg> for Policy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::Priority => Policy::Priority,
            PolicyArg::Fifo => Policy::Fifo,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt every file under a directory
    ///
    /// The vault master secret is read from the variable named by
    /// vault.master_env (default STRATA_MASTER).
    Encrypt {
        /// Source directory
        #[arg(long = "in")]
        input: PathBuf,
        /// Destination directory (created if missing)
        #[arg(long = "out")]
        output: PathBuf,
        /// Ordering policy (overrides scheduler.policy)
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Chunk size in bytes; smaller files take the single-shot path
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Worker threads (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,
        /// Skip files or directories whose name matches this glob (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Decrypt every .enc file under a directory
    Decrypt {
        /// Directory holding .enc files and their .meta.json sidecars
        #[arg(long = "in")]
        input: PathBuf,
        /// Destination directory (created if missing)
        #[arg(long = "out")]
        output: PathBuf,
        /// Worker threads (0 = one per core)
        #[arg(long)]
        workers: Option<usize>,
        /// Use this vault key id instead of each sidecar's
        #[arg(long)]
        key_id: Option<String>,
    },

    /// Key vault inspection
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },

    /// Measure the fastest chunk size and worker count on this host
    Calibrate {
        /// Sample buffer size in MiB
        #[arg(long, default_value_t = (DEFAULT_SAMPLE_BYTES as u64 / MIB) as usize)]
        sample_mb: usize,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeysAction {
    /// List stored key ids, modes and creation times
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration as TOML
    Show,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, found) = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| log_format_from(&config.log.format));
    init_logging(&level, &format);
    if !found {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match cli.command {
        Commands::Encrypt {
            input,
            output,
            policy,
            chunk_size,
            workers,
            exclude,
        } => {
            let config = apply_overrides(config, policy, chunk_size, workers);
            cmd_encrypt(&config, &input, &output, exclude)
        }
        Commands::Decrypt {
            input,
            output,
            workers,
            key_id,
        } => {
            let config = apply_overrides(config, None, None, workers);
            cmd_decrypt(&config, &input, &output, key_id)
        }
        Commands::Keys {
            action: KeysAction::List { json },
        } => cmd_keys_list(&config, json),
        Commands::Calibrate { sample_mb, json } => cmd_calibrate(sample_mb, json),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config, found),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr with the progress bar
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn log_format_from(s: &str) -> LogFormat {
    if s.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

/// Returns the parsed config and whether the file existed.
fn load_config(path: &Path) -> Result<(StrataConfig, bool)> {
    if !path.exists() {
        return Ok((StrataConfig::default(), false));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config: {}", path.display()))?;
    let config = StrataConfig::from_toml(&content)
        .with_context(|| format!("loading config: {}", path.display()))?;
    Ok((config, true))
}

/// Command-line flags win over config values.
fn apply_overrides(
    mut config: StrataConfig,
    policy: Option<PolicyArg>,
    chunk_size: Option<u64>,
    workers: Option<usize>,
) -> StrataConfig {
    if let Some(p) = policy {
        config.scheduler.policy = p.into();
    }
    if let Some(c) = chunk_size {
        config.engine.chunk_size = c;
    }
    if let Some(w) = workers {
        config.engine.workers = w;
    }
    config
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        path.to_path_buf()
    }
}

fn open_vault(config: &StrataConfig) -> Result<KeyVault> {
    let db = expand_tilde(&config.vault.db_path);
    KeyVault::open(
        &db,
        EnvSecret::new(config.vault.master_env.clone()),
        config.vault.pbkdf2_iterations,
    )
    .with_context(|| format!("opening key vault: {}", db.display()))
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(bar_style());
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn progress_for(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, msg| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(msg.to_string());
    })
}

// ── `strata encrypt` / `strata decrypt` ───────────────────────────────────────

fn cmd_encrypt(
    config: &StrataConfig,
    input: &Path,
    output: &Path,
    exclude: Vec<String>,
) -> Result<()> {
    anyhow::ensure!(input.is_dir(), "not a directory: {}", input.display());
    let vault = open_vault(config)?;
    let scheduler = Scheduler::new(config.scheduler.clone());
    let opts = BatchOptions {
        exclude,
        ..BatchOptions::from_config(config)
    };
    info!(
        chunk_size = opts.chunk_size,
        workers = config.engine.effective_workers(),
        policy = ?config.scheduler.policy,
        "encrypt: {} -> {}",
        input.display(),
        output.display()
    );

    let pb = make_progress_bar(0, "encrypt");
    let progress = progress_for(&pb);
    let report = run_encrypt(input, output, &opts, &vault, &scheduler, Some(&progress))
        .with_context(|| format!("encrypting {}", input.display()));
    pb.finish_and_clear();
    let report = report?;

    if let Some(key_id) = &report.key_id {
        println!("key id: {key_id}");
    }
    summarize("encrypted", &report)
}

fn cmd_decrypt(
    config: &StrataConfig,
    input: &Path,
    output: &Path,
    key_id: Option<String>,
) -> Result<()> {
    anyhow::ensure!(input.is_dir(), "not a directory: {}", input.display());
    let vault = open_vault(config)?;
    let opts = BatchOptions {
        key_id,
        ..BatchOptions::from_config(config)
    };

    let pb = make_progress_bar(0, "decrypt");
    let progress = progress_for(&pb);
    let report = run_decrypt(input, output, &opts, &vault, Some(&progress))
        .with_context(|| format!("decrypting {}", input.display()));
    pb.finish_and_clear();

    summarize("decrypted", &report?)
}

/// Print the batch outcome; any failure makes the command fail.
fn summarize(verb: &str, report: &BatchReport) -> Result<()> {
    println!(
        "{verb}: {} file(s), {} failed, {:.2}s",
        report.succeeded.len(),
        report.failed.len(),
        report.elapsed.as_secs_f64()
    );
    for f in &report.failed {
        eprintln!("  failed: {}: {}", f.path.display(), f.error);
    }
    for f in &report.key_registration_errors {
        eprintln!("  key not stored: {}: {}", f.path.display(), f.error);
    }

    if !report.failed.is_empty() {
        let total = report.failed.len() + report.succeeded.len();
        anyhow::bail!("{} of {total} file(s) failed", report.failed.len());
    }
    if !report.key_registration_errors.is_empty() {
        anyhow::bail!(
            "outputs were written but the run key is not in the vault; they cannot be decrypted later"
        );
    }
    Ok(())
}

// ── `strata keys list` ────────────────────────────────────────────────────────

fn cmd_keys_list(config: &StrataConfig, json: bool) -> Result<()> {
    let vault = open_vault(config)?;
    let keys = vault.list().context("listing vault keys")?;

    if json {
        let rows: Vec<_> = keys
            .iter()
            .map(|k| serde_json::json!({ "id": k.id, "mode": k.mode, "created_at": k.created_at }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("no keys stored in {}", expand_tilde(&config.vault.db_path).display());
        return Ok(());
    }
    println!("{:<48} {:<6} {}", "ID", "MODE", "CREATED");
    for k in &keys {
        println!("{:<48} {:<6} {}", k.id, k.mode, k.created_at);
    }
    Ok(())
}

// ── `strata calibrate` ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EngineSection<'a> {
    engine: &'a EngineConfig,
}

fn cmd_calibrate(sample_mb: usize, json: bool) -> Result<()> {
    anyhow::ensure!(sample_mb > 0, "--sample-mb must be at least 1");
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let workers = worker_candidates(cpus);

    let pb = make_spinner("calibrate");
    pb.set_message(format!("{sample_mb} MiB sample, {cpus} core(s)"));
    let report = strata_sched::tune(
        sample_mb.saturating_mul(MIB as usize),
        &DEFAULT_CHUNK_CANDIDATES,
        &workers,
    )
    .context("running calibration");
    pb.finish_and_clear();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{:>10} {:>8} {:>10}", "CHUNK", "WORKERS", "MiB/s");
    for t in &report.trials {
        println!(
            "{:>7} MiB {:>8} {:>10.1}",
            t.chunk_size / MIB,
            t.workers,
            t.mib_per_sec
        );
    }
    println!();
    println!("# add to strata.toml");
    let engine = EngineConfig {
        chunk_size: report.best.chunk_size,
        workers: report.best.workers,
    };
    print!(
        "{}",
        toml::to_string_pretty(&EngineSection { engine: &engine })
            .context("serializing calibration to TOML")?
    );
    Ok(())
}

// ── `strata config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &StrataConfig, config_path: &Path, found: bool) -> Result<()> {
    if found {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_encrypt() {
        let cli = Cli::try_parse_from([
            "strata", "encrypt", "--in", "src", "--out", "dst", "--policy", "fifo",
            "--chunk-size", "4096", "--exclude", "*.tmp", "--exclude", ".git",
        ])
        .unwrap();
        match cli.command {
            Commands::Encrypt {
                input,
                policy,
                chunk_size,
                exclude,
                ..
            } => {
                assert_eq!(input, PathBuf::from("src"));
                assert_eq!(policy, Some(PolicyArg::Fifo));
                assert_eq!(chunk_size, Some(4096));
                assert_eq!(exclude, vec!["*.tmp", ".git"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_overrides_win() {
        let config = apply_overrides(StrataConfig::default(), Some(PolicyArg::Fifo), Some(1024), None);
        assert_eq!(config.scheduler.policy, Policy::Fifo);
        assert_eq!(config.engine.chunk_size, 1024);
        assert_eq!(config.engine.workers, 0);
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let (config, found) = load_config(&missing).unwrap();
        assert!(!found);
        assert_eq!(config.engine.chunk_size, 8 * MIB);

        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[engine]\nworkers = 3\n").unwrap();
        let (config, found) = load_config(&path).unwrap();
        assert!(found);
        assert_eq!(config.engine.workers, 3);

        std::fs::write(&path, "[engine\n").unwrap();
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        let home = std::env::var("HOME").unwrap_or_default();
        assert_eq!(
            expand_tilde(Path::new("~/.local/share/strata/vault.db")),
            PathBuf::from(format!("{home}/.local/share/strata/vault.db"))
        );
        assert_eq!(expand_tilde(Path::new("/var/vault.db")), PathBuf::from("/var/vault.db"));
    }

    #[test]
    fn test_log_format_from_config() {
        assert_eq!(log_format_from("JSON"), LogFormat::Json);
        assert_eq!(log_format_from("text"), LogFormat::Text);
        assert_eq!(log_format_from("pretty"), LogFormat::Text);
    }
}
