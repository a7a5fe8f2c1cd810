//! Batch encrypt/decrypt over a directory tree
//!
//! Encrypt walks the plan in order. Files smaller than the chunk size go to
//! the single-shot cipher and consecutive runs of them are fanned out to a
//! file-level pool in plan order. Larger files go through the chunked engine
//! one at a time, each using the chunk-level pool.

use rand::RngCore;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

use strata_core::config::StrataConfig;
use strata_core::{KeyRing, StrataError, StrataResult};
use strata_crypto::{
    decrypt_file, decrypt_stream, encrypt_file, encrypt_stream, generate_run_key,
    manifest_path_for, RunKey, SidecarProbe, VAULT_MODE,
};
use strata_sched::{Job, Scheduler};

use crate::walk::collect_files;

/// Progress callback type (files_done, files_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

const ENC_SUFFIX: &str = ".enc";

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Files at least this large use the chunked engine (0 = all of them)
    pub chunk_size: u64,
    /// Worker threads for both pools (0 = one per core)
    pub workers: usize,
    /// File-name globs to skip while walking
    pub exclude: Vec<String>,
    /// Decrypt with this key id instead of each sidecar's
    pub key_id: Option<String>,
}

impl BatchOptions {
    pub fn from_config(config: &StrataConfig) -> Self {
        Self {
            chunk_size: config.engine.chunk_size,
            workers: config.engine.workers,
            exclude: Vec::new(),
            key_id: None,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&StrataConfig::default())
    }
}

/// A file that could not be processed, or whose key could not be registered
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: StrataError,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    /// Source paths processed successfully
    pub succeeded: Vec<PathBuf>,
    pub failed: Vec<FileFailure>,
    /// Run key id (encrypt), or the override used (decrypt)
    pub key_id: Option<String>,
    /// Outputs were written but the vault did not take the run key
    pub key_registration_errors: Vec<FileFailure>,
    pub elapsed: Duration,
}

impl BatchReport {
    /// No file failed and the run key is safely registered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.key_registration_errors.is_empty()
    }
}

/// Random bytes appended to every run key id
pub const RUN_ID_NONCE_SIZE: usize = 8;

/// `"{sha256(in_dir)[..16]}-ctr-{unix_ts}-{hex(nonce)}"`
///
/// The vault keeps one record per id, so two runs must never share one; the
/// nonce separates runs over the same directory within the same second.
pub fn run_key_id(in_dir: &Path, unix_ts: u64, nonce: &[u8; RUN_ID_NONCE_SIZE]) -> String {
    let digest = hex::encode(Sha256::digest(in_dir.to_string_lossy().as_bytes()));
    format!("{}-{VAULT_MODE}-{unix_ts}-{}", &digest[..16], hex::encode(nonce))
}

/// Encrypt every file under `in_dir` into `out_dir/<rel>.enc` under one run key.
pub fn run_encrypt(
    in_dir: &Path,
    out_dir: &Path,
    opts: &BatchOptions,
    ring: &dyn KeyRing,
    scheduler: &Scheduler,
    progress: Option<&ProgressFn>,
) -> StrataResult<BatchReport> {
    let started = Instant::now();
    let files = collect_files(in_dir, &opts.exclude)?;
    let (entries, unreadable) = stat_files(files);
    let plan = scheduler.plan_sized(entries);

    let unix_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut nonce = [0u8; RUN_ID_NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let key_id = run_key_id(in_dir, unix_ts, &nonce);
    let key = generate_run_key();
    info!(files = plan.len(), key_id = %key_id, "encrypt batch: planned");

    let run = EncryptRun {
        in_dir,
        out_dir,
        opts,
        ring,
        scheduler,
        key: &key,
        key_id: &key_id,
        tracker: Tracker::new(plan.len() + unreadable.len(), progress),
        key_stored: AtomicBool::new(false),
        oneshot_done: AtomicBool::new(false),
    };
    for (path, error) in unreadable {
        let rel = path.strip_prefix(in_dir).unwrap_or(&path);
        run.tracker.record(&path, rel, Err(error));
    }

    let pool = build_pool(opts.workers)?;
    for group in plan.chunk_by(|a, b| run.is_oneshot(a) == run.is_oneshot(b)) {
        if run.is_oneshot(&group[0]) {
            pool.scope_fifo(|s| {
                for job in group {
                    let run = &run;
                    s.spawn_fifo(move |_| run.run_job(job));
                }
            });
        } else {
            group.iter().for_each(|job| run.run_job(job));
        }
    }

    // Every chunked file stores the same key under the same id, so one
    // success covers the whole run.
    if run.key_stored.load(Ordering::Relaxed) {
        let mut report = run.tracker.report();
        if !report.key_registration_errors.is_empty() {
            debug!(
                key_id = %key_id,
                retried = report.key_registration_errors.len(),
                "run key stored by another file; dropping earlier registration errors"
            );
            report.key_registration_errors.clear();
        }
    }

    // Single-shot files rely on one registration per batch.
    if run.oneshot_done.load(Ordering::Relaxed) && !run.key_stored.load(Ordering::Relaxed) {
        if let Err(error) = ring.store(&key_id, key.as_bytes(), VAULT_MODE) {
            warn!(key_id = %key_id, %error, "run key registration failed");
            run.tracker
                .report()
                .key_registration_errors
                .push(FileFailure {
                    path: in_dir.to_path_buf(),
                    error,
                });
        }
    }

    let mut report = run.tracker.finish(started);
    report.key_id = Some(key_id);
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        rates = ?scheduler.snapshot(),
        "encrypt batch: done"
    );
    Ok(report)
}

/// Decrypt every `*.enc` file under `in_dir` into `out_dir`, restoring
/// original names where the sidecar records them.
pub fn run_decrypt(
    in_dir: &Path,
    out_dir: &Path,
    opts: &BatchOptions,
    ring: &dyn KeyRing,
    progress: Option<&ProgressFn>,
) -> StrataResult<BatchReport> {
    let started = Instant::now();
    let files: Vec<PathBuf> = collect_files(in_dir, &opts.exclude)?
        .into_iter()
        .filter(|p| p.to_string_lossy().ends_with(ENC_SUFFIX))
        .collect();
    info!(files = files.len(), "decrypt batch: starting");

    let tracker = Tracker::new(files.len(), progress);
    let pool = build_pool(opts.workers)?;
    pool.install(|| {
        files.par_iter().for_each(|src| {
            let rel = src.strip_prefix(in_dir).unwrap_or(src);
            let result = decrypt_one(src, rel, out_dir, opts, ring);
            tracker.record(src, rel, result);
        })
    });

    let mut report = tracker.finish(started);
    report.key_id = opts.key_id.clone();
    info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "decrypt batch: done"
    );
    Ok(report)
}

struct EncryptRun<'a> {
    in_dir: &'a Path,
    out_dir: &'a Path,
    opts: &'a BatchOptions,
    ring: &'a dyn KeyRing,
    scheduler: &'a Scheduler,
    key: &'a RunKey,
    key_id: &'a str,
    tracker: Tracker<'a>,
    key_stored: AtomicBool,
    oneshot_done: AtomicBool,
}

impl EncryptRun<'_> {
    fn is_oneshot(&self, job: &Job) -> bool {
        job.size < self.opts.chunk_size
    }

    fn run_job(&self, job: &Job) {
        let rel = job.path.strip_prefix(self.in_dir).unwrap_or(&job.path);
        let started = Instant::now();
        let result = self.encrypt_one(job, rel);
        let elapsed = started.elapsed().as_secs_f64();

        if result.is_ok() {
            if let Err(e) = self.scheduler.observe(&job.path, elapsed) {
                warn!(path = %job.path.display(), "cost model not updated: {e}");
            }
        }
        self.tracker.record(&job.path, rel, result);
    }

    fn encrypt_one(&self, job: &Job, rel: &Path) -> StrataResult<()> {
        let dst = self.out_dir.join(with_suffix(rel, ENC_SUFFIX));
        ensure_parent(&dst)?;

        if self.is_oneshot(job) {
            debug!(path = %rel.display(), size = job.size, "single-shot");
            encrypt_stream(&job.path, &dst, self.key_id, self.key)?;
            self.oneshot_done.store(true, Ordering::Relaxed);
            return Ok(());
        }

        debug!(path = %rel.display(), size = job.size, "chunked");
        let outcome = encrypt_file(
            &job.path,
            &dst,
            self.key,
            self.key_id,
            self.opts.chunk_size,
            self.opts.workers,
            self.ring,
        )?;
        match outcome.key_registration {
            Ok(()) => self.key_stored.store(true, Ordering::Relaxed),
            Err(error) => self.tracker.report().key_registration_errors.push(FileFailure {
                path: job.path.clone(),
                error,
            }),
        }
        Ok(())
    }
}

fn decrypt_one(
    src: &Path,
    rel: &Path,
    out_dir: &Path,
    opts: &BatchOptions,
    ring: &dyn KeyRing,
) -> StrataResult<()> {
    let probe = SidecarProbe::read(&manifest_path_for(src))?;
    let name = restored_name(src, probe.src.as_deref());
    let dst = match rel.parent() {
        Some(parent) => out_dir.join(parent).join(name),
        None => out_dir.join(name),
    };
    ensure_parent(&dst)?;

    let key_id = opts.key_id.as_deref();
    if probe.is_chunked() {
        decrypt_file(src, &dst, key_id, opts.workers, ring)?;
    } else {
        decrypt_stream(src, &dst, ring, key_id)?;
    }
    Ok(())
}

/// Name for a decrypted file: the sidecar's `src` (reduced to a bare file
/// name), else the ciphertext name without `.enc`, else `<name>.dec`.
fn restored_name(src: &Path, recorded: Option<&str>) -> String {
    if let Some(name) = recorded
        .and_then(|r| Path::new(r).file_name())
        .map(|n| n.to_string_lossy().into_owned())
    {
        return name;
    }
    let file_name = src
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match file_name.strip_suffix(ENC_SUFFIX) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("{file_name}.dec"),
    }
}

/// Sizes for the planner. A file that vanished or became unreadable after
/// the walk is returned separately so it fails alone.
fn stat_files(files: Vec<PathBuf>) -> (Vec<(PathBuf, u64)>, Vec<(PathBuf, StrataError)>) {
    let mut sized = Vec::with_capacity(files.len());
    let mut unreadable = Vec::new();
    for path in files {
        match std::fs::metadata(&path) {
            Ok(meta) => sized.push((path, meta.len())),
            Err(e) => {
                let error = StrataError::io_at(&path, e);
                unreadable.push((path, error));
            }
        }
    }
    (sized, unreadable)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn ensure_parent(path: &Path) -> StrataResult<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::fs::create_dir_all(parent).map_err(|e| StrataError::io_at(parent, e))
        }
        _ => Ok(()),
    }
}

fn build_pool(workers: usize) -> StrataResult<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("strata-file-{i}"))
        .build()
        .map_err(|e| StrataError::Other(anyhow::Error::new(e).context("building file pool")))
}

/// Collects per-file outcomes from any thread and drives the progress callback.
struct Tracker<'a> {
    total: u64,
    done: AtomicU64,
    progress: Option<&'a ProgressFn>,
    report: Mutex<BatchReport>,
}

impl<'a> Tracker<'a> {
    fn new(total: usize, progress: Option<&'a ProgressFn>) -> Self {
        Self {
            total: total as u64,
            done: AtomicU64::new(0),
            progress,
            report: Mutex::new(BatchReport::default()),
        }
    }

    fn report(&self) -> MutexGuard<'_, BatchReport> {
        self.report.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn record(&self, src: &Path, rel: &Path, result: StrataResult<()>) {
        let status = match result {
            Ok(()) => {
                self.report().succeeded.push(src.to_path_buf());
                "ok"
            }
            Err(error) => {
                error!(path = %src.display(), %error, "file failed");
                self.report().failed.push(FileFailure {
                    path: src.to_path_buf(),
                    error,
                });
                "failed"
            }
        };

        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(cb) = self.progress {
            let msg = format!("[{done}/{}] {} {status}", self.total, rel.display());
            cb(done, self.total, &msg);
        }
    }

    fn finish(self, started: Instant) -> BatchReport {
        let mut report = self.report.into_inner().unwrap_or_else(|p| p.into_inner());
        report.succeeded.sort();
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));
        report.elapsed = started.elapsed();
        report
    }
}
