//! End-to-end batch tests: directory tree → encrypted tree → restored tree.
//!
//! Uses an in-memory vault with a cheap PBKDF2 round count and a small chunk
//! size so both the single-shot and the chunked path are exercised.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use strata_batch::{run_decrypt, run_encrypt, BatchOptions, ProgressFn};
use strata_core::config::SchedulerConfig;
use strata_core::{KeyRing, StrataError, StrataResult};
use strata_sched::Scheduler;
use strata_vault::{EnvSecret, KeyVault, MemoryStore, StaticSecret};
use tempfile::TempDir;
use zeroize::Zeroizing;

const CHUNK: u64 = 4096;

fn vault() -> KeyVault<MemoryStore> {
    KeyVault::new(MemoryStore::new(), StaticSecret::new("batch-test-master")).with_iterations(1_000)
}

fn opts() -> BatchOptions {
    BatchOptions {
        chunk_size: CHUNK,
        workers: 2,
        ..Default::default()
    }
}

fn content(seed: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(seed) ^ seed).collect()
}

/// Writes a small tree and returns `(relative path, content)` pairs.
fn make_tree(root: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let files = vec![
        (PathBuf::from("notes.txt"), content(3, 100)),
        (PathBuf::from("empty.dat"), Vec::new()),
        (PathBuf::from("docs/exact.bin"), content(5, CHUNK as usize)),
        (PathBuf::from("docs/big.bin"), content(7, 3 * CHUNK as usize + 17)),
        (PathBuf::from("docs/deep/photo.JPG"), content(11, 2500)),
    ];
    for (rel, data) in &files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
    files
}

fn enc_path(out: &Path, rel: &Path) -> PathBuf {
    let mut name = out.join(rel).into_os_string();
    name.push(".enc");
    PathBuf::from(name)
}

fn sidecar(enc: &Path) -> serde_json::Value {
    let mut name = enc.as_os_str().to_os_string();
    name.push(".meta.json");
    serde_json::from_slice(&std::fs::read(PathBuf::from(name)).unwrap()).unwrap()
}

#[test]
fn encrypt_then_decrypt_restores_tree() {
    let tmp = TempDir::new().unwrap();
    let (src, enc, dec) = (
        tmp.path().join("src"),
        tmp.path().join("enc"),
        tmp.path().join("dec"),
    );
    let files = make_tree(&src);
    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());

    let report = run_encrypt(&src, &enc, &opts(), &vault, &scheduler, None).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.succeeded.len(), files.len());
    let key_id = report.key_id.clone().unwrap();

    // routing by size: below the chunk size is single-shot
    for (rel, data) in &files {
        let meta = sidecar(&enc_path(&enc, rel));
        let expected = if (data.len() as u64) < CHUNK { "GCM" } else { "CTR_CHUNKED" };
        assert_eq!(meta["mode"], expected, "{}", rel.display());
        assert_eq!(meta["key_id"], key_id.as_str());
    }
    assert_eq!(sidecar(&enc_path(&enc, Path::new("docs/big.bin")))["chunk_count"], 4);

    // the run key went into the vault exactly once per id
    let listed = vault.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, key_id);

    let report = run_decrypt(&enc, &dec, &opts(), &vault, None).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.succeeded.len(), files.len());

    for (rel, data) in &files {
        let restored = std::fs::read(dec.join(rel)).unwrap();
        assert_eq!(&restored, data, "{}", rel.display());
    }
}

#[test]
fn only_single_shot_files_still_register_the_key() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    std::fs::create_dir_all(&src).unwrap();
    std::fs::write(src.join("a.txt"), b"alpha").unwrap();
    std::fs::write(src.join("b.txt"), b"beta").unwrap();

    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let report = run_encrypt(&src, &tmp.path().join("enc"), &opts(), &vault, &scheduler, None)
        .unwrap();
    assert!(report.is_clean());
    assert_eq!(vault.list().unwrap().len(), 1);

    let dec = tmp.path().join("dec");
    let report = run_decrypt(&tmp.path().join("enc"), &dec, &opts(), &vault, None).unwrap();
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(std::fs::read(dec.join("b.txt")).unwrap(), b"beta");
}

#[test]
fn tampered_file_fails_alone() {
    let tmp = TempDir::new().unwrap();
    let (src, enc, dec) = (
        tmp.path().join("src"),
        tmp.path().join("enc"),
        tmp.path().join("dec"),
    );
    let files = make_tree(&src);
    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());
    run_encrypt(&src, &enc, &opts(), &vault, &scheduler, None).unwrap();

    // flip a byte inside the third chunk of the chunked file
    let big = enc_path(&enc, Path::new("docs/big.bin"));
    let mut bytes = std::fs::read(&big).unwrap();
    let offset = 29 + 2 * (8 + CHUNK as usize) + 8 + 100;
    bytes[offset] ^= 0x04;
    std::fs::write(&big, &bytes).unwrap();

    let report = run_decrypt(&enc, &dec, &opts(), &vault, None).unwrap();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, big);
    assert!(
        matches!(report.failed[0].error, StrataError::Integrity { chunk: 2, .. }),
        "{}",
        report.failed[0].error
    );
    assert_eq!(report.succeeded.len(), files.len() - 1);
    assert!(!dec.join("docs/big.bin").exists());
    assert!(dec.join("docs/exact.bin").exists());
}

#[test]
fn missing_master_secret_is_reported_not_fatal() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let enc = tmp.path().join("enc");
    let files = make_tree(&src);

    let vault = KeyVault::new(
        MemoryStore::new(),
        EnvSecret::new("STRATA_BATCH_TEST_MASTER_NEVER_SET"),
    )
    .with_iterations(1_000);
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let report = run_encrypt(&src, &enc, &opts(), &vault, &scheduler, None).unwrap();

    // every ciphertext is written, but the key is not safe
    assert!(report.failed.is_empty());
    assert_eq!(report.succeeded.len(), files.len());
    assert!(!report.is_clean());
    assert!(report
        .key_registration_errors
        .iter()
        .all(|f| matches!(f.error, StrataError::Config(_))));
    assert!(enc_path(&enc, Path::new("docs/big.bin")).exists());

    let report = run_decrypt(&enc, &tmp.path().join("dec"), &opts(), &vault, None).unwrap();
    assert_eq!(report.failed.len(), files.len());
}

#[test]
fn progress_reports_every_file() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let files = make_tree(&src);

    let calls = Arc::new(AtomicU64::new(0));
    let last_total = Arc::new(AtomicU64::new(0));
    let progress: ProgressFn = {
        let calls = calls.clone();
        let last_total = last_total.clone();
        Box::new(move |_done, total, msg| {
            assert!(msg.starts_with('['));
            calls.fetch_add(1, Ordering::SeqCst);
            last_total.store(total, Ordering::SeqCst);
        })
    };

    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());
    run_encrypt(
        &src,
        &tmp.path().join("enc"),
        &opts(),
        &vault,
        &scheduler,
        Some(&progress),
    )
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), files.len() as u64);
    assert_eq!(last_total.load(Ordering::SeqCst), files.len() as u64);
    assert!(!scheduler.snapshot().is_empty(), "finished jobs feed the cost model");
}

#[test]
fn decrypt_key_override() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    make_tree(&src);
    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());
    run_encrypt(&src, &tmp.path().join("enc"), &opts(), &vault, &scheduler, None).unwrap();

    let bad = BatchOptions {
        key_id: Some("no-such-key".into()),
        ..opts()
    };
    let report = run_decrypt(&tmp.path().join("enc"), &tmp.path().join("dec"), &bad, &vault, None)
        .unwrap();
    assert!(report.succeeded.is_empty());
    assert!(report
        .failed
        .iter()
        .all(|f| matches!(f.error, StrataError::KeyNotFound(_))));
}

#[test]
fn back_to_back_runs_keep_separate_keys() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src");
    let files = make_tree(&src);
    let vault = vault();
    let scheduler = Scheduler::new(SchedulerConfig::default());

    // same directory, well within one second
    let enc1 = tmp.path().join("enc1");
    let enc2 = tmp.path().join("enc2");
    let first = run_encrypt(&src, &enc1, &opts(), &vault, &scheduler, None).unwrap();
    let second = run_encrypt(&src, &enc2, &opts(), &vault, &scheduler, None).unwrap();
    assert!(first.is_clean() && second.is_clean());
    assert_ne!(first.key_id, second.key_id);
    assert_eq!(vault.list().unwrap().len(), 2);

    for (enc, dec) in [(&enc1, "dec1"), (&enc2, "dec2")] {
        let dec = tmp.path().join(dec);
        let report = run_decrypt(enc, &dec, &opts(), &vault, None).unwrap();
        assert!(report.is_clean(), "{report:?}");
        for (rel, data) in &files {
            assert_eq!(&std::fs::read(dec.join(rel)).unwrap(), data, "{}", rel.display());
        }
    }
}

/// Vault whose `store` fails exactly once, on the given call
struct FlakyRing {
    inner: KeyVault<MemoryStore>,
    calls: AtomicUsize,
    fail_on: usize,
}

impl KeyRing for FlakyRing {
    fn store(&self, key_id: &str, raw_key: &[u8], mode: &str) -> StrataResult<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_on {
            return Err(StrataError::Storage("database is locked".into()));
        }
        self.inner.store_key(key_id, raw_key, mode)
    }

    fn load(&self, key_id: &str) -> StrataResult<(Zeroizing<Vec<u8>>, String)> {
        self.inner.load_key(key_id)
    }
}

#[test]
fn one_failed_registration_is_covered_by_another() {
    // docs/exact.bin and docs/big.bin are chunked: two store calls per run
    for fail_on in [0, 1] {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src");
        let enc = tmp.path().join("enc");
        make_tree(&src);
        let ring = FlakyRing {
            inner: vault(),
            calls: AtomicUsize::new(0),
            fail_on,
        };
        let scheduler = Scheduler::new(SchedulerConfig::default());

        let report = run_encrypt(&src, &enc, &opts(), &ring, &scheduler, None).unwrap();
        assert_eq!(ring.calls.load(Ordering::SeqCst), 2, "fail_on = {fail_on}");
        assert!(report.is_clean(), "fail_on = {fail_on}: {report:?}");

        let report = run_decrypt(&enc, &tmp.path().join("dec"), &opts(), &ring, None).unwrap();
        assert!(report.is_clean(), "fail_on = {fail_on}: {report:?}");
    }
}
