//! Host calibration: pick a chunk size and worker count for this machine
//!
//! Each trial hashes the same random buffer with SHA-256, split into
//! `chunk_size` parts and spread over `workers` threads. Hashing stands in for
//! the cipher: both are CPU-bound per chunk and embarrassingly parallel.

use rand::RngCore;
use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::{debug, info};

use strata_core::{StrataError, StrataResult, MIB};

/// Chunk sizes tried when none are given: 1, 4, 8, 16 and 32 MiB
pub const DEFAULT_CHUNK_CANDIDATES: [u64; 5] = [MIB, 4 * MIB, 8 * MIB, 16 * MIB, 32 * MIB];

/// Default sample buffer size (16 MiB)
pub const DEFAULT_SAMPLE_BYTES: usize = 16 * MIB as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Calibration {
    pub chunk_size: u64,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trial {
    pub chunk_size: u64,
    pub workers: usize,
    pub mib_per_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuneReport {
    pub best: Calibration,
    pub trials: Vec<Trial>,
}

/// Worker counts worth trying on a host with `cpus` cores:
/// 1, half the cores, all cores, and twice the cores capped at 16.
pub fn worker_candidates(cpus: usize) -> Vec<usize> {
    let cpus = cpus.max(1);
    let mut out = vec![1, (cpus / 2).max(1), cpus, (2 * cpus).min(16)];
    out.sort_unstable();
    out.dedup();
    out
}

/// Run every `(chunk_size, workers)` pair and keep the fastest. Ties go to
/// the pair tried first.
pub fn tune(
    sample_bytes: usize,
    chunk_candidates: &[u64],
    worker_candidates: &[usize],
) -> StrataResult<TuneReport> {
    if chunk_candidates.is_empty() || worker_candidates.is_empty() {
        return Err(StrataError::Config(
            "calibration needs at least one chunk size and one worker count".into(),
        ));
    }

    let mut sample = vec![0u8; sample_bytes];
    rand::thread_rng().fill_bytes(&mut sample);

    let mut trials = Vec::with_capacity(chunk_candidates.len() * worker_candidates.len());
    for &chunk_size in chunk_candidates {
        for &workers in worker_candidates {
            let mib_per_sec = run_trial(&sample, chunk_size, workers)?;
            debug!(chunk_size, workers, mib_per_sec, "calibration trial");
            trials.push(Trial {
                chunk_size,
                workers,
                mib_per_sec,
            });
        }
    }

    let best = trials
        .iter()
        .fold(None::<&Trial>, |best, t| match best {
            Some(b) if b.mib_per_sec >= t.mib_per_sec => Some(b),
            _ => Some(t),
        })
        .map(|t| Calibration {
            chunk_size: t.chunk_size,
            workers: t.workers,
        })
        .ok_or_else(|| StrataError::Config("calibration produced no trials".into()))?;

    info!(chunk_size = best.chunk_size, workers = best.workers, "calibration done");
    Ok(TuneReport { best, trials })
}

/// Throughput in MiB/s of hashing `sample` in `chunk_size` parts on
/// `workers` threads.
pub fn run_trial(sample: &[u8], chunk_size: u64, workers: usize) -> StrataResult<f64> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| StrataError::Config(format!("calibration pool: {e}")))?;
    let part = usize::try_from(chunk_size.max(1)).unwrap_or(usize::MAX);

    let started = Instant::now();
    pool.install(|| {
        sample.par_chunks(part).for_each(|c| {
            std::hint::black_box(Sha256::digest(c));
        });
    });
    let elapsed = started.elapsed().as_secs_f64().max(1e-6);
    Ok(sample.len() as f64 / MIB as f64 / elapsed)
}
