//! Shortest-predicted-duration-first planning
//!
//! Ordering only pays off for batches with enough work in them. A plan falls
//! back to listing order (priority 0 everywhere) when, checked in order:
//! 1. there are at most `fifo_max_files` files
//! 2. all files together are smaller than `min_total_bytes`
//! 3. every file is smaller than `small_file_bytes`

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use strata_core::config::{Policy, SchedulerConfig};
use strata_core::{StrataError, StrataResult};

use crate::cost::CostModel;

/// One planned unit of work. Lower priority runs first.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Predicted seconds, or the listing index/0 for unordered plans
    pub priority: f64,
    pub path: PathBuf,
    pub size: u64,
    pub extension: String,
}

/// Why a plan kept listing order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bypass {
    FewFiles,
    SmallTotal,
    AllSmall,
}

/// Lowercase extension with its leading dot (`".txt"`), or `""` when the
/// file name has none.
pub fn extension_class(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Plans batches and learns from finished jobs. Safe to share across the
/// threads reporting completions.
pub struct Scheduler {
    config: SchedulerConfig,
    model: Mutex<CostModel>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let model = CostModel::from_config(&config);
        Self::with_model(config, model)
    }

    /// Start from an existing model, e.g. one carried over from a previous run.
    pub fn with_model(config: SchedulerConfig, model: CostModel) -> Self {
        Self {
            config,
            model: Mutex::new(model),
        }
    }

    /// Stat every path and plan with the configured policy.
    pub fn plan(&self, files: &[PathBuf]) -> StrataResult<Vec<Job>> {
        Ok(self.plan_sized(stat_all(files)?))
    }

    /// Plan files whose sizes are already known, with the configured policy.
    pub fn plan_sized(&self, entries: Vec<(PathBuf, u64)>) -> Vec<Job> {
        match self.config.policy {
            Policy::Priority => self.plan_entries(entries),
            Policy::Fifo => fifo(entries),
        }
    }

    /// Listing order, priority = listing index.
    pub fn plan_fifo(&self, files: &[PathBuf]) -> StrataResult<Vec<Job>> {
        Ok(fifo(stat_all(files)?))
    }

    /// Priority planning over already-known sizes.
    pub fn plan_entries(&self, entries: Vec<(PathBuf, u64)>) -> Vec<Job> {
        let sizes: Vec<u64> = entries.iter().map(|(_, size)| *size).collect();
        if let Some(reason) = self.bypass(&sizes) {
            debug!(files = entries.len(), ?reason, "plan: keeping listing order");
            return entries
                .into_iter()
                .map(|(path, size)| Job {
                    priority: 0.0,
                    extension: extension_class(&path),
                    path,
                    size,
                })
                .collect();
        }

        let mut jobs: Vec<Job> = {
            let mut model = self.model();
            entries
                .into_iter()
                .map(|(path, size)| {
                    let extension = extension_class(&path);
                    Job {
                        priority: model.predict(size, &extension),
                        path,
                        size,
                        extension,
                    }
                })
                .collect()
        };
        // stable: equal predictions keep listing order
        jobs.sort_by(|a, b| a.priority.total_cmp(&b.priority));
        debug!(files = jobs.len(), "plan: ordered by predicted duration");
        jobs
    }

    /// The first bypass rule matching these sizes, if any.
    pub fn bypass(&self, sizes: &[u64]) -> Option<Bypass> {
        if sizes.len() <= self.config.fifo_max_files {
            return Some(Bypass::FewFiles);
        }
        if sizes.iter().sum::<u64>() < self.config.min_total_bytes {
            return Some(Bypass::SmallTotal);
        }
        if sizes.iter().all(|&s| s < self.config.small_file_bytes) {
            return Some(Bypass::AllSmall);
        }
        None
    }

    /// Report a finished job. The file is stat'ed again so the model learns
    /// from its current size.
    pub fn observe(&self, path: &Path, elapsed_secs: f64) -> StrataResult<()> {
        let size = std::fs::metadata(path)
            .map_err(|e| StrataError::io_at(path, e))?
            .len();
        self.observe_size(size, &extension_class(path), elapsed_secs);
        Ok(())
    }

    pub fn observe_size(&self, size: u64, extension: &str, elapsed_secs: f64) {
        self.model().observe(size, extension, elapsed_secs);
    }

    /// Current per-extension rates (bytes/second), sorted by extension.
    pub fn snapshot(&self) -> BTreeMap<String, f64> {
        self.model()
            .rates()
            .iter()
            .map(|(ext, rate)| (ext.clone(), *rate))
            .collect()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn model(&self) -> MutexGuard<'_, CostModel> {
        // The model holds plain numbers; a panicked holder cannot leave it torn.
        self.model.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn stat_all(files: &[PathBuf]) -> StrataResult<Vec<(PathBuf, u64)>> {
    files
        .iter()
        .map(|p| {
            let size = std::fs::metadata(p)
                .map_err(|e| StrataError::io_at(p, e))?
                .len();
            Ok((p.clone(), size))
        })
        .collect()
}

fn fifo(entries: Vec<(PathBuf, u64)>) -> Vec<Job> {
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (path, size))| Job {
            priority: i as f64,
            extension: extension_class(&path),
            path,
            size,
        })
        .collect()
}
