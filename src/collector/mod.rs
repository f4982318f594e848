//! Local file discovery.
//!
//! Each target names a directory plus an include glob (the final segment of
//! its path) and an optional exclude glob. Targets are scanned concurrently by
//! a bounded pool of worker threads; only the immediate regular-file entries
//! of each directory are considered.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread;
use thiserror::Error;

use crate::package::Target;
use crate::runtime::{FileKind, Runtime, absolutize};

/// Default upper bound on concurrent directory scans.
pub const MAX_WORKERS: usize = 5;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("no input targets")]
    NoTargets,
    #[error("failed to determine current directory")]
    Internal,
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
}

#[derive(Debug, Clone, Copy)]
pub struct CollectOptions {
    pub max_workers: usize,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            max_workers: MAX_WORKERS,
        }
    }
}

/// Result of a collection: every file is a descendant of `common_root`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFiles {
    pub common_root: PathBuf,
    /// Sorted, without duplicates.
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
struct ScanJob {
    dir: PathBuf,
    include: String,
    exclude: Option<String>,
}

/// Collect the regular files matched by `targets`.
///
/// A target whose directory cannot be read, or whose globs do not compile,
/// contributes no files; it does not fail the collection.
#[tracing::instrument(skip(runtime, targets))]
pub fn collect<R: Runtime>(
    runtime: &R,
    targets: &[Target],
    options: CollectOptions,
) -> Result<CollectedFiles, CollectError> {
    if targets.is_empty() {
        return Err(CollectError::NoTargets);
    }

    let cwd = runtime.current_dir().map_err(|e| {
        debug!("current_dir failed: {:#}", e);
        CollectError::Internal
    })?;

    let paths = targets
        .iter()
        .map(|t| {
            absolutize(&cwd, Path::new(&t.path)).ok_or_else(|| CollectError::InvalidPath(t.path.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let as_strings: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let common_root = dir_of(&common_prefix(&as_strings));
    debug!("Common root of {} target(s): {:?}", targets.len(), common_root);

    let jobs: Vec<ScanJob> = paths
        .iter()
        .zip(targets)
        .map(|(path, target)| ScanJob {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.clone()),
            include: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            exclude: target.exclude.clone().filter(|e| !e.is_empty()),
        })
        .collect();

    let workers = options.max_workers.max(1).min(jobs.len());
    let mut files = run_pool(runtime, jobs, workers);
    files.sort();
    files.dedup();

    Ok(CollectedFiles { common_root, files })
}

/// Fan jobs out to `workers` scanners and fan their matches back in.
///
/// A producer thread feeds the job queue and closes it; a closer thread joins
/// every worker before releasing the last result sender, so draining the
/// result queue ends exactly when all scans are done.
fn run_pool<R: Runtime>(runtime: &R, jobs: Vec<ScanJob>, workers: usize) -> Vec<PathBuf> {
    let (job_tx, job_rx) = mpsc::channel::<ScanJob>();
    let job_rx = Mutex::new(job_rx);
    let (result_tx, result_rx) = mpsc::channel::<PathBuf>();

    thread::scope(|scope| {
        scope.spawn(move || {
            for job in jobs {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let result_tx = result_tx.clone();
                let job_rx = &job_rx;
                scope.spawn(move || scan_worker(runtime, job_rx, result_tx))
            })
            .collect();

        scope.spawn(move || {
            for handle in handles {
                if handle.join().is_err() {
                    warn!("File scan worker panicked");
                }
            }
            drop(result_tx);
        });

        result_rx.iter().collect()
    })
}

fn scan_worker<R: Runtime>(runtime: &R, jobs: &Mutex<Receiver<ScanJob>>, results: Sender<PathBuf>) {
    loop {
        let job = {
            let rx = jobs.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        match job {
            Ok(job) => scan_dir(runtime, &job, &results),
            Err(_) => break,
        }
    }
}

fn scan_dir<R: Runtime>(runtime: &R, job: &ScanJob, results: &Sender<PathBuf>) {
    let include = match glob::Pattern::new(&job.include) {
        Ok(p) => p,
        Err(e) => {
            debug!("Skipping {:?}: bad include pattern {:?}: {}", job.dir, job.include, e);
            return;
        }
    };
    let exclude = match job.exclude.as_deref().map(glob::Pattern::new).transpose() {
        Ok(p) => p,
        Err(e) => {
            debug!("Skipping {:?}: bad exclude pattern {:?}: {}", job.dir, job.exclude, e);
            return;
        }
    };

    let entries = match runtime.read_dir(&job.dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Skipping {:?}: {:#}", job.dir, e);
            return;
        }
    };

    for entry in entries {
        match runtime.file_kind(&entry) {
            Ok(FileKind::File) => {}
            Ok(_) => continue,
            Err(e) => {
                debug!("Skipping {:?}: {:#}", entry, e);
                continue;
            }
        }

        let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !include.matches(name) {
            continue;
        }
        if exclude.as_ref().is_some_and(|p| p.matches(name)) {
            continue;
        }

        if results.send(entry.clone()).is_err() {
            return;
        }
    }
}

/// Longest shared character prefix of `strs`.
fn common_prefix(strs: &[String]) -> String {
    let mut sorted: Vec<&str> = strs.iter().map(String::as_str).collect();
    sorted.sort_by_key(|s| s.len());
    let Some((shortest, rest)) = sorted.split_first() else {
        return String::new();
    };

    let mut end = 0;
    for (idx, ch) in shortest.char_indices() {
        if rest.iter().any(|s| s[idx..].chars().next() != Some(ch)) {
            break;
        }
        end = idx + ch.len_utf8();
    }
    shortest[..end].to_string()
}

/// Directory part of a prefix string: everything before its last separator.
fn dir_of(prefix: &str) -> PathBuf {
    match prefix.rfind(std::path::is_separator) {
        Some(0) => PathBuf::from(&prefix[..1]),
        Some(idx) => PathBuf::from(&prefix[..idx]),
        None => PathBuf::from("."),
    }
}
