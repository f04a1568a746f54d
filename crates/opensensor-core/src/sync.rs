//! Hand-off of completed batch files to remote storage.
//!
//! [`SyncTrigger`] runs on its own thread and timer. It only ever sees paths
//! the writer has confirmed complete (sent over a channel by the collection
//! loop) or files already sitting in the output directory at startup. Upload
//! failures are logged and the file stays pending; nothing here can stop or
//! slow sampling.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::boundary::next_boundary_after;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::partition::EXTENSION;

/// Upper bound on how long the worker sleeps between clock checks.
const MAX_WAIT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Uploader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    /// The remote already holds identical content.
    AlreadyPresent,
}

/// Remote object store. Uploading the same file twice must be harmless.
pub trait Uploader: Send {
    fn upload(&mut self, local: &Path, key: &str) -> Result<UploadOutcome, SyncError>;
}

/// Uploads by copying into a directory tree, e.g. a mounted bucket.
///
/// Files whose SHA-256 already matches the destination are skipped.
#[derive(Debug, Clone)]
pub struct MirrorUploader {
    root: PathBuf,
}

impl MirrorUploader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn sha256_file(path: &Path) -> io::Result<Vec<u8>> {
    let bytes = fs::read(path)?;
    Ok(Sha256::digest(&bytes).to_vec())
}

impl Uploader for MirrorUploader {
    fn upload(&mut self, local: &Path, key: &str) -> Result<UploadOutcome, SyncError> {
        if !local.is_file() {
            return Err(SyncError::MissingFile(local.to_path_buf()));
        }
        let upload_err = |source: io::Error| SyncError::Upload {
            key: key.to_string(),
            source,
        };

        let dest = self.root.join(key);
        let local_hash = sha256_file(local).map_err(upload_err)?;
        if dest.is_file() && sha256_file(&dest).map_err(upload_err)? == local_hash {
            return Ok(UploadOutcome::AlreadyPresent);
        }

        let parent = dest.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(upload_err)?;
        let tmp = tempfile::Builder::new()
            .prefix(".upload_")
            .tempfile_in(parent)
            .map_err(upload_err)?;
        fs::copy(local, tmp.path()).map_err(upload_err)?;
        tmp.persist(&dest).map_err(|e| upload_err(e.error))?;
        Ok(UploadOutcome::Uploaded)
    }
}

// ---------------------------------------------------------------------------
// Trigger
// ---------------------------------------------------------------------------

/// Result of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub uploaded: usize,
    pub already_present: usize,
    pub failed: usize,
    pub dropped: usize,
}

impl SyncReport {
    fn succeeded(&self) -> usize {
        self.uploaded + self.already_present
    }
}

/// Totals over the worker's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub passes: u64,
    pub uploaded: u64,
    pub already_present: u64,
    pub failures: u64,
}

pub struct SyncTrigger {
    output_dir: PathBuf,
    prefix: Option<String>,
    interval_secs: i64,
    uploader: Box<dyn Uploader>,
    clock: Arc<dyn Clock>,
    pending: BTreeSet<PathBuf>,
    next_due: DateTime<Utc>,
    offline: bool,
    stats: SyncStats,
}

impl SyncTrigger {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        interval_minutes: u32,
        uploader: Box<dyn Uploader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let interval_secs = i64::from(interval_minutes.max(1)) * 60;
        let next_due = next_boundary_after(clock.now(), interval_secs);
        Self {
            output_dir: output_dir.into(),
            prefix: None,
            interval_secs,
            uploader,
            clock,
            pending: BTreeSet::new(),
            next_due,
            offline: false,
            stats: SyncStats::default(),
        }
    }

    /// Put every remote key under `prefix/`.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());
        self
    }

    pub fn pending(&self) -> impl Iterator<Item = &Path> {
        self.pending.iter().map(PathBuf::as_path)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn next_due(&self) -> DateTime<Utc> {
        self.next_due
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Queue a file the writer has finished.
    pub fn enqueue(&mut self, path: PathBuf) {
        debug!("queued for sync: {}", path.display());
        self.pending.insert(path);
    }

    /// Queue every batch file already in the output directory.
    pub fn scan_existing(&mut self) -> usize {
        let mut found = Vec::new();
        collect_batch_files(&self.output_dir, &mut found);
        let before = self.pending.len();
        self.pending.extend(found);
        self.pending.len() - before
    }

    /// Object key for a local file: its path below the output directory,
    /// `/`-separated, under the optional prefix.
    pub fn remote_key(&self, path: &Path) -> Result<String, SyncError> {
        let rel = path
            .strip_prefix(&self.output_dir)
            .map_err(|_| SyncError::OutsideOutputDir {
                path: path.to_path_buf(),
            })?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        let key = parts.join("/");
        Ok(match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key,
        })
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_due
    }

    /// Run a pass if the sync interval has come round.
    pub fn poll(&mut self, now: DateTime<Utc>) -> Option<SyncReport> {
        if !self.is_due(now) {
            return None;
        }
        self.next_due = next_boundary_after(now, self.interval_secs);
        Some(self.sync_pending())
    }

    /// Try every pending file once. Failures stay pending.
    pub fn sync_pending(&mut self) -> SyncReport {
        let mut report = SyncReport::default();
        let paths: Vec<PathBuf> = self.pending.iter().cloned().collect();

        for path in paths {
            let key = match self.remote_key(&path) {
                Ok(k) => k,
                Err(e) => {
                    warn!("not syncing {}: {e}", path.display());
                    self.pending.remove(&path);
                    report.dropped += 1;
                    continue;
                }
            };
            match self.uploader.upload(&path, &key) {
                Ok(outcome) => {
                    self.pending.remove(&path);
                    match outcome {
                        UploadOutcome::Uploaded => report.uploaded += 1,
                        UploadOutcome::AlreadyPresent => report.already_present += 1,
                    }
                }
                Err(SyncError::MissingFile(p)) => {
                    warn!("{} vanished before upload, dropping it", p.display());
                    self.pending.remove(&path);
                    report.dropped += 1;
                }
                Err(e) => {
                    debug!("upload of {key} failed: {e}");
                    report.failed += 1;
                }
            }
        }

        self.stats.passes += 1;
        self.stats.uploaded += report.uploaded as u64;
        self.stats.already_present += report.already_present as u64;
        self.stats.failures += report.failed as u64;

        if report.failed > 0 && report.succeeded() == 0 {
            if !self.offline {
                warn!(
                    "remote store unreachable, {} file(s) kept for the next sync",
                    self.pending.len()
                );
                self.offline = true;
            }
        } else if report.succeeded() > 0 && self.offline {
            info!("remote store back online");
            self.offline = false;
        }

        if report.succeeded() > 0 || report.failed > 0 {
            info!(
                "sync: {} uploaded, {} already present, {} failed, {} pending",
                report.uploaded,
                report.already_present,
                report.failed,
                self.pending.len()
            );
        }
        report
    }

    /// Move the trigger onto its own thread.
    ///
    /// The returned sender feeds it completed paths. When every sender is
    /// dropped the worker does a final pass and returns its totals.
    pub fn spawn(self) -> io::Result<(Sender<PathBuf>, JoinHandle<SyncStats>)> {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("opensensor-sync".into())
            .spawn(move || self.run(rx))?;
        Ok((tx, handle))
    }

    fn run(mut self, rx: Receiver<PathBuf>) -> SyncStats {
        let found = self.scan_existing();
        if found > 0 {
            info!("{found} file(s) from earlier runs queued for sync");
        }
        info!("first sync at {}", self.next_due.format("%H:%M:%S"));

        loop {
            let wait = (self.next_due - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(MAX_WAIT);
            match rx.recv_timeout(wait) {
                Ok(path) => self.enqueue(path),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            let now = self.clock.now();
            self.poll(now);
        }

        if !self.pending.is_empty() {
            info!("final sync of {} file(s)", self.pending.len());
            self.sync_pending();
        }
        self.stats
    }
}

/// Recursively collect `*.parquet` files, skipping hidden temp files.
fn collect_batch_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden {
            continue;
        }
        if path.is_dir() {
            collect_batch_files(&path, out);
        } else if path.extension().is_some_and(|e| e == EXTENSION) {
            out.push(path);
        }
    }
}
