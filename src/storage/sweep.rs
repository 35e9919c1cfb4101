//! Concurrent Duplicate Sweep
//!
//! Walks a directory tree and deletes every file whose content has already
//! been seen earlier in the same sweep.
//!
//! ```text
//!  walkdir (blocking thread) ──paths──▶ bounded channel ──▶ JoinSet of hashers
//!                                                              │
//!                                           DigestIndex::claim (atomic per digest)
//!                                              │                     │
//!                                            First               Duplicate
//!                                            (keep)        (delete + log action)
//! ```
//!
//! Hashing runs outside any lock. Only the check-and-insert on the
//! [`DigestIndex`] is exclusive, and only for the digest being claimed. The
//! first error stops the walk. Hashers already in flight run to completion,
//! so every file deleted before the sweep returns has its `deduplicate`
//! action; those deletions stay.

use crate::error::{AppError, Result};
use crate::storage::digest::{digest_file_with_size, ContentDigest};
use crate::storage::ledger::{ActionKind, Ledger};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of claiming a digest in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// First sighting: the claimant's path is now the survivor.
    First,
    /// Already claimed by `original`.
    Duplicate { original: PathBuf },
}

/// Digest → first path seen, scoped to one sweep.
///
/// Entries are only ever inserted, never replaced, so a `Duplicate` verdict
/// stays valid after the shard lock is released.
#[derive(Debug, Default)]
pub struct DigestIndex {
    seen: DashMap<ContentDigest, PathBuf>,
}

impl DigestIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically record `path` as the holder of `digest` unless another
    /// path got there first.
    pub fn claim(&self, digest: ContentDigest, path: &Path) -> Claim {
        match self.seen.entry(digest) {
            Entry::Occupied(entry) => Claim::Duplicate {
                original: entry.get().clone(),
            },
            Entry::Vacant(entry) => {
                entry.insert(path.to_path_buf());
                Claim::First
            }
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Tuning knobs for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// Maximum files being hashed at once.
    pub max_concurrent_files: usize,
    /// Capacity of the channel between the walker and the hashers.
    pub walk_buffer: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            max_concurrent_files: num_cpus::get().max(1) * 2,
            walk_buffer: 256,
        }
    }
}

/// A file removed by the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedDuplicate {
    pub path: PathBuf,
    /// The surviving file with the same content.
    pub original: PathBuf,
    pub digest: ContentDigest,
    pub bytes: u64,
}

/// Summary of a completed sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub files_scanned: usize,
    pub duplicates_removed: usize,
    pub bytes_reclaimed: u64,
    pub removed: Vec<RemovedDuplicate>,
}

/// Per-file result of a hasher task.
enum FileOutcome {
    Kept,
    Removed(RemovedDuplicate),
}

/// Runs duplicate sweeps, appending one `deduplicate` action per deletion.
#[derive(Debug, Clone)]
pub struct DuplicateSweep {
    ledger: Ledger,
    options: SweepOptions,
}

impl DuplicateSweep {
    pub fn new(ledger: Ledger, options: SweepOptions) -> Self {
        Self { ledger, options }
    }

    pub fn options(&self) -> SweepOptions {
        self.options
    }

    /// Sweep `root`, deleting later copies of content already seen.
    ///
    /// Which copy survives depends on the order in which digests finish;
    /// with lexical walk order and a single hasher this is the lexically
    /// first path.
    ///
    /// # Errors
    ///
    /// `WalkAbort` wrapping the first walk, hash, delete or ledger failure.
    pub async fn run(&self, root: &Path) -> Result<SweepReport> {
        info!(
            root = %root.display(),
            max_concurrent_files = self.options.max_concurrent_files,
            "Starting duplicate sweep"
        );

        let index = Arc::new(DigestIndex::new());
        let (tx, mut rx) =
            mpsc::channel::<walkdir::Result<PathBuf>>(self.options.walk_buffer.max(1));
        let walker = tokio::task::spawn_blocking({
            let root = root.to_path_buf();
            move || walk_files(&root, tx)
        });

        let limit = self.options.max_concurrent_files.max(1);
        let mut tasks: JoinSet<Result<FileOutcome>> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, PathBuf> = HashMap::new();
        let mut report = SweepReport::default();
        let mut failure: Option<AppError> = None;

        while failure.is_none() {
            let Some(entry) = rx.recv().await else {
                break;
            };
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| root.to_path_buf());
                    warn!(path = %path.display(), error = %e, "Walk failed, aborting sweep");
                    failure = Some(AppError::walk_abort(
                        path.clone(),
                        AppError::io_error(format!("Failed to walk directory: {}", e), path),
                    ));
                    break;
                }
            };

            while tasks.len() >= limit && failure.is_none() {
                if let Some(joined) = tasks.join_next_with_id().await {
                    settle(joined, &mut in_flight, &mut report, &mut failure);
                }
            }
            if failure.is_some() {
                break;
            }

            report.files_scanned += 1;
            let index = Arc::clone(&index);
            let ledger = self.ledger.clone();
            let handle = tasks.spawn({
                let path = path.clone();
                async move { sweep_file(path, &index, &ledger).await }
            });
            in_flight.insert(handle.id(), path);

            // Surface failures without waiting for the pool to fill up
            while let Some(joined) = tasks.try_join_next_with_id() {
                settle(joined, &mut in_flight, &mut report, &mut failure);
            }
        }

        // Stop the walker, then let every hasher already running finish so
        // each deletion it makes is also logged
        drop(rx);
        while let Some(joined) = tasks.join_next_with_id().await {
            settle(joined, &mut in_flight, &mut report, &mut failure);
        }

        let walked = walker.await;
        if let Some(error) = failure {
            warn!(
                root = %root.display(),
                duplicates_removed = report.duplicates_removed,
                error = %error,
                "Duplicate sweep aborted"
            );
            return Err(error);
        }
        walked.map_err(|e| {
            AppError::walk_abort(
                root,
                AppError::io_error(format!("Directory walker failed: {}", e), root),
            )
        })?;

        info!(
            root = %root.display(),
            files_scanned = report.files_scanned,
            duplicates_removed = report.duplicates_removed,
            bytes_reclaimed = report.bytes_reclaimed,
            "Duplicate sweep finished"
        );

        Ok(report)
    }
}

/// Walk `root` in lexical order, sending regular files. Stops early once the
/// receiver is gone.
fn walk_files(root: &Path, tx: mpsc::Sender<walkdir::Result<PathBuf>>) {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    for entry in walker {
        let item = match entry {
            Ok(entry) if entry.file_type().is_file() => Ok(entry.into_path()),
            Ok(_) => continue,
            Err(e) => Err(e),
        };
        let is_err = item.is_err();
        if tx.blocking_send(item).is_err() || is_err {
            // Receiver dropped (sweep aborted) or we just reported a failure
            return;
        }
    }
}

/// Hash one file, claim its digest, and delete it if it is a duplicate.
async fn sweep_file(path: PathBuf, index: &DigestIndex, ledger: &Ledger) -> Result<FileOutcome> {
    let (digest, bytes) = digest_file_with_size(&path)
        .await
        .map_err(|e| AppError::walk_abort(path.clone(), e))?;

    let original = match index.claim(digest, &path) {
        Claim::First => return Ok(FileOutcome::Kept),
        Claim::Duplicate { original } => original,
    };

    info!(
        path = %path.display(),
        original = %original.display(),
        hash = %digest,
        "Duplicate found, deleting"
    );

    tokio::fs::remove_file(&path).await.map_err(|e| {
        AppError::walk_abort(
            path.clone(),
            AppError::io_error(format!("Failed to delete duplicate: {}", e), path.clone()),
        )
    })?;

    let filename = path.to_string_lossy();
    ledger
        .append_action(ActionKind::Deduplicate, &filename, "")
        .await
        .map_err(|e| AppError::walk_abort(path.clone(), e))?;

    Ok(FileOutcome::Removed(RemovedDuplicate {
        path,
        original,
        digest,
        bytes,
    }))
}

/// Fold one finished hasher into the report. The first failure is kept;
/// later ones are only logged.
fn settle(
    joined: std::result::Result<(task::Id, Result<FileOutcome>), JoinError>,
    in_flight: &mut HashMap<task::Id, PathBuf>,
    report: &mut SweepReport,
    failure: &mut Option<AppError>,
) {
    let outcome = match joined {
        Ok((id, outcome)) => {
            in_flight.remove(&id);
            outcome
        }
        Err(e) => {
            let path = in_flight.remove(&e.id()).unwrap_or_default();
            Err(AppError::walk_abort(
                path.clone(),
                AppError::io_error(format!("Sweep task failed: {}", e), path),
            ))
        }
    };

    match outcome {
        Ok(FileOutcome::Kept) => {}
        Ok(FileOutcome::Removed(removed)) => {
            debug!(path = %removed.path.display(), bytes = removed.bytes, "Duplicate removed");
            report.duplicates_removed += 1;
            report.bytes_reclaimed += removed.bytes;
            report.removed.push(removed);
        }
        Err(error) if failure.is_none() => *failure = Some(error),
        Err(error) => warn!(error = %error, "Further sweep failure after abort"),
    }
}
