//! Integrity Verification for stored blobs
//!
//! Every blob name embeds the digest of its content, so a blob can be
//! checked without consulting the ledger: recompute the digest and compare
//! it with the one in the name.

use crate::error::{AppError, Result};
use crate::storage::cas::{ContentStore, StorageKey, TEMP_PREFIX};
use crate::storage::digest::digest_file;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use tokio::fs;
use tracing::{debug, info, warn};

/// Result of a full storage scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    /// Blobs whose name parsed as a storage key
    pub total_blobs: usize,
    pub valid_blobs: usize,
    /// Keys whose content no longer matches their digest
    pub corrupted: Vec<String>,
    /// Entries in the storage root that are not blobs
    pub unrecognized: Vec<String>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.corrupted.is_empty()
    }
}

/// Recompute the digest of the blob stored under `key`.
///
/// Returns `Ok(false)` when the content no longer matches the key.
///
/// # Errors
///
/// `NotFound` if no blob exists for `key`, `Hash` if it cannot be read.
pub async fn verify_blob(store: &ContentStore, key: &StorageKey) -> Result<bool> {
    if !store.contains(key).await? {
        return Err(AppError::not_found(format!("Blob not found: {}", key)));
    }

    let actual = digest_file(&store.blob_path(key)).await?;
    if actual != key.digest {
        warn!(
            key = %key,
            actual = %actual,
            "Blob is corrupted (hash mismatch)"
        );
        return Ok(false);
    }

    debug!(key = %key, "Blob verified");
    Ok(true)
}

/// Verify every blob under the store's root.
///
/// A missing root is an empty store. Staging files left by interrupted
/// writes are skipped.
pub async fn verify_storage(store: &ContentStore) -> Result<IntegrityReport> {
    info!(root = %store.root().display(), "Starting storage integrity verification");

    let mut report = IntegrityReport::default();

    let mut entries = match fs::read_dir(store.root()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
        Err(e) => {
            return Err(AppError::io_error(
                format!("Failed to read storage directory: {}", e),
                store.root(),
            ))
        }
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| {
        AppError::io_error(format!("Failed to read storage entry: {}", e), store.root())
    })? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(TEMP_PREFIX) {
            continue;
        }
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        names.push((name, is_file));
    }
    names.sort();

    for (name, is_file) in names {
        let key = match StorageKey::parse_file_name(&name) {
            Some(key) if is_file => key,
            _ => {
                report.unrecognized.push(name);
                continue;
            }
        };

        report.total_blobs += 1;
        if verify_blob(store, &key).await? {
            report.valid_blobs += 1;
        } else {
            report.corrupted.push(name);
        }
    }

    info!(
        total = report.total_blobs,
        valid = report.valid_blobs,
        corrupted = report.corrupted.len(),
        unrecognized = report.unrecognized.len(),
        "Integrity verification completed"
    );

    Ok(report)
}
