//! Vault facade
//!
//! Ties the blob store, the ledger and the duplicate sweep together behind
//! the operations the binary exposes.

use crate::config::VaultConfig;
use crate::error::{AppError, Result};
use crate::storage::cas::{BlobWrite, ContentStore, StorageKey};
use crate::storage::digest::{digest_file, ContentDigest};
use crate::storage::integrity::{self, IntegrityReport};
use crate::storage::ledger::{ActionKind, ActionRecord, Ledger, VersionRecord};
use crate::storage::sweep::{DuplicateSweep, SweepOptions, SweepReport};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Result of storing one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOutcome {
    pub storage_key: StorageKey,
    pub digest: ContentDigest,
    /// Whether this call wrote a new blob
    pub was_new: bool,
    /// The version appended for the file's name
    pub version: VersionRecord,
}

impl StoreOutcome {
    pub fn action(&self) -> ActionKind {
        if self.was_new {
            ActionKind::Store
        } else {
            ActionKind::StoreDuplicate
        }
    }
}

/// Content store plus version ledger.
#[derive(Debug, Clone)]
pub struct Vault {
    store: ContentStore,
    ledger: Ledger,
    sweep_options: SweepOptions,
}

impl Vault {
    /// Open the vault described by `config`.
    pub async fn open(config: &VaultConfig) -> Result<Self> {
        let ledger = Ledger::open(&config.storage.database).await?;
        Ok(Self::with_parts(
            ContentStore::new(&config.storage.root),
            ledger,
            SweepOptions::from(&config.sweep),
        ))
    }

    /// Vault with blobs under `root` and an in-memory ledger.
    pub async fn open_in_memory(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_parts(
            ContentStore::new(root),
            Ledger::open_in_memory().await?,
            SweepOptions::default(),
        ))
    }

    pub fn with_parts(store: ContentStore, ledger: Ledger, sweep_options: SweepOptions) -> Self {
        Self {
            store,
            ledger,
            sweep_options,
        }
    }

    pub fn store_root(&self) -> &Path {
        self.store.root()
    }

    pub fn content_store(&self) -> &ContentStore {
        &self.store
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Store the file at `path`.
    ///
    /// The blob is written only if its key is new. Either way one action
    /// (`store` or `store_duplicate`) and the next version for the file's
    /// name are appended in a single transaction. Version history is kept
    /// per file name, so identical content under a new name starts at
    /// version 1.
    ///
    /// # Errors
    ///
    /// - `Validation` if `path` is not a regular file
    /// - `Hash` if it cannot be read
    /// - `IoDetailed` if the blob cannot be written
    /// - `Persistence` if the ledger append fails (the blob stays in place)
    pub async fn store(&self, path: &Path) -> Result<StoreOutcome> {
        let filename = logical_filename(path)?;

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            AppError::hash_error(format!("Failed to read file metadata: {}", e), path)
        })?;
        if !metadata.is_file() {
            return Err(AppError::validation_error(format!(
                "Not a regular file: {}",
                path.display()
            )));
        }

        let digest = digest_file(path).await?;
        let storage_key = StorageKey::for_source(digest, path);
        let write = self.store.put_file(path, &storage_key).await?;
        let was_new = matches!(write, BlobWrite::Created { .. });
        let kind = if was_new {
            ActionKind::Store
        } else {
            ActionKind::StoreDuplicate
        };

        let version = self
            .ledger
            .record_store(kind, &filename, &storage_key.file_name(), &digest)
            .await?;

        info!(
            path = %path.display(),
            filename = %filename,
            key = %storage_key,
            version = version.version,
            action = %kind,
            "Stored file"
        );

        Ok(StoreOutcome {
            storage_key,
            digest,
            was_new,
            version,
        })
    }

    /// Delete duplicate-content files under `dir`.
    pub async fn sweep(&self, dir: &Path) -> Result<SweepReport> {
        DuplicateSweep::new(self.ledger.clone(), self.sweep_options)
            .run(dir)
            .await
    }

    /// Digest of the file at `path`. Nothing is stored or logged.
    pub async fn digest(&self, path: &Path) -> Result<ContentDigest> {
        digest_file(path).await
    }

    /// Versions recorded for `filename`, oldest first.
    pub async fn history(&self, filename: &str) -> Result<Vec<VersionRecord>> {
        self.ledger.history(filename).await
    }

    /// All actions in the order they were recorded.
    pub async fn actions(&self) -> Result<Vec<ActionRecord>> {
        self.ledger.actions().await
    }

    /// Re-hash every blob in the store.
    pub async fn verify(&self) -> Result<IntegrityReport> {
        integrity::verify_storage(&self.store).await
    }

    pub async fn close(&self) {
        self.ledger.close().await;
    }
}

/// Ledger key for a stored file: its final path component.
pub fn logical_filename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::validation_error(format!("Path has no file name: {}", path.display()))
        })
}
