//! Content-Addressable Blob Storage
//!
//! Blobs live flat under a single storage root and are named by their
//! storage key, the SHA-256 digest of the content followed by the original
//! file extension:
//!
//! ```text
//! storage/
//!   e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.pdf
//!   9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08.txt
//! ```
//!
//! A key is written at most once. New blobs are staged under a `.tmp.<uuid>`
//! name and published with a no-clobber hard link, so a blob is never
//! visible half-written and two concurrent writers of the same key cannot
//! both create it.

use crate::error::{AppError, Result};
use crate::storage::digest::{ContentDigest, DigestBuilder, HASH_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Prefix of staging files inside the storage root.
pub const TEMP_PREFIX: &str = ".tmp.";

/// Name of a blob inside the storage root: `<hex digest><extension>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub digest: ContentDigest,
    /// Original extension including the leading dot, or empty.
    pub extension: String,
}

impl StorageKey {
    pub fn new(digest: ContentDigest, extension: impl Into<String>) -> Self {
        Self {
            digest,
            extension: extension.into(),
        }
    }

    /// Key for `source` given its digest. The extension is taken from the
    /// source's file name (`report.pdf` -> `.pdf`, `Makefile` -> ``).
    pub fn for_source(digest: ContentDigest, source: &Path) -> Self {
        Self::new(digest, original_extension(source))
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.digest, self.extension)
    }

    /// Parse a blob file name back into a key.
    ///
    /// Returns `None` for names that do not start with 64 hex characters or
    /// whose remainder is not empty or a `.ext` suffix.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let hex_len = 2 * crate::storage::digest::DIGEST_LEN;
        if name.len() < hex_len || !name.is_char_boundary(hex_len) {
            return None;
        }
        let (hex_part, extension) = name.split_at(hex_len);
        if !extension.is_empty() && (!extension.starts_with('.') || extension.len() < 2) {
            return None;
        }
        let digest = hex_part.parse().ok()?;
        Some(Self::new(digest, extension))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.digest, self.extension)
    }
}

/// Extension of `path` including the leading dot, or an empty string.
pub fn original_extension(path: &Path) -> String {
    path.extension()
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Result of asking the store to hold a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobWrite {
    /// This call created the blob.
    Created { bytes: u64 },
    /// A blob with this key already existed (or a concurrent writer won).
    AlreadyPresent,
}

impl BlobWrite {
    pub fn was_new(&self) -> bool {
        matches!(self, BlobWrite::Created { .. })
    }
}

/// Blob storage under a single root directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Create a store rooted at `root`. The directory is created lazily on
    /// the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for a key.
    pub fn blob_path(&self, key: &StorageKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Whether a blob exists for `key`.
    pub async fn contains(&self, key: &StorageKey) -> Result<bool> {
        let path = self.blob_path(key);
        fs::try_exists(&path).await.map_err(|e| {
            AppError::io_error(format!("Failed to check blob existence: {}", e), path)
        })
    }

    /// Copy `source` into the store under `key` unless the key is present.
    ///
    /// `key.digest` must be the digest of `source`. The bytes are re-hashed
    /// while copying; if they no longer match (the source changed after it
    /// was digested) nothing is published and a hash error is returned.
    ///
    /// # Errors
    ///
    /// - `IoDetailed` if the root cannot be created or the blob cannot be written
    /// - `Hash` if the source cannot be read or changed mid-copy
    pub async fn put_file(&self, source: &Path, key: &StorageKey) -> Result<BlobWrite> {
        let blob_path = self.blob_path(key);

        if self.contains(key).await? {
            debug!(
                key = %key,
                source = %source.display(),
                "Blob already exists, skipping write (deduplication)"
            );
            return Ok(BlobWrite::AlreadyPresent);
        }

        fs::create_dir_all(&self.root).await.map_err(|e| {
            AppError::io_error(
                format!("Failed to create storage directory: {}", e),
                self.root.clone(),
            )
        })?;

        let temp_path = self
            .root
            .join(format!("{}{}", TEMP_PREFIX, Uuid::new_v4().simple()));
        // Staging file goes away on every exit path, published or not
        let _cleanup = scopeguard::guard(temp_path.clone(), |path| {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove staging file");
                }
            }
        });

        let (copied_digest, bytes) = copy_and_digest(source, &temp_path).await?;
        if copied_digest != key.digest {
            warn!(
                expected = %key.digest,
                actual = %copied_digest,
                source = %source.display(),
                "Source changed while it was being stored"
            );
            return Err(AppError::hash_error(
                format!(
                    "Source content changed during store (expected {}, copied {})",
                    key.digest, copied_digest
                ),
                source,
            ));
        }

        match publish(&temp_path, &blob_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(
                    key = %key,
                    source = %source.display(),
                    "Blob created concurrently by another writer, skipping"
                );
                return Ok(BlobWrite::AlreadyPresent);
            }
            Err(e) => {
                return Err(AppError::io_error(
                    format!("Failed to publish blob: {}", e),
                    blob_path,
                ));
            }
        }

        info!(
            key = %key,
            size = bytes,
            path = %blob_path.display(),
            source = %source.display(),
            "Stored blob"
        );

        Ok(BlobWrite::Created { bytes })
    }

    /// Read a whole blob into memory.
    pub async fn read_blob(&self, key: &StorageKey) -> Result<Vec<u8>> {
        let path = self.blob_path(key);
        match fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::not_found(format!(
                "Blob not found: {} at path: {}",
                key,
                path.display()
            ))),
            Err(e) => Err(AppError::io_error(
                format!("Failed to read blob {}: {}", key, e),
                path,
            )),
        }
    }
}

/// Stream `source` into a freshly created `target`, hashing as it goes.
async fn copy_and_digest(source: &Path, target: &Path) -> Result<(ContentDigest, u64)> {
    let mut src_file = fs::File::open(source).await.map_err(|e| {
        AppError::hash_error(format!("Failed to open source file: {}", e), source)
    })?;

    let mut dst_file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
        .map_err(|e| AppError::io_error(format!("Failed to create staging file: {}", e), target))?;

    let mut builder = DigestBuilder::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = src_file.read(&mut buffer).await.map_err(|e| {
            AppError::hash_error(format!("Failed to read from source file: {}", e), source)
        })?;

        if bytes_read == 0 {
            break; // EOF
        }

        builder.update(&buffer[..bytes_read]);
        dst_file
            .write_all(&buffer[..bytes_read])
            .await
            .map_err(|e| {
                AppError::io_error(format!("Failed to write staging file: {}", e), target)
            })?;
    }

    dst_file
        .flush()
        .await
        .map_err(|e| AppError::io_error(format!("Failed to flush staging file: {}", e), target))?;
    dst_file
        .sync_all()
        .await
        .map_err(|e| AppError::io_error(format!("Failed to sync staging file: {}", e), target))?;

    let bytes = builder.len();
    Ok((builder.finish(), bytes))
}

/// Atomically expose `temp` as `final_path` without replacing an existing
/// blob. Fails with `AlreadyExists` if `final_path` is taken.
async fn publish(temp: &Path, final_path: &Path) -> std::io::Result<()> {
    match fs::hard_link(temp, final_path).await {
        Err(e) if lacks_hard_links(&e) => {
            debug!(error = %e, "Hard links unavailable, publishing by rename");
            publish_by_rename(temp, final_path).await
        }
        other => other,
    }
}

/// vfat and some FUSE mounts reject `link(2)` with `EPERM` rather than
/// `EOPNOTSUPP`.
fn lacks_hard_links(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::Unsupported | ErrorKind::PermissionDenied
    )
}

/// Rename is still atomic but may replace a blob with identical content.
async fn publish_by_rename(temp: &Path, final_path: &Path) -> std::io::Result<()> {
    if fs::try_exists(final_path).await? {
        return Err(std::io::Error::new(ErrorKind::AlreadyExists, "blob exists"));
    }
    fs::rename(temp, final_path).await
}
