//! Digest Engine
//!
//! SHA-256 content identity for whole files. A digest depends only on the
//! bytes of a file, never on its name, location or timestamps. Files are
//! hashed in fixed-size chunks so memory stays bounded regardless of size.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

/// Read buffer used while hashing (64KB).
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Length of a digest in bytes.
pub const DIGEST_LEN: usize = 32;

/// SHA-256 digest of a byte sequence.
///
/// Rendered as 64 lowercase hex characters in every external form
/// (storage keys, ledger rows, JSON).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentDigest([u8; DIGEST_LEN]);

impl ContentDigest {
    pub fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Digest of an in-memory byte slice.
    ///
    /// ```
    /// use content_vault::storage::ContentDigest;
    ///
    /// let digest = ContentDigest::of_bytes(b"hello world");
    /// assert_eq!(digest.to_hex().len(), 64);
    /// ```
    pub fn of_bytes(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

impl FromStr for ContentDigest {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| {
            AppError::validation_error(format!("Invalid content digest '{}': {}", s, e))
        })?;
        Ok(Self(bytes))
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_hex()
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Incremental hasher shared by file hashing and the blob writer, which
/// re-hashes bytes while copying them.
#[derive(Default)]
pub struct DigestBuilder {
    hasher: Sha256,
    bytes: u64,
}

impl DigestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finish(self) -> ContentDigest {
        ContentDigest(self.hasher.finalize().into())
    }
}

/// Digest an arbitrary async byte stream until EOF.
///
/// Returns the digest and the number of bytes consumed. The stream must be
/// read to the end; any read error is returned as-is to the caller.
pub async fn digest_reader<R>(reader: R) -> std::io::Result<(ContentDigest, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::with_capacity(HASH_BUFFER_SIZE, reader);
    let mut builder = DigestBuilder::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break; // EOF
        }
        builder.update(&buffer[..bytes_read]);
    }

    let size = builder.len();
    Ok((builder.finish(), size))
}

/// Digest the file at `file_path`.
///
/// # Errors
///
/// `AppError::Hash` when the file cannot be opened or read to the end.
pub async fn digest_file(file_path: &Path) -> Result<ContentDigest> {
    digest_file_with_size(file_path).await.map(|(digest, _)| digest)
}

/// Like [`digest_file`], also returning the number of bytes hashed.
pub async fn digest_file_with_size(file_path: &Path) -> Result<(ContentDigest, u64)> {
    let file = fs::File::open(file_path).await.map_err(|e| {
        AppError::hash_error(format!("Failed to open file for hashing: {}", e), file_path)
    })?;

    digest_reader(file).await.map_err(|e| {
        AppError::hash_error(format!("Failed to read file for hashing: {}", e), file_path)
    })
}
