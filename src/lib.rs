//! Content Vault
//!
//! A content-addressed file store: files are kept once per distinct content
//! (plus extension), every store appends to a per-filename version history,
//! and a concurrent sweep removes duplicate-content files from a directory
//! tree.

pub mod archive;
pub mod config;
pub mod error;
pub mod logging;
pub mod storage;
pub mod vault;

pub use crate::config::VaultConfig;
pub use crate::error::{AppError, Result};
pub use crate::storage::{ContentDigest, StorageKey};
pub use crate::vault::{StoreOutcome, Vault};
