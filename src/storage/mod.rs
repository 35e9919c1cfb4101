//! Content-Addressable Storage (CAS) Module
//!
//! - `digest`: SHA-256 identity of file content
//! - `cas`: flat blob store keyed by digest plus extension
//! - `ledger`: SQLite version history and action log
//! - `sweep`: concurrent duplicate removal over a directory tree
//! - `integrity`: re-hash stored blobs against their keys
//!
//! ## Layout
//!
//! ```text
//! file_manager.db                # SQLite ledger (versions, actions)
//! storage/                       # Blobs (flat)
//! ├── 3a7bd3e2...c1f4.pdf        # SHA-256 of the content + original extension
//! └── 9f86d081...0a08
//! ```

pub mod cas;
pub mod digest;
pub mod integrity;
pub mod ledger;
pub mod sweep;


pub use cas::{original_extension, BlobWrite, ContentStore, StorageKey};
pub use digest::{digest_file, digest_reader, ContentDigest, DigestBuilder};
pub use integrity::{verify_blob, verify_storage, IntegrityReport};
pub use ledger::{ActionKind, ActionRecord, Ledger, VersionRecord};
pub use sweep::{Claim, DigestIndex, DuplicateSweep, RemovedDuplicate, SweepOptions, SweepReport};
