//! 压缩与归档
//!
//! - `gz`: single-file gzip compression keeping the original name
//! - `tar`: tar.gz backup and restore of a directory tree

pub mod gz;
pub mod tar;

pub use self::gz::{compress_file, decompress_file};
pub use self::tar::{backup, restore, BackupSummary};
