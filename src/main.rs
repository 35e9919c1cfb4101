//! Content Vault command line
//!
//! ## Usage
//!
//! ```bash
//! # Store a file (blob written once per content, version appended per name)
//! content-vault store ./report.pdf
//!
//! # Remove duplicate-content files below a directory
//! content-vault dedup ./downloads
//!
//! # Version history of a stored name
//! content-vault history report.pdf --json
//!
//! # Compression and backups
//! content-vault compress ./big.log --output-dir ./compressed
//! content-vault backup ./documents ./documents.tar.gz
//! content-vault restore ./documents.tar.gz ./restored
//! ```

use clap::{Parser, Subcommand};
use content_vault::archive;
use content_vault::storage::digest_file;
use content_vault::{logging, Vault, VaultConfig};
use miette::{miette, IntoDiagnostic, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "content-vault", version)]
#[command(about = "Content-addressed file vault with version history and duplicate sweeps")]
struct Args {
    /// Path to config file (TOML)
    #[arg(short, long, env = "CONTENT_VAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Blob storage directory
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// SQLite ledger file
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store files in the vault
    Store {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Delete files whose content already appears elsewhere under DIR
    Dedup { dir: PathBuf },
    /// Print the SHA-256 digest of a file
    Digest { file: PathBuf },
    /// Show the version history of a stored file name
    History {
        filename: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Re-hash every stored blob
    Verify,
    /// Gzip a file, keeping its name in the header
    Compress {
        file: PathBuf,
        /// Defaults to `storage.compressed_dir`
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Restore a gzip file under its original name
    Decompress { file: PathBuf, output_dir: PathBuf },
    /// Write a tar.gz backup of a directory
    Backup { dir: PathBuf, output: PathBuf },
    /// Extract a tar.gz backup
    Restore { archive: PathBuf, target_dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = VaultConfig::load(args.config.as_deref())?;
    if let Some(root) = args.storage_root {
        config.storage.root = root;
    }
    if let Some(database) = args.database {
        config.storage.database = database;
    }

    let _log_guard = logging::init(&config.logging)?;
    info!(version = env!("CARGO_PKG_VERSION"), "content-vault starting");

    run(args.command, &config).await
}

async fn run(command: Command, config: &VaultConfig) -> Result<()> {
    match command {
        Command::Store { files } => {
            let vault = Vault::open(config).await?;
            for file in files {
                let outcome = vault.store(&file).await?;
                println!(
                    "{} {} -> {} (version {})",
                    outcome.action(),
                    outcome.version.filename,
                    outcome.storage_key,
                    outcome.version.version
                );
            }
            vault.close().await;
        }
        Command::Dedup { dir } => {
            let vault = Vault::open(config).await?;
            let report = vault.sweep(&dir).await?;
            for removed in &report.removed {
                println!(
                    "removed {} (same as {})",
                    removed.path.display(),
                    removed.original.display()
                );
            }
            println!(
                "scanned {} files, removed {} duplicates, reclaimed {} bytes",
                report.files_scanned, report.duplicates_removed, report.bytes_reclaimed
            );
            vault.close().await;
        }
        Command::Digest { file } => {
            let digest = digest_file(&file).await?;
            println!("{}  {}", digest, file.display());
        }
        Command::History { filename, json } => {
            let vault = Vault::open(config).await?;
            let history = vault.history(&filename).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&history).into_diagnostic()?
                );
            } else if history.is_empty() {
                println!("no versions recorded for {}", filename);
            } else {
                for record in &history {
                    println!(
                        "v{:<4} {}  {}",
                        record.version,
                        record.digest,
                        record.timestamp.to_rfc3339()
                    );
                }
            }
            vault.close().await;
        }
        Command::Verify => {
            let vault = Vault::open(config).await?;
            let report = vault.verify().await?;
            vault.close().await;
            for name in &report.corrupted {
                println!("corrupted {}", name);
            }
            for name in &report.unrecognized {
                println!("unrecognized {}", name);
            }
            println!(
                "{} of {} blobs valid",
                report.valid_blobs, report.total_blobs
            );
            if !report.is_valid() {
                return Err(miette!(
                    code = "app::integrity_error",
                    "{} corrupted blob(s) in {}",
                    report.corrupted.len(),
                    config.storage.root.display()
                ));
            }
        }
        Command::Compress { file, output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.storage.compressed_dir.clone());
            let output = archive::compress_file(&file, &output_dir).await?;
            println!("compressed {} -> {}", file.display(), output.display());
        }
        Command::Decompress { file, output_dir } => {
            let output = archive::decompress_file(&file, &output_dir).await?;
            println!("decompressed {} -> {}", file.display(), output.display());
        }
        Command::Backup { dir, output } => {
            let summary = archive::backup(&dir, &output).await?;
            println!(
                "backed up {} files ({} bytes) to {}",
                summary.files_archived,
                summary.total_size,
                summary.output.display()
            );
        }
        Command::Restore {
            archive: archive_path,
            target_dir,
        } => {
            let restored = archive::restore(&archive_path, &target_dir).await?;
            println!(
                "restored {} files from {} to {}",
                restored,
                archive_path.display(),
                target_dir.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_history_json() {
        let args = Args::try_parse_from(["content-vault", "history", "report.pdf", "--json"]).unwrap();
        match args.command {
            Command::History { filename, json } => {
                assert_eq!(filename, "report.pdf");
                assert!(json);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_global_overrides_before_command() {
        let args = Args::try_parse_from([
            "content-vault",
            "--storage-root",
            "/tmp/blobs",
            "--database",
            "/tmp/ledger.db",
            "dedup",
            "/tmp/downloads",
        ])
        .unwrap();
        assert_eq!(args.storage_root, Some(PathBuf::from("/tmp/blobs")));
        assert_eq!(args.database, Some(PathBuf::from("/tmp/ledger.db")));
        assert!(matches!(args.command, Command::Dedup { .. }));
    }

    #[test]
    fn test_store_requires_a_file() {
        assert!(Args::try_parse_from(["content-vault", "store"]).is_err());
    }
}
