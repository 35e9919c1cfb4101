//! TAR.GZ 备份与恢复
//!
//! Backups hold every regular file of a directory tree, stored under its
//! path relative to the backed-up directory.

use crate::error::{AppError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType};
use tracing::{debug, info};
use walkdir::WalkDir;

/// What a backup wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSummary {
    pub output: PathBuf,
    pub files_archived: usize,
    pub total_size: u64,
}

/**
 * 备份目录为 gzip 压缩的 tar 归档
 */
pub async fn backup(directory: &Path, output: &Path) -> Result<BackupSummary> {
    let directory = directory.to_path_buf();
    let output = output.to_path_buf();

    tokio::task::spawn_blocking(move || backup_sync(&directory, &output))
        .await
        .map_err(|e| AppError::archive_error(e.to_string(), None))?
}

/**
 * 恢复归档到目标目录，返回恢复的文件数
 */
pub async fn restore(archive: &Path, target_dir: &Path) -> Result<usize> {
    let archive = archive.to_path_buf();
    let target_dir = target_dir.to_path_buf();

    tokio::task::spawn_blocking(move || restore_sync(&archive, &target_dir))
        .await
        .map_err(|e| AppError::archive_error(e.to_string(), None))?
}

fn backup_sync(directory: &Path, output: &Path) -> Result<BackupSummary> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::archive_error(
                format!("Failed to create output directory: {}", e),
                Some(parent.to_path_buf()),
            )
        })?;
    }

    let file = File::create(output).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create output file: {}", e),
            Some(output.to_path_buf()),
        )
    })?;
    // The archive itself must not end up inside the backup
    let output_canonical = std::fs::canonicalize(output).ok();

    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);
    let mut summary = BackupSummary {
        output: output.to_path_buf(),
        files_archived: 0,
        total_size: 0,
    };

    for entry in WalkDir::new(directory).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(directory).to_path_buf();
            AppError::archive_error(format!("Error accessing file: {}", e), Some(path))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if output_canonical.is_some() && std::fs::canonicalize(path).ok() == output_canonical {
            debug!(path = %path.display(), "Skipping the backup archive itself");
            continue;
        }

        let relative = path.strip_prefix(directory).map_err(|e| {
            AppError::archive_error(
                format!("Failed to calculate relative path: {}", e),
                Some(path.to_path_buf()),
            )
        })?;

        builder.append_path_with_name(path, relative).map_err(|e| {
            AppError::archive_error(
                format!("Failed to write file to archive: {}", e),
                Some(path.to_path_buf()),
            )
        })?;

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        summary.files_archived += 1;
        summary.total_size += size;
        debug!(path = %relative.display(), size, "Archived file");
    }

    let finish = |e: std::io::Error| {
        AppError::archive_error(
            format!("Failed to finish archive: {}", e),
            Some(output.to_path_buf()),
        )
    };
    let encoder = builder.into_inner().map_err(finish)?;
    let mut writer = encoder.finish().map_err(finish)?;
    writer.flush().map_err(finish)?;

    info!(
        directory = %directory.display(),
        output = %output.display(),
        files = summary.files_archived,
        total_size = summary.total_size,
        "Backup completed"
    );

    Ok(summary)
}

fn restore_sync(archive_path: &Path, target_dir: &Path) -> Result<usize> {
    let file = File::open(archive_path).map_err(|e| {
        AppError::archive_error(
            format!("Failed to open archive file: {}", e),
            Some(archive_path.to_path_buf()),
        )
    })?;

    std::fs::create_dir_all(target_dir).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create target directory: {}", e),
            Some(target_dir.to_path_buf()),
        )
    })?;

    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive.entries().map_err(|e| {
        AppError::archive_error(
            format!("Failed to read archive: {}", e),
            Some(archive_path.to_path_buf()),
        )
    })?;

    let mut restored = 0;
    for entry in entries {
        let mut entry = entry.map_err(|e| {
            AppError::archive_error(
                format!("Failed to read tar header: {}", e),
                Some(archive_path.to_path_buf()),
            )
        })?;

        let entry_path = entry
            .path()
            .map_err(|e| {
                AppError::archive_error(
                    format!("Invalid tar entry path: {}", e),
                    Some(archive_path.to_path_buf()),
                )
            })?
            .into_owned();

        if !is_contained(&entry_path) {
            return Err(AppError::archive_error(
                format!("Unsafe path detected: {}", entry_path.display()),
                Some(archive_path.to_path_buf()),
            ));
        }
        let out_path = target_dir.join(&entry_path);

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&out_path).map_err(|e| {
                    AppError::archive_error(
                        format!("Failed to create directory: {}", e),
                        Some(out_path.clone()),
                    )
                })?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = out_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        AppError::archive_error(
                            format!("Failed to create directory for file: {}", e),
                            Some(parent.to_path_buf()),
                        )
                    })?;
                }
                entry.unpack(&out_path).map_err(|e| {
                    AppError::archive_error(
                        format!("Failed to unpack entry: {}", e),
                        Some(out_path.clone()),
                    )
                })?;
                restored += 1;
            }
            other => {
                return Err(AppError::archive_error(
                    format!(
                        "Unsupported entry type {:?} for {}",
                        other,
                        entry_path.display()
                    ),
                    Some(archive_path.to_path_buf()),
                ));
            }
        }
    }

    info!(
        archive = %archive_path.display(),
        target = %target_dir.display(),
        files = restored,
        "Restore completed"
    );

    Ok(restored)
}

/// Entry paths may only descend into the target directory.
fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
