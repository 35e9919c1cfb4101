use crate::error::{AppError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use tracing::info;

/**
 * 压缩单个文件为 `<output_dir>/<文件名>.gz`
 *
 * The original file name is kept in the gzip header so
 * [`decompress_file`] can restore it.
 */
pub async fn compress_file(input: &Path, output_dir: &Path) -> Result<PathBuf> {
    let input = input.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || compress_sync(&input, &output_dir))
        .await
        .map_err(|e| AppError::archive_error(e.to_string(), None))?
}

/**
 * 解压 gzip 文件到 `output_dir`，文件名取自 gzip 头
 */
pub async fn decompress_file(archive: &Path, output_dir: &Path) -> Result<PathBuf> {
    let archive = archive.to_path_buf();
    let output_dir = output_dir.to_path_buf();

    tokio::task::spawn_blocking(move || decompress_sync(&archive, &output_dir))
        .await
        .map_err(|e| AppError::archive_error(e.to_string(), None))?
}

fn compress_sync(input: &Path, output_dir: &Path) -> Result<PathBuf> {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::archive_error("Input has no file name", Some(input.to_path_buf()))
        })?;

    std::fs::create_dir_all(output_dir).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create output directory: {}", e),
            Some(output_dir.to_path_buf()),
        )
    })?;

    let source = File::open(input).map_err(|e| {
        AppError::archive_error(
            format!("Failed to open input file: {}", e),
            Some(input.to_path_buf()),
        )
    })?;

    let output_path = output_dir.join(format!("{}.gz", file_name));
    let output = File::create(&output_path).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create output file: {}", e),
            Some(output_path.clone()),
        )
    })?;

    let mut encoder: GzEncoder<BufWriter<File>> = GzBuilder::new()
        .filename(file_name.as_bytes())
        .write(BufWriter::new(output), Compression::default());

    let bytes = std::io::copy(&mut BufReader::new(source), &mut encoder)
        .and_then(|bytes| {
            let mut writer = encoder.finish()?;
            writer.flush()?;
            Ok(bytes)
        })
        .map_err(|e| {
            AppError::archive_error(
                format!("Failed to write compressed data: {}", e),
                Some(output_path.clone()),
            )
        })?;

    info!(
        input = %input.display(),
        output = %output_path.display(),
        bytes,
        "Compressed file"
    );

    Ok(output_path)
}

fn decompress_sync(archive: &Path, output_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(output_dir).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create output directory: {}", e),
            Some(output_dir.to_path_buf()),
        )
    })?;

    let source = File::open(archive).map_err(|e| {
        AppError::archive_error(
            format!("Failed to open input file: {}", e),
            Some(archive.to_path_buf()),
        )
    })?;

    let mut decoder = GzDecoder::new(BufReader::new(source));
    let original_name = decoder
        .header()
        .and_then(|header| header.filename())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::archive_error(
                "Gzip header does not contain the original file name",
                Some(archive.to_path_buf()),
            )
        })?;

    if !is_plain_file_name(&original_name) {
        return Err(AppError::archive_error(
            format!("Unsafe file name in gzip header: {}", original_name),
            Some(archive.to_path_buf()),
        ));
    }

    let output_path = output_dir.join(&original_name);
    let mut output = BufWriter::new(File::create(&output_path).map_err(|e| {
        AppError::archive_error(
            format!("Failed to create output file: {}", e),
            Some(output_path.clone()),
        )
    })?);

    let bytes = std::io::copy(&mut decoder, &mut output)
        .and_then(|bytes| output.flush().map(|_| bytes))
        .map_err(|e| {
            AppError::archive_error(
                format!("Failed to write decompressed data: {}", e),
                Some(output_path.clone()),
            )
        })?;

    info!(
        archive = %archive.display(),
        output = %output_path.display(),
        bytes,
        "Decompressed file"
    );

    Ok(output_path)
}

/// True when `name` is a single normal path component.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}
