//! 去重扫描集成测试

use content_vault::storage::{ActionKind, SweepOptions};
use content_vault::{AppError, Vault};
use rstest::rstest;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(dir: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

async fn vault_with(temp_dir: &TempDir, max_concurrent_files: usize) -> Vault {
    let base = Vault::open_in_memory(temp_dir.path().join("storage"))
        .await
        .unwrap();
    Vault::with_parts(
        base.content_store().clone(),
        base.ledger().clone(),
        SweepOptions {
            max_concurrent_files,
            walk_buffer: 4,
        },
    )
}

fn remaining_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

#[rstest]
#[case(1)]
#[case(4)]
#[case(32)]
#[tokio::test]
async fn test_survivor_rule(#[case] concurrency: usize) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("pair");
    let a = write(&dir, "a.txt", b"identical");
    let b = write(&dir, "b.txt", b"identical");

    let vault = vault_with(&temp_dir, concurrency).await;
    let report = vault.sweep(&dir).await.unwrap();

    assert_eq!(report.duplicates_removed, 1);
    assert!(a.exists() ^ b.exists(), "exactly one copy must survive");

    let actions = vault.actions().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].kind, ActionKind::Deduplicate);
    let removed = if a.exists() { &b } else { &a };
    assert_eq!(actions[0].filename, removed.to_string_lossy());
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("tree");
    for i in 0..20 {
        write(&dir, &format!("group{}/copy_{}.dat", i % 3, i), format!("content {}", i % 5).as_bytes());
    }

    let vault = vault_with(&temp_dir, 8).await;
    let first = vault.sweep(&dir).await.unwrap();
    assert_eq!(first.files_scanned, 20);
    assert_eq!(first.duplicates_removed, 15);
    let after_first = vault.actions().await.unwrap().len();

    let second = vault.sweep(&dir).await.unwrap();
    assert_eq!(second.files_scanned, 5);
    assert_eq!(second.duplicates_removed, 0);
    assert_eq!(vault.actions().await.unwrap().len(), after_first);
}

#[tokio::test]
async fn test_one_survivor_per_distinct_content() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("mixed");
    for i in 0..40 {
        write(&dir, &format!("d{}/f{}.bin", i % 4, i), format!("payload-{}", i % 7).as_bytes());
    }

    let vault = vault_with(&temp_dir, 16).await;
    vault.sweep(&dir).await.unwrap();

    let remaining = remaining_files(&dir);
    assert_eq!(remaining.len(), 7);
    let contents: HashSet<Vec<u8>> = remaining
        .iter()
        .map(|p| std::fs::read(p).unwrap())
        .collect();
    assert_eq!(contents.len(), 7);
}

#[tokio::test]
async fn test_report_matches_removed_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("r");
    write(&dir, "one.txt", b"12345");
    write(&dir, "two.txt", b"12345");
    write(&dir, "three.txt", b"12345");

    let vault = vault_with(&temp_dir, 2).await;
    let report = vault.sweep(&dir).await.unwrap();

    assert_eq!(report.duplicates_removed, 2);
    assert_eq!(report.bytes_reclaimed, 10);
    for removed in &report.removed {
        assert!(!removed.path.exists());
        assert!(removed.original.exists());
    }
}

#[tokio::test]
async fn test_sweep_does_not_touch_the_vault_store() {
    let temp_dir = TempDir::new().unwrap();
    let vault = vault_with(&temp_dir, 4).await;
    let source = write(temp_dir.path(), "inbox/a.txt", b"keep me");
    vault.store(&source).await.unwrap();

    let report = vault.sweep(&temp_dir.path().join("inbox")).await.unwrap();
    assert_eq!(report.duplicates_removed, 0);
    assert!(source.exists());
    assert!(vault.verify().await.unwrap().is_valid());
}

#[tokio::test]
async fn test_missing_directory_aborts() {
    let temp_dir = TempDir::new().unwrap();
    let vault = vault_with(&temp_dir, 4).await;

    let err = vault
        .sweep(&temp_dir.path().join("does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::WalkAbort { .. }), "got {:?}", err);
    assert!(vault.actions().await.unwrap().is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_file_aborts_sweep() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("locked");
    let locked = write(&dir, "secret.txt", b"hidden");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

    // Root ignores permission bits; nothing to test there
    if std::fs::read(&locked).is_ok() {
        return;
    }

    let vault = vault_with(&temp_dir, 4).await;
    let err = vault.sweep(&dir).await.unwrap_err();
    assert!(matches!(err, AppError::WalkAbort { .. }), "got {:?}", err);
    assert_eq!(err.path(), Some(locked.as_path()));

    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_abort_logs_every_deletion_in_flight() {
    use std::os::unix::fs::PermissionsExt;

    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("crowd");
    for i in 0..300 {
        write(&dir, &format!("f{:04}.bin", i), b"the same payload");
    }
    let locked = write(&dir, "f0150_locked.bin", b"unreadable");
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o000)).unwrap();

    // Root ignores permission bits; nothing to test there
    if std::fs::read(&locked).is_ok() {
        return;
    }

    let vault = vault_with(&temp_dir, 64).await;
    let err = vault.sweep(&dir).await.unwrap_err();
    assert!(matches!(err, AppError::WalkAbort { .. }), "got {:?}", err);
    assert_eq!(err.path(), Some(locked.as_path()));

    let deleted = 301 - remaining_files(&dir).len();
    let logged = vault
        .ledger()
        .count_actions(ActionKind::Deduplicate)
        .await
        .unwrap();
    assert_eq!(deleted as i64, logged, "every deleted file needs a deduplicate action");
    for action in vault.actions().await.unwrap() {
        assert!(!Path::new(&action.filename).exists());
    }

    // Deletions made before the abort stay; a rerun finishes the rest
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o644)).unwrap();
    let report = vault.sweep(&dir).await.unwrap();
    assert_eq!(report.files_scanned, 301 - deleted);
    assert_eq!(remaining_files(&dir).len(), 2);
    assert!(locked.exists());
    assert_eq!(
        vault
            .ledger()
            .count_actions(ActionKind::Deduplicate)
            .await
            .unwrap(),
        299
    );
}
