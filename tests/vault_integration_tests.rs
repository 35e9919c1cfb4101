//! Vault 端到端测试
//!
//! Drives the public `Vault` API against a file-backed ledger.

use content_vault::storage::ActionKind;
use content_vault::{AppError, ContentDigest, Vault, VaultConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn config_in(temp_dir: &TempDir) -> VaultConfig {
    let mut config = VaultConfig::default();
    config.storage.root = temp_dir.path().join("storage");
    config.storage.database = temp_dir.path().join("file_manager.db");
    config
}

fn write(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

fn blob_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_report_scenario_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let vault = Vault::open(&config_in(&temp_dir)).await.unwrap();
    let work = temp_dir.path().join("work");

    let report = write(&work, "report.pdf", b"draft one");
    let d1 = ContentDigest::of_bytes(b"draft one");
    let first = vault.store(&report).await.unwrap();
    assert_eq!(first.storage_key.to_string(), format!("{}.pdf", d1));
    assert_eq!(first.version.version, 1);

    let copy = write(&work, "report_v2.pdf", b"draft one");
    let second = vault.store(&copy).await.unwrap();
    assert_eq!(second.storage_key, first.storage_key);
    assert!(!second.was_new);
    assert_eq!(second.version.filename, "report_v2.pdf");
    assert_eq!(second.version.version, 1);

    std::fs::write(&report, b"draft two").unwrap();
    let d2 = ContentDigest::of_bytes(b"draft two");
    let third = vault.store(&report).await.unwrap();
    assert_eq!(third.storage_key.to_string(), format!("{}.pdf", d2));
    assert_eq!(third.version.version, 2);

    let mut expected = vec![format!("{}.pdf", d1), format!("{}.pdf", d2)];
    expected.sort();
    assert_eq!(blob_names(vault.store_root()), expected);

    let history = vault.history("report.pdf").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].digest, d1);
    assert_eq!(history[1].digest, d2);

    let kinds: Vec<_> = vault
        .actions()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![ActionKind::Store, ActionKind::StoreDuplicate, ActionKind::Store]
    );
}

#[tokio::test]
async fn test_idempotent_store() {
    let temp_dir = TempDir::new().unwrap();
    let vault = Vault::open(&config_in(&temp_dir)).await.unwrap();
    let path = write(temp_dir.path(), "data.csv", b"a,b,c\n1,2,3\n");

    let first = vault.store(&path).await.unwrap();
    let second = vault.store(&path).await.unwrap();

    assert_eq!(first.storage_key, second.storage_key);
    assert_eq!(blob_names(vault.store_root()).len(), 1);

    let versions: Vec<_> = vault
        .history("data.csv")
        .await
        .unwrap()
        .iter()
        .map(|r| r.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);

    let actions = vault.actions().await.unwrap();
    assert_eq!(actions.len(), 2);
    assert_eq!(actions[0].kind, ActionKind::Store);
    assert_eq!(actions[1].kind, ActionKind::StoreDuplicate);
}

#[tokio::test]
async fn test_history_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = config_in(&temp_dir);
    let path = write(temp_dir.path(), "notes.txt", b"v1");

    {
        let vault = Vault::open(&config).await.unwrap();
        vault.store(&path).await.unwrap();
        vault.close().await;
    }

    std::fs::write(&path, b"v2").unwrap();
    let vault = Vault::open(&config).await.unwrap();
    let outcome = vault.store(&path).await.unwrap();
    assert_eq!(outcome.version.version, 2);
    assert_eq!(vault.history("notes.txt").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_extensionless_and_dotfile_keys() {
    let temp_dir = TempDir::new().unwrap();
    let vault = Vault::open(&config_in(&temp_dir)).await.unwrap();

    let makefile = vault
        .store(&write(temp_dir.path(), "Makefile", b"all:"))
        .await
        .unwrap();
    assert_eq!(makefile.storage_key.to_string(), makefile.digest.to_hex());

    let bashrc = vault
        .store(&write(temp_dir.path(), ".bashrc", b"export A=1"))
        .await
        .unwrap();
    assert_eq!(bashrc.storage_key.extension, "");
    assert_eq!(bashrc.version.filename, ".bashrc");
}

#[tokio::test]
async fn test_unreadable_path_leaves_no_records() {
    let temp_dir = TempDir::new().unwrap();
    let vault = Vault::open(&config_in(&temp_dir)).await.unwrap();

    let err = vault
        .store(&temp_dir.path().join("ghost.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Hash { .. }));
    assert!(vault.actions().await.unwrap().is_empty());
    assert!(vault.history("ghost.txt").await.unwrap().is_empty());
}
