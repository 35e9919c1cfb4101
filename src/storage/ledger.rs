//! SQLite Version Ledger and Action Log
//!
//! Two append-only tables kept side by side in one database:
//!
//! - `versions`: per-filename history `(filename, version, digest, recorded_at)`
//! - `actions`: audit trail of store / store_duplicate / deduplicate operations
//!
//! Rows are never updated or deleted. Version numbers start at 1 for each
//! filename and grow by exactly one per store. The next number is computed
//! inside the INSERT itself, so concurrent stores of one filename are
//! serialized by SQLite's write lock and can never observe the same value.
//! A `UNIQUE(filename, version)` constraint backs this up.

use crate::error::{AppError, Result};
use crate::storage::digest::ContentDigest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Kind of operation recorded in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A new blob was written.
    Store,
    /// The content was already stored; only history was appended.
    StoreDuplicate,
    /// A sweep deleted a duplicate file.
    Deduplicate,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Store => "store",
            ActionKind::StoreDuplicate => "store_duplicate",
            ActionKind::Deduplicate => "deduplicate",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "store" => Ok(ActionKind::Store),
            "store_duplicate" => Ok(ActionKind::StoreDuplicate),
            "deduplicate" => Ok(ActionKind::Deduplicate),
            other => Err(AppError::persistence_error(format!(
                "Unknown action type in ledger: {}",
                other
            ))),
        }
    }
}

/// One entry of a filename's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub filename: String,
    pub version: i64,
    pub digest: ContentDigest,
    pub timestamp: DateTime<Utc>,
}

/// One entry of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub kind: ActionKind,
    pub filename: String,
    /// Storage key the action refers to; empty for deduplicate actions.
    pub storage_key: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ledger of versions and actions.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open (or create) the ledger database at `db_path`.
    ///
    /// The parent directory is created if needed, WAL journaling is enabled
    /// and both tables are created if absent.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::io_error(
                    format!("Failed to create database directory: {}", e),
                    parent,
                )
            })?;
        }

        info!(path = %db_path.display(), "Opening ledger");

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::persistence_error(format!("Failed to connect to database: {}", e))
            })?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory ledger. Everything is lost on drop.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::persistence_error(format!("Invalid database URL: {}", e)))?;

        // One pinned connection: each in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::persistence_error(format!("Failed to open in-memory database: {}", e))
            })?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action_type TEXT NOT NULL,
                filename TEXT NOT NULL,
                storage_key TEXT NOT NULL,
                recorded_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| AppError::persistence_error(format!("Failed to create actions table: {}", e)))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                filename TEXT NOT NULL,
                version INTEGER NOT NULL,
                digest TEXT NOT NULL,
                recorded_at INTEGER NOT NULL,
                UNIQUE (filename, version)
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| {
            AppError::persistence_error(format!("Failed to create versions table: {}", e))
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_actions_type ON actions(action_type)")
            .execute(pool)
            .await
            .map_err(|e| AppError::persistence_error(format!("Failed to create index: {}", e)))?;

        debug!("Ledger schema initialized");
        Ok(())
    }

    /// Append the action and the next version for one store call, atomically.
    ///
    /// Returns the version record that was written.
    pub async fn record_store(
        &self,
        kind: ActionKind,
        filename: &str,
        storage_key: &str,
        digest: &ContentDigest,
    ) -> Result<VersionRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| {
            AppError::persistence_error(format!("Failed to begin transaction: {}", e))
        })?;

        // The action insert comes first so the transaction holds the write
        // lock before the version number is read
        insert_action(&mut *tx, kind, filename, storage_key, now).await?;
        let version = insert_next_version(&mut *tx, filename, digest, now).await?;

        tx.commit().await.map_err(|e| {
            AppError::persistence_error(format!("Failed to commit transaction: {}", e))
        })?;

        debug!(
            filename = %filename,
            version = version,
            action = %kind,
            hash = %digest,
            "Recorded store"
        );

        Ok(VersionRecord {
            filename: filename.to_string(),
            version,
            digest: *digest,
            timestamp: truncate_to_millis(now),
        })
    }

    /// Append a version row for `filename` pointing at `digest`.
    pub async fn append_version(
        &self,
        filename: &str,
        digest: &ContentDigest,
    ) -> Result<VersionRecord> {
        let now = Utc::now();
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::persistence_error(format!("Failed to acquire connection: {}", e))
        })?;
        let version = insert_next_version(&mut *conn, filename, digest, now).await?;

        Ok(VersionRecord {
            filename: filename.to_string(),
            version,
            digest: *digest,
            timestamp: truncate_to_millis(now),
        })
    }

    /// Append one action to the audit trail.
    pub async fn append_action(
        &self,
        kind: ActionKind,
        filename: &str,
        storage_key: &str,
    ) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            AppError::persistence_error(format!("Failed to acquire connection: {}", e))
        })?;
        insert_action(&mut *conn, kind, filename, storage_key, Utc::now()).await
    }

    /// Highest recorded version for `filename`, or 0 if it has none.
    pub async fn latest_version(&self, filename: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS latest FROM versions WHERE filename = ?",
        )
        .bind(filename)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::persistence_error(format!("Failed to query versions: {}", e)))?;

        Ok(row.get("latest"))
    }

    /// The version the next store of `filename` would receive.
    ///
    /// Only a preview: a concurrent store may take it first. Stores assign
    /// their number inside the insert.
    pub async fn next_version(&self, filename: &str) -> Result<i64> {
        Ok(self.latest_version(filename).await? + 1)
    }

    /// Full history of `filename`, oldest first.
    pub async fn history(&self, filename: &str) -> Result<Vec<VersionRecord>> {
        let rows = sqlx::query(
            "SELECT filename, version, digest, recorded_at FROM versions WHERE filename = ? ORDER BY version",
        )
        .bind(filename)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::persistence_error(format!("Failed to query history: {}", e)))?;

        rows.iter().map(version_from_row).collect()
    }

    /// All actions in insertion order.
    pub async fn actions(&self) -> Result<Vec<ActionRecord>> {
        let rows = sqlx::query(
            "SELECT action_type, filename, storage_key, recorded_at FROM actions ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::persistence_error(format!("Failed to query actions: {}", e)))?;

        rows.iter().map(action_from_row).collect()
    }

    /// Number of actions of one kind.
    pub async fn count_actions(&self, kind: ActionKind) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM actions WHERE action_type = ?")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::persistence_error(format!("Failed to count actions: {}", e)))?;

        Ok(row.get("count"))
    }

    /// Close the connection pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_action(
    conn: &mut sqlx::SqliteConnection,
    kind: ActionKind,
    filename: &str,
    storage_key: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO actions (action_type, filename, storage_key, recorded_at) VALUES (?, ?, ?, ?)",
    )
    .bind(kind.as_str())
    .bind(filename)
    .bind(storage_key)
    .bind(at.timestamp_millis())
    .execute(&mut *conn)
    .await
    .map_err(|e| AppError::persistence_error(format!("Failed to append action: {}", e)))?;

    Ok(())
}

/// Insert `max(version) + 1` for `filename` in a single statement.
async fn insert_next_version(
    conn: &mut sqlx::SqliteConnection,
    filename: &str,
    digest: &ContentDigest,
    at: DateTime<Utc>,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO versions (filename, version, digest, recorded_at)
        SELECT ?, COALESCE(MAX(version), 0) + 1, ?, ?
        FROM versions WHERE filename = ?
        RETURNING version
        "#,
    )
    .bind(filename)
    .bind(digest.to_hex())
    .bind(at.timestamp_millis())
    .bind(filename)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| AppError::persistence_error(format!("Failed to append version: {}", e)))?;

    Ok(row.get("version"))
}

fn version_from_row(row: &SqliteRow) -> Result<VersionRecord> {
    let digest: String = row.get("digest");
    Ok(VersionRecord {
        filename: row.get("filename"),
        version: row.get("version"),
        digest: digest.parse().map_err(|e| {
            AppError::persistence_error(format!("Corrupt digest in versions table: {}", e))
        })?,
        timestamp: from_millis(row.get("recorded_at")),
    })
}

fn action_from_row(row: &SqliteRow) -> Result<ActionRecord> {
    let kind: String = row.get("action_type");
    Ok(ActionRecord {
        kind: kind.parse()?,
        filename: row.get("filename"),
        storage_key: row.get("storage_key"),
        timestamp: from_millis(row.get("recorded_at")),
    })
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::task::JoinSet;

    fn digest(seed: &str) -> ContentDigest {
        ContentDigest::of_bytes(seed.as_bytes())
    }

    #[tokio::test]
    async fn test_first_version_is_one() {
        let ledger = Ledger::open_in_memory().await.unwrap();

        assert_eq!(ledger.latest_version("a.txt").await.unwrap(), 0);
        assert_eq!(ledger.next_version("a.txt").await.unwrap(), 1);

        let record = ledger.append_version("a.txt", &digest("v1")).await.unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(ledger.next_version("a.txt").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_versions_are_per_filename() {
        let ledger = Ledger::open_in_memory().await.unwrap();

        ledger.append_version("a.txt", &digest("1")).await.unwrap();
        ledger.append_version("a.txt", &digest("2")).await.unwrap();
        let b = ledger.append_version("b.txt", &digest("1")).await.unwrap();

        assert_eq!(b.version, 1, "another filename starts its own sequence");
        assert_eq!(ledger.latest_version("a.txt").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_history_keeps_old_digests() {
        let ledger = Ledger::open_in_memory().await.unwrap();

        ledger.append_version("report.pdf", &digest("D1")).await.unwrap();
        ledger.append_version("report.pdf", &digest("D2")).await.unwrap();

        let history = ledger.history("report.pdf").await.unwrap();
        let versions: Vec<(i64, ContentDigest)> =
            history.iter().map(|r| (r.version, r.digest)).collect();
        assert_eq!(versions, vec![(1, digest("D1")), (2, digest("D2"))]);
    }

    #[tokio::test]
    async fn test_record_store_appends_both_rows() {
        let ledger = Ledger::open_in_memory().await.unwrap();
        let d = digest("content");
        let key = format!("{}.txt", d);

        let first = ledger
            .record_store(ActionKind::Store, "a.txt", &key, &d)
            .await
            .unwrap();
        let second = ledger
            .record_store(ActionKind::StoreDuplicate, "a.txt", &key, &d)
            .await
            .unwrap();

        assert_eq!((first.version, second.version), (1, 2));

        let actions = ledger.actions().await.unwrap();
        let kinds: Vec<ActionKind> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Store, ActionKind::StoreDuplicate]);
        assert!(actions.iter().all(|a| a.storage_key == key));
    }

    #[tokio::test]
    async fn test_action_counts() {
        let ledger = Ledger::open_in_memory().await.unwrap();

        ledger
            .append_action(ActionKind::Deduplicate, "/data/b.txt", "")
            .await
            .unwrap();
        ledger
            .append_action(ActionKind::Deduplicate, "/data/c.txt", "")
            .await
            .unwrap();

        assert_eq!(ledger.count_actions(ActionKind::Deduplicate).await.unwrap(), 2);
        assert_eq!(ledger.count_actions(ActionKind::Store).await.unwrap(), 0);
    }

    #[test]
    fn test_action_kind_strings() {
        for kind in [
            ActionKind::Store,
            ActionKind::StoreDuplicate,
            ActionKind::Deduplicate,
        ] {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert!("delete".parse::<ActionKind>().is_err());
    }

    #[tokio::test]
    async fn test_file_ledger_persists_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested/ledger.db");

        {
            let ledger = Ledger::open(&db_path).await.unwrap();
            ledger.append_version("a.txt", &digest("1")).await.unwrap();
            ledger.close().await;
        }

        let ledger = Ledger::open(&db_path).await.unwrap();
        let record = ledger.append_version("a.txt", &digest("2")).await.unwrap();
        assert_eq!(record.version, 2);
    }

    /// Concurrent appends for one filename never reuse a version number.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_appends_are_gapless() {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Arc::new(Ledger::open(&temp_dir.path().join("ledger.db")).await.unwrap());

        let mut tasks = JoinSet::new();
        for i in 0..32 {
            let ledger = Arc::clone(&ledger);
            tasks.spawn(async move {
                ledger
                    .record_store(
                        ActionKind::Store,
                        "shared.txt",
                        "key",
                        &digest(&i.to_string()),
                    )
                    .await
                    .unwrap()
                    .version
            });
        }

        let mut versions = Vec::new();
        while let Some(result) = tasks.join_next().await {
            versions.push(result.unwrap());
        }
        versions.sort_unstable();

        assert_eq!(versions, (1..=32).collect::<Vec<i64>>());

        let history = ledger.history("shared.txt").await.unwrap();
        assert_eq!(history.len(), 32);
    }
}
