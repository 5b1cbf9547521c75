// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable record store backed by SQLite.
//!
//! The secondary service's copy of the records. Idempotency comes from the
//! primary key: `INSERT ... ON CONFLICT(id) DO NOTHING` affects one row the
//! first time an id is seen and zero rows every time after.
//!
//! # SQLite Busy Handling
//!
//! SQLite can return SQLITE_BUSY/SQLITE_LOCKED when the database is
//! contended. Writes are retried with exponential backoff (max 5 attempts).
//! Anything that still fails is reported as [`ReplicationError::Store`], which
//! is retryable: the subscriber leaves the message pending and it is
//! redelivered later.

use super::{RecordStore, StoreFuture};
use crate::error::{ReplicationError, Result};
use crate::record::{Record, RecordId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts, "SQLite operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::store_retries_total(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Runtime failures become retryable store errors.
fn unavailable(operation: &str, e: sqlx::Error) -> ReplicationError {
    ReplicationError::Store(format!("{operation}: {e}"))
}

type RecordRow = (i64, String, Option<String>, Option<String>);

fn row_to_record((id, name, publisher, cost): RecordRow) -> Record {
    Record {
        id,
        name,
        publisher,
        cost,
    }
}

/// Record store persisted in a SQLite database (WAL mode).
pub struct SqliteRecordStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteRecordStore {
    /// Open (or create) the store at the given path.
    ///
    /// Creates the database and table if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Opening record store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| ReplicationError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                publisher TEXT,
                cost TEXT,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records")
            .fetch_one(&pool)
            .await?;
        if count > 0 {
            info!(count, "Restored records from previous run");
        }

        Ok(Self {
            pool,
            path: path_str,
        })
    }

    /// Get database path (for diagnostics).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Checkpoint the WAL and close the pool.
    pub async fn close(&self) {
        let pool = &self.pool;
        let checkpoint = execute_with_retry("record_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
                .execute(pool)
                .await
        })
        .await;
        if let Err(e) = checkpoint {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Record store closed");
    }
}

impl RecordStore for SqliteRecordStore {
    fn insert_if_absent(&self, record: Record) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let pool = &self.pool;
            let now = chrono::Utc::now().timestamp_millis();

            let result = execute_with_retry("record_insert", || async {
                sqlx::query(
                    r#"
                    INSERT INTO records (id, name, publisher, cost, applied_at)
                    VALUES (?, ?, ?, ?, ?)
                    ON CONFLICT(id) DO NOTHING
                    "#,
                )
                .bind(record.id)
                .bind(&record.name)
                .bind(&record.publisher)
                .bind(&record.cost)
                .bind(now)
                .execute(pool)
                .await
            })
            .await
            .map_err(|e| unavailable("record_insert", e))?;

            let inserted = result.rows_affected() == 1;
            debug!(record_id = record.id, inserted, "SQLite insert_if_absent");
            Ok(inserted)
        })
    }

    fn get(&self, id: RecordId) -> StoreFuture<'_, Option<Record>> {
        Box::pin(async move {
            let row: Option<RecordRow> = sqlx::query_as(
                "SELECT id, name, publisher, cost FROM records WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| unavailable("record_get", e))?;
            Ok(row.map(row_to_record))
        })
    }

    fn all(&self) -> StoreFuture<'_, Vec<Record>> {
        Box::pin(async move {
            let rows: Vec<RecordRow> =
                sqlx::query_as("SELECT id, name, publisher, cost FROM records ORDER BY id")
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| unavailable("record_all", e))?;
            Ok(rows.into_iter().map(row_to_record).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_store_basic() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("records.db"))
            .await
            .unwrap();

        assert!(store.get(1).await.unwrap().is_none());
        assert!(store
            .insert_if_absent(Record::new(1, "GCP").with_cost("Paid"))
            .await
            .unwrap());

        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.name, "GCP");
        assert_eq!(record.cost.as_deref(), Some("Paid"));
        assert_eq!(record.publisher, None);
    }

    #[tokio::test]
    async fn test_sqlite_store_idempotent() {
        let dir = tempdir().unwrap();
        let store = SqliteRecordStore::open(dir.path().join("records.db"))
            .await
            .unwrap();

        assert!(store.insert_if_absent(Record::new(5, "Docker")).await.unwrap());
        assert!(!store.insert_if_absent(Record::new(5, "Docker")).await.unwrap());
        assert!(!store.insert_if_absent(Record::new(5, "Other")).await.unwrap());

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Docker");
    }

    #[tokio::test]
    async fn test_sqlite_store_persistence() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("records.db");

        {
            let store = SqliteRecordStore::open(&db_path).await.unwrap();
            store.insert_if_absent(Record::new(1, "GCP")).await.unwrap();
            store.insert_if_absent(Record::new(2, "Docker")).await.unwrap();
            store.close().await;
        }

        {
            let store = SqliteRecordStore::open(&db_path).await.unwrap();
            let ids: Vec<_> = store.all().await.unwrap().iter().map(|r| r.id).collect();
            assert_eq!(ids, vec![1, 2]);
            // Replaying after restart is still a no-op
            assert!(!store.insert_if_absent(Record::new(1, "GCP")).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_sqlite_store_path() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("records.db");
        let store = SqliteRecordStore::open(&db_path).await.unwrap();
        assert!(store.path().ends_with("records.db"));
    }
}
