//! Database access for consensus records
//!
//! One row per (segment, version). Rows are only ever inserted; the highest
//! version of a segment is the active one.

pub mod records;

use anyhow::{Context, Result};
use concord_common::Error;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::{Duration, Instant};

/// Connections in the shared pool
const MAX_CONNECTIONS: u32 = 5;

/// SQLite busy_timeout per connection
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing.
/// Connections run in WAL mode with a busy timeout.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    tracing::debug!(
        "Connecting to database: {} (busy_timeout={}ms)",
        db_path.display(),
        BUSY_TIMEOUT.as_millis()
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .busy_timeout(BUSY_TIMEOUT)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the consensus record table if it doesn't exist
pub async fn init_tables(pool: &SqlitePool) -> concord_common::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consensus_records (
            segment_id TEXT NOT NULL,
            version INTEGER NOT NULL,
            status TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            record_json TEXT NOT NULL,
            run_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (segment_id, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (consensus_records)");

    Ok(())
}

/// Retry a database operation while SQLite reports lock contention
///
/// Backs off exponentially from 10ms (capped at 500ms) until `max_wait`
/// elapses; any other error is returned immediately.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait: Duration,
    mut operation: F,
) -> concord_common::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = concord_common::Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => {
                        let text = db_err.to_string();
                        text.contains("database is locked") || text.contains("database is busy")
                    }
                    _ => false,
                };

                if !is_lock_error || start_time.elapsed() >= max_wait {
                    if is_lock_error {
                        tracing::warn!(
                            operation = operation_name,
                            attempt,
                            "Database lock retry exhausted"
                        );
                    }
                    return Err(err);
                }

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(500);
            }
        }
    }
}
