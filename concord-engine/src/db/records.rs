//! Consensus record persistence
//!
//! Versions are append-only: `append_version` inserts and never updates, so
//! writing an existing `(segment, version)` fails on the primary key.

use concord_common::{Error, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::retry_on_lock;
use crate::types::ConsensusRecord;
use crate::workflow::consensus::seal;
use crate::workflow::SegmentOutcome;

/// Longest time to wait out SQLite lock contention on insert
const MAX_LOCK_WAIT: Duration = Duration::from_millis(5000);

/// One stored version, without the record body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub segment_id: String,
    pub version: u32,
    pub status: String,
    pub content_hash: String,
    pub run_id: String,
    pub created_at: String,
}

/// Insert a record as a new version
///
/// # Arguments
/// * `pool` - database pool
/// * `record` - sealed record; its `version` is the row key
/// * `run_id` - identifier of the run (or correction) that produced it
pub async fn append_version(pool: &SqlitePool, record: &ConsensusRecord, run_id: &Uuid) -> Result<()> {
    let record_json = serde_json::to_string(record)?;
    let created_at = chrono::Utc::now().to_rfc3339();
    let run_id = run_id.to_string();

    retry_on_lock("append_version", MAX_LOCK_WAIT, || async {
        sqlx::query(
            r#"
            INSERT INTO consensus_records (
                segment_id, version, status, content_hash, record_json, run_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.segment_id)
        .bind(record.version as i64)
        .bind(record.status.as_str())
        .bind(&record.content_hash)
        .bind(&record_json)
        .bind(&run_id)
        .bind(&created_at)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(Error::Database)
    })
    .await?;

    debug!(
        segment_id = %record.segment_id,
        version = record.version,
        "Consensus record stored"
    );
    Ok(())
}

/// Version number the next record for a segment will get
pub async fn next_version(pool: &SqlitePool, segment_id: &str) -> Result<u32> {
    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM consensus_records WHERE segment_id = ?")
            .bind(segment_id)
            .fetch_one(pool)
            .await?;
    Ok(current.map(|v| v as u32 + 1).unwrap_or(1))
}

/// Load the active (highest) version of a segment
pub async fn load_active(pool: &SqlitePool, segment_id: &str) -> Result<Option<ConsensusRecord>> {
    let row = sqlx::query(
        "SELECT record_json FROM consensus_records WHERE segment_id = ? ORDER BY version DESC LIMIT 1",
    )
    .bind(segment_id)
    .fetch_optional(pool)
    .await?;

    row.map(|row| parse_record(row.get("record_json"))).transpose()
}

/// Load one specific version
pub async fn load_version(
    pool: &SqlitePool,
    segment_id: &str,
    version: u32,
) -> Result<Option<ConsensusRecord>> {
    let row = sqlx::query(
        "SELECT record_json FROM consensus_records WHERE segment_id = ? AND version = ?",
    )
    .bind(segment_id)
    .bind(version as i64)
    .fetch_optional(pool)
    .await?;

    row.map(|row| parse_record(row.get("record_json"))).transpose()
}

/// List every stored version of a segment, oldest first
pub async fn list_versions(pool: &SqlitePool, segment_id: &str) -> Result<Vec<VersionSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT segment_id, version, status, content_hash, run_id, created_at
        FROM consensus_records
        WHERE segment_id = ?
        ORDER BY version ASC
        "#,
    )
    .bind(segment_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| VersionSummary {
            segment_id: row.get("segment_id"),
            version: row.get::<i64, _>("version") as u32,
            status: row.get("status"),
            content_hash: row.get("content_hash"),
            run_id: row.get("run_id"),
            created_at: row.get("created_at"),
        })
        .collect())
}

/// Persist a segment outcome as the segment's next version
///
/// Only assembled records are stored; failed and cancelled segments are
/// skipped. A record following an earlier version is restamped with the
/// new version number and `supersedes`, then resealed.
///
/// # Returns
/// The stored record, or `None` when nothing was persisted.
pub async fn persist_outcome(
    pool: &SqlitePool,
    outcome: &SegmentOutcome,
    run_id: &Uuid,
) -> Result<Option<ConsensusRecord>> {
    let Some(record) = outcome.record() else {
        debug!(
            segment_id = outcome.segment_id(),
            status = outcome.status(),
            "Outcome not persisted"
        );
        return Ok(None);
    };

    let mut record = record.clone();
    let version = next_version(pool, &record.segment_id).await?;
    if version != record.version {
        record.version = version;
        record.supersedes = (version > 1).then(|| version - 1);
        seal(&mut record)?;
    }

    append_version(pool, &record, run_id).await?;
    info!(
        segment_id = %record.segment_id,
        version = record.version,
        status = record.status.as_str(),
        "Consensus record persisted"
    );
    Ok(Some(record))
}

fn parse_record(json: String) -> Result<ConsensusRecord> {
    serde_json::from_str(&json)
        .map_err(|e| Error::Internal(format!("Stored record is unreadable: {}", e)))
}
