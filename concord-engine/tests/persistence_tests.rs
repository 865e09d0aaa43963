//! Consensus record persistence
//!
//! Uses an in-memory SQLite database (single connection, so every query
//! sees the same database).

mod helpers;

use concord_engine::db::{self, records};
use concord_engine::types::ConsensusRecord;
use concord_engine::workflow::consensus::content_hash;
use concord_engine::workflow::{FailureReason, SegmentOutcome};
use helpers::*;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::init_tables(&pool).await.unwrap();
    pool
}

async fn reconciled_outcome() -> SegmentOutcome {
    let pipeline = pipeline(
        vec![
            named("alpha", FixedProducer::new(full_result(SEGMENT_ID))),
            named("beta", FixedProducer::new(full_result(SEGMENT_ID))),
        ],
        CountingJudge::new(),
    );
    pipeline
        .process_segment(&segment(SEGMENT_ID), &taxonomy(), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn test_persist_and_load_active() {
    let pool = memory_pool().await;
    let outcome = reconciled_outcome().await;

    let stored = records::persist_outcome(&pool, &outcome, &Uuid::new_v4())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.supersedes, None);
    assert_eq!(Some(&stored), outcome.record());

    let active = records::load_active(&pool, SEGMENT_ID).await.unwrap().unwrap();
    assert_eq!(active, stored);
}

#[tokio::test]
async fn test_rerun_appends_new_version() {
    let pool = memory_pool().await;
    let run_one = Uuid::new_v4();
    let run_two = Uuid::new_v4();

    let first = records::persist_outcome(&pool, &reconciled_outcome().await, &run_one)
        .await
        .unwrap()
        .unwrap();
    let second = records::persist_outcome(&pool, &reconciled_outcome().await, &run_two)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(second.version, 2);
    assert_eq!(second.supersedes, Some(1));
    assert_ne!(first.content_hash, second.content_hash);
    assert_eq!(content_hash(&second).unwrap(), second.content_hash);

    // Version 1 is untouched
    let original = records::load_version(&pool, SEGMENT_ID, 1).await.unwrap().unwrap();
    assert_eq!(original, first);

    let versions = records::list_versions(&pool, SEGMENT_ID).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, 1);
    assert_eq!(versions[0].run_id, run_one.to_string());
    assert_eq!(versions[1].version, 2);
    assert_eq!(versions[1].status, "reconciled");

    let active = records::load_active(&pool, SEGMENT_ID).await.unwrap().unwrap();
    assert_eq!(active.version, 2);
}

#[tokio::test]
async fn test_existing_version_is_never_overwritten() {
    let pool = memory_pool().await;
    let record: ConsensusRecord = reconciled_outcome().await.into_record().unwrap();

    records::append_version(&pool, &record, &Uuid::new_v4()).await.unwrap();
    let duplicate = records::append_version(&pool, &record, &Uuid::new_v4()).await;
    assert!(duplicate.is_err());

    assert_eq!(records::next_version(&pool, SEGMENT_ID).await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_and_cancelled_outcomes_are_not_persisted() {
    let pool = memory_pool().await;
    let failed = SegmentOutcome::Failed {
        segment_id: "ch9".to_string(),
        reason: FailureReason::AllProducersFailed,
    };
    let cancelled = SegmentOutcome::Cancelled {
        segment_id: "ch9".to_string(),
    };

    for outcome in [failed, cancelled] {
        let stored = records::persist_outcome(&pool, &outcome, &Uuid::new_v4())
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    assert!(records::load_active(&pool, "ch9").await.unwrap().is_none());
    assert!(records::list_versions(&pool, "ch9").await.unwrap().is_empty());
    assert_eq!(records::next_version(&pool, "ch9").await.unwrap(), 1);
}
