//! Per-segment reconciliation workflow
//!
//! Each segment runs through the same stages:
//! 1. Fan out to every producer (concurrent, per-producer timeout)
//! 2. Validate each result and drive bounded repair against its producer
//! 3. Compare every producer pair and cluster the matches
//! 4. Arbitrate every cluster that is not in full agreement
//! 5. Assemble, validate and seal the consensus record
//!
//! Segments are independent. A failure in one never affects its siblings,
//! and every segment ends in exactly one [`SegmentOutcome`].

pub mod consensus;
pub mod pipeline;
pub mod reconcile;
pub mod repair;

pub use pipeline::{Pipeline, PipelineConfig};

use crate::types::{AgreementLabel, Confidence, ConsensusRecord, RunStatus};
use serde::Serialize;
use std::fmt;

/// Why a segment produced no record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No producers were configured for the segment
    NoResults,
    /// Every producer failed or timed out
    AllProducersFailed,
    /// The segment itself is unusable (no id or no layers)
    InvalidSegment,
    /// Results were reconciled but the record could not be serialized
    AssemblyFailed,
}

impl FailureReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureReason::NoResults => "no_results",
            FailureReason::AllProducersFailed => "all_producers_failed",
            FailureReason::InvalidSegment => "invalid_segment",
            FailureReason::AssemblyFailed => "assembly_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of one segment
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    /// Every item settled without human review
    Reconciled(ConsensusRecord),
    /// Record assembled, with items flagged for review
    NeedsReview(ConsensusRecord),
    /// Hard failure; nothing to persist
    Failed {
        segment_id: String,
        reason: FailureReason,
    },
    /// Processing was aborted; partial work discarded
    Cancelled { segment_id: String },
}

impl SegmentOutcome {
    pub fn segment_id(&self) -> &str {
        match self {
            SegmentOutcome::Reconciled(record) | SegmentOutcome::NeedsReview(record) => {
                &record.segment_id
            }
            SegmentOutcome::Failed { segment_id, .. } | SegmentOutcome::Cancelled { segment_id } => {
                segment_id
            }
        }
    }

    pub fn record(&self) -> Option<&ConsensusRecord> {
        match self {
            SegmentOutcome::Reconciled(record) | SegmentOutcome::NeedsReview(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<ConsensusRecord> {
        match self {
            SegmentOutcome::Reconciled(record) | SegmentOutcome::NeedsReview(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SegmentOutcome::Failed { .. })
    }

    /// Short status name for reporting
    pub fn status(&self) -> &'static str {
        match self {
            SegmentOutcome::Reconciled(_) => "reconciled",
            SegmentOutcome::NeedsReview(_) => "needs_review",
            SegmentOutcome::Failed { .. } => "failed",
            SegmentOutcome::Cancelled { .. } => "cancelled",
        }
    }
}

/// Progress events published by the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ReconcileEvent {
    SegmentStarted {
        segment_id: String,
        producers: usize,
    },

    ProducerCompleted {
        segment_id: String,
        producer_id: String,
        status: RunStatus,
        reattempts: u32,
    },

    ProducerFailed {
        segment_id: String,
        producer_id: String,
        error: String,
    },

    /// A repair re-attempt was issued
    RepairAttempted {
        segment_id: String,
        producer_id: String,
        attempt: u32,
        findings: usize,
    },

    ComparisonCompleted {
        segment_id: String,
        left_producer: String,
        right_producer: String,
        matches: usize,
        approximate: bool,
    },

    ArbitrationCompleted {
        segment_id: String,
        decision_id: String,
        case: AgreementLabel,
        confidence: Confidence,
        escalated: bool,
    },

    SegmentCompleted {
        segment_id: String,
        status: String,
        items: usize,
        review_items: usize,
    },

    SegmentFailed {
        segment_id: String,
        reason: String,
    },
}
