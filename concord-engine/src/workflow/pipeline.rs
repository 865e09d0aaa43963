//! Pipeline Orchestrator
//!
//! Drives one segment (or a batch of segments) from producer fan-out to a
//! sealed consensus record.
//!
//! # Error Handling
//! - Per-producer error isolation: a failed producer contributes nothing
//! - Per-segment isolation: a failed segment never aborts its siblings
//! - Cancellation discards all partial work for the segment
//!
//! # Example
//! ```rust,ignore
//! let pipeline = Pipeline::new(config, producers, arbitrator);
//! let outcomes = pipeline.process_batch(&segments, &taxonomy, &cancel).await;
//! ```

use super::consensus;
use super::reconcile;
use super::repair::{RepairController, RepairFeedback, RepairStatus, Reattempt};
use super::{FailureReason, ReconcileEvent, SegmentOutcome};
use crate::arbitration::{ArbitrationContext, Arbitrator};
use crate::matching::MatchSettings;
use crate::producers::{NamedProducer, ParallelProducer, ProducerError, ProducerReattempt};
use crate::taxonomy::LeafCatalog;
use crate::types::{
    ExtractionResult, ProducerAttempt, ProducerFailure, ProducerRun, RecordStatus, RunStatus,
    Segment,
};
use crate::validators::decision::UnitPool;
use crate::validators::StructuralValidator;
use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub matching: MatchSettings,
    /// Repair re-attempts per producer result
    pub max_repair_attempts: u32,
    /// Segments processed concurrently by [`Pipeline::process_batch`]
    pub max_concurrent_segments: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            matching: MatchSettings::default(),
            max_repair_attempts: 3,
            max_concurrent_segments: 4,
        }
    }
}

/// Reconciliation pipeline
pub struct Pipeline {
    config: PipelineConfig,
    producers: ParallelProducer,
    arbitrator: Arbitrator,
    repair: RepairController,
    event_tx: Option<mpsc::Sender<ReconcileEvent>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, producers: ParallelProducer, arbitrator: Arbitrator) -> Self {
        let repair = RepairController::new(config.max_repair_attempts);
        Self {
            config,
            producers,
            arbitrator,
            repair,
            event_tx: None,
        }
    }

    /// Attach an event channel for progress reporting
    pub fn with_events(mut self, event_tx: mpsc::Sender<ReconcileEvent>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process a batch of segments
    ///
    /// # Returns
    /// One outcome per segment, in input order.
    pub async fn process_batch(
        &self,
        segments: &[Segment],
        catalog: &dyn LeafCatalog,
        cancel: &CancellationToken,
    ) -> Vec<SegmentOutcome> {
        let mut outcomes: Vec<(usize, SegmentOutcome)> = stream::iter(segments.iter().enumerate())
            .map(|(index, segment)| async move {
                (index, self.process_segment(segment, catalog, cancel).await)
            })
            .buffer_unordered(self.config.max_concurrent_segments.max(1))
            .collect()
            .await;

        outcomes.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<SegmentOutcome> = outcomes.into_iter().map(|(_, o)| o).collect();

        let failed = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(
            segments = outcomes.len(),
            failed,
            "Batch complete"
        );
        outcomes
    }

    /// Process one segment
    ///
    /// Cancelling `cancel` abandons in-flight producer and judge calls and
    /// yields [`SegmentOutcome::Cancelled`].
    pub async fn process_segment(
        &self,
        segment: &Segment,
        catalog: &dyn LeafCatalog,
        cancel: &CancellationToken,
    ) -> SegmentOutcome {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(segment_id = %segment.id, "Segment cancelled; discarding partial work");
                SegmentOutcome::Cancelled { segment_id: segment.id.clone() }
            }
            outcome = self.run_segment(segment, catalog) => outcome,
        };

        match &outcome {
            SegmentOutcome::Reconciled(record) | SegmentOutcome::NeedsReview(record) => {
                self.emit_event(ReconcileEvent::SegmentCompleted {
                    segment_id: record.segment_id.clone(),
                    status: record.status.as_str().to_string(),
                    items: record.items.len(),
                    review_items: record.items.iter().filter(|i| i.needs_review).count(),
                })
                .await;
            }
            SegmentOutcome::Failed { segment_id, reason } => {
                error!(segment_id = %segment_id, reason = %reason, "Segment failed");
                self.emit_event(ReconcileEvent::SegmentFailed {
                    segment_id: segment_id.clone(),
                    reason: reason.to_string(),
                })
                .await;
            }
            SegmentOutcome::Cancelled { segment_id } => {
                self.emit_event(ReconcileEvent::SegmentFailed {
                    segment_id: segment_id.clone(),
                    reason: "cancelled".to_string(),
                })
                .await;
            }
        }
        outcome
    }

    async fn run_segment(&self, segment: &Segment, catalog: &dyn LeafCatalog) -> SegmentOutcome {
        let failed = |reason| SegmentOutcome::Failed {
            segment_id: segment.id.clone(),
            reason,
        };

        if segment.id.trim().is_empty() || segment.layers.is_empty() {
            return failed(FailureReason::InvalidSegment);
        }
        if self.producers.count() == 0 {
            return failed(FailureReason::NoResults);
        }

        info!(
            segment_id = %segment.id,
            producers = self.producers.count(),
            "Reconciling segment"
        );
        self.emit_event(ReconcileEvent::SegmentStarted {
            segment_id: segment.id.clone(),
            producers: self.producers.count(),
        })
        .await;

        // Stage 1: fan-out
        let outcomes = self.producers.produce_all(segment).await;
        let mut received = Vec::new();
        let mut failures = Vec::new();
        for (producer, outcome) in outcomes {
            match outcome {
                Ok(result) => received.push((producer, result)),
                Err(e) => {
                    self.emit_event(ReconcileEvent::ProducerFailed {
                        segment_id: segment.id.clone(),
                        producer_id: producer.id.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    failures.push(ProducerFailure {
                        producer_id: producer.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if received.is_empty() {
            return failed(FailureReason::AllProducersFailed);
        }

        // Stage 2: validation and repair, one loop per result
        let validator = StructuralValidator::new(catalog).with_segment(segment);
        let mut runs: Vec<ProducerRun> = join_all(
            received
                .into_iter()
                .map(|(producer, result)| self.validate_run(segment, &validator, producer, result)),
        )
        .await;
        runs.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));
        failures.sort_by(|a, b| a.producer_id.cmp(&b.producer_id));

        // Stage 3: comparison and clustering
        let draft = reconcile::build_draft(segment, &runs, catalog, &self.config.matching);
        for set in &draft.comparisons {
            self.emit_event(ReconcileEvent::ComparisonCompleted {
                segment_id: segment.id.clone(),
                left_producer: set.left_producer.clone(),
                right_producer: set.right_producer.clone(),
                matches: set.matches.len(),
                approximate: set.approximate,
            })
            .await;
        }

        // Stage 4: arbitration
        let units = unit_pool(&runs);
        let ctx = ArbitrationContext {
            catalog,
            units: &units,
        };
        let decisions = self.arbitrator.arbitrate_all(&draft.requests, &ctx).await;
        for decision in &decisions {
            self.emit_event(ReconcileEvent::ArbitrationCompleted {
                segment_id: segment.id.clone(),
                decision_id: decision.decision_id.clone(),
                case: decision.case,
                confidence: decision.confidence,
                escalated: decision.escalated,
            })
            .await;
        }

        // Stage 5: assembly
        let record = match consensus::assemble(&segment.id, runs, failures, draft, decisions, catalog)
        {
            Ok(record) => record,
            Err(e) => {
                error!(segment_id = %segment.id, error = %e, "Failed to seal consensus record");
                return failed(FailureReason::AssemblyFailed);
            }
        };

        info!(
            segment_id = %segment.id,
            items = record.items.len(),
            decisions = record.decisions.len(),
            status = record.status.as_str(),
            "Segment reconciled"
        );

        match record.status {
            RecordStatus::Reconciled => SegmentOutcome::Reconciled(record),
            RecordStatus::NeedsReview => SegmentOutcome::NeedsReview(record),
        }
    }

    /// Validate one result and drive its repair loop
    async fn validate_run(
        &self,
        segment: &Segment,
        validator: &StructuralValidator<'_>,
        producer: &NamedProducer,
        result: ExtractionResult,
    ) -> ProducerRun {
        let producer_id = producer.id.clone();
        let source = EventedReattempt {
            pipeline: self,
            inner: ProducerReattempt {
                pool: &self.producers,
                producer,
                segment,
            },
            producer,
            segment,
        };
        let report = self
            .repair
            .drive(&producer_id, result, |r| validator.validate_result(r), &source)
            .await;

        let (status, degraded_reason) = match &report.status {
            RepairStatus::Accepted => (RunStatus::Accepted, None),
            RepairStatus::Repaired => (RunStatus::Repaired, None),
            RepairStatus::Degraded(cause) => (RunStatus::Degraded, Some(cause.to_string())),
        };

        self.emit_event(ReconcileEvent::ProducerCompleted {
            segment_id: segment.id.clone(),
            producer_id: producer_id.clone(),
            status,
            reattempts: report.reattempts,
        })
        .await;

        let mut attempts: Vec<ProducerAttempt> = report
            .history
            .into_iter()
            .map(|log| ProducerAttempt {
                attempt: log.attempt,
                result: log.value,
                findings: log.findings,
            })
            .collect();
        attempts.push(ProducerAttempt {
            attempt: report.reattempts,
            result: report.value,
            findings: report.findings,
        });

        ProducerRun {
            producer_id,
            status,
            attempts,
            degraded_reason,
        }
    }

    /// Emit event to channel (if configured)
    async fn emit_event(&self, event: ReconcileEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// Unit ids of each run's final result
fn unit_pool(runs: &[ProducerRun]) -> UnitPool {
    runs.iter()
        .filter_map(|run| {
            run.final_result().map(|result| {
                (
                    run.producer_id.clone(),
                    result.units.iter().map(|u| u.id.clone()).collect(),
                )
            })
        })
        .collect()
}

/// Producer re-attempt that reports progress
struct EventedReattempt<'a> {
    pipeline: &'a Pipeline,
    inner: ProducerReattempt<'a>,
    producer: &'a NamedProducer,
    segment: &'a Segment,
}

#[async_trait]
impl<'a> Reattempt<ExtractionResult> for EventedReattempt<'a> {
    type Error = ProducerError;

    async fn reattempt(&self, feedback: &RepairFeedback) -> Result<ExtractionResult, ProducerError> {
        self.pipeline
            .emit_event(ReconcileEvent::RepairAttempted {
                segment_id: self.segment.id.clone(),
                producer_id: self.producer.id.clone(),
                attempt: feedback.attempt,
                findings: feedback.findings.len(),
            })
            .await;
        self.inner.reattempt(feedback).await
    }
}
