//! Test Helper Utilities
//!
//! Shared fixtures for the concord-engine integration tests: a six-sentence
//! segment, a small taxonomy, result builders, and scripted producers and
//! judges.

#![allow(dead_code)]

use async_trait::async_trait;
use concord_engine::arbitration::{Arbitrator, HeuristicJudge, Judge, JudgeError, JudgeRequest, RawVerdict};
use concord_engine::config::EngineConfig;
use concord_engine::producers::{NamedProducer, ParallelProducer, ProduceRequest, Producer, ProducerError};
use concord_engine::taxonomy::Taxonomy;
use concord_engine::types::{
    Exclusion, ExclusionReason, ExtractionResult, Grouping, GroupingKind, Member, Segment, Unit,
    UnitType,
};
use concord_engine::workflow::Pipeline;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SEGMENT_ID: &str = "ch1";
pub const LAYER: &str = "body";

pub const SENTENCES: [&str; 6] = [
    "Rings have two binary operations called addition and multiplication.",
    "Every field is a commutative ring in which division by nonzero elements is possible.",
    "A circle is the set of points equidistant from a fixed center point.",
    "The area of a circle grows with the square of its radius.",
    "A derivative measures how a function changes as its input changes.",
    "Integration accumulates quantities over an interval of the real line.",
];

pub const LEAVES: [&str; 3] = ["math/algebra", "math/geometry", "math/calculus"];

pub fn taxonomy() -> Taxonomy {
    Taxonomy::from_paths(LEAVES).unwrap()
}

/// Segment whose single layer is every sentence joined by one space
pub fn segment(id: &str) -> Segment {
    Segment::new(id)
        .with_layer(LAYER, SENTENCES.join(" "))
        .with_context("Chapter 1: Foundations")
}

/// Unit `u<index>` with offsets into the joined layer text
pub fn unit(index: usize) -> Unit {
    let start: usize = SENTENCES[..index]
        .iter()
        .map(|s| s.chars().count() + 1)
        .sum();
    let text = SENTENCES[index];
    Unit {
        id: format!("u{}", index),
        unit_type: UnitType::Sentence,
        text: text.to_string(),
        layer: LAYER.to_string(),
        start,
        end: start + text.chars().count(),
        fused: None,
    }
}

/// A result carrying every unit; units in no grouping are excluded
///
/// Each grouping is `(id, target, content unit indices)`.
pub fn result(segment_id: &str, groupings: &[(&str, &str, &[usize])]) -> ExtractionResult {
    let grouped: HashSet<usize> = groupings
        .iter()
        .flat_map(|(_, _, units)| units.iter().copied())
        .collect();

    ExtractionResult {
        producer_id: String::new(),
        segment_id: segment_id.to_string(),
        units: (0..SENTENCES.len()).map(unit).collect(),
        groupings: groupings
            .iter()
            .map(|(id, target, units)| Grouping {
                id: id.to_string(),
                target: target.to_string(),
                kind: GroupingKind::Primary,
                members: units.iter().map(|u| Member::content(format!("u{}", u))).collect(),
                duplication_cluster: None,
                shared_evidence: false,
            })
            .collect(),
        exclusions: (0..SENTENCES.len())
            .filter(|i| !grouped.contains(i))
            .map(|i| Exclusion {
                unit_id: format!("u{}", i),
                reason: ExclusionReason::OutOfScope,
            })
            .collect(),
    }
}

/// Three groupings, one per leaf, covering every sentence
pub fn full_result(segment_id: &str) -> ExtractionResult {
    result(
        segment_id,
        &[
            ("g1", "math/algebra", &[0, 1]),
            ("g2", "math/geometry", &[2, 3]),
            ("g3", "math/calculus", &[4, 5]),
        ],
    )
}

// ============================================================================
// Producers
// ============================================================================

/// Returns the same result for every request, including repairs
pub struct FixedProducer {
    result: ExtractionResult,
    pub calls: AtomicUsize,
}

impl FixedProducer {
    pub fn new(result: ExtractionResult) -> Arc<Self> {
        Arc::new(Self {
            result,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Producer for FixedProducer {
    async fn produce(&self, request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = self.result.clone();
        result.segment_id = request.segment.id.clone();
        Ok(result)
    }
}

/// Returns `first` initially and `repaired` for every repair request
pub struct RepairingProducer {
    pub first: ExtractionResult,
    pub repaired: ExtractionResult,
}

#[async_trait]
impl Producer for RepairingProducer {
    async fn produce(&self, request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError> {
        let mut result = match request.feedback {
            Some(_) => self.repaired.clone(),
            None => self.first.clone(),
        };
        result.segment_id = request.segment.id.clone();
        Ok(result)
    }
}

pub struct FailingProducer;

#[async_trait]
impl Producer for FailingProducer {
    async fn produce(&self, _request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError> {
        Err(ProducerError::Unavailable("service offline".to_string()))
    }
}

/// Sleeps before answering
pub struct SlowProducer {
    pub delay: Duration,
}

#[async_trait]
impl Producer for SlowProducer {
    async fn produce(&self, request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError> {
        tokio::time::sleep(self.delay).await;
        Ok(full_result(&request.segment.id))
    }
}

pub fn named(id: &str, producer: Arc<dyn Producer>) -> NamedProducer {
    NamedProducer::new(id, producer)
}

// ============================================================================
// Judges and pipelines
// ============================================================================

/// Heuristic judge that counts its calls
pub struct CountingJudge {
    inner: HeuristicJudge,
    calls: AtomicUsize,
}

impl CountingJudge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: HeuristicJudge::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for CountingJudge {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.judge(request).await
    }
}

/// Judge that never answers
pub struct DownJudge;

#[async_trait]
impl Judge for DownJudge {
    fn name(&self) -> &str {
        "down"
    }

    async fn judge(&self, _request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
        Err(JudgeError::Unavailable("judge offline".to_string()))
    }
}

/// Engine settings for tests: short producer timeout
pub fn test_config() -> EngineConfig {
    EngineConfig {
        producer_timeout: Duration::from_millis(2_000),
        max_repair_attempts: 2,
        ..EngineConfig::default()
    }
}

pub fn pipeline(producers: Vec<NamedProducer>, judge: Arc<dyn Judge>) -> Pipeline {
    pipeline_with(&test_config(), producers, judge)
}

pub fn pipeline_with(config: &EngineConfig, producers: Vec<NamedProducer>, judge: Arc<dyn Judge>) -> Pipeline {
    let producers = ParallelProducer::new(
        producers,
        config.max_concurrent_producers,
        config.producer_timeout,
    );
    let arbitrator = Arbitrator::new(judge, &config.arbitrator_settings());
    Pipeline::new(config.pipeline_config(), producers, arbitrator)
}
