//! Producer seam and concurrent fan-out
//!
//! Producers are black boxes that return one [`ExtractionResult`] for a
//! segment, or fail. Every producer for a segment is invoked concurrently,
//! each under its own timeout; failures are isolated per producer and never
//! cancel the others.
//!
//! # Implementations
//! - [`file_producer::FileProducer`] - replays serialized results from disk

pub mod file_producer;

pub use file_producer::{discover_producers, FileProducer};

use crate::types::{ExtractionResult, Segment};
use crate::workflow::repair::{RepairFeedback, Reattempt};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Producer invocation failures
#[derive(Debug, Error)]
pub enum ProducerError {
    /// Producer could not be reached or has nothing for this segment
    #[error("Producer unavailable: {0}")]
    Unavailable(String),

    #[error("Producer timed out after {0} ms")]
    Timeout(u64),

    /// Payload is not parseable JSON
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// Payload parses but does not fit the result shape
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Producer error: {0}")]
    Internal(String),
}

/// Input to one producer call
#[derive(Debug, Clone, Copy)]
pub struct ProduceRequest<'a> {
    pub segment: &'a Segment,
    /// Present when re-asking after structural findings
    pub feedback: Option<&'a RepairFeedback>,
}

/// Source of one candidate decomposition of a segment
#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, request: &ProduceRequest<'_>) -> Result<ExtractionResult, ProducerError>;
}

/// A producer registered under an id
#[derive(Clone)]
pub struct NamedProducer {
    pub id: String,
    pub producer: Arc<dyn Producer>,
}

impl NamedProducer {
    pub fn new(id: impl Into<String>, producer: Arc<dyn Producer>) -> Self {
        Self {
            id: id.into(),
            producer,
        }
    }
}

/// Parse a serialized extraction result
///
/// Syntax errors are [`ProducerError::Malformed`]; JSON that does not fit
/// the result shape is [`ProducerError::SchemaMismatch`].
pub fn parse_result(payload: &str) -> Result<ExtractionResult, ProducerError> {
    serde_json::from_str(payload).map_err(|e| match e.classify() {
        serde_json::error::Category::Data => ProducerError::SchemaMismatch(e.to_string()),
        _ => ProducerError::Malformed(e.to_string()),
    })
}

/// Concurrent producer executor
///
/// Per-producer error isolation: one failure does not affect the others.
pub struct ParallelProducer {
    producers: Vec<NamedProducer>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl ParallelProducer {
    pub fn new(producers: Vec<NamedProducer>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            producers,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    pub fn count(&self) -> usize {
        self.producers.len()
    }

    pub fn producers(&self) -> &[NamedProducer] {
        &self.producers
    }

    /// Invoke every producer for a segment concurrently
    ///
    /// # Returns
    /// One outcome per producer, in registration order.
    pub async fn produce_all(
        &self,
        segment: &Segment,
    ) -> Vec<(&NamedProducer, Result<ExtractionResult, ProducerError>)> {
        let futures = self.producers.iter().map(|named| async move {
            let request = ProduceRequest {
                segment,
                feedback: None,
            };
            let outcome = self.invoke(named, &request).await;
            match &outcome {
                Ok(result) => debug!(
                    producer_id = %named.id,
                    segment_id = %segment.id,
                    groupings = result.groupings.len(),
                    "Producer returned a result"
                ),
                Err(e) => warn!(
                    producer_id = %named.id,
                    segment_id = %segment.id,
                    error = %e,
                    "Producer failed (per-producer error isolation)"
                ),
            }
            (named, outcome)
        });

        join_all(futures).await
    }

    /// One bounded call to one producer
    ///
    /// Stamps the registered producer id on the result and rejects a result
    /// for a different segment.
    pub async fn invoke(
        &self,
        named: &NamedProducer,
        request: &ProduceRequest<'_>,
    ) -> Result<ExtractionResult, ProducerError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ProducerError::Unavailable("producer pool closed".to_string()))?;

        let mut result = match tokio::time::timeout(self.timeout, named.producer.produce(request))
            .await
        {
            Ok(outcome) => outcome?,
            Err(_) => return Err(ProducerError::Timeout(self.timeout.as_millis() as u64)),
        };

        if result.segment_id != request.segment.id {
            return Err(ProducerError::SchemaMismatch(format!(
                "result is for segment '{}', expected '{}'",
                result.segment_id, request.segment.id
            )));
        }
        result.producer_id = named.id.clone();
        Ok(result)
    }
}

/// Re-asks one producer with findings against its previous result
pub struct ProducerReattempt<'a> {
    pub pool: &'a ParallelProducer,
    pub producer: &'a NamedProducer,
    pub segment: &'a Segment,
}

#[async_trait]
impl<'a> Reattempt<ExtractionResult> for ProducerReattempt<'a> {
    type Error = ProducerError;

    async fn reattempt(&self, feedback: &RepairFeedback) -> Result<ExtractionResult, ProducerError> {
        let request = ProduceRequest {
            segment: self.segment,
            feedback: Some(feedback),
        };
        self.pool.invoke(self.producer, &request).await
    }
}
