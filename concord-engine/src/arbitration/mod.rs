//! Arbitrator
//!
//! Turns every non-agreement case into one [`ArbitrationDecision`] using a
//! [`Judge`]. Judge output is validated like any other candidate and looped
//! through the repair controller when malformed; a judge that errors or never
//! produces a valid verdict leaves a human-escalation placeholder at `low`.
//!
//! # Resource bounds
//! - at most `max_concurrent_judges` calls in flight (semaphore)
//! - at least `min_interval` between call starts (rate limiter)
//! - each call bounded by `timeout`
//!
//! # Confidence policy
//! - a discarded candidate is always `low`
//! - a judge's `full` is capped at `majority`; only agreement between
//!   producers (or a human) yields `full`

pub mod heuristic;
pub mod http_judge;
pub mod judge;

pub use heuristic::HeuristicJudge;
pub use http_judge::HttpJudge;
pub use judge::{Candidate, Judge, JudgeError, JudgeRequest, RawVerdict};

use crate::taxonomy::LeafCatalog;
use crate::types::{AgreementLabel, ArbitrationDecision, Confidence, GroupingRef};
use crate::validators::decision::{validate_verdict, UnitPool};
use crate::workflow::repair::{RepairController, RepairFeedback, RepairStatus, Reattempt};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Arbitrator limits
#[derive(Debug, Clone, PartialEq)]
pub struct ArbitratorSettings {
    pub max_concurrent_judges: usize,
    pub min_interval: Duration,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for ArbitratorSettings {
    fn default() -> Self {
        Self {
            max_concurrent_judges: 2,
            min_interval: Duration::ZERO,
            timeout: Duration::from_millis(60_000),
            max_attempts: 3,
        }
    }
}

/// Minimum spacing between judge calls
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait if necessary to comply with the rate bound
    async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!("Rate limiting judge: waiting {:?}", wait_time);
                tokio::time::sleep(wait_time).await;
            }
        }

        *last = Some(Instant::now());
    }
}

/// Read-only inputs shared by the decisions of one segment
pub struct ArbitrationContext<'a> {
    pub catalog: &'a dyn LeafCatalog,
    pub units: &'a UnitPool,
}

/// Judge-backed decision maker
pub struct Arbitrator {
    judge: Arc<dyn Judge>,
    permits: Arc<Semaphore>,
    rate_limiter: RateLimiter,
    timeout: Duration,
    repair: RepairController,
}

impl Arbitrator {
    pub fn new(judge: Arc<dyn Judge>, settings: &ArbitratorSettings) -> Self {
        Self {
            judge,
            permits: Arc::new(Semaphore::new(settings.max_concurrent_judges.max(1))),
            rate_limiter: RateLimiter::new(settings.min_interval),
            timeout: settings.timeout,
            repair: RepairController::new(settings.max_attempts),
        }
    }

    pub fn judge_name(&self) -> &str {
        self.judge.name()
    }

    /// Decide every request concurrently
    ///
    /// # Returns
    /// Decisions in request order.
    pub async fn arbitrate_all(
        &self,
        requests: &[JudgeRequest],
        ctx: &ArbitrationContext<'_>,
    ) -> Vec<ArbitrationDecision> {
        join_all(requests.iter().map(|request| self.arbitrate(request, ctx))).await
    }

    /// Decide one disagreement
    pub async fn arbitrate(
        &self,
        request: &JudgeRequest,
        ctx: &ArbitrationContext<'_>,
    ) -> ArbitrationDecision {
        let first = match self.call(request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    decision_id = %request.decision_id,
                    judge = self.judge.name(),
                    error = %e,
                    "Judge failed; escalating to review"
                );
                return self.escalate(request, 1, format!("judge failed: {}", e));
            }
        };

        let source = JudgeReattempt {
            arbitrator: self,
            request,
        };
        let report = self
            .repair
            .drive(
                &request.decision_id,
                first,
                |verdict| validate_verdict(verdict, request, ctx.units, ctx.catalog),
                &source,
            )
            .await;

        let attempts = report.reattempts + 1;
        match report.status {
            RepairStatus::Accepted | RepairStatus::Repaired => {
                let feedback = report
                    .history
                    .last()
                    .map(|log| log.findings.clone())
                    .unwrap_or_default();
                let prompt = judge::render_prompt(&request.with_feedback(
                    crate::validators::repairable_only(&feedback),
                ));
                let decision = self.decide(request, report.value, attempts, &prompt);
                info!(
                    decision_id = %decision.decision_id,
                    case = %decision.case,
                    confidence = %decision.confidence,
                    kept = decision.kept,
                    attempts,
                    "Arbitration complete"
                );
                decision
            }
            RepairStatus::Degraded(cause) => {
                let detail = report
                    .findings
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                warn!(
                    decision_id = %request.decision_id,
                    cause = %cause,
                    "No valid verdict; escalating to review"
                );
                self.escalate(request, attempts, format!("{}: {}", cause, detail))
            }
        }
    }

    /// One bounded judge call
    async fn call(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| JudgeError::Unavailable("arbitrator closed".to_string()))?;
        self.rate_limiter.wait().await;

        match tokio::time::timeout(self.timeout, self.judge.judge(request)).await {
            Ok(result) => result,
            Err(_) => Err(JudgeError::Timeout(self.timeout.as_millis() as u64)),
        }
    }

    /// Apply confidence policy to a validated verdict
    fn decide(
        &self,
        request: &JudgeRequest,
        verdict: RawVerdict,
        attempts: u32,
        prompt: &str,
    ) -> ArbitrationDecision {
        let chosen = verdict
            .chosen
            .clone()
            .or_else(|| default_choice(request, verdict.target.as_deref()));
        let kept = verdict.kept.unwrap_or(true);

        let stated = Confidence::parse(&verdict.confidence).unwrap_or(Confidence::Low);
        let confidence = if kept {
            stated.min(Confidence::Majority)
        } else {
            Confidence::Low
        };

        ArbitrationDecision {
            decision_id: request.decision_id.clone(),
            case: request.case,
            considered: references(request),
            chosen,
            target: verdict.target,
            extent: verdict.extent,
            kept,
            confidence,
            rationale: verdict.rationale,
            judge: self.judge.name().to_string(),
            attempts,
            prompt_digest: judge::prompt_digest(prompt),
            escalated: false,
        }
    }

    fn escalate(&self, request: &JudgeRequest, attempts: u32, rationale: String) -> ArbitrationDecision {
        ArbitrationDecision {
            decision_id: request.decision_id.clone(),
            case: request.case,
            considered: references(request),
            chosen: None,
            target: None,
            extent: None,
            kept: true,
            confidence: Confidence::Low,
            rationale,
            judge: self.judge.name().to_string(),
            attempts,
            prompt_digest: judge::prompt_digest(&judge::render_prompt(request)),
            escalated: true,
        }
    }
}

fn references(request: &JudgeRequest) -> Vec<GroupingRef> {
    request.candidates.iter().map(|c| c.reference.clone()).collect()
}

/// Candidate a verdict implies when it names none
///
/// A lone candidate is implied; for placement, the first candidate already
/// at the chosen target.
fn default_choice(request: &JudgeRequest, target: Option<&str>) -> Option<GroupingRef> {
    if request.candidates.len() == 1 {
        return request.candidates.first().map(|c| c.reference.clone());
    }
    if request.case == AgreementLabel::PlacementDisagreement {
        let matching = target.and_then(|t| {
            request
                .candidates
                .iter()
                .find(|c| crate::matching::same_target(&c.target, t))
        });
        return matching
            .or_else(|| request.candidates.first())
            .map(|c| c.reference.clone());
    }
    None
}

/// Re-asks the judge with findings against its previous verdict
struct JudgeReattempt<'a> {
    arbitrator: &'a Arbitrator,
    request: &'a JudgeRequest,
}

#[async_trait]
impl<'a> Reattempt<RawVerdict> for JudgeReattempt<'a> {
    type Error = JudgeError;

    async fn reattempt(&self, feedback: &RepairFeedback) -> Result<RawVerdict, JudgeError> {
        let request = self.request.with_feedback(feedback.findings.clone());
        self.arbitrator.call(&request).await
    }
}
