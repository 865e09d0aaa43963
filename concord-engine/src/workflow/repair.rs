//! Bounded repair loop
//!
//! Re-drives the originator of a flawed value (a producer, or a judge) with
//! the validator's repairable findings until the value validates cleanly or
//! the attempt bound is reached. The controller never edits data itself.
//!
//! # Termination
//! The loop state carries an explicit attempt counter. It stops when:
//! - the value has no findings (accepted or repaired)
//! - only blocking findings remain (degraded; asking again cannot help)
//! - `max_attempts` re-attempts were spent (degraded)
//! - a re-attempt itself fails (degraded; the original is kept)

use crate::validators::{repairable_only, Finding};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Findings sent back with a re-attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFeedback {
    /// 1-based re-attempt number
    pub attempt: u32,
    /// Repairable findings against the previous attempt
    pub findings: Vec<Finding>,
}

/// Something that can be asked to restate a value
#[async_trait]
pub trait Reattempt<T>: Send + Sync {
    type Error: fmt::Display + Send;

    async fn reattempt(&self, feedback: &RepairFeedback) -> Result<T, Self::Error>;
}

/// Why a value ended up degraded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeCause {
    /// Only non-repairable findings remained
    Blocking,
    /// The attempt bound was reached
    Exhausted,
    /// A re-attempt returned an error
    ReattemptFailed(String),
}

impl fmt::Display for DegradeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradeCause::Blocking => f.write_str("blocking findings"),
            DegradeCause::Exhausted => f.write_str("repair attempts exhausted"),
            DegradeCause::ReattemptFailed(e) => write!(f, "repair attempt failed: {}", e),
        }
    }
}

/// Final state of a repair loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairStatus {
    Accepted,
    Repaired,
    Degraded(DegradeCause),
}

/// One rejected attempt kept for audit
#[derive(Debug, Clone)]
pub struct AttemptLog<T> {
    pub attempt: u32,
    pub value: T,
    pub findings: Vec<Finding>,
}

/// Outcome of a repair loop
#[derive(Debug, Clone)]
pub struct RepairReport<T> {
    /// The last value obtained
    pub value: T,
    /// Findings against `value`
    pub findings: Vec<Finding>,
    /// Earlier attempts, oldest first
    pub history: Vec<AttemptLog<T>>,
    /// Number of re-attempts made (0 when the first value was used)
    pub reattempts: u32,
    pub status: RepairStatus,
}

impl<T> RepairReport<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self.status, RepairStatus::Degraded(_))
    }
}

/// Drives the repair loop with a fixed attempt bound
#[derive(Debug, Clone, Copy)]
pub struct RepairController {
    max_attempts: u32,
}

impl RepairController {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Validate `initial`, re-attempting on repairable findings
    ///
    /// # Arguments
    /// * `subject` - label for logging (e.g. producer id)
    /// * `initial` - the first value received
    /// * `validate` - the validator for this kind of value
    /// * `source` - who to ask for a restated value
    pub async fn drive<T, V, R>(
        &self,
        subject: &str,
        initial: T,
        validate: V,
        source: &R,
    ) -> RepairReport<T>
    where
        T: Send,
        V: Fn(&T) -> Vec<Finding> + Send + Sync,
        R: Reattempt<T> + ?Sized,
    {
        let mut attempt: u32 = 0;
        let mut current = initial;
        let mut history = Vec::new();

        loop {
            let findings = validate(&current);
            if findings.is_empty() {
                let status = if attempt == 0 {
                    RepairStatus::Accepted
                } else {
                    RepairStatus::Repaired
                };
                debug!(subject, attempt, ?status, "Validation passed");
                return RepairReport {
                    value: current,
                    findings,
                    history,
                    reattempts: attempt,
                    status,
                };
            }

            let repairable = repairable_only(&findings);
            let cause = if repairable.is_empty() {
                Some(DegradeCause::Blocking)
            } else if attempt >= self.max_attempts {
                Some(DegradeCause::Exhausted)
            } else {
                None
            };

            if let Some(cause) = cause {
                warn!(
                    subject,
                    attempt,
                    findings = findings.len(),
                    cause = %cause,
                    "Marking degraded"
                );
                return RepairReport {
                    value: current,
                    findings,
                    history,
                    reattempts: attempt,
                    status: RepairStatus::Degraded(cause),
                };
            }

            attempt += 1;
            let feedback = RepairFeedback {
                attempt,
                findings: repairable,
            };
            debug!(
                subject,
                attempt,
                findings = feedback.findings.len(),
                "Requesting repair"
            );

            match source.reattempt(&feedback).await {
                Ok(next) => {
                    history.push(AttemptLog {
                        attempt: attempt - 1,
                        value: std::mem::replace(&mut current, next),
                        findings,
                    });
                }
                Err(e) => {
                    warn!(subject, attempt, error = %e, "Repair attempt failed");
                    return RepairReport {
                        value: current,
                        findings,
                        history,
                        reattempts: attempt,
                        status: RepairStatus::Degraded(DegradeCause::ReattemptFailed(
                            e.to_string(),
                        )),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::CheckCategory;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Values are integers; a value is valid when it is zero
    fn validate(value: &i32) -> Vec<Finding> {
        match *value {
            0 => vec![],
            v if v > 0 => vec![Finding::new(CheckCategory::GhostReference, "n", "positive")],
            _ => vec![Finding::new(CheckCategory::CoverageGap, "n", "negative")],
        }
    }

    /// Each re-attempt returns the previous value minus one
    struct CountDown {
        start: i32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Reattempt<i32> for CountDown {
        type Error = String;

        async fn reattempt(&self, feedback: &RepairFeedback) -> Result<i32, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(n, feedback.attempt);
            assert!(feedback.findings.iter().all(|f| f.repairable));
            Ok(self.start - n as i32)
        }
    }

    struct Failing;

    #[async_trait]
    impl Reattempt<i32> for Failing {
        type Error = String;

        async fn reattempt(&self, _feedback: &RepairFeedback) -> Result<i32, String> {
            Err("connection reset".to_string())
        }
    }

    #[tokio::test]
    async fn test_valid_value_accepted_without_reattempt() {
        let source = CountDown { start: 0, calls: AtomicU32::new(0) };
        let report = RepairController::new(3).drive("t", 0, validate, &source).await;
        assert_eq!(report.status, RepairStatus::Accepted);
        assert_eq!(report.reattempts, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_repaired_within_bound() {
        let source = CountDown { start: 2, calls: AtomicU32::new(0) };
        let report = RepairController::new(3).drive("t", 2, validate, &source).await;
        assert_eq!(report.status, RepairStatus::Repaired);
        assert_eq!(report.value, 0);
        assert_eq!(report.reattempts, 2);
        assert_eq!(report.history.len(), 2);
        assert_eq!(report.history[0].value, 2);
    }

    #[tokio::test]
    async fn test_exhausted_after_bound() {
        let source = CountDown { start: 10, calls: AtomicU32::new(0) };
        let report = RepairController::new(3).drive("t", 10, validate, &source).await;
        assert_eq!(report.status, RepairStatus::Degraded(DegradeCause::Exhausted));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.value, 7);
        assert!(report.is_degraded());
    }

    #[tokio::test]
    async fn test_blocking_findings_not_retried() {
        let source = CountDown { start: -1, calls: AtomicU32::new(0) };
        let report = RepairController::new(3).drive("t", -1, validate, &source).await;
        assert_eq!(report.status, RepairStatus::Degraded(DegradeCause::Blocking));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reattempt_error_keeps_original() {
        let report = RepairController::new(3).drive("t", 5, validate, &Failing).await;
        assert!(matches!(
            report.status,
            RepairStatus::Degraded(DegradeCause::ReattemptFailed(_))
        ));
        assert_eq!(report.value, 5);
    }

    #[tokio::test]
    async fn test_zero_bound_degrades_immediately() {
        let source = CountDown { start: 1, calls: AtomicU32::new(0) };
        let report = RepairController::new(0).drive("t", 1, validate, &source).await;
        assert_eq!(report.status, RepairStatus::Degraded(DegradeCause::Exhausted));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
