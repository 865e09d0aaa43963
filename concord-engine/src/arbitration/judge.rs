//! Judge seam: requests, raw verdicts and prompt rendering

use crate::types::{AgreementLabel, GroupingRef};
use crate::validators::Finding;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use thiserror::Error;

/// Judge call failures
#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judge transport error: {0}")]
    Transport(String),

    #[error("Judge timed out after {0} ms")]
    Timeout(u64),

    #[error("Judge returned malformed output: {0}")]
    Malformed(String),

    #[error("Judge unavailable: {0}")]
    Unavailable(String),
}

/// One candidate grouping shown to a judge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub reference: GroupingRef,
    pub target: String,
    pub target_is_leaf: bool,
    pub kind: String,
    /// Content unit ids, in member order
    pub unit_ids: Vec<String>,
    /// Content text
    pub text: String,
    /// The producer's result was degraded
    pub degraded: bool,
}

/// Everything a judge sees for one disagreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub segment_id: String,
    pub decision_id: String,
    pub case: AgreementLabel,
    pub candidates: Vec<Candidate>,
    /// Segment context (e.g. surrounding heading)
    pub context: String,
    /// Number of producers with usable results for the segment
    pub producer_count: usize,
    /// Findings against the previous verdict, when re-asking
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feedback: Vec<Finding>,
}

impl JudgeRequest {
    pub fn candidate(&self, reference: &GroupingRef) -> Option<&Candidate> {
        self.candidates.iter().find(|c| &c.reference == reference)
    }

    /// The request re-stated with findings against the previous verdict
    pub fn with_feedback(&self, feedback: Vec<Finding>) -> Self {
        Self {
            feedback,
            ..self.clone()
        }
    }
}

/// Unvalidated judge output
///
/// Confidence stays raw text until the decision validator accepts it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawVerdict {
    #[serde(default)]
    pub chosen: Option<GroupingRef>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub extent: Option<Vec<String>>,
    #[serde(default)]
    pub kept: Option<bool>,
    pub confidence: String,
    #[serde(default)]
    pub rationale: String,
}

/// A judging process
///
/// # Example
/// ```rust,ignore
/// struct AlwaysLow;
///
/// #[async_trait::async_trait]
/// impl Judge for AlwaysLow {
///     fn name(&self) -> &str { "always-low" }
///
///     async fn judge(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
///         Ok(RawVerdict { confidence: "low".into(), ..Default::default() })
///     }
/// }
/// ```
#[async_trait]
pub trait Judge: Send + Sync {
    /// Identity recorded on every decision
    fn name(&self) -> &str;

    async fn judge(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError>;
}

/// Render the prompt for a request
///
/// Output depends only on the request, so identical disagreements always
/// produce identical prompts and digests.
pub fn render_prompt(request: &JudgeRequest) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Segment: {}", request.segment_id);
    let _ = writeln!(prompt, "Decision: {}", request.decision_id);
    let _ = writeln!(prompt, "Case: {}", request.case);
    let _ = writeln!(prompt, "Producers with results: {}", request.producer_count);
    if !request.context.is_empty() {
        let _ = writeln!(prompt, "Context: {}", request.context);
    }

    prompt.push_str("\nCandidates:\n");
    for (i, candidate) in request.candidates.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "[{}] {} target={} ({}) kind={}{} units={}",
            i + 1,
            candidate.reference,
            candidate.target,
            if candidate.target_is_leaf { "leaf" } else { "not a leaf" },
            candidate.kind,
            if candidate.degraded { " degraded" } else { "" },
            candidate.unit_ids.join(",")
        );
        let _ = writeln!(prompt, "    {}", candidate.text);
    }

    prompt.push_str("\nTask: ");
    prompt.push_str(match request.case {
        AgreementLabel::PlacementDisagreement => {
            "The candidates cover the same content but disagree on placement. \
             Decide the single correct taxonomy leaf."
        }
        AgreementLabel::ContentDisagreement => {
            "The candidates correspond but disagree on extent. Choose the candidate \
             whose boundary is right, optionally narrowing it with an extent of its unit ids."
        }
        AgreementLabel::Unmatched => {
            "Only one producer found this grouping. Decide whether it is real content \
             to keep or spurious and to discard."
        }
        AgreementLabel::FullAgreement => "Confirm the agreed grouping.",
    });

    prompt.push_str(
        "\nRespond with JSON: {\"chosen\": {\"producer_id\", \"grouping_id\"} or null, \
         \"target\": leaf or null, \"extent\": [unit ids] or null, \"kept\": bool or null, \
         \"confidence\": \"full\" | \"majority\" | \"low\", \"rationale\": text}\n",
    );

    if !request.feedback.is_empty() {
        prompt.push_str("\nYour previous answer was rejected:\n");
        for finding in &request.feedback {
            let _ = writeln!(prompt, "- {}", finding);
        }
    }

    prompt
}

/// SHA-256 hex digest of a rendered prompt
pub fn prompt_digest(prompt: &str) -> String {
    format!("{:x}", Sha256::digest(prompt.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validators::CheckCategory;

    fn request() -> JudgeRequest {
        JudgeRequest {
            segment_id: "s1".to_string(),
            decision_id: "s1/0".to_string(),
            case: AgreementLabel::PlacementDisagreement,
            candidates: vec![Candidate {
                reference: GroupingRef::new("alpha", "g1"),
                target: "math/algebra".to_string(),
                target_is_leaf: true,
                kind: "primary".to_string(),
                unit_ids: vec!["u1".to_string()],
                text: "Rings have two operations.".to_string(),
                degraded: false,
            }],
            context: String::new(),
            producer_count: 2,
            feedback: vec![],
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let a = render_prompt(&request());
        let b = render_prompt(&request());
        assert_eq!(a, b);
        assert_eq!(prompt_digest(&a), prompt_digest(&b));
        assert_eq!(prompt_digest(&a).len(), 64);
        assert!(a.contains("alpha:g1 target=math/algebra (leaf)"));
    }

    #[test]
    fn test_feedback_changes_prompt() {
        let base = request();
        let retry = base.with_feedback(vec![Finding::new(
            CheckCategory::VocabularyViolation,
            "confidence",
            "confidence 'sure' is not one of: full, majority, low",
        )]);
        let prompt = render_prompt(&retry);
        assert!(prompt.contains("previous answer was rejected"));
        assert_ne!(prompt, render_prompt(&base));
    }

    #[test]
    fn test_raw_verdict_keeps_unknown_confidence() {
        let verdict: RawVerdict =
            serde_json::from_str(r#"{"confidence": "rejected", "kept": false}"#).unwrap();
        assert_eq!(verdict.confidence, "rejected");
        assert_eq!(verdict.kept, Some(false));
        assert!(verdict.chosen.is_none());
    }
}
