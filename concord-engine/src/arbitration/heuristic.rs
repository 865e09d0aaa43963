//! Deterministic offline judge
//!
//! - **Placement:** prefer the leaf whose path shares the most keywords with
//!   the candidates' content, then the leaf more producers chose.
//! - **Content:** prefer the candidate whose extent covers most of the
//!   others' content.
//! - **Unmatched:** keep when the target is a valid leaf and the content is
//!   substantive; otherwise discard.

use super::judge::{Candidate, Judge, JudgeError, JudgeRequest, RawVerdict};
use crate::alignment::{normalize, Fingerprint, DEFAULT_SHINGLE_WIDTH};
use crate::matching::same_target;
use crate::types::AgreementLabel;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Content shorter than this (normalized chars) is not substantive
pub const MIN_SUBSTANTIVE_CHARS: usize = 24;

/// Coverage margin for a clear extent decision
const CLEAR_COVERAGE_MARGIN: f64 = 0.10;

/// Keyword prefix length used as a crude stem
const STEM_CHARS: usize = 6;

const STOPWORDS: &[&str] = &[
    "and", "are", "but", "for", "from", "has", "have", "into", "its", "not", "of", "that", "the",
    "their", "then", "there", "these", "this", "was", "were", "which", "with",
];

/// Built-in heuristic judge
#[derive(Debug, Clone)]
pub struct HeuristicJudge {
    name: String,
}

impl HeuristicJudge {
    pub fn new() -> Self {
        Self {
            name: "heuristic".to_string(),
        }
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn placement(&self, request: &JudgeRequest) -> RawVerdict {
        let content: String = request
            .candidates
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let content_words = keywords(&content);

        // (candidate index, keyword overlap, producer support)
        let mut options: Vec<(usize, usize, usize)> = Vec::new();
        for (index, candidate) in request.candidates.iter().enumerate() {
            if !candidate.target_is_leaf {
                continue;
            }
            if options
                .iter()
                .any(|&(i, _, _)| same_target(&request.candidates[i].target, &candidate.target))
            {
                continue;
            }
            let overlap = keywords(&candidate.target)
                .intersection(&content_words)
                .count();
            let support = request
                .candidates
                .iter()
                .filter(|c| same_target(&c.target, &candidate.target))
                .count();
            options.push((index, overlap, support));
        }

        options.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));

        let Some(&(winner, overlap, support)) = options.first() else {
            return RawVerdict {
                chosen: request.candidates.first().map(|c| c.reference.clone()),
                confidence: "low".to_string(),
                rationale: "no candidate target is a taxonomy leaf".to_string(),
                ..Default::default()
            };
        };

        let clear = match options.get(1) {
            Some(&(_, runner_overlap, runner_support)) => {
                overlap > runner_overlap || (overlap == runner_overlap && support > runner_support)
            }
            None => true,
        };

        let candidate = &request.candidates[winner];
        RawVerdict {
            chosen: Some(candidate.reference.clone()),
            target: Some(candidate.target.clone()),
            extent: None,
            kept: Some(true),
            confidence: if clear { "majority" } else { "low" }.to_string(),
            rationale: format!(
                "target {} shares {} keyword(s) with the content and is chosen by {} of {} candidate(s)",
                candidate.target,
                overlap,
                support,
                request.candidates.len()
            ),
        }
    }

    fn content(&self, request: &JudgeRequest) -> RawVerdict {
        let prints: Vec<Fingerprint> = request
            .candidates
            .iter()
            .map(|c| Fingerprint::of(&c.text, DEFAULT_SHINGLE_WIDTH))
            .collect();

        let mut coverage: Vec<(usize, f64)> = prints
            .iter()
            .enumerate()
            .map(|(i, own)| {
                let others: Vec<f64> = prints
                    .iter()
                    .enumerate()
                    .filter(|(j, other)| *j != i && !other.is_empty())
                    .map(|(_, other)| {
                        let shared = own.shingles().intersection(other.shingles()).count();
                        shared as f64 / other.len() as f64
                    })
                    .collect();
                let mean = if others.is_empty() {
                    0.0
                } else {
                    others.iter().sum::<f64>() / others.len() as f64
                };
                (i, mean)
            })
            .collect();

        coverage.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let Some(&(winner, best)) = coverage.first() else {
            return RawVerdict {
                kept: Some(false),
                confidence: "low".to_string(),
                rationale: "no candidates".to_string(),
                ..Default::default()
            };
        };
        let runner_up = coverage.get(1).map(|c| c.1).unwrap_or(0.0);
        let clear = best - runner_up >= CLEAR_COVERAGE_MARGIN;

        let candidate = &request.candidates[winner];
        RawVerdict {
            chosen: Some(candidate.reference.clone()),
            target: None,
            extent: None,
            kept: Some(true),
            confidence: if clear { "majority" } else { "low" }.to_string(),
            rationale: format!(
                "{} covers {:.0}% of the other candidates' content (next best {:.0}%)",
                candidate.reference,
                best * 100.0,
                runner_up * 100.0
            ),
        }
    }

    fn unmatched(&self, request: &JudgeRequest) -> RawVerdict {
        let Some(candidate) = request.candidates.first() else {
            return RawVerdict {
                kept: Some(false),
                confidence: "low".to_string(),
                rationale: "no candidates".to_string(),
                ..Default::default()
            };
        };

        let substantive = normalize(&candidate.text).chars().count() >= MIN_SUBSTANTIVE_CHARS;
        let keep = candidate.target_is_leaf && substantive;

        let rationale = match (candidate.target_is_leaf, substantive) {
            (true, true) => "content is substantive and placed on a valid leaf".to_string(),
            (false, _) => format!("target '{}' is not a valid leaf", candidate.target),
            (true, false) => "content is too short to stand on its own".to_string(),
        };

        RawVerdict {
            chosen: Some(candidate.reference.clone()),
            target: None,
            extent: None,
            kept: Some(keep),
            confidence: if keep && !candidate.degraded {
                "majority"
            } else {
                "low"
            }
            .to_string(),
            rationale,
        }
    }
}

impl Default for HeuristicJudge {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Judge for HeuristicJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(&self, request: &JudgeRequest) -> Result<RawVerdict, JudgeError> {
        Ok(match request.case {
            AgreementLabel::PlacementDisagreement => self.placement(request),
            AgreementLabel::ContentDisagreement => self.content(request),
            AgreementLabel::Unmatched => self.unmatched(request),
            AgreementLabel::FullAgreement => RawVerdict {
                chosen: request.candidates.first().map(|c: &Candidate| c.reference.clone()),
                kept: Some(true),
                confidence: "majority".to_string(),
                rationale: "candidates agree".to_string(),
                ..Default::default()
            },
        })
    }
}

/// Stemmed keywords of a text or taxonomy path
fn keywords(text: &str) -> BTreeSet<String> {
    normalize(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3 && !STOPWORDS.contains(w))
        .map(|w| w.chars().take(STEM_CHARS).collect())
        .collect()
}
