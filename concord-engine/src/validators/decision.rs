//! Validation of raw judge verdicts
//!
//! A verdict passes through the same categories as an extraction result:
//! references must resolve, enumerated values must be in vocabulary, targets
//! must be leaves, and the verdict must actually name an outcome.

use super::structural::vocabulary_finding;
use super::{CheckCategory, Finding};
use crate::arbitration::judge::{JudgeRequest, RawVerdict};
use crate::taxonomy::LeafCatalog;
use crate::types::{AgreementLabel, Confidence};
use std::collections::{HashMap, HashSet};

/// Unit ids of each producer's final result
pub type UnitPool = HashMap<String, HashSet<String>>;

/// Validate a verdict against the request it answers
///
/// # Arguments
/// * `verdict` - raw judge output
/// * `request` - the request the verdict answers
/// * `units` - unit ids per producer, for extent references
/// * `catalog` - taxonomy leaves
pub fn validate_verdict(
    verdict: &RawVerdict,
    request: &JudgeRequest,
    units: &UnitPool,
    catalog: &dyn LeafCatalog,
) -> Vec<Finding> {
    let mut findings = Vec::new();

    // Resolve the candidate the verdict refers to
    let chosen = match &verdict.chosen {
        Some(reference) => match request.candidate(reference) {
            Some(candidate) => Some(candidate),
            None => {
                findings.push(Finding::new(
                    CheckCategory::GhostReference,
                    "chosen",
                    format!("{} is not one of the candidates", reference),
                ));
                None
            }
        },
        None if request.candidates.len() == 1 => request.candidates.first(),
        None => None,
    };

    if let Some(extent) = &verdict.extent {
        match chosen {
            Some(candidate) => {
                let pool = units.get(&candidate.reference.producer_id);
                for unit_id in extent {
                    if !pool.map(|p| p.contains(unit_id)).unwrap_or(false) {
                        findings.push(Finding::new(
                            CheckCategory::GhostReference,
                            format!("extent/{}", unit_id),
                            format!(
                                "unit does not exist in {}'s result",
                                candidate.reference.producer_id
                            ),
                        ));
                    }
                }
            }
            None if verdict.chosen.is_none() => findings.push(Finding::new(
                CheckCategory::GhostReference,
                "extent",
                "extent given without a chosen candidate",
            )),
            None => {}
        }
    }

    let discarded = verdict.kept == Some(false);
    let names_outcome = match request.case {
        AgreementLabel::PlacementDisagreement => {
            verdict.chosen.is_some() || verdict.target.is_some()
        }
        AgreementLabel::ContentDisagreement => verdict.chosen.is_some() || discarded,
        AgreementLabel::Unmatched => verdict.kept.is_some(),
        AgreementLabel::FullAgreement => true,
    };
    if !names_outcome {
        findings.push(Finding::new(
            CheckCategory::EmptyContent,
            "outcome",
            format!("verdict names no outcome for a {} case", request.case),
        ));
    }

    if matches!(&verdict.extent, Some(extent) if extent.is_empty()) {
        findings.push(Finding::new(
            CheckCategory::EmptyContent,
            "extent",
            "extent is empty",
        ));
    }

    if !discarded {
        let effective_target = verdict
            .target
            .as_deref()
            .or_else(|| chosen.map(|c| c.target.as_str()));
        if let Some(target) = effective_target {
            if !catalog.is_valid_leaf(target) {
                findings.push(Finding::new(
                    CheckCategory::NonLeafTarget,
                    "target",
                    format!("target '{}' is not a taxonomy leaf", target),
                ));
            }
        }
    }

    if Confidence::parse(&verdict.confidence).is_none() {
        findings.push(vocabulary_finding(
            "confidence",
            "confidence",
            &verdict.confidence,
            &Confidence::ALLOWED,
        ));
    }

    findings.sort_by(|a, b| a.check.cmp(&b.check));
    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbitration::judge::Candidate;
    use crate::taxonomy::Taxonomy;
    use crate::types::GroupingRef;

    fn candidate(producer: &str, target: &str) -> Candidate {
        Candidate {
            reference: GroupingRef::new(producer, "g1"),
            target: target.to_string(),
            target_is_leaf: true,
            kind: "primary".to_string(),
            unit_ids: vec!["u1".to_string()],
            text: "Rings have two operations.".to_string(),
            degraded: false,
        }
    }

    fn request(case: AgreementLabel, candidates: Vec<Candidate>) -> JudgeRequest {
        JudgeRequest {
            segment_id: "s1".to_string(),
            decision_id: "s1/0".to_string(),
            case,
            candidates,
            context: String::new(),
            producer_count: 2,
            feedback: vec![],
        }
    }

    fn pool() -> UnitPool {
        let mut pool = UnitPool::new();
        pool.insert("a".to_string(), ["u1", "u2"].iter().map(|s| s.to_string()).collect());
        pool.insert("b".to_string(), ["u1"].iter().map(|s| s.to_string()).collect());
        pool
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_paths(["math/algebra", "math/geometry"]).unwrap()
    }

    #[test]
    fn test_valid_placement_verdict() {
        let req = request(
            AgreementLabel::PlacementDisagreement,
            vec![candidate("a", "math/algebra"), candidate("b", "math/geometry")],
        );
        let verdict = RawVerdict {
            chosen: Some(GroupingRef::new("a", "g1")),
            confidence: "majority".to_string(),
            ..Default::default()
        };
        assert!(validate_verdict(&verdict, &req, &pool(), &taxonomy()).is_empty());
    }

    #[test]
    fn test_out_of_enum_confidence_rejected() {
        let req = request(AgreementLabel::Unmatched, vec![candidate("a", "math/algebra")]);
        let verdict = RawVerdict {
            kept: Some(false),
            confidence: "rejected".to_string(),
            ..Default::default()
        };
        let findings = validate_verdict(&verdict, &req, &pool(), &taxonomy());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, CheckCategory::VocabularyViolation);
        assert!(findings[0].repairable);
    }

    #[test]
    fn test_unknown_chosen_and_bad_extent() {
        let req = request(
            AgreementLabel::ContentDisagreement,
            vec![candidate("a", "math/algebra"), candidate("b", "math/algebra")],
        );
        let verdict = RawVerdict {
            chosen: Some(GroupingRef::new("b", "g1")),
            extent: Some(vec!["u2".to_string()]),
            confidence: "low".to_string(),
            ..Default::default()
        };
        let findings = validate_verdict(&verdict, &req, &pool(), &taxonomy());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].subject, "extent/u2");

        let verdict = RawVerdict {
            chosen: Some(GroupingRef::new("c", "g9")),
            confidence: "low".to_string(),
            ..Default::default()
        };
        let findings = validate_verdict(&verdict, &req, &pool(), &taxonomy());
        assert_eq!(findings[0].subject, "chosen");
    }

    #[test]
    fn test_missing_outcome_and_non_leaf_target() {
        let req = request(
            AgreementLabel::PlacementDisagreement,
            vec![candidate("a", "math/algebra"), candidate("b", "math/geometry")],
        );
        let verdict = RawVerdict {
            confidence: "low".to_string(),
            ..Default::default()
        };
        let findings = validate_verdict(&verdict, &req, &pool(), &taxonomy());
        assert_eq!(findings[0].check, CheckCategory::EmptyContent);

        let verdict = RawVerdict {
            target: Some("math".to_string()),
            confidence: "low".to_string(),
            ..Default::default()
        };
        let findings = validate_verdict(&verdict, &req, &pool(), &taxonomy());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].check, CheckCategory::NonLeafTarget);
    }
}
