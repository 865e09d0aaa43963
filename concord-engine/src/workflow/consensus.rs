//! Consensus record assembly
//!
//! Applies arbitration decisions to the draft items, downgrades items that
//! draw on degraded results, validates the adjudicated draft, and seals the
//! record with a content hash. Nothing here edits producer data: winning
//! groupings are cloned, and overrides are applied to the clone.

use super::reconcile::Draft;
use crate::taxonomy::LeafCatalog;
use crate::types::{
    AdjudicatedItem, ArbitrationDecision, Confidence, ConsensusRecord, ItemBasis, Member,
    ProducerFailure, ProducerRun, ReviewReason, Role,
};
use crate::validators::{Finding, StructuralValidator};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Complete an undecided item from its decision
pub fn apply_decision(item: &mut AdjudicatedItem, decision: &ArbitrationDecision, runs: &[ProducerRun]) {
    item.decision_id = Some(decision.decision_id.clone());
    item.kept = decision.kept;
    item.confidence = decision.confidence;

    if decision.escalated {
        item.chosen = None;
        item.grouping = None;
        item.kept = true;
        item.confidence = Confidence::Low;
        item.basis = ItemBasis::Escalated;
        item.flag(ReviewReason::Escalated);
        return;
    }

    let chosen = decision
        .chosen
        .clone()
        .or_else(|| item.members.first().cloned());
    let grouping = chosen.as_ref().and_then(|reference| {
        runs.iter()
            .find(|run| run.producer_id == reference.producer_id)
            .and_then(ProducerRun::final_result)
            .and_then(|result| result.grouping(&reference.grouping_id))
            .cloned()
    });

    item.grouping = grouping.map(|mut grouping| {
        if let Some(target) = &decision.target {
            grouping.target = target.clone();
        }
        if let Some(extent) = &decision.extent {
            let extent_ids: HashSet<&str> = extent.iter().map(String::as_str).collect();
            let mut members: Vec<Member> =
                extent.iter().map(|id| Member::content(id.as_str())).collect();
            members.extend(
                grouping
                    .members
                    .iter()
                    .filter(|m| m.role != Role::Content && !extent_ids.contains(m.unit_id.as_str()))
                    .cloned(),
            );
            grouping.members = members;
        }
        grouping
    });
    item.chosen = chosen;
    item.basis = ItemBasis::Arbitrated;
    item.flag(ReviewReason::Arbitrated);
}

/// Downgrade and flag items that include a grouping from a degraded result
pub fn downgrade_degraded(items: &mut [AdjudicatedItem], runs: &[ProducerRun]) {
    let degraded: HashSet<&str> = runs
        .iter()
        .filter(|run| run.is_degraded())
        .map(|run| run.producer_id.as_str())
        .collect();
    if degraded.is_empty() {
        return;
    }

    for item in items.iter_mut() {
        if item
            .members
            .iter()
            .any(|m| degraded.contains(m.producer_id.as_str()))
        {
            item.confidence = item.confidence.downgrade();
            item.flag(ReviewReason::DegradedSource);
        }
    }
}

/// SHA-256 hex of a record's canonical JSON with the hash field empty
pub fn content_hash(record: &ConsensusRecord) -> Result<String, serde_json::Error> {
    let mut unsealed = record.clone();
    unsealed.content_hash = String::new();
    let bytes = serde_json::to_vec(&unsealed)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Recompute and store the content hash
pub fn seal(record: &mut ConsensusRecord) -> Result<(), serde_json::Error> {
    record.content_hash = content_hash(record)?;
    Ok(())
}

/// Assemble the version-1 record for a segment
///
/// # Arguments
/// * `segment_id` - the segment being reconciled
/// * `runs` - usable producer runs, sorted by producer id
/// * `failures` - producers that contributed nothing
/// * `draft` - pre-arbitration items and comparisons
/// * `decisions` - one decision per draft request, in request order
/// * `catalog` - taxonomy leaves, for draft validation
/// Flag every item a draft finding refers to
pub fn flag_draft_findings(items: &mut [AdjudicatedItem], findings: &[Finding]) {
    for finding in findings {
        if let Some(item) = items.iter_mut().find(|item| {
            finding.subject == item.item_id
                || finding.subject.starts_with(&format!("{}/", item.item_id))
        }) {
            item.flag(ReviewReason::DraftFinding);
        }
    }
}

pub fn assemble(
    segment_id: &str,
    runs: Vec<ProducerRun>,
    failures: Vec<ProducerFailure>,
    draft: Draft,
    decisions: Vec<ArbitrationDecision>,
    catalog: &dyn LeafCatalog,
) -> Result<ConsensusRecord, serde_json::Error> {
    let Draft {
        comparisons,
        mut items,
        requests: _,
    } = draft;

    for item in items.iter_mut() {
        let Some(decision_id) = item.decision_id.clone() else {
            continue;
        };
        match decisions.iter().find(|d| d.decision_id == decision_id) {
            Some(decision) => apply_decision(item, decision, &runs),
            None => {
                warn!(%decision_id, "No decision for item; leaving escalated");
                item.flag(ReviewReason::Escalated);
            }
        }
    }

    downgrade_degraded(&mut items, &runs);

    for item in items.iter_mut() {
        if item.confidence == Confidence::Low {
            item.flag(ReviewReason::LowConfidence);
        }
    }

    let draft_findings = StructuralValidator::new(catalog).validate_draft(&items, &runs);
    flag_draft_findings(&mut items, &draft_findings);

    let status = ConsensusRecord::derive_status(&items);
    let mut record = ConsensusRecord {
        segment_id: segment_id.to_string(),
        version: 1,
        supersedes: None,
        status,
        items,
        decisions,
        producer_runs: runs,
        producer_failures: failures,
        comparisons: comparisons.iter().map(|set| set.summary()).collect(),
        draft_findings,
        content_hash: String::new(),
    };
    seal(&mut record)?;

    debug!(
        segment_id,
        items = record.items.len(),
        status = record.status.as_str(),
        hash = %record.content_hash,
        "Consensus record assembled"
    );
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AgreementLabel, ExtractionResult, Grouping, GroupingKind, GroupingRef, ProducerAttempt,
        RecordStatus, RunStatus,
    };

    fn run(producer: &str, status: RunStatus) -> ProducerRun {
        ProducerRun {
            producer_id: producer.to_string(),
            status,
            attempts: vec![ProducerAttempt {
                attempt: 0,
                result: ExtractionResult {
                    producer_id: producer.to_string(),
                    segment_id: "s1".to_string(),
                    units: vec![],
                    groupings: vec![Grouping {
                        id: "g1".to_string(),
                        target: "math/algebra".to_string(),
                        kind: GroupingKind::Primary,
                        members: vec![Member::content("u1"), Member::context("u2")],
                        duplication_cluster: None,
                        shared_evidence: false,
                    }],
                    exclusions: vec![],
                },
                findings: vec![],
            }],
            degraded_reason: None,
        }
    }

    fn pending(members: &[&str]) -> AdjudicatedItem {
        AdjudicatedItem {
            item_id: "s1/0".to_string(),
            label: AgreementLabel::ContentDisagreement,
            members: members.iter().map(|p| GroupingRef::new(*p, "g1")).collect(),
            chosen: None,
            grouping: None,
            kept: true,
            confidence: Confidence::Low,
            basis: ItemBasis::Escalated,
            score: Some(0.6),
            decision_id: Some("s1/0".to_string()),
            needs_review: false,
            review_reasons: vec![],
        }
    }

    fn decision() -> ArbitrationDecision {
        ArbitrationDecision {
            decision_id: "s1/0".to_string(),
            case: AgreementLabel::ContentDisagreement,
            considered: vec![GroupingRef::new("a", "g1"), GroupingRef::new("b", "g1")],
            chosen: Some(GroupingRef::new("b", "g1")),
            target: Some("math/geometry".to_string()),
            extent: Some(vec!["u3".to_string()]),
            kept: true,
            confidence: Confidence::Majority,
            rationale: "b covers more".to_string(),
            judge: "test".to_string(),
            attempts: 1,
            prompt_digest: String::new(),
            escalated: false,
        }
    }

    #[test]
    fn test_decision_overrides_apply_to_clone() {
        let runs = vec![run("a", RunStatus::Accepted), run("b", RunStatus::Accepted)];
        let mut item = pending(&["a", "b"]);
        apply_decision(&mut item, &decision(), &runs);

        let grouping = item.grouping.as_ref().unwrap();
        assert_eq!(grouping.target, "math/geometry");
        assert_eq!(grouping.members[0], Member::content("u3"));
        assert_eq!(grouping.members[1], Member::context("u2"));
        assert_eq!(item.basis, ItemBasis::Arbitrated);
        assert!(item.review_reasons.contains(&ReviewReason::Arbitrated));

        let original = runs[1].final_result().unwrap().grouping("g1").unwrap();
        assert_eq!(original.target, "math/algebra");
    }

    #[test]
    fn test_escalated_decision_leaves_placeholder() {
        let runs = vec![run("a", RunStatus::Accepted)];
        let mut item = pending(&["a", "b"]);
        let mut escalated = decision();
        escalated.escalated = true;
        apply_decision(&mut item, &escalated, &runs);
        assert!(item.grouping.is_none());
        assert_eq!(item.confidence, Confidence::Low);
        assert!(item.needs_review);
    }

    #[test]
    fn test_degraded_members_downgrade() {
        let runs = vec![run("a", RunStatus::Degraded), run("b", RunStatus::Accepted)];
        let mut items = vec![pending(&["a", "b"]), pending(&["b"])];
        items[0].confidence = Confidence::Full;
        items[1].confidence = Confidence::Full;
        downgrade_degraded(&mut items, &runs);
        assert_eq!(items[0].confidence, Confidence::Majority);
        assert!(items[0].review_reasons.contains(&ReviewReason::DegradedSource));
        assert_eq!(items[1].confidence, Confidence::Full);
    }

    #[test]
    fn test_hash_ignores_previous_hash() {
        let record = ConsensusRecord {
            segment_id: "s1".to_string(),
            version: 1,
            supersedes: None,
            status: RecordStatus::Reconciled,
            items: vec![],
            decisions: vec![],
            producer_runs: vec![],
            producer_failures: vec![],
            comparisons: vec![],
            draft_findings: vec![],
            content_hash: String::new(),
        };
        let mut sealed = record.clone();
        seal(&mut sealed).unwrap();
        assert_eq!(sealed.content_hash.len(), 64);
        assert_eq!(content_hash(&sealed).unwrap(), sealed.content_hash);
    }
}
