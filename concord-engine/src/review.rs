//! Human review gate: review items and corrections
//!
//! A record lists the items a human should look at. A reviewer answers with
//! a [`Correction`] against one specific version; applying it yields a new
//! version and leaves the original untouched.

use crate::taxonomy::LeafCatalog;
use crate::types::{
    AgreementLabel, ArbitrationDecision, Confidence, ConsensusRecord, GroupingRef, ItemBasis,
    ReviewReason,
};
use crate::validators::StructuralValidator;
use crate::workflow::consensus::{flag_draft_findings, seal};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

/// One item requiring human attention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub item_id: String,
    pub reasons: Vec<ReviewReason>,
    pub confidence: Confidence,
    pub label: AgreementLabel,
    pub kept: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
}

/// Flat list of the record's items flagged for review, in item order
pub fn review_items(record: &ConsensusRecord) -> Vec<ReviewItem> {
    record
        .items
        .iter()
        .filter(|item| item.needs_review)
        .map(|item| ReviewItem {
            item_id: item.item_id.clone(),
            reasons: item.review_reasons.clone(),
            confidence: item.confidence,
            label: item.label,
            kept: item.kept,
            decision_id: item.decision_id.clone(),
        })
        .collect()
}

/// What a reviewer did with one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionAction {
    /// Accept the item as it stands
    Confirm,
    /// Move the item to another leaf
    SetTarget,
    /// Pick one of the item's member groupings
    Select,
    /// Keep a discarded item
    Keep,
    /// Discard the item
    Discard,
}

impl CorrectionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CorrectionAction::Confirm => "confirm",
            CorrectionAction::SetTarget => "set_target",
            CorrectionAction::Select => "select",
            CorrectionAction::Keep => "keep",
            CorrectionAction::Discard => "discard",
        }
    }
}

/// One corrected item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub item_id: String,
    pub action: CorrectionAction,
    /// Required for `set_target`
    #[serde(default)]
    pub target: Option<String>,
    /// Required for `select`
    #[serde(default)]
    pub chosen: Option<GroupingRef>,
    #[serde(default)]
    pub note: String,
}

/// A reviewer's answer to one record version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub segment_id: String,
    pub base_version: u32,
    pub reviewer: String,
    pub entries: Vec<CorrectionEntry>,
}

/// Rejected corrections
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrectionError {
    #[error("Unknown segment: {0}")]
    UnknownSegment(String),

    #[error("Correction is based on version {base}, but version {active} is active")]
    StaleBaseVersion { base: u32, active: u32 },

    #[error("Unknown item: {0}")]
    UnknownItem(String),

    #[error("Invalid target for {item_id}: {message}")]
    InvalidTarget { item_id: String, message: String },

    #[error("Invalid action for {item_id}: {message}")]
    InvalidAction { item_id: String, message: String },

    #[error("Correction has no entries")]
    EmptyCorrection,
}

/// Apply a correction to the active record
///
/// # Arguments
/// * `active` - the segment's active record
/// * `correction` - the reviewer's correction; `base_version` must equal
///   `active.version`
/// * `catalog` - taxonomy leaves, for target checks
///
/// # Returns
/// The new version (`active.version + 1`), sealed.
pub fn apply_correction(
    active: &ConsensusRecord,
    correction: &Correction,
    catalog: &dyn LeafCatalog,
) -> Result<ConsensusRecord, CorrectionError> {
    if correction.segment_id != active.segment_id {
        return Err(CorrectionError::UnknownSegment(correction.segment_id.clone()));
    }
    if correction.base_version != active.version {
        return Err(CorrectionError::StaleBaseVersion {
            base: correction.base_version,
            active: active.version,
        });
    }
    if correction.entries.is_empty() {
        return Err(CorrectionError::EmptyCorrection);
    }

    let mut next = active.clone();
    next.version = active.version + 1;
    next.supersedes = Some(active.version);

    for entry in &correction.entries {
        let index = next
            .items
            .iter()
            .position(|item| item.item_id == entry.item_id)
            .ok_or_else(|| CorrectionError::UnknownItem(entry.item_id.clone()))?;
        let decision = correct_item(&mut next, index, entry, correction, catalog)?;
        next.decisions.push(decision);
    }

    // Findings of the base version no longer describe the corrected items
    next.draft_findings =
        StructuralValidator::new(catalog).validate_draft(&next.items, &next.producer_runs);
    flag_draft_findings(&mut next.items, &next.draft_findings);

    next.status = ConsensusRecord::derive_status(&next.items);
    seal(&mut next).map_err(|e| CorrectionError::InvalidAction {
        item_id: String::new(),
        message: e.to_string(),
    })?;

    info!(
        segment_id = %next.segment_id,
        version = next.version,
        reviewer = %correction.reviewer,
        entries = correction.entries.len(),
        "Correction applied"
    );
    Ok(next)
}

fn correct_item(
    record: &mut ConsensusRecord,
    index: usize,
    entry: &CorrectionEntry,
    correction: &Correction,
    catalog: &dyn LeafCatalog,
) -> Result<ArbitrationDecision, CorrectionError> {
    let invalid = |message: &str| CorrectionError::InvalidAction {
        item_id: entry.item_id.clone(),
        message: message.to_string(),
    };

    // Resolve a newly selected grouping before borrowing the item mutably
    let selected = match entry.action {
        CorrectionAction::Select => {
            let chosen = entry
                .chosen
                .as_ref()
                .ok_or_else(|| invalid("select requires 'chosen'"))?;
            if !record.items[index].members.contains(chosen) {
                return Err(invalid("chosen grouping is not a member of this item"));
            }
            let grouping = record
                .grouping(chosen)
                .cloned()
                .ok_or_else(|| invalid("chosen grouping has no producer result"))?;
            Some((chosen.clone(), grouping))
        }
        _ => None,
    };

    let item = &mut record.items[index];
    let mut target = None;

    match entry.action {
        CorrectionAction::Confirm => {
            if item.grouping.is_none() && item.kept {
                return Err(invalid("an escalated item must be resolved with select"));
            }
        }
        CorrectionAction::SetTarget => {
            let leaf = entry.target.as_deref().ok_or_else(|| invalid("set_target requires 'target'"))?;
            if !catalog.is_valid_leaf(leaf) {
                return Err(CorrectionError::InvalidTarget {
                    item_id: entry.item_id.clone(),
                    message: format!("'{}' is not a taxonomy leaf", leaf),
                });
            }
            let grouping = item
                .grouping
                .as_mut()
                .ok_or_else(|| invalid("item has no grouping; select one first"))?;
            grouping.target = leaf.to_string();
            item.kept = true;
            target = Some(leaf.to_string());
        }
        CorrectionAction::Select => {
            if let Some((chosen, grouping)) = selected {
                item.chosen = Some(chosen);
                item.grouping = Some(grouping);
                item.kept = true;
            }
        }
        CorrectionAction::Keep => {
            if item.grouping.is_none() {
                return Err(invalid("item has no grouping; select one first"));
            }
            item.kept = true;
        }
        CorrectionAction::Discard => {
            item.kept = false;
        }
    }

    item.confidence = if item.kept {
        Confidence::Full
    } else {
        Confidence::Low
    };
    item.basis = ItemBasis::Corrected;
    item.needs_review = false;
    item.review_reasons.clear();

    let decision_id = format!("{}/v{}", item.item_id, record.version);
    item.decision_id = Some(decision_id.clone());

    let rationale = if entry.note.is_empty() {
        format!("{} by reviewer", entry.action.as_str())
    } else {
        entry.note.clone()
    };

    Ok(ArbitrationDecision {
        decision_id,
        case: item.label,
        considered: item.members.clone(),
        chosen: item.chosen.clone(),
        target,
        extent: None,
        kept: item.kept,
        confidence: item.confidence,
        rationale,
        judge: format!("review:{}", correction.reviewer),
        attempts: 1,
        prompt_digest: String::new(),
        escalated: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;
    use crate::types::{
        AdjudicatedItem, ExtractionResult, Grouping, GroupingKind, Member, ProducerAttempt,
        ProducerRun, RecordStatus, RunStatus, Unit, UnitType,
    };
    use crate::validators::{CheckCategory, Finding};

    fn grouping(target: &str) -> Grouping {
        Grouping {
            id: "g1".to_string(),
            target: target.to_string(),
            kind: GroupingKind::Primary,
            members: vec![Member::content("u1")],
            duplication_cluster: None,
            shared_evidence: false,
        }
    }

    fn record() -> ConsensusRecord {
        let run = |producer: &str, target: &str| ProducerRun {
            producer_id: producer.to_string(),
            status: RunStatus::Accepted,
            attempts: vec![ProducerAttempt {
                attempt: 0,
                result: ExtractionResult {
                    producer_id: producer.to_string(),
                    segment_id: "s1".to_string(),
                    units: vec![Unit {
                        id: "u1".to_string(),
                        unit_type: UnitType::Sentence,
                        text: "Rings have two binary operations.".to_string(),
                        layer: "body".to_string(),
                        start: 0,
                        end: 33,
                        fused: None,
                    }],
                    groupings: vec![grouping(target)],
                    exclusions: vec![],
                },
                findings: vec![],
            }],
            degraded_reason: None,
        };

        let mut record = ConsensusRecord {
            segment_id: "s1".to_string(),
            version: 1,
            supersedes: None,
            status: RecordStatus::NeedsReview,
            items: vec![AdjudicatedItem {
                item_id: "s1/0".to_string(),
                label: AgreementLabel::PlacementDisagreement,
                members: vec![GroupingRef::new("a", "g1"), GroupingRef::new("b", "g1")],
                chosen: None,
                grouping: None,
                kept: true,
                confidence: Confidence::Low,
                basis: ItemBasis::Escalated,
                score: Some(1.0),
                decision_id: Some("s1/0".to_string()),
                needs_review: true,
                review_reasons: vec![ReviewReason::Escalated],
            }],
            decisions: vec![],
            producer_runs: vec![run("a", "math/algebra"), run("b", "math/geometry")],
            producer_failures: vec![],
            comparisons: vec![],
            draft_findings: vec![],
            content_hash: String::new(),
        };
        seal(&mut record).unwrap();
        record
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_paths(["math/algebra", "math/geometry"]).unwrap()
    }

    fn correction(entries: Vec<CorrectionEntry>) -> Correction {
        Correction {
            segment_id: "s1".to_string(),
            base_version: 1,
            reviewer: "kim".to_string(),
            entries,
        }
    }

    fn entry(action: CorrectionAction) -> CorrectionEntry {
        CorrectionEntry {
            item_id: "s1/0".to_string(),
            action,
            target: None,
            chosen: None,
            note: String::new(),
        }
    }

    #[test]
    fn test_review_items_lists_flagged() {
        let items = review_items(&record());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].reasons, vec![ReviewReason::Escalated]);
    }

    #[test]
    fn test_select_then_new_version() {
        let active = record();
        let mut select = entry(CorrectionAction::Select);
        select.chosen = Some(GroupingRef::new("b", "g1"));

        let next = apply_correction(&active, &correction(vec![select]), &taxonomy()).unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(next.supersedes, Some(1));
        assert_eq!(next.status, RecordStatus::Reconciled);

        let item = &next.items[0];
        assert_eq!(item.confidence, Confidence::Full);
        assert_eq!(item.basis, ItemBasis::Corrected);
        assert_eq!(item.grouping.as_ref().unwrap().target, "math/geometry");

        let decision = next.decisions.last().unwrap();
        assert_eq!(decision.judge, "review:kim");
        assert_eq!(decision.decision_id, "s1/0/v2");
        assert_ne!(next.content_hash, active.content_hash);

        // Original untouched
        assert_eq!(active.items[0].confidence, Confidence::Low);
    }

    #[test]
    fn test_correction_revalidates_draft() {
        let mut active = record();
        active.draft_findings = vec![Finding::new(
            CheckCategory::NonLeafTarget,
            "s1/0",
            "target 'math' is not a taxonomy leaf",
        )];
        seal(&mut active).unwrap();

        let mut select = entry(CorrectionAction::Select);
        select.chosen = Some(GroupingRef::new("a", "g1"));
        let next = apply_correction(&active, &correction(vec![select]), &taxonomy()).unwrap();
        assert!(next.draft_findings.is_empty());
        assert_eq!(next.status, RecordStatus::Reconciled);

        // A selected grouping whose unit is gone is flagged again
        let mut broken = record();
        broken.producer_runs[1].attempts[0].result.units.clear();
        seal(&mut broken).unwrap();
        let mut select = entry(CorrectionAction::Select);
        select.chosen = Some(GroupingRef::new("b", "g1"));
        let next = apply_correction(&broken, &correction(vec![select]), &taxonomy()).unwrap();

        assert!(next
            .draft_findings
            .iter()
            .any(|f| f.check == CheckCategory::GhostReference && f.subject == "s1/0/u1"));
        assert!(next.items[0].needs_review);
        assert_eq!(next.items[0].review_reasons, vec![ReviewReason::DraftFinding]);
        assert_eq!(next.status, RecordStatus::NeedsReview);
    }

    #[test]
    fn test_discard_is_low() {
        let next =
            apply_correction(&record(), &correction(vec![entry(CorrectionAction::Discard)]), &taxonomy())
                .unwrap();
        assert!(!next.items[0].kept);
        assert_eq!(next.items[0].confidence, Confidence::Low);
        assert!(!next.items[0].needs_review);
    }

    #[test]
    fn test_rejections() {
        let active = record();

        let mut stale = correction(vec![entry(CorrectionAction::Discard)]);
        stale.base_version = 0;
        assert_eq!(
            apply_correction(&active, &stale, &taxonomy()),
            Err(CorrectionError::StaleBaseVersion { base: 0, active: 1 })
        );

        let mut unknown = entry(CorrectionAction::Discard);
        unknown.item_id = "s1/9".to_string();
        assert_eq!(
            apply_correction(&active, &correction(vec![unknown]), &taxonomy()),
            Err(CorrectionError::UnknownItem("s1/9".to_string()))
        );

        assert_eq!(
            apply_correction(&active, &correction(vec![]), &taxonomy()),
            Err(CorrectionError::EmptyCorrection)
        );

        let mut select = entry(CorrectionAction::Select);
        select.chosen = Some(GroupingRef::new("a", "g1"));
        let mut set = entry(CorrectionAction::SetTarget);
        set.target = Some("math".to_string());
        assert!(matches!(
            apply_correction(&active, &correction(vec![select, set]), &taxonomy()),
            Err(CorrectionError::InvalidTarget { .. })
        ));

        assert!(matches!(
            apply_correction(&active, &correction(vec![entry(CorrectionAction::Confirm)]), &taxonomy()),
            Err(CorrectionError::InvalidAction { .. })
        ));
    }
}
