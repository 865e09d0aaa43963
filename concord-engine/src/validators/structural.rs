//! Structural validator for extraction results and consensus drafts

use super::{CheckCategory, Finding};
use crate::taxonomy::LeafCatalog;
use crate::types::{
    AdjudicatedItem, ExclusionReason, ExtractionResult, GroupingKind, ProducerRun, Role, Segment,
    UnitType,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Runs the check battery against one candidate
///
/// The taxonomy is borrowed for the duration of a validation; the segment is
/// optional and enables the offset/text check.
pub struct StructuralValidator<'a> {
    catalog: &'a dyn LeafCatalog,
    segment: Option<&'a Segment>,
}

impl<'a> StructuralValidator<'a> {
    pub fn new(catalog: &'a dyn LeafCatalog) -> Self {
        Self {
            catalog,
            segment: None,
        }
    }

    pub fn with_segment(mut self, segment: &'a Segment) -> Self {
        self.segment = Some(segment);
        self
    }

    /// Validate an extraction result
    ///
    /// # Returns
    /// Findings in battery order; empty when the result is acceptable.
    pub fn validate_result(&self, result: &ExtractionResult) -> Vec<Finding> {
        let unit_ids: HashSet<&str> = result.units.iter().map(|u| u.id.as_str()).collect();
        let mut findings = Vec::new();

        self.check_references(result, &unit_ids, &mut findings);
        check_duplicates(result, &mut findings);
        check_empty_content(result, &unit_ids, &mut findings);
        check_content_overlap(result, &unit_ids, &mut findings);
        check_coverage(result, &mut findings);
        self.check_targets(result, &mut findings);
        check_vocabularies(result, &mut findings);
        if let Some(segment) = self.segment {
            check_offsets(result, segment, &mut findings);
        }

        debug!(
            producer_id = %result.producer_id,
            segment_id = %result.segment_id,
            findings = findings.len(),
            "Structural validation complete"
        );
        findings
    }

    /// Validate the adjudicated items of a consensus draft
    ///
    /// Each kept item's grouping is checked against the final result of the
    /// producer it was chosen from.
    pub fn validate_draft(&self, items: &[AdjudicatedItem], runs: &[ProducerRun]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for item in items.iter().filter(|i| i.kept) {
            let (Some(chosen), Some(grouping)) = (&item.chosen, &item.grouping) else {
                continue;
            };

            let source = runs
                .iter()
                .find(|r| r.producer_id == chosen.producer_id)
                .and_then(ProducerRun::final_result);
            let Some(source) = source else {
                findings.push(Finding::new(
                    CheckCategory::GhostReference,
                    &item.item_id,
                    format!("chosen grouping {} has no producer result", chosen),
                ));
                continue;
            };

            let unit_ids: HashSet<&str> = source.units.iter().map(|u| u.id.as_str()).collect();
            for member in &grouping.members {
                if !unit_ids.contains(member.unit_id.as_str()) {
                    findings.push(Finding::new(
                        CheckCategory::GhostReference,
                        format!("{}/{}", item.item_id, member.unit_id),
                        format!("unit not present in {}'s result", chosen.producer_id),
                    ));
                }
            }

            if !grouping
                .content_unit_ids()
                .any(|id| unit_ids.contains(id))
            {
                findings.push(Finding::new(
                    CheckCategory::EmptyContent,
                    &item.item_id,
                    "adjudicated grouping has no content units",
                ));
            }

            if !self.catalog.is_valid_leaf(&grouping.target) {
                findings.push(Finding::new(
                    CheckCategory::NonLeafTarget,
                    &item.item_id,
                    format!("target '{}' is not a taxonomy leaf", grouping.target),
                ));
            }

            if !grouping.kind.is_recognized() {
                findings.push(vocabulary_finding(
                    &item.item_id,
                    "kind",
                    grouping.kind.as_str(),
                    GroupingKind::ALLOWED,
                ));
            }
        }

        findings.sort_by(|a, b| a.check.cmp(&b.check));
        findings
    }

    /// Check 1: ghost references and cross-layer groupings
    fn check_references(
        &self,
        result: &ExtractionResult,
        unit_ids: &HashSet<&str>,
        findings: &mut Vec<Finding>,
    ) {
        let layers: HashMap<&str, &str> = result
            .units
            .iter()
            .map(|u| (u.id.as_str(), u.layer.as_str()))
            .collect();

        for grouping in &result.groupings {
            for member in &grouping.members {
                if !unit_ids.contains(member.unit_id.as_str()) {
                    findings.push(Finding::new(
                        CheckCategory::GhostReference,
                        format!("{}/{}", grouping.id, member.unit_id),
                        "grouping references a unit that does not exist",
                    ));
                }
            }

            let grouping_layers: BTreeSet<&str> = grouping
                .members
                .iter()
                .filter_map(|m| layers.get(m.unit_id.as_str()).copied())
                .collect();
            if grouping_layers.len() > 1 {
                findings.push(Finding::new(
                    CheckCategory::GhostReference,
                    &grouping.id,
                    format!(
                        "grouping draws units from several layers: {}",
                        grouping_layers.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                ));
            }
        }

        for exclusion in &result.exclusions {
            if !unit_ids.contains(exclusion.unit_id.as_str()) {
                findings.push(Finding::new(
                    CheckCategory::GhostReference,
                    format!("exclusion/{}", exclusion.unit_id),
                    "exclusion references a unit that does not exist",
                ));
            }
        }
    }

    /// Check 6: targets are leaves
    fn check_targets(&self, result: &ExtractionResult, findings: &mut Vec<Finding>) {
        for grouping in &result.groupings {
            if !self.catalog.is_valid_leaf(&grouping.target) {
                findings.push(Finding::new(
                    CheckCategory::NonLeafTarget,
                    &grouping.id,
                    format!("target '{}' is not a taxonomy leaf", grouping.target),
                ));
            }
        }
    }
}

/// Check 2: duplicate unit and grouping identifiers
fn check_duplicates(result: &ExtractionResult, findings: &mut Vec<Finding>) {
    let mut seen = HashSet::new();
    let mut reported = BTreeSet::new();
    for unit in &result.units {
        if !seen.insert(unit.id.as_str()) && reported.insert(unit.id.as_str()) {
            findings.push(Finding::new(
                CheckCategory::DuplicateIdentifier,
                &unit.id,
                "unit identifier appears more than once",
            ));
        }
    }

    let mut seen = HashSet::new();
    let mut reported = BTreeSet::new();
    for grouping in &result.groupings {
        if !seen.insert(grouping.id.as_str()) && reported.insert(grouping.id.as_str()) {
            findings.push(Finding::new(
                CheckCategory::DuplicateIdentifier,
                &grouping.id,
                "grouping identifier appears more than once",
            ));
        }
    }
}

/// Check 3: every grouping has resolvable content
fn check_empty_content(
    result: &ExtractionResult,
    unit_ids: &HashSet<&str>,
    findings: &mut Vec<Finding>,
) {
    for grouping in &result.groupings {
        if !grouping.content_unit_ids().any(|id| unit_ids.contains(id)) {
            findings.push(Finding::new(
                CheckCategory::EmptyContent,
                &grouping.id,
                "grouping has no content-bearing units",
            ));
        }
    }
}

/// Check 4: content-bearing in at most one grouping unless flagged
fn check_content_overlap(
    result: &ExtractionResult,
    unit_ids: &HashSet<&str>,
    findings: &mut Vec<Finding>,
) {
    let mut owners: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, grouping) in result.groupings.iter().enumerate() {
        let mut counted = HashSet::new();
        for id in grouping.content_unit_ids() {
            if unit_ids.contains(id) && counted.insert(id) {
                owners.entry(id).or_default().push(index);
            }
        }
    }

    for (unit_id, indices) in owners {
        if indices.len() < 2 {
            continue;
        }
        let groupings: Vec<_> = indices.iter().map(|&i| &result.groupings[i]).collect();

        let cluster = groupings[0].duplication_cluster.as_deref();
        let same_cluster =
            cluster.is_some() && groupings.iter().all(|g| g.duplication_cluster.as_deref() == cluster);
        let shared_evidence = groupings.iter().all(|g| g.shared_evidence);

        if !same_cluster && !shared_evidence {
            findings.push(Finding::new(
                CheckCategory::ContentOverlap,
                unit_id,
                format!(
                    "unit is content-bearing in {}",
                    groupings
                        .iter()
                        .map(|g| g.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ));
        }
    }
}

/// Check 5: every unit is accounted for
fn check_coverage(result: &ExtractionResult, findings: &mut Vec<Finding>) {
    let mut covered: HashSet<&str> = result
        .groupings
        .iter()
        .flat_map(|g| g.members.iter().map(|m| m.unit_id.as_str()))
        .collect();
    covered.extend(result.exclusions.iter().map(|e| e.unit_id.as_str()));

    let mut reported = HashSet::new();
    for unit in &result.units {
        if !covered.contains(unit.id.as_str()) && reported.insert(unit.id.as_str()) {
            findings.push(Finding::new(
                CheckCategory::CoverageGap,
                &unit.id,
                "unit is in no grouping and not excluded",
            ));
        }
    }
}

/// Check 7: closed vocabularies
fn check_vocabularies(result: &ExtractionResult, findings: &mut Vec<Finding>) {
    for unit in &result.units {
        if !unit.unit_type.is_recognized() {
            findings.push(vocabulary_finding(
                &unit.id,
                "type",
                unit.unit_type.as_str(),
                UnitType::ALLOWED,
            ));
        }
    }

    for grouping in &result.groupings {
        if !grouping.kind.is_recognized() {
            findings.push(vocabulary_finding(
                &grouping.id,
                "kind",
                grouping.kind.as_str(),
                GroupingKind::ALLOWED,
            ));
        }
        for member in &grouping.members {
            if !member.role.is_recognized() {
                findings.push(vocabulary_finding(
                    &format!("{}/{}", grouping.id, member.unit_id),
                    "role",
                    member.role.as_str(),
                    Role::ALLOWED,
                ));
            }
        }
    }

    for exclusion in &result.exclusions {
        if !exclusion.reason.is_recognized() {
            findings.push(vocabulary_finding(
                &format!("exclusion/{}", exclusion.unit_id),
                "reason",
                exclusion.reason.as_str(),
                ExclusionReason::ALLOWED,
            ));
        }
    }
}

/// Check 8: recorded text equals the layer sliced at the recorded offsets
fn check_offsets(result: &ExtractionResult, segment: &Segment, findings: &mut Vec<Finding>) {
    for unit in &result.units {
        let Some(layer) = segment.layers.get(&unit.layer) else {
            findings.push(Finding::new(
                CheckCategory::TextMismatch,
                &unit.id,
                format!("layer '{}' does not exist in segment", unit.layer),
            ));
            continue;
        };

        let slice = if unit.start <= unit.end {
            let sliced: String = layer
                .chars()
                .skip(unit.start)
                .take(unit.end - unit.start)
                .collect();
            (sliced.chars().count() == unit.end - unit.start).then_some(sliced)
        } else {
            None
        };

        match slice {
            Some(text) if text == unit.text => {}
            Some(_) => findings.push(Finding::new(
                CheckCategory::TextMismatch,
                &unit.id,
                format!(
                    "text differs from layer '{}' at {}..{}",
                    unit.layer, unit.start, unit.end
                ),
            )),
            None => findings.push(Finding::new(
                CheckCategory::TextMismatch,
                &unit.id,
                format!(
                    "offsets {}..{} fall outside layer '{}'",
                    unit.start, unit.end, unit.layer
                ),
            )),
        }
    }
}

pub(crate) fn vocabulary_finding(
    subject: &str,
    field: &str,
    value: &str,
    allowed: &[&str],
) -> Finding {
    Finding::new(
        CheckCategory::VocabularyViolation,
        subject,
        format!(
            "{} '{}' is not one of: {}",
            field,
            value,
            allowed.join(", ")
        ),
    )
}
