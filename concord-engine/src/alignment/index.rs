//! Unit alignment index
//!
//! Per-result lookup from unit to fingerprint and from grouping to its
//! content units' fingerprints. Rebuilt for every pairwise comparison.
//! Holds no decision logic.

use super::fingerprint::Fingerprint;
use super::Overlap;
use crate::types::ExtractionResult;
use std::collections::{BTreeSet, HashMap};

/// Fingerprints of one grouping
#[derive(Debug, Clone)]
pub struct GroupingPrint {
    pub grouping_id: String,
    /// One fingerprint per resolvable content unit, in member order
    pub unit_prints: Vec<Fingerprint>,
    /// Union of the unit shingle sets
    pub shingles: BTreeSet<String>,
}

/// Alignment index over one extraction result
#[derive(Debug, Clone)]
pub struct AlignmentIndex<'a> {
    result: &'a ExtractionResult,
    units: HashMap<&'a str, Fingerprint>,
    groupings: Vec<GroupingPrint>,
}

impl<'a> AlignmentIndex<'a> {
    /// Build the index for `result` with the given shingle width
    ///
    /// Ghost references (member ids absent from the unit set) contribute
    /// nothing; context and reference members are not part of a grouping's
    /// content.
    pub fn build(result: &'a ExtractionResult, shingle_width: usize) -> Self {
        let units: HashMap<&str, Fingerprint> = result
            .units
            .iter()
            .map(|u| (u.id.as_str(), Fingerprint::of(&u.text, shingle_width)))
            .collect();

        let groupings = result
            .groupings
            .iter()
            .map(|g| {
                let unit_prints: Vec<Fingerprint> = g
                    .content_unit_ids()
                    .filter_map(|id| units.get(id).cloned())
                    .collect();
                let shingles = unit_prints
                    .iter()
                    .flat_map(|p| p.shingles().iter().cloned())
                    .collect();
                GroupingPrint {
                    grouping_id: g.id.clone(),
                    unit_prints,
                    shingles,
                }
            })
            .collect();

        Self {
            result,
            units,
            groupings,
        }
    }

    pub fn result(&self) -> &'a ExtractionResult {
        self.result
    }

    pub fn unit(&self, unit_id: &str) -> Option<&Fingerprint> {
        self.units.get(unit_id)
    }

    pub fn groupings(&self) -> &[GroupingPrint] {
        &self.groupings
    }

    pub fn len(&self) -> usize {
        self.groupings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groupings.is_empty()
    }

    /// Overlap of grouping `i` here with grouping `j` of `other`
    pub fn overlap(&self, i: usize, other: &AlignmentIndex<'_>, j: usize) -> Overlap {
        match (self.groupings.get(i), other.groupings.get(j)) {
            (Some(a), Some(b)) => Overlap::between(&a.shingles, &b.shingles),
            _ => Overlap::default(),
        }
    }

    /// Full `len × other.len` overlap matrix
    pub fn overlap_matrix(&self, other: &AlignmentIndex<'_>) -> Vec<Vec<Overlap>> {
        (0..self.len())
            .map(|i| (0..other.len()).map(|j| self.overlap(i, other, j)).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Grouping, GroupingKind, Member, Unit, UnitType};

    fn unit(id: &str, text: &str) -> Unit {
        Unit {
            id: id.to_string(),
            unit_type: UnitType::Sentence,
            text: text.to_string(),
            layer: "body".to_string(),
            start: 0,
            end: text.chars().count(),
            fused: None,
        }
    }

    fn result(units: Vec<Unit>, groupings: Vec<Grouping>) -> ExtractionResult {
        ExtractionResult {
            producer_id: "p".to_string(),
            segment_id: "s".to_string(),
            units,
            groupings,
            exclusions: vec![],
        }
    }

    fn grouping(id: &str, members: Vec<Member>) -> Grouping {
        Grouping {
            id: id.to_string(),
            target: "a/b".to_string(),
            kind: GroupingKind::Primary,
            members,
            duplication_cluster: None,
            shared_evidence: false,
        }
    }

    #[test]
    fn test_ghost_and_context_members_ignored() {
        let r = result(
            vec![
                unit("u1", "Vectors can be added componentwise."),
                unit("u2", "Recall the definition of a field."),
            ],
            vec![grouping(
                "g1",
                vec![
                    Member::content("u1"),
                    Member::content("ghost"),
                    Member::context("u2"),
                ],
            )],
        );

        let index = AlignmentIndex::build(&r, 5);
        let print = &index.groupings()[0];
        assert_eq!(print.unit_prints.len(), 1);
        assert_eq!(print.shingles, index.unit("u1").unwrap().shingles().clone());
    }

    #[test]
    fn test_resegmented_groupings_overlap_fully() {
        let a = result(
            vec![unit("a1", "Matrices compose linear maps. Their product is associative.")],
            vec![grouping("ga", vec![Member::content("a1")])],
        );
        let b = result(
            vec![
                unit("b1", "Matrices compose linear maps."),
                unit("b2", "Their product is associative."),
            ],
            vec![grouping("gb", vec![Member::content("b1"), Member::content("b2")])],
        );

        let ia = AlignmentIndex::build(&a, 5);
        let ib = AlignmentIndex::build(&b, 5);
        let overlap = ia.overlap(0, &ib, 0);
        assert!(overlap.score > 0.9, "score was {}", overlap.score);
        assert!(overlap.backward > 0.99);
    }
}
