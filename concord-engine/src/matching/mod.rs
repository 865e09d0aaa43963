//! Pairwise matching and agreement labeling
//!
//! - [`matcher`] - one-to-one correspondence between two results' groupings
//! - [`classifier`] - deterministic outcome label per correspondence

pub mod classifier;
pub mod matcher;

pub use classifier::{classify_match, same_target};
pub use matcher::{
    match_results, quantize, solve_assignment, Assignment, MAX_EXACT_STATES, MAX_EXACT_WIDTH,
    SCORE_SCALE,
};

use crate::alignment::{Overlap, DEFAULT_SHINGLE_WIDTH};
use crate::types::{AgreementLabel, ComparisonSummary, GroupingRef, MatchSummary};

/// Thresholds and limits for matching
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSettings {
    pub shingle_width: usize,
    /// Pairs scoring below this are not matches
    pub min_match_score: f64,
    /// Both containment directions must reach this for agreement on extent
    pub full_agreement_overlap: f64,
    /// Largest smaller-side size solved exactly
    pub exact_solver_limit: usize,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            shingle_width: DEFAULT_SHINGLE_WIDTH,
            min_match_score: 0.30,
            full_agreement_overlap: 0.85,
            exact_solver_limit: 14,
        }
    }
}

/// One accepted correspondence
#[derive(Debug, Clone, PartialEq)]
pub struct PairMatch {
    pub left: GroupingRef,
    pub right: GroupingRef,
    /// Position of the left grouping in its result
    pub left_index: usize,
    pub right_index: usize,
    pub overlap: Overlap,
    pub label: AgreementLabel,
}

/// Outcome of matching two results
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSet {
    pub left_producer: String,
    pub right_producer: String,
    /// Sorted by left grouping position
    pub matches: Vec<PairMatch>,
    /// In result order
    pub unmatched_left: Vec<GroupingRef>,
    pub unmatched_right: Vec<GroupingRef>,
    /// True when the greedy fallback produced the pairing
    pub approximate: bool,
}

impl MatchSet {
    /// The same match set seen from the other side
    pub fn reversed(self) -> Self {
        let mut matches: Vec<PairMatch> = self
            .matches
            .into_iter()
            .map(|m| PairMatch {
                left: m.right,
                right: m.left,
                left_index: m.right_index,
                right_index: m.left_index,
                overlap: m.overlap.reversed(),
                label: m.label,
            })
            .collect();
        matches.sort_by_key(|m| m.left_index);

        Self {
            left_producer: self.right_producer,
            right_producer: self.left_producer,
            matches,
            unmatched_left: self.unmatched_right,
            unmatched_right: self.unmatched_left,
            approximate: self.approximate,
        }
    }

    /// Unordered set of matched reference pairs, for comparisons
    pub fn pairs(&self) -> Vec<(GroupingRef, GroupingRef)> {
        let mut pairs: Vec<_> = self
            .matches
            .iter()
            .map(|m| (m.left.clone(), m.right.clone()))
            .collect();
        pairs.sort();
        pairs
    }

    pub fn summary(&self) -> ComparisonSummary {
        ComparisonSummary {
            left_producer: self.left_producer.clone(),
            right_producer: self.right_producer.clone(),
            approximate: self.approximate,
            matches: self
                .matches
                .iter()
                .map(|m| MatchSummary {
                    left: m.left.clone(),
                    right: m.right.clone(),
                    score: m.overlap.score,
                    forward: m.overlap.forward,
                    backward: m.overlap.backward,
                    label: m.label,
                })
                .collect(),
            unmatched_left: self.unmatched_left.clone(),
            unmatched_right: self.unmatched_right.clone(),
        }
    }
}
