//! Fuzzy alignment of independently segmented text
//!
//! - [`fingerprint`] - span normalization, shingling and Jaccard similarity
//! - [`index`] - per-result unit and grouping fingerprints

pub mod fingerprint;
pub mod index;

pub use fingerprint::{normalize, similarity, Fingerprint, DEFAULT_SHINGLE_WIDTH};
pub use index::{AlignmentIndex, GroupingPrint};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Containment-aware overlap between two groupings
///
/// `forward` is the share of A's content corroborated by B and `backward`
/// the share of B's content corroborated by A, so a subset relationship
/// (one side near 1.0, the other low) is distinguishable from a symmetric
/// partial overlap. `score` is the Dice coefficient of the two shingle
/// sets, which is symmetric in A and B.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Overlap {
    pub forward: f64,
    pub backward: f64,
    pub score: f64,
}

impl Overlap {
    pub fn between(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Self {
        if a.is_empty() || b.is_empty() {
            return Self::default();
        }
        let shared = a.intersection(b).count() as f64;
        let (len_a, len_b) = (a.len() as f64, b.len() as f64);
        Self {
            forward: shared / len_a,
            backward: shared / len_b,
            score: 2.0 * shared / (len_a + len_b),
        }
    }

    /// The weaker of the two containment directions
    pub fn min_containment(&self) -> f64 {
        self.forward.min(self.backward)
    }

    /// Same overlap seen from the other side
    pub fn reversed(self) -> Self {
        Self {
            forward: self.backward,
            backward: self.forward,
            score: self.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_subset_is_distinguishable() {
        let overlap = Overlap::between(&set(&["a", "b"]), &set(&["a", "b", "c", "d"]));
        assert_eq!(overlap.forward, 1.0);
        assert_eq!(overlap.backward, 0.5);
        assert!((overlap.score - 2.0 * 2.0 / 6.0).abs() < 1e-12);
        assert_eq!(overlap.min_containment(), 0.5);
    }

    #[test]
    fn test_empty_side_is_zero() {
        assert_eq!(Overlap::between(&set(&[]), &set(&["a"])), Overlap::default());
    }

    #[test]
    fn test_reversed_swaps_directions() {
        let overlap = Overlap::between(&set(&["a"]), &set(&["a", "b"]));
        let reversed = Overlap::between(&set(&["a", "b"]), &set(&["a"]));
        assert_eq!(overlap.reversed(), reversed);
    }
}
