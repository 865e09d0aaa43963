//! Pairwise matcher
//!
//! Finds the similarity-maximizing one-to-one correspondence between the
//! groupings of two results.
//!
//! # Algorithm
//! The pairing is an assignment problem on a bipartite graph weighted by
//! grouping overlap. Scores are quantized to integer micro-units so totals
//! compare exactly.
//!
//! - **Exact:** when the smaller side has at most `exact_solver_limit`
//!   groupings (never more than [`MAX_EXACT_WIDTH`]) and the table fits in
//!   [`MAX_EXACT_STATES`], a dynamic program over subsets of the smaller
//!   side is run:
//!   `dp[k][mask]` is the best total after deciding the first `k` groupings
//!   of the larger side with the smaller-side groupings in `mask` used. The
//!   assignment is reconstructed by walking the table backward. Ties prefer
//!   leaving a grouping unassigned, then the lowest index.
//! - **Greedy fallback:** beyond either bound, edges are taken highest score
//!   first (ties by index) and the result is marked `approximate`.
//!
//! Edges below the minimum match score never become matches.
//!
//! # Symmetry
//! The two results are put in a canonical order (producer id, then grouping
//! ids, then content) before solving, so matching A against B yields the
//! same pairs as B against A.

use super::classifier::classify_match;
use super::{MatchSet, MatchSettings, PairMatch};
use crate::alignment::AlignmentIndex;
use crate::types::{ExtractionResult, GroupingRef};
use std::cmp::{Ordering, Reverse};
use tracing::debug;

/// Quantization scale for scores (micro-units)
pub const SCORE_SCALE: f64 = 1_000_000.0;

/// Hard cap on the bitmask width, whatever the configured limit
pub const MAX_EXACT_WIDTH: usize = 20;

/// Largest DP table, in cells: `(large + 1) * 2^small`
pub const MAX_EXACT_STATES: usize = 1 << 22;

const UNREACHABLE: u64 = u64::MAX;

/// Quantize a [0, 1] score to integer micro-units
pub fn quantize(score: f64) -> u64 {
    (score.clamp(0.0, 1.0) * SCORE_SCALE).round() as u64
}

/// Solved assignment over a weight matrix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    /// `(row, column)` pairs sorted by row
    pub pairs: Vec<(usize, usize)>,
    pub total: u64,
    pub approximate: bool,
}

/// Solve the assignment problem over `weights[row][column]`
///
/// Edges with weight zero or below `min_weight` are not eligible. Rows and
/// columns may differ in count.
///
/// # Arguments
/// * `weights` - rectangular matrix of quantized scores
/// * `min_weight` - acceptance threshold
/// * `exact_limit` - largest smaller-side size solved exactly
pub fn solve_assignment(weights: &[Vec<u64>], min_weight: u64, exact_limit: usize) -> Assignment {
    let rows = weights.len();
    let cols = weights.first().map(Vec::len).unwrap_or(0);

    let eligible = |r: usize, c: usize| -> Option<u64> {
        weights
            .get(r)
            .and_then(|row| row.get(c))
            .copied()
            .filter(|&w| w > 0 && w >= min_weight)
    };

    if rows == 0 || cols == 0 {
        return Assignment {
            pairs: Vec::new(),
            total: 0,
            approximate: false,
        };
    }

    let (small, large) = (rows.min(cols), rows.max(cols));
    if !fits_exact(small, large, exact_limit) {
        debug!(small, large, exact_limit, "Assignment too large for exact solver");
        return solve_greedy(rows, cols, eligible);
    }

    // Bitmask over the smaller side; iterate the larger side
    let mut pairs = if rows >= cols {
        solve_exact(rows, cols, |k, j| eligible(k, j))
    } else {
        solve_exact(cols, rows, |k, j| eligible(j, k))
            .into_iter()
            .map(|(c, r)| (r, c))
            .collect()
    };
    pairs.sort_unstable();

    let total = pairs.iter().filter_map(|&(r, c)| eligible(r, c)).sum();
    Assignment {
        pairs,
        total,
        approximate: false,
    }
}

/// Whether the exact table stays within the width cap and the state budget
fn fits_exact(small: usize, large: usize, exact_limit: usize) -> bool {
    if small > exact_limit.min(MAX_EXACT_WIDTH) {
        return false;
    }
    (1usize << small)
        .checked_mul(large + 1)
        .is_some_and(|cells| cells <= MAX_EXACT_STATES)
}

/// Exact DP; returns `(large index, small index)` pairs
fn solve_exact(
    large: usize,
    small: usize,
    weight: impl Fn(usize, usize) -> Option<u64>,
) -> Vec<(usize, usize)> {
    let states = 1usize << small;
    let mut dp = vec![vec![UNREACHABLE; states]; large + 1];
    dp[0][0] = 0;

    for k in 0..large {
        for mask in 0..states {
            let mut best = dp[k][mask];
            for j in 0..small {
                let bit = 1usize << j;
                if mask & bit == 0 {
                    continue;
                }
                let (Some(w), prev) = (weight(k, j), dp[k][mask ^ bit]) else {
                    continue;
                };
                if prev == UNREACHABLE {
                    continue;
                }
                let candidate = prev + w;
                if best == UNREACHABLE || candidate > best {
                    best = candidate;
                }
            }
            dp[k + 1][mask] = best;
        }
    }

    let mut best_mask = 0usize;
    let mut best_total = 0u64;
    for (mask, &total) in dp[large].iter().enumerate() {
        if total != UNREACHABLE && total > best_total {
            best_total = total;
            best_mask = mask;
        }
    }

    let mut pairs = Vec::new();
    let mut mask = best_mask;
    for k in (0..large).rev() {
        let current = dp[k + 1][mask];
        if dp[k][mask] == current {
            continue;
        }
        let chosen = (0..small).find(|&j| {
            let bit = 1usize << j;
            mask & bit != 0
                && dp[k][mask ^ bit] != UNREACHABLE
                && weight(k, j).map(|w| dp[k][mask ^ bit] + w) == Some(current)
        });
        match chosen {
            Some(j) => {
                pairs.push((k, j));
                mask ^= 1usize << j;
            }
            None => break,
        }
    }

    pairs
}

fn solve_greedy(
    rows: usize,
    cols: usize,
    weight: impl Fn(usize, usize) -> Option<u64>,
) -> Assignment {
    let mut edges: Vec<(u64, usize, usize)> = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .filter_map(|(r, c)| weight(r, c).map(|w| (w, r, c)))
        .collect();
    edges.sort_by_key(|&(w, r, c)| (Reverse(w), r, c));

    let mut row_used = vec![false; rows];
    let mut col_used = vec![false; cols];
    let mut pairs = Vec::new();
    let mut total = 0u64;

    for (w, r, c) in edges {
        if row_used[r] || col_used[c] {
            continue;
        }
        row_used[r] = true;
        col_used[c] = true;
        total += w;
        pairs.push((r, c));
    }
    pairs.sort_unstable();

    Assignment {
        pairs,
        total,
        approximate: true,
    }
}

/// Canonical order of two results (see module docs)
fn canonical_cmp(a: &ExtractionResult, b: &ExtractionResult) -> Ordering {
    a.producer_id
        .cmp(&b.producer_id)
        .then_with(|| {
            let ids_a = a.groupings.iter().map(|g| g.id.as_str());
            let ids_b = b.groupings.iter().map(|g| g.id.as_str());
            ids_a.cmp(ids_b)
        })
        .then_with(|| {
            let json_a = serde_json::to_string(a).unwrap_or_default();
            let json_b = serde_json::to_string(b).unwrap_or_default();
            json_a.cmp(&json_b)
        })
}

/// Match two results' groupings
///
/// # Returns
/// The match set oriented as `(a, b)`: `left` refers to `a`.
pub fn match_results(
    a: &ExtractionResult,
    b: &ExtractionResult,
    settings: &MatchSettings,
) -> MatchSet {
    if canonical_cmp(a, b) == Ordering::Greater {
        return match_results(b, a, settings).reversed();
    }

    let index_a = AlignmentIndex::build(a, settings.shingle_width);
    let index_b = AlignmentIndex::build(b, settings.shingle_width);
    let overlaps = index_a.overlap_matrix(&index_b);

    let weights: Vec<Vec<u64>> = overlaps
        .iter()
        .map(|row| row.iter().map(|o| quantize(o.score)).collect())
        .collect();

    let assignment = solve_assignment(
        &weights,
        quantize(settings.min_match_score),
        settings.exact_solver_limit,
    );

    let mut left_matched = vec![false; a.groupings.len()];
    let mut right_matched = vec![false; b.groupings.len()];
    let mut matches = Vec::with_capacity(assignment.pairs.len());

    for &(i, j) in &assignment.pairs {
        let (left, right) = (&a.groupings[i], &b.groupings[j]);
        let overlap = overlaps[i][j];
        left_matched[i] = true;
        right_matched[j] = true;
        matches.push(PairMatch {
            left: GroupingRef::new(&a.producer_id, &left.id),
            right: GroupingRef::new(&b.producer_id, &right.id),
            left_index: i,
            right_index: j,
            overlap,
            label: classify_match(&overlap, &left.target, &right.target, settings),
        });
    }

    let unmatched = |result: &ExtractionResult, matched: &[bool]| -> Vec<GroupingRef> {
        result
            .groupings
            .iter()
            .zip(matched)
            .filter(|(_, &m)| !m)
            .map(|(g, _)| GroupingRef::new(&result.producer_id, &g.id))
            .collect()
    };

    debug!(
        left = %a.producer_id,
        right = %b.producer_id,
        matches = matches.len(),
        approximate = assignment.approximate,
        "Pairwise matching complete"
    );

    MatchSet {
        left_producer: a.producer_id.clone(),
        right_producer: b.producer_id.clone(),
        unmatched_left: unmatched(a, &left_matched),
        unmatched_right: unmatched(b, &right_matched),
        matches,
        approximate: assignment.approximate,
    }
}
