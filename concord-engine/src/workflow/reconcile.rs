//! Cross-producer comparison and clustering
//!
//! Every pair of usable results is matched; accepted matches are merged into
//! clusters (at most one grouping per producer per cluster), and each
//! cluster becomes one adjudicated item. Fully agreeing clusters are settled
//! here; every other cluster yields a [`JudgeRequest`].
//!
//! # Determinism
//! Results are taken in producer id order, matches are merged in descending
//! quantized score with ties broken by grouping reference, and clusters are
//! numbered by their first member. Identical inputs always yield identical
//! items, requests and decision ids.

use crate::arbitration::{Candidate, JudgeRequest};
use crate::matching::{match_results, quantize, MatchSet, MatchSettings};
use crate::taxonomy::LeafCatalog;
use crate::types::{
    AdjudicatedItem, AgreementLabel, Confidence, ExtractionResult, GroupingRef, ItemBasis,
    ProducerRun, Segment,
};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::debug;

/// Position of a grouping: (result index, grouping index)
type Node = (usize, usize);

/// Matched groupings of several producers
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    /// Sorted by result index, at most one per result
    pub members: Vec<Node>,
    pub label: AgreementLabel,
    /// Best accepted match score inside the cluster
    pub score: Option<f64>,
    /// A contributing comparison used the greedy fallback
    pub approximate: bool,
}

/// Reconciliation state before arbitration
#[derive(Debug, Clone)]
pub struct Draft {
    pub comparisons: Vec<MatchSet>,
    /// One item per cluster, in cluster order; undecided items carry a
    /// `decision_id` and are completed from the matching decision
    pub items: Vec<AdjudicatedItem>,
    /// Judge requests, in cluster order
    pub requests: Vec<JudgeRequest>,
}

/// Compare every pair of results
///
/// # Returns
/// One match set per pair `(i, j)` with `i < j`, in that order.
pub fn compare_all(results: &[&ExtractionResult], settings: &MatchSettings) -> Vec<MatchSet> {
    let mut comparisons = Vec::new();
    for i in 0..results.len() {
        for j in (i + 1)..results.len() {
            comparisons.push(match_results(results[i], results[j], settings));
        }
    }
    comparisons
}

/// Merge pairwise matches into clusters
pub fn cluster(results: &[&ExtractionResult], comparisons: &[MatchSet]) -> Vec<Cluster> {
    let position = |reference: &GroupingRef| -> Option<Node> {
        let r = results
            .iter()
            .position(|res| res.producer_id == reference.producer_id)?;
        let g = results[r]
            .groupings
            .iter()
            .position(|g| g.id == reference.grouping_id)?;
        Some((r, g))
    };

    let mut nodes: Vec<Node> = Vec::new();
    for (r, result) in results.iter().enumerate() {
        for g in 0..result.groupings.len() {
            nodes.push((r, g));
        }
    }
    let index_of = |node: Node| nodes.binary_search(&node).ok();

    // (quantized score, left, right, label, score, approximate)
    let mut edges = Vec::new();
    for set in comparisons {
        for m in &set.matches {
            let (Some(a), Some(b)) = (position(&m.left), position(&m.right)) else {
                continue;
            };
            let (Some(a), Some(b)) = (index_of(a), index_of(b)) else {
                continue;
            };
            edges.push((
                quantize(m.overlap.score),
                m.left.clone().min(m.right.clone()),
                m.left.clone().max(m.right.clone()),
                a,
                b,
                m.label,
                m.overlap.score,
                set.approximate,
            ));
        }
    }
    edges.sort_by(|x, y| {
        Reverse(x.0)
            .cmp(&Reverse(y.0))
            .then_with(|| x.1.cmp(&y.1))
            .then_with(|| x.2.cmp(&y.2))
    });

    let mut sets = DisjointSets::new(&nodes);
    for &(_, _, _, a, b, ..) in &edges {
        sets.merge(a, b);
    }

    // Labels come from every accepted match inside a cluster, including
    // matches between groupings already joined through a third producer
    for (_, _, _, a, b, label, score, approximate) in edges {
        sets.record_match(a, b, label, score, approximate);
    }

    let mut clusters = sets.into_clusters(&nodes);
    clusters.sort_by(|x, y| x.members.cmp(&y.members));
    clusters
}

/// Union-find over grouping nodes that refuses same-producer merges
struct DisjointSets {
    parent: Vec<usize>,
    producers: Vec<BTreeSet<usize>>,
    labels: Vec<Option<AgreementLabel>>,
    scores: Vec<Option<f64>>,
    approximate: Vec<bool>,
}

impl DisjointSets {
    fn new(nodes: &[Node]) -> Self {
        Self {
            parent: (0..nodes.len()).collect(),
            producers: nodes.iter().map(|&(r, _)| BTreeSet::from([r])).collect(),
            labels: vec![None; nodes.len()],
            scores: vec![None; nodes.len()],
            approximate: vec![false; nodes.len()],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn merge(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb || !self.producers[ra].is_disjoint(&self.producers[rb]) {
            return;
        }
        let (root, child) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[child] = root;

        let moved = std::mem::take(&mut self.producers[child]);
        self.producers[root].extend(moved);
    }

    /// Fold a match into its cluster when both ends ended up together
    fn record_match(
        &mut self,
        a: usize,
        b: usize,
        label: AgreementLabel,
        score: f64,
        approximate: bool,
    ) {
        let root = self.find(a);
        if root != self.find(b) {
            return;
        }
        self.labels[root] = self.labels[root].max(Some(label));
        self.scores[root] = Some(self.scores[root].map_or(score, |best| best.max(score)));
        self.approximate[root] |= approximate;
    }

    fn into_clusters(mut self, nodes: &[Node]) -> Vec<Cluster> {
        let mut by_root: Vec<Vec<Node>> = vec![Vec::new(); nodes.len()];
        for (i, &node) in nodes.iter().enumerate() {
            let root = self.find(i);
            by_root[root].push(node);
        }

        by_root
            .into_iter()
            .enumerate()
            .filter(|(_, members)| !members.is_empty())
            .map(|(root, members)| {
                let label = if members.len() == 1 {
                    AgreementLabel::Unmatched
                } else {
                    self.labels[root].unwrap_or(AgreementLabel::FullAgreement)
                };
                Cluster {
                    members,
                    label,
                    score: self.scores[root],
                    approximate: self.approximate[root],
                }
            })
            .collect()
    }
}

/// Confidence of a fully agreeing cluster
///
/// `full` needs every producer represented and exact matching; a strict
/// majority (or an approximate comparison) yields `majority`.
pub fn agreement_confidence(present: usize, total: usize, approximate: bool) -> Confidence {
    if present == total && !approximate {
        Confidence::Full
    } else if present * 2 > total {
        Confidence::Majority
    } else {
        Confidence::Low
    }
}

/// Build the pre-arbitration draft for one segment
///
/// # Arguments
/// * `segment` - the segment being reconciled
/// * `runs` - usable producer runs, sorted by producer id
/// * `catalog` - taxonomy leaves, for candidate annotation
/// * `settings` - matching thresholds
pub fn build_draft(
    segment: &Segment,
    runs: &[ProducerRun],
    catalog: &dyn LeafCatalog,
    settings: &MatchSettings,
) -> Draft {
    let usable: Vec<(&ProducerRun, &ExtractionResult)> = runs
        .iter()
        .filter_map(|run| run.final_result().map(|result| (run, result)))
        .collect();
    let results: Vec<&ExtractionResult> = usable.iter().map(|(_, result)| *result).collect();

    if results.len() == 1 {
        return single_source(segment, results[0]);
    }

    let comparisons = compare_all(&results, settings);
    let clusters = cluster(&results, &comparisons);

    let mut items = Vec::with_capacity(clusters.len());
    let mut requests = Vec::new();

    for (index, cluster) in clusters.iter().enumerate() {
        let item_id = format!("{}/{}", segment.id, index);
        let members: Vec<GroupingRef> = cluster
            .members
            .iter()
            .map(|&(r, g)| GroupingRef::new(&results[r].producer_id, &results[r].groupings[g].id))
            .collect();

        if cluster.label == AgreementLabel::FullAgreement {
            let (r, g) = cluster.members[0];
            items.push(AdjudicatedItem {
                item_id,
                label: cluster.label,
                chosen: members.first().cloned(),
                members,
                grouping: Some(results[r].groupings[g].clone()),
                kept: true,
                confidence: agreement_confidence(
                    cluster.members.len(),
                    results.len(),
                    cluster.approximate,
                ),
                basis: ItemBasis::Agreement,
                score: cluster.score,
                decision_id: None,
                needs_review: false,
                review_reasons: Vec::new(),
            });
            continue;
        }

        let candidates = cluster
            .members
            .iter()
            .map(|&(r, g)| {
                let (run, result) = usable[r];
                let grouping = &result.groupings[g];
                Candidate {
                    reference: GroupingRef::new(&result.producer_id, &grouping.id),
                    target: grouping.target.clone(),
                    target_is_leaf: catalog.is_valid_leaf(&grouping.target),
                    kind: grouping.kind.to_string(),
                    unit_ids: grouping.content_unit_ids().map(str::to_string).collect(),
                    text: result.content_text(grouping),
                    degraded: run.is_degraded(),
                }
            })
            .collect();

        requests.push(JudgeRequest {
            segment_id: segment.id.clone(),
            decision_id: item_id.clone(),
            case: cluster.label,
            candidates,
            context: segment.context.clone(),
            producer_count: results.len(),
            feedback: Vec::new(),
        });

        items.push(AdjudicatedItem {
            decision_id: Some(item_id.clone()),
            item_id,
            label: cluster.label,
            members,
            chosen: None,
            grouping: None,
            kept: true,
            confidence: Confidence::Low,
            basis: ItemBasis::Escalated,
            score: cluster.score,
            needs_review: false,
            review_reasons: Vec::new(),
        });
    }

    debug!(
        segment_id = %segment.id,
        results = results.len(),
        clusters = clusters.len(),
        requests = requests.len(),
        "Draft built"
    );

    Draft {
        comparisons,
        items,
        requests,
    }
}

/// Items for a segment with exactly one usable result: all `low`, no judge
fn single_source(segment: &Segment, result: &ExtractionResult) -> Draft {
    let items = result
        .groupings
        .iter()
        .enumerate()
        .map(|(index, grouping)| {
            let reference = GroupingRef::new(&result.producer_id, &grouping.id);
            AdjudicatedItem {
                item_id: format!("{}/{}", segment.id, index),
                label: AgreementLabel::Unmatched,
                members: vec![reference.clone()],
                chosen: Some(reference),
                grouping: Some(grouping.clone()),
                kept: true,
                confidence: Confidence::Low,
                basis: ItemBasis::SingleSource,
                score: None,
                decision_id: None,
                needs_review: false,
                review_reasons: Vec::new(),
            }
        })
        .collect();

    Draft {
        comparisons: Vec::new(),
        items,
        requests: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::Taxonomy;
    use crate::types::{Grouping, GroupingKind, Member, RunStatus, Unit, UnitType, ProducerAttempt};

    const SENTENCES: [&str; 4] = [
        "Rings have two binary operations called addition and multiplication.",
        "Every field is a commutative ring with multiplicative inverses.",
        "Circles are the set of points equidistant from a center point.",
        "The area of a circle grows with the square of its radius.",
    ];

    fn result(producer: &str, groupings: &[(&str, &str, &[usize])]) -> ExtractionResult {
        ExtractionResult {
            producer_id: producer.to_string(),
            segment_id: "s1".to_string(),
            units: SENTENCES
                .iter()
                .enumerate()
                .map(|(i, text)| Unit {
                    id: format!("u{}", i),
                    unit_type: UnitType::Sentence,
                    text: text.to_string(),
                    layer: "body".to_string(),
                    start: 0,
                    end: 0,
                    fused: None,
                })
                .collect(),
            groupings: groupings
                .iter()
                .map(|(id, target, units)| Grouping {
                    id: id.to_string(),
                    target: target.to_string(),
                    kind: GroupingKind::Primary,
                    members: units.iter().map(|u| Member::content(format!("u{}", u))).collect(),
                    duplication_cluster: None,
                    shared_evidence: false,
                })
                .collect(),
            exclusions: vec![],
        }
    }

    fn run(result: ExtractionResult) -> ProducerRun {
        ProducerRun {
            producer_id: result.producer_id.clone(),
            status: RunStatus::Accepted,
            attempts: vec![ProducerAttempt {
                attempt: 0,
                result,
                findings: vec![],
            }],
            degraded_reason: None,
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_paths(["math/algebra", "math/geometry"]).unwrap()
    }

    /// One grouping over single-token units `w<first>..=w<last>`
    fn token_result(producer: &str, first: usize, last: usize) -> ExtractionResult {
        let units: Vec<Unit> = (first..=last)
            .map(|i| Unit {
                id: format!("u{}", i),
                unit_type: UnitType::Sentence,
                text: format!("w{:03}", i),
                layer: "body".to_string(),
                start: 0,
                end: 0,
                fused: None,
            })
            .collect();
        ExtractionResult {
            producer_id: producer.to_string(),
            segment_id: "s1".to_string(),
            groupings: vec![Grouping {
                id: "g".to_string(),
                target: "math/algebra".to_string(),
                kind: GroupingKind::Primary,
                members: units.iter().map(|u| Member::content(u.id.clone())).collect(),
                duplication_cluster: None,
                shared_evidence: false,
            }],
            units,
            exclusions: vec![],
        }
    }

    #[test]
    fn test_agreement_confidence_tiers() {
        assert_eq!(agreement_confidence(3, 3, false), Confidence::Full);
        assert_eq!(agreement_confidence(3, 3, true), Confidence::Majority);
        assert_eq!(agreement_confidence(2, 3, false), Confidence::Majority);
        assert_eq!(agreement_confidence(2, 4, false), Confidence::Low);
    }

    #[test]
    fn test_identical_results_agree_fully() {
        let groupings: &[(&str, &str, &[usize])] =
            &[("g1", "math/algebra", &[0, 1]), ("g2", "math/geometry", &[2, 3])];
        let runs = vec![run(result("a", groupings)), run(result("b", groupings))];

        let draft = build_draft(&Segment::new("s1"), &runs, &taxonomy(), &MatchSettings::default());
        assert!(draft.requests.is_empty());
        assert_eq!(draft.items.len(), 2);
        assert!(draft.items.iter().all(|i| i.confidence == Confidence::Full));
        assert_eq!(draft.items[0].item_id, "s1/0");
        assert_eq!(draft.items[0].chosen, Some(GroupingRef::new("a", "g1")));
    }

    #[test]
    fn test_three_producers_cluster_and_leftovers() {
        let runs = vec![
            run(result("a", &[("g1", "math/algebra", &[0, 1]), ("g2", "math/geometry", &[2, 3])])),
            run(result("b", &[("x", "math/algebra", &[0, 1])])),
            run(result("c", &[("y", "math/algebra", &[0, 1])])),
        ];

        let draft = build_draft(&Segment::new("s1"), &runs, &taxonomy(), &MatchSettings::default());
        assert_eq!(draft.comparisons.len(), 3);
        assert_eq!(draft.items.len(), 2);

        let agreed = &draft.items[0];
        assert_eq!(agreed.members.len(), 3);
        assert_eq!(agreed.confidence, Confidence::Full);

        let lone = &draft.items[1];
        assert_eq!(lone.label, AgreementLabel::Unmatched);
        assert_eq!(lone.decision_id.as_deref(), Some("s1/1"));
        assert_eq!(draft.requests.len(), 1);
        assert_eq!(draft.requests[0].producer_count, 3);
    }

    #[test]
    fn test_disagreement_inside_joined_cluster_is_kept() {
        // a and c each agree with b, but a and c differ on extent (84 shared of 100)
        let runs = vec![
            run(token_result("a", 1, 100)),
            run(token_result("b", 1, 116)),
            run(token_result("c", 17, 116)),
        ];

        let draft = build_draft(&Segment::new("s1"), &runs, &taxonomy(), &MatchSettings::default());

        let labels: Vec<AgreementLabel> = draft
            .comparisons
            .iter()
            .flat_map(|set| set.matches.iter().map(|m| m.label))
            .collect();
        assert_eq!(
            labels,
            vec![
                AgreementLabel::FullAgreement,
                AgreementLabel::ContentDisagreement,
                AgreementLabel::FullAgreement,
            ]
        );

        assert_eq!(draft.items.len(), 1);
        let item = &draft.items[0];
        assert_eq!(item.members.len(), 3);
        assert_eq!(item.label, AgreementLabel::ContentDisagreement);
        assert_eq!(item.decision_id.as_deref(), Some("s1/0"));
        assert_eq!(draft.requests.len(), 1);
        assert_eq!(draft.requests[0].case, AgreementLabel::ContentDisagreement);
        assert_eq!(draft.requests[0].candidates.len(), 3);
    }

    #[test]
    fn test_placement_disagreement_builds_request() {
        let runs = vec![
            run(result("a", &[("g1", "math/algebra", &[0, 1])])),
            run(result("b", &[("g1", "math/geometry", &[0, 1])])),
        ];
        let draft = build_draft(&Segment::new("s1"), &runs, &taxonomy(), &MatchSettings::default());
        assert_eq!(draft.requests.len(), 1);
        let request = &draft.requests[0];
        assert_eq!(request.case, AgreementLabel::PlacementDisagreement);
        assert_eq!(request.candidates.len(), 2);
        assert!(request.candidates.iter().all(|c| c.target_is_leaf));
    }

    #[test]
    fn test_single_result_is_low_without_requests() {
        let runs = vec![run(result("a", &[("g1", "math/algebra", &[0, 1])]))];
        let draft = build_draft(&Segment::new("s1"), &runs, &taxonomy(), &MatchSettings::default());
        assert!(draft.requests.is_empty());
        assert_eq!(draft.items[0].basis, ItemBasis::SingleSource);
        assert_eq!(draft.items[0].confidence, Confidence::Low);
    }
}
