//! Core data model for reconciliation
//!
//! Extraction results arrive from producers in the shapes defined here, and
//! the adjudicated [`ConsensusRecord`] is assembled from them. Everything in
//! this module is plain serializable data; the behavior lives in the
//! alignment, matching, validation, arbitration and workflow modules.
//!
//! # Determinism
//! Collections that end up in a consensus record are either `Vec`s in a
//! documented order or `BTreeMap`s, so that the same inputs always serialize
//! to the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::validators::Finding;

// ============================================================================
// Closed vocabularies
// ============================================================================

/// Declares a closed string vocabulary
///
/// Unknown strings parse into `Unrecognized(value)` instead of failing the
/// whole payload, so the structural validator can report them.
macro_rules! closed_vocabulary {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($variant,)+
            Unrecognized(String),
        }

        impl $name {
            /// Every recognized value, in declaration order
            pub const ALLOWED: &'static [&'static str] = &[$($text),+];

            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Unrecognized(value) => value.as_str(),
                }
            }

            pub fn is_recognized(&self) -> bool {
                !matches!(self, Self::Unrecognized(_))
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                match value.as_str() {
                    $($text => Self::$variant,)+
                    _ => Self::Unrecognized(value),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::from(value.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

closed_vocabulary! {
    /// Type tag of a minimal unit
    UnitType {
        Sentence => "sentence",
        Heading => "heading",
        ListItem => "list_item",
        TableRow => "table_row",
        Quote => "quote",
        Formula => "formula",
        Other => "other",
    }
}

closed_vocabulary! {
    /// Kind of a grouping
    GroupingKind {
        Primary => "primary",
        Supplementary => "supplementary",
    }
}

closed_vocabulary! {
    /// Role of a unit inside a grouping
    Role {
        Content => "content",
        Context => "context",
        Reference => "reference",
    }
}

closed_vocabulary! {
    /// Why a unit was left out of every grouping
    ExclusionReason {
        Boilerplate => "boilerplate",
        Navigation => "navigation",
        Duplicate => "duplicate",
        OutOfScope => "out_of_scope",
        Unreadable => "unreadable",
    }
}

// ============================================================================
// Segment and extraction result
// ============================================================================

/// One reconciliation unit of source content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    /// Layer name → canonical text of that layer
    pub layers: BTreeMap<String, String>,
    /// Free-text context handed to judges (e.g. the surrounding heading)
    #[serde(default)]
    pub context: String,
}

impl Segment {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            layers: BTreeMap::new(),
            context: String::new(),
        }
    }

    pub fn with_layer(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.layers.insert(name.into(), text.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// A minimal, indivisible span of source text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub text: String,
    pub layer: String,
    /// Character offset (inclusive) into the layer's canonical text
    pub start: usize,
    /// Character offset (exclusive)
    pub end: usize,
    /// Why adjacent sentences were fused into this unit, if they were
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fused: Option<String>,
}

/// A unit's membership in a grouping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub unit_id: String,
    pub role: Role,
}

impl Member {
    pub fn content(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            role: Role::Content,
        }
    }

    pub fn context(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            role: Role::Context,
        }
    }
}

/// A producer's assertion that a set of units addresses one taxonomy leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub id: String,
    /// Target leaf, in any supported taxonomy path syntax
    pub target: String,
    pub kind: GroupingKind,
    pub members: Vec<Member>,
    /// Shared identifier of a flagged duplication cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplication_cluster: Option<String>,
    /// Flagged reuse of evidence units across groupings
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub shared_evidence: bool,
}

impl Grouping {
    /// Unit ids with the content role, in member order
    pub fn content_unit_ids(&self) -> impl Iterator<Item = &str> {
        self.members
            .iter()
            .filter(|m| m.role == Role::Content)
            .map(|m| m.unit_id.as_str())
    }
}

/// A unit deliberately left out of all groupings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub unit_id: String,
    pub reason: ExclusionReason,
}

/// Full output of one producer for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Stamped by the pipeline with the registered producer id
    #[serde(default)]
    pub producer_id: String,
    pub segment_id: String,
    pub units: Vec<Unit>,
    pub groupings: Vec<Grouping>,
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
}

impl ExtractionResult {
    pub fn unit(&self, unit_id: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.id == unit_id)
    }

    pub fn grouping(&self, grouping_id: &str) -> Option<&Grouping> {
        self.groupings.iter().find(|g| g.id == grouping_id)
    }

    /// Concatenated text of a grouping's content units (ghost references skipped)
    pub fn content_text(&self, grouping: &Grouping) -> String {
        grouping
            .content_unit_ids()
            .filter_map(|id| self.unit(id))
            .map(|u| u.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Confidence and agreement labels
// ============================================================================

/// Confidence attached to every adjudicated item and decision
///
/// Exactly three values exist. A rejected candidate is expressed with
/// `kept = false`, never with an additional confidence level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Majority,
    Full,
}

impl Confidence {
    pub const ALLOWED: [&'static str; 3] = ["full", "majority", "low"];

    /// Strict parse of the three enumerated values
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "full" => Some(Confidence::Full),
            "majority" => Some(Confidence::Majority),
            "low" => Some(Confidence::Low),
            _ => None,
        }
    }

    /// One tier lower (`low` stays `low`)
    pub fn downgrade(self) -> Self {
        match self {
            Confidence::Full => Confidence::Majority,
            Confidence::Majority | Confidence::Low => Confidence::Low,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Confidence::Full => "full",
            Confidence::Majority => "majority",
            Confidence::Low => "low",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome label of a correspondence
///
/// Declaration order is severity order, so `max()` over a cluster's labels
/// yields the most severe one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementLabel {
    FullAgreement,
    PlacementDisagreement,
    ContentDisagreement,
    Unmatched,
}

impl AgreementLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            AgreementLabel::FullAgreement => "full_agreement",
            AgreementLabel::PlacementDisagreement => "placement_disagreement",
            AgreementLabel::ContentDisagreement => "content_disagreement",
            AgreementLabel::Unmatched => "unmatched",
        }
    }
}

impl fmt::Display for AgreementLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one grouping of one producer's result
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupingRef {
    pub producer_id: String,
    pub grouping_id: String,
}

impl GroupingRef {
    pub fn new(producer_id: impl Into<String>, grouping_id: impl Into<String>) -> Self {
        Self {
            producer_id: producer_id.into(),
            grouping_id: grouping_id.into(),
        }
    }
}

impl fmt::Display for GroupingRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer_id, self.grouping_id)
    }
}

// ============================================================================
// Consensus record
// ============================================================================

/// Verdict over one disagreement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationDecision {
    /// `<segment>/<cluster index>`, or `<item>/v<version>` for review corrections
    pub decision_id: String,
    pub case: AgreementLabel,
    pub considered: Vec<GroupingRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<GroupingRef>,
    /// Overriding taxonomy target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Overriding extent (unit ids of the chosen producer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<Vec<String>>,
    pub kept: bool,
    pub confidence: Confidence,
    pub rationale: String,
    /// Identity of the judging process
    pub judge: String,
    pub attempts: u32,
    /// SHA-256 hex of the rendered prompt
    pub prompt_digest: String,
    pub escalated: bool,
}

/// How an item's final state was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemBasis {
    /// All members agreed; no judgment involved
    Agreement,
    /// Decided by a judge
    Arbitrated,
    /// Only one producer returned a usable result
    SingleSource,
    /// Judge failed; placeholder awaiting a human
    Escalated,
    /// Set by a human correction
    Corrected,
}

/// Why an item is listed for human review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    LowConfidence,
    Arbitrated,
    DegradedSource,
    Escalated,
    DraftFinding,
}

/// One adjudicated grouping (or escalation placeholder)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjudicatedItem {
    /// `<segment>/<cluster index>`
    pub item_id: String,
    pub label: AgreementLabel,
    /// Every grouping in the matched cluster, in producer order
    pub members: Vec<GroupingRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen: Option<GroupingRef>,
    /// Winning grouping with any overriding target/extent applied; `None`
    /// for an escalation placeholder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
    pub kept: bool,
    pub confidence: Confidence,
    pub basis: ItemBasis,
    /// Best match score inside the cluster, when there was a match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<String>,
    pub needs_review: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub review_reasons: Vec<ReviewReason>,
}

impl AdjudicatedItem {
    pub fn flag(&mut self, reason: ReviewReason) {
        self.needs_review = true;
        if !self.review_reasons.contains(&reason) {
            self.review_reasons.push(reason);
            self.review_reasons.sort();
        }
    }
}

/// Final state of one producer's result after validation and repair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Accepted,
    Repaired,
    Degraded,
}

/// One attempt of one producer, as received
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerAttempt {
    pub attempt: u32,
    pub result: ExtractionResult,
    pub findings: Vec<Finding>,
}

/// Every raw result a producer returned for the segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducerRun {
    pub producer_id: String,
    pub status: RunStatus,
    /// Attempts in order; the last one is the result that was reconciled
    pub attempts: Vec<ProducerAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<String>,
}

impl ProducerRun {
    pub fn final_result(&self) -> Option<&ExtractionResult> {
        self.attempts.last().map(|a| &a.result)
    }

    pub fn is_degraded(&self) -> bool {
        self.status == RunStatus::Degraded
    }
}

/// A producer that contributed no result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerFailure {
    pub producer_id: String,
    pub error: String,
}

/// One accepted correspondence, as recorded for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    pub left: GroupingRef,
    pub right: GroupingRef,
    pub score: f64,
    pub forward: f64,
    pub backward: f64,
    pub label: AgreementLabel,
}

/// One pairwise comparison, as recorded for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub left_producer: String,
    pub right_producer: String,
    pub approximate: bool,
    pub matches: Vec<MatchSummary>,
    pub unmatched_left: Vec<GroupingRef>,
    pub unmatched_right: Vec<GroupingRef>,
}

/// Whether a record still needs a human
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Reconciled,
    NeedsReview,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Reconciled => "reconciled",
            RecordStatus::NeedsReview => "needs_review",
        }
    }
}

/// Adjudicated, versioned, audit-complete output for one segment
///
/// Contains no wall-clock time or random identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRecord {
    pub segment_id: String,
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<u32>,
    pub status: RecordStatus,
    pub items: Vec<AdjudicatedItem>,
    pub decisions: Vec<ArbitrationDecision>,
    pub producer_runs: Vec<ProducerRun>,
    #[serde(default)]
    pub producer_failures: Vec<ProducerFailure>,
    pub comparisons: Vec<ComparisonSummary>,
    /// Findings from validating the adjudicated draft
    #[serde(default)]
    pub draft_findings: Vec<Finding>,
    /// SHA-256 hex of the canonical JSON with this field empty
    #[serde(default)]
    pub content_hash: String,
}

impl ConsensusRecord {
    pub fn item(&self, item_id: &str) -> Option<&AdjudicatedItem> {
        self.items.iter().find(|i| i.item_id == item_id)
    }

    pub fn run(&self, producer_id: &str) -> Option<&ProducerRun> {
        self.producer_runs.iter().find(|r| r.producer_id == producer_id)
    }

    /// Look up the final grouping a reference points at
    pub fn grouping(&self, reference: &GroupingRef) -> Option<&Grouping> {
        self.run(&reference.producer_id)
            .and_then(|run| run.final_result())
            .and_then(|result| result.grouping(&reference.grouping_id))
    }

    pub fn derive_status(items: &[AdjudicatedItem]) -> RecordStatus {
        if items.iter().any(|i| i.needs_review) {
            RecordStatus::NeedsReview
        } else {
            RecordStatus::Reconciled
        }
    }
}
