//! Structural validation
//!
//! A fixed, ordered battery of invariant checks over extraction results,
//! consensus drafts and judge verdicts. Every failure is a [`Finding`]
//! tagged with its check category; categories decide whether the finding
//! can be sent back to the originating producer for repair or must block
//! acceptance.
//!
//! | # | Category | Repairable |
//! |---|----------|-----------|
//! | 1 | ghost reference (incl. cross-layer grouping) | yes |
//! | 2 | duplicate identifier | no |
//! | 3 | empty content set / missing outcome | yes |
//! | 4 | content overlap outside a flagged cluster | no |
//! | 5 | unit silently absent | no |
//! | 6 | target is not a leaf | yes |
//! | 7 | value outside its closed vocabulary | yes |
//! | 8 | unit text differs from its layer at its offsets | no |

pub mod decision;
pub mod structural;

pub use decision::validate_verdict;
pub use structural::StructuralValidator;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Check category, in battery order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    GhostReference,
    DuplicateIdentifier,
    EmptyContent,
    ContentOverlap,
    CoverageGap,
    NonLeafTarget,
    VocabularyViolation,
    TextMismatch,
}

impl CheckCategory {
    /// Position in the battery (1-based)
    pub fn number(self) -> u8 {
        match self {
            CheckCategory::GhostReference => 1,
            CheckCategory::DuplicateIdentifier => 2,
            CheckCategory::EmptyContent => 3,
            CheckCategory::ContentOverlap => 4,
            CheckCategory::CoverageGap => 5,
            CheckCategory::NonLeafTarget => 6,
            CheckCategory::VocabularyViolation => 7,
            CheckCategory::TextMismatch => 8,
        }
    }

    pub fn is_repairable(self) -> bool {
        matches!(
            self,
            CheckCategory::GhostReference
                | CheckCategory::EmptyContent
                | CheckCategory::NonLeafTarget
                | CheckCategory::VocabularyViolation
        )
    }
}

/// One failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: CheckCategory,
    /// What failed (`grouping/unit`, unit id, field name, ...)
    pub subject: String,
    pub message: String,
    pub repairable: bool,
}

impl Finding {
    pub fn new(check: CheckCategory, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            check,
            subject: subject.into(),
            message: message.into(),
            repairable: check.is_repairable(),
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[check {}] {}: {}",
            self.check.number(),
            self.subject,
            self.message
        )
    }
}

/// Only the findings a producer can be asked to fix
pub fn repairable_only(findings: &[Finding]) -> Vec<Finding> {
    findings.iter().filter(|f| f.repairable).cloned().collect()
}
