//! Agreement classifier
//!
//! Labels a match purely from its overlap and the two taxonomy targets. No
//! judgment happens here.

use super::MatchSettings;
use crate::alignment::Overlap;
use crate::taxonomy::LeafId;
use crate::types::AgreementLabel;

/// Label an accepted match
///
/// Extent agreement requires both containment directions to reach
/// `full_agreement_overlap`; below that the producers agree that something
/// corresponds but not on how far it extends.
pub fn classify_match(
    overlap: &Overlap,
    left_target: &str,
    right_target: &str,
    settings: &MatchSettings,
) -> AgreementLabel {
    if overlap.min_containment() >= settings.full_agreement_overlap {
        if same_target(left_target, right_target) {
            AgreementLabel::FullAgreement
        } else {
            AgreementLabel::PlacementDisagreement
        }
    } else {
        AgreementLabel::ContentDisagreement
    }
}

/// Target equality across path syntaxes
///
/// Unparseable targets compare by trimmed text.
pub fn same_target(a: &str, b: &str) -> bool {
    match (LeafId::parse(a), LeafId::parse(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.trim() == b.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlap(forward: f64, backward: f64) -> Overlap {
        Overlap {
            forward,
            backward,
            score: 2.0 * forward * backward / (forward + backward),
        }
    }

    #[test]
    fn test_full_agreement() {
        let settings = MatchSettings::default();
        assert_eq!(
            classify_match(&overlap(0.95, 0.9), "a/b", "a > b", &settings),
            AgreementLabel::FullAgreement
        );
    }

    #[test]
    fn test_placement_disagreement() {
        let settings = MatchSettings::default();
        assert_eq!(
            classify_match(&overlap(1.0, 1.0), "a/b", "a/c", &settings),
            AgreementLabel::PlacementDisagreement
        );
    }

    #[test]
    fn test_subset_is_content_disagreement() {
        let settings = MatchSettings::default();
        assert_eq!(
            classify_match(&overlap(1.0, 0.5), "a/b", "a/b", &settings),
            AgreementLabel::ContentDisagreement
        );
    }

    #[test]
    fn test_unparseable_targets_compare_textually() {
        assert!(same_target(" ", " "));
        assert!(!same_target("a//b", "a/b"));
    }
}
