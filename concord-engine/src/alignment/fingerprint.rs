//! Span fingerprints and similarity
//!
//! Producers segment text independently, so exact text or offset matching is
//! unusable. A span is normalized (diacritics and letterform variants folded,
//! case folded, whitespace collapsed) and reduced to its set of fixed-width
//! character shingles; similarity is Jaccard over those sets.
//!
//! # Edge cases
//! - A span shorter than the shingle width fingerprints as its whole
//!   normalized string, so two short spans only match when equal.
//! - An empty span has similarity 0 with anything, including another empty span.

use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Default shingle width (characters)
pub const DEFAULT_SHINGLE_WIDTH: usize = 5;

/// Normalize a span for fingerprinting
pub fn normalize(text: &str) -> String {
    let mut folded = String::with_capacity(text.len());
    for c in text.nfkd().filter(|c| !is_combining_mark(*c)) {
        match fold_letterform(c) {
            Some(replacement) => folded.push_str(replacement),
            None => folded.extend(c.to_lowercase()),
        }
    }
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Letters that NFKD does not decompose
fn fold_letterform(c: char) -> Option<&'static str> {
    match c {
        'ß' | 'ẞ' => Some("ss"),
        'æ' | 'Æ' => Some("ae"),
        'œ' | 'Œ' => Some("oe"),
        'ø' | 'Ø' => Some("o"),
        'đ' | 'Đ' | 'ð' | 'Ð' => Some("d"),
        'ł' | 'Ł' => Some("l"),
        'ı' => Some("i"),
        'þ' | 'Þ' => Some("th"),
        '‘' | '’' | '‚' | '′' => Some("'"),
        '“' | '”' | '„' | '″' => Some("\""),
        '‐' | '‑' | '‒' | '–' | '—' | '−' => Some("-"),
        _ => None,
    }
}

/// Shingle set of one span
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    shingles: BTreeSet<String>,
}

impl Fingerprint {
    /// Fingerprint a raw span
    pub fn of(text: &str, width: usize) -> Self {
        Self {
            shingles: shingles(&normalize(text), width),
        }
    }

    pub fn shingles(&self) -> &BTreeSet<String> {
        &self.shingles
    }

    pub fn is_empty(&self) -> bool {
        self.shingles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.shingles.len()
    }

    /// Jaccard similarity; 0 when either side is empty
    pub fn jaccard(&self, other: &Fingerprint) -> f64 {
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let shared = self.shingles.intersection(&other.shingles).count();
        let union = self.shingles.len() + other.shingles.len() - shared;
        shared as f64 / union as f64
    }
}

/// Character shingles of an already-normalized string
pub fn shingles(normalized: &str, width: usize) -> BTreeSet<String> {
    let width = width.max(1);
    let chars: Vec<char> = normalized.chars().collect();

    if chars.is_empty() {
        return BTreeSet::new();
    }
    if chars.len() < width {
        return BTreeSet::from([normalized.to_string()]);
    }

    chars.windows(width).map(|w| w.iter().collect()).collect()
}

/// Similarity of two raw spans in [0, 1]
pub fn similarity(a: &str, b: &str, width: usize) -> f64 {
    Fingerprint::of(a, width).jaccard(&Fingerprint::of(b, width))
}
