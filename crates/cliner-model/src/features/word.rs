//! Word-level features
//!
//! Orthographic and lexical signals computed from a single token. The same
//! primitives feed token features (first pass) and chunk features (second
//! pass); each style selects a different subset.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{FeatureDict, FeatureKey};

/// Which subset of word features to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordStyle {
    /// Running text: full shape and affixes
    Prose,
    /// Lists, tables and headers: collapsed shape, no affixes
    Nonprose,
}

/// A token followed by an optional relation word and a numeric value,
/// e.g. `hgb 12.5`, `WBC : 11.2`, `potassium was >5.1`
static TEST_RESULT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z][\w\-/]*\s*(?:[:=]|is|was|of)?\s*[<>]?\s*-?\d+(?:\.\d+)?")
        .expect("test result pattern is valid")
});

static HAS_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("digit pattern is valid"));

/// Map each character to its class: `X` upper, `x` lower, `d` digit
pub fn word_shape(word: &str) -> String {
    word.chars()
        .map(|c| {
            if c.is_uppercase() {
                'X'
            } else if c.is_lowercase() {
                'x'
            } else if c.is_ascii_digit() {
                'd'
            } else {
                c
            }
        })
        .collect()
}

/// [`word_shape`] with runs of the same class collapsed (`Xxxxx` -> `Xx`)
pub fn collapsed_shape(word: &str) -> String {
    let mut shape: Vec<char> = word_shape(word).chars().collect();
    shape.dedup();
    shape.into_iter().collect()
}

/// Whether the text starting at a token reads like a lab value
pub fn is_test_result(context: &str) -> bool {
    TEST_RESULT.is_match(context)
}

pub fn is_punctuation(word: &str) -> bool {
    !word.is_empty() && word.chars().all(|c| c.is_ascii_punctuation())
}

fn length_bucket(word: &str) -> &'static str {
    match word.chars().count() {
        0..=2 => "short",
        3..=6 => "medium",
        _ => "long",
    }
}

fn prefix(word: &str, n: usize) -> String {
    word.chars().take(n).collect()
}

fn suffix(word: &str, n: usize) -> String {
    let count = word.chars().count();
    word.chars().skip(count.saturating_sub(n)).collect()
}

fn orthography(word: &str) -> Vec<&'static str> {
    let mut flags = Vec::new();
    let has_alpha = word.chars().any(char::is_alphabetic);

    if has_alpha && word.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase) {
        flags.push("all_caps");
    } else if word.chars().next().is_some_and(char::is_uppercase) {
        flags.push("title");
    }
    if HAS_DIGIT.is_match(word) {
        flags.push(if has_alpha { "alnum" } else { "numeric" });
    }
    if is_punctuation(word) {
        flags.push("punct");
    } else if word.contains('-') {
        flags.push("hyphen");
    }
    flags
}

/// Features of one token in the given style
pub fn word_features(word: &str, style: WordStyle) -> FeatureDict {
    let lower = word.to_lowercase();
    let mut features = FeatureDict::new();

    features.insert(FeatureKey::new("word", &lower), 1.0);
    features.insert(FeatureKey::new("length", length_bucket(word)), 1.0);
    for flag in orthography(word) {
        features.insert(FeatureKey::new("orth", flag), 1.0);
    }

    match style {
        WordStyle::Prose => {
            features.insert(FeatureKey::new("shape", word_shape(word)), 1.0);
            features.insert(FeatureKey::new("prefix3", prefix(&lower, 3)), 1.0);
            features.insert(FeatureKey::new("suffix3", suffix(&lower, 3)), 1.0);
        }
        WordStyle::Nonprose => {
            features.insert(FeatureKey::new("shape", collapsed_shape(word)), 1.0);
        }
    }

    features
}
