//! Learners
//!
//! Two interchangeable classifiers over [`SparseVector`] rows:
//! - [`LinearClassifier`]: multiclass perceptron over independent items
//! - [`SequenceClassifier`]: structured perceptron with Viterbi decoding
//!
//! Both work on numeric label codes; [`Label`] maps pass-specific label
//! enums onto those codes. Code `0` is the fallback class everywhere.

pub mod grid;
pub mod linear;
pub mod sequence;

use cliner_core::{ClinerError, ConceptLabel, IobLabel, LearnerConfig, Result};
use serde::{Deserialize, Serialize};

pub use grid::GridSpec;
pub use linear::LinearClassifier;
pub use sequence::SequenceClassifier;

use crate::vectorize::SparseVector;

// ============================================================================
// Label Code Spaces
// ============================================================================

/// A label type with a fixed numeric code space
pub trait Label: Copy + Eq + std::fmt::Debug {
    /// Number of codes, `0..COUNT`
    const COUNT: usize;

    fn code(self) -> usize;
    fn from_code(code: usize) -> Result<Self>;
}

impl Label for IobLabel {
    const COUNT: usize = IobLabel::COUNT;

    fn code(self) -> usize {
        IobLabel::code(self)
    }

    fn from_code(code: usize) -> Result<Self> {
        IobLabel::from_code(code)
    }
}

impl Label for ConceptLabel {
    const COUNT: usize = ConceptLabel::COUNT;

    fn code(self) -> usize {
        ConceptLabel::code(self)
    }

    fn from_code(code: usize) -> Result<Self> {
        ConceptLabel::from_code(code)
    }
}

/// Third-pass decision for a candidate span pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkLabel {
    Unlinked,
    Linked,
}

impl Label for LinkLabel {
    const COUNT: usize = 2;

    fn code(self) -> usize {
        match self {
            Self::Unlinked => 0,
            Self::Linked => 1,
        }
    }

    fn from_code(code: usize) -> Result<Self> {
        match code {
            0 => Ok(Self::Unlinked),
            1 => Ok(Self::Linked),
            _ => Err(ClinerError::UnknownLabel(format!("link code {code}"))),
        }
    }
}

impl From<bool> for LinkLabel {
    fn from(linked: bool) -> Self {
        if linked {
            Self::Linked
        } else {
            Self::Unlinked
        }
    }
}

// ============================================================================
// Training Options
// ============================================================================

/// Hyperparameters shared by both learners
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    /// Maximum passes over the training data
    pub epochs: usize,
    /// Average weights over all updates
    pub averaged: bool,
    /// Cross-validated search over `epochs` x `averaged`, when set
    pub grid: Option<GridSpec>,
    /// Class predicted when training saw no labels at all
    pub default_label: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self::from(&LearnerConfig::default())
    }
}

impl From<&LearnerConfig> for TrainOptions {
    fn from(config: &LearnerConfig) -> Self {
        Self {
            epochs: config.epochs,
            averaged: config.averaged,
            grid: None,
            default_label: 0,
        }
    }
}

impl TrainOptions {
    /// Enable grid search with the candidate set from `config`
    pub fn with_grid(mut self, config: &LearnerConfig) -> Self {
        self.grid = Some(GridSpec::from(config));
        self
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// A trained classifier of either kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Flat(LinearClassifier),
    Sequence(SequenceClassifier),
}

impl Classifier {
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::Sequence(_))
    }

    /// Label codes for independent rows (flat classifier only)
    pub fn predict_flat(&self, rows: &[SparseVector]) -> Result<Vec<usize>> {
        match self {
            Self::Flat(model) => Ok(model.predict(rows)),
            Self::Sequence(_) => Err(ClinerError::Artifact(
                "sequence classifier asked for flat predictions".to_string(),
            )),
        }
    }

    /// Label codes per sequence (sequence classifier only)
    pub fn predict_sequences(&self, sequences: &[Vec<SparseVector>]) -> Result<Vec<Vec<usize>>> {
        match self {
            Self::Sequence(model) => Ok(model.predict(sequences)),
            Self::Flat(_) => Err(ClinerError::Artifact(
                "flat classifier asked for sequence predictions".to_string(),
            )),
        }
    }
}

/// Sorted distinct codes, rejecting codes outside `0..n_classes`
pub(crate) fn seen_classes<'a>(
    labels: impl IntoIterator<Item = &'a usize>,
    n_classes: usize,
) -> Result<Vec<usize>> {
    let mut classes: Vec<usize> = Vec::new();
    for &code in labels {
        if code >= n_classes {
            return Err(ClinerError::UnknownLabel(format!(
                "code {code} outside 0..{n_classes}"
            )));
        }
        if let Err(pos) = classes.binary_search(&code) {
            classes.insert(pos, code);
        }
    }
    Ok(classes)
}

/// Highest-scoring class; ties go to the earliest (lowest) class
pub(crate) fn argmax<F: Fn(usize) -> f64>(classes: &[usize], score: F) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for &class in classes {
        let s = score(class);
        if best.map_or(true, |(_, b)| s > b) {
            best = Some((class, s));
        }
    }
    best.map(|(class, _)| class)
}
