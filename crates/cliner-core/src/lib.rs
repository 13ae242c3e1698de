//! CliNER Core - Domain models, errors, and shared configuration
//!
//! This crate defines the types shared by every stage of the concept
//! extraction pipeline:
//! - Label enumerations (IOB span markers, concept categories)
//! - Classification tuples and clustered (multi-span) concepts
//! - The annotated `Document` and its tokenized/chunked views
//! - Common error types
//! - Configuration management

pub mod config;
pub mod document;

pub use config::{
    CliNerConfig, ConfigError, FeaturesConfig, LearnerConfig, LoggingConfig, PipelineConfig,
};
pub use document::{chunk_from_iob, ChunkedLine, ChunkedView, Document, SpanGroup, TokenizedLine};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for CliNER operations
#[derive(Error, Debug)]
pub enum ClinerError {
    #[error("Empty training set for {pass}")]
    EmptyTrainingSet { pass: String },

    #[error("Sequential source exhausted: {0}")]
    ExhaustedSource(String),

    #[error("Degenerate concept label 'none' emitted for line {line}")]
    DegenerateLabel { line: usize },

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Index {index} out of range in {context} ({len} items)")]
    SpanOutOfRange {
        context: String,
        index: usize,
        len: usize,
    },

    #[error("Invalid list structure: {0}")]
    InvalidStructure(String),

    #[error("Length mismatch in {context}: expected {expected}, found {found}")]
    LengthMismatch {
        context: String,
        expected: usize,
        found: usize,
    },

    #[error("Unknown label: {0}")]
    UnknownLabel(String),

    #[error("Model not trained: {0}")]
    NotTrained(String),

    #[error("Model artifact error: {0}")]
    Artifact(String),

    #[error("Unsupported model artifact version {found} (supported: {supported})")]
    UnsupportedArtifactVersion { found: u32, supported: u32 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ClinerError>;

// ============================================================================
// Label Enumerations
// ============================================================================

/// Per-token span marker produced by the first pass
///
/// Numeric codes are fixed: `O=0`, `B=1`, `I=2`. Code `0` doubles as the
/// fallback class of the sequence learners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IobLabel {
    #[serde(rename = "O")]
    Outside,
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "I")]
    Inside,
}

impl IobLabel {
    /// Number of labels in the code space
    pub const COUNT: usize = 3;

    /// All labels in code order
    pub const ALL: [IobLabel; 3] = [Self::Outside, Self::Begin, Self::Inside];

    /// Numeric code used by the learners
    pub fn code(self) -> usize {
        match self {
            Self::Outside => 0,
            Self::Begin => 1,
            Self::Inside => 2,
        }
    }

    /// Inverse of [`IobLabel::code`]
    pub fn from_code(code: usize) -> Result<Self> {
        Self::ALL
            .get(code)
            .copied()
            .ok_or_else(|| ClinerError::UnknownLabel(format!("IOB code {code}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outside => "O",
            Self::Begin => "B",
            Self::Inside => "I",
        }
    }
}

impl std::fmt::Display for IobLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for IobLabel {
    type Err = ClinerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "O" => Ok(Self::Outside),
            "B" => Ok(Self::Begin),
            "I" => Ok(Self::Inside),
            _ => Err(ClinerError::UnknownLabel(s.to_string())),
        }
    }
}

/// Concept category attached to a detected span by the second pass
///
/// Numeric codes are fixed: `none=0`, `treatment=1`, `problem=2`, `test=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptLabel {
    None,
    Treatment,
    Problem,
    Test,
}

impl ConceptLabel {
    /// Number of labels in the code space
    pub const COUNT: usize = 4;

    /// All labels in code order
    pub const ALL: [ConceptLabel; 4] = [Self::None, Self::Treatment, Self::Problem, Self::Test];

    /// Numeric code used by the learners
    pub fn code(self) -> usize {
        match self {
            Self::None => 0,
            Self::Treatment => 1,
            Self::Problem => 2,
            Self::Test => 3,
        }
    }

    /// Inverse of [`ConceptLabel::code`]
    pub fn from_code(code: usize) -> Result<Self> {
        Self::ALL
            .get(code)
            .copied()
            .ok_or_else(|| ClinerError::UnknownLabel(format!("concept code {code}")))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Treatment => "treatment",
            Self::Problem => "problem",
            Self::Test => "test",
        }
    }
}

impl std::fmt::Display for ConceptLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ConceptLabel {
    type Err = ClinerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "treatment" => Ok(Self::Treatment),
            "problem" => Ok(Self::Problem),
            "test" => Ok(Self::Test),
            _ => Err(ClinerError::UnknownLabel(s.to_string())),
        }
    }
}

// ============================================================================
// Pipeline Output
// ============================================================================

/// A single contiguous concept mention: the output unit of passes one and two
///
/// `line` is 1-based; `start` and `end` are inclusive 0-based token offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassificationTuple {
    pub label: ConceptLabel,
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

impl ClassificationTuple {
    /// Build a tuple, rejecting anything that may not leave the pipeline
    pub fn new(label: ConceptLabel, line: usize, start: usize, end: usize) -> Result<Self> {
        if label == ConceptLabel::None {
            return Err(ClinerError::DegenerateLabel { line });
        }
        if line == 0 {
            return Err(ClinerError::InvalidDocument(
                "classification line numbers are 1-based".to_string(),
            ));
        }
        if start > end {
            return Err(ClinerError::InvalidDocument(format!(
                "token span {start}..{end} on line {line} is inverted"
            )));
        }
        Ok(Self {
            label,
            line,
            start,
            end,
        })
    }

    /// Token span as an inclusive `(start, end)` pair
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

/// A concept made of one or more (possibly non-adjacent) token spans on one line
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusteredConcept {
    pub label: ConceptLabel,
    /// 1-based line number
    pub line: usize,
    /// Inclusive 0-based token spans, in line order
    pub spans: Vec<(usize, usize)>,
}

impl ClusteredConcept {
    /// Create a concept from explicit spans
    pub fn new(label: ConceptLabel, line: usize, spans: Vec<(usize, usize)>) -> Self {
        Self { label, line, spans }
    }

    /// Whether this concept covers more than one span
    pub fn is_clustered(&self) -> bool {
        self.spans.len() > 1
    }
}

impl From<ClassificationTuple> for ClusteredConcept {
    fn from(tuple: ClassificationTuple) -> Self {
        Self {
            label: tuple.label,
            line: tuple.line,
            spans: vec![tuple.span()],
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iob_codes_round_trip() {
        for label in IobLabel::ALL {
            assert_eq!(IobLabel::from_code(label.code()).unwrap(), label);
        }
        assert!(IobLabel::from_code(3).is_err());
        assert_eq!("B".parse::<IobLabel>().unwrap(), IobLabel::Begin);
        assert!("X".parse::<IobLabel>().is_err());
    }

    #[test]
    fn test_concept_label_parse() {
        assert_eq!(
            "Problem".parse::<ConceptLabel>().unwrap(),
            ConceptLabel::Problem
        );
        assert_eq!(ConceptLabel::Test.code(), 3);
        assert_eq!(ConceptLabel::None.to_string(), "none");
        assert!("drug".parse::<ConceptLabel>().is_err());
    }

    #[test]
    fn test_classification_rejects_none_label() {
        let err = ClassificationTuple::new(ConceptLabel::None, 2, 0, 1).unwrap_err();
        assert!(matches!(err, ClinerError::DegenerateLabel { line: 2 }));
    }

    #[test]
    fn test_classification_rejects_inverted_span() {
        assert!(ClassificationTuple::new(ConceptLabel::Test, 1, 4, 3).is_err());
        assert!(ClassificationTuple::new(ConceptLabel::Test, 0, 0, 0).is_err());
    }

    #[test]
    fn test_singleton_cluster_from_tuple() {
        let tuple = ClassificationTuple::new(ConceptLabel::Problem, 1, 0, 5).unwrap();
        let concept = ClusteredConcept::from(tuple);
        assert_eq!(concept.spans, vec![(0, 5)]);
        assert!(!concept.is_clustered());
    }

    #[test]
    fn test_label_serde_names() {
        let json = serde_json::to_string(&IobLabel::Inside).unwrap();
        assert_eq!(json, "\"I\"");
        let json = serde_json::to_string(&ConceptLabel::Treatment).unwrap();
        assert_eq!(json, "\"treatment\"");
    }
}
