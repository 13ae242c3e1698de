//! CliNER Model - Multi-pass concept extraction
//!
//! Implements the learning side of the pipeline:
//! - Feature extraction for tokens, spans and span pairs
//! - Dictionary vectorization and perceptron learners (flat and sequence)
//! - The three-pass [`Model`]: IOB span detection, concept classification,
//!   and optional multi-span linking
//! - Versioned model artifacts and evaluation metrics

pub mod artifact;
pub mod features;
pub mod learn;
pub mod metrics;
pub mod model;
pub mod partition;
pub mod pass;
pub mod structure;
pub mod vectorize;

pub use artifact::{ModelArtifact, ARTIFACT_VERSION};
pub use features::{FeatureDict, FeatureExtractor, FeatureKey, FeatureSignature};
pub use learn::{Classifier, GridSpec, Label, LinkLabel, TrainOptions};
pub use metrics::{ConceptMetrics, EvaluationReport, Evaluator};
pub use model::{cluster_line, Model, TrainedPasses};
pub use pass::{predict_pass, train_pass, PassModel};
pub use vectorize::{DictVectorizer, SparseVector};
