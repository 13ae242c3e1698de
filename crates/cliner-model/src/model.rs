//! Pipeline orchestrator
//!
//! [`Model`] chains the three passes:
//! 1. IOB span detection over tokenized sentences, with separate learners for
//!    prose and non-prose sentences
//! 2. concept classification of every detected span
//! 3. optional pairwise linking of same-line spans into multi-span concepts

use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use cliner_core::{
    ChunkedLine, ChunkedView, CliNerConfig, ClassificationTuple, ClinerError, ClusteredConcept,
    ConceptLabel, Document, IobLabel, Result, TokenizedLine,
};
use petgraph::unionfind::UnionFind;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::artifact::{ModelArtifact, ARTIFACT_VERSION};
use crate::features::{FeatureDict, FeatureExtractor, FeatureKey};
use crate::learn::{Label, LinkLabel, TrainOptions};
use crate::partition::{interleave, partition};
use crate::pass::{predict_pass, train_pass, PassModel};

pub const PROSE_PASS: &str = "prose";
pub const NONPROSE_PASS: &str = "nonprose";
pub const CONCEPT_PASS: &str = "concept";
pub const LINK_PASS: &str = "link";

/// Trained state of every pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedPasses {
    pub prose: PassModel,
    pub nonprose: PassModel,
    pub concept: PassModel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<PassModel>,
}

#[derive(Debug, Clone, PartialEq)]
enum ModelState {
    Untrained,
    Trained(TrainedPasses),
}

/// Multi-pass clinical concept extractor
#[derive(Debug)]
pub struct Model {
    sequence_mode: bool,
    options: TrainOptions,
    extractor: FeatureExtractor,
    state: ModelState,
}

impl Model {
    /// Untrained model with default learner options and word features
    pub fn new(sequence_mode: bool) -> Self {
        Self {
            sequence_mode,
            options: TrainOptions::default(),
            extractor: FeatureExtractor::new(),
            state: ModelState::Untrained,
        }
    }

    /// Untrained model configured from application settings
    pub fn from_config(config: &CliNerConfig) -> Result<Self> {
        let mut options = TrainOptions::from(&config.learner);
        if config.pipeline.grid_search {
            options = options.with_grid(&config.learner);
        }
        Ok(Self {
            sequence_mode: config.pipeline.sequence_mode,
            options,
            extractor: FeatureExtractor::from_config(&config.features)?,
            state: ModelState::Untrained,
        })
    }

    pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_options(mut self, options: TrainOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sequence_mode(&self) -> bool {
        self.sequence_mode
    }

    pub fn is_trained(&self) -> bool {
        matches!(self.state, ModelState::Trained(_))
    }

    /// Whether a link pass was trained
    pub fn has_third_pass(&self) -> bool {
        matches!(&self.state, ModelState::Trained(p) if p.link.is_some())
    }

    fn passes(&self) -> Result<&TrainedPasses> {
        match &self.state {
            ModelState::Trained(passes) => Ok(passes),
            ModelState::Untrained => Err(ClinerError::NotTrained(
                "train or load the model before predicting".to_string(),
            )),
        }
    }

    // ========================================================================
    // Training
    // ========================================================================

    /// Train every pass on annotated documents, replacing any previous state
    ///
    /// `grid_search` enables cross-validated tuning even when the model was
    /// built without it.
    pub fn train(&mut self, documents: &[Document], grid_search: bool, enable_third_pass: bool) -> Result<()> {
        let options = match (&self.options.grid, grid_search) {
            (None, true) => self.options.clone().with_grid(&Default::default()),
            _ => self.options.clone(),
        };
        info!(
            documents = documents.len(),
            sequence_mode = self.sequence_mode,
            grid_search = options.grid.is_some(),
            third_pass = enable_third_pass,
            "Training model"
        );

        // First pass: IOB over tokenized sentences
        let sentences: Vec<TokenizedLine> = documents
            .iter()
            .flat_map(|d| d.tokenized_sentences().iter().cloned())
            .collect();
        let iobs: Vec<Vec<IobLabel>> = documents.iter().flat_map(|d| d.iob_labels()).collect();

        let mut session = self.extractor.session(&sentences)?;
        let parts = partition(&sentences, &iobs, |s| session.token_features(s))?;
        info!(
            prose = parts.prose.len(),
            nonprose = parts.nonprose.len(),
            "Partitioned sentences"
        );

        let prose = train_or_placeholder(PROSE_PASS, &parts.prose, &parts.prose_labels, self.sequence_mode, &options)?;
        let nonprose = train_or_placeholder(
            NONPROSE_PASS,
            &parts.nonprose,
            &parts.nonprose_labels,
            self.sequence_mode,
            &options,
        )?;

        // Second pass: one combined classifier over every gold span
        let views: Vec<ChunkedView> = documents.iter().map(Document::chunked_view).collect();
        let mut concept_groups = Vec::new();
        let mut concept_labels = Vec::new();
        for view in &views {
            for (line, indices) in view.lines.iter().zip(&view.indices) {
                concept_groups.push(self.extractor.span_features(line, indices)?);
            }
            concept_labels.extend(view.labels.iter().copied());
        }
        let concept = train_or_placeholder(CONCEPT_PASS, &concept_groups, &concept_labels, false, &options)?;

        // Third pass: pairwise links between members of multi-span concepts
        let link = if enable_third_pass {
            Some(self.train_link_pass(&views, &options)?)
        } else {
            None
        };

        self.state = ModelState::Trained(TrainedPasses {
            prose,
            nonprose,
            concept,
            link,
        });
        self.extractor.log_cache_stats();
        info!("Model trained");
        Ok(())
    }

    fn train_link_pass(&self, views: &[ChunkedView], options: &TrainOptions) -> Result<PassModel> {
        let mut groups = Vec::new();
        let mut labels = Vec::new();

        for view in views {
            // (line, chunk) -> chunks of the same concept
            let mut related: HashMap<(usize, usize), &[usize]> = HashMap::new();
            for group in &view.groups {
                for &chunk in &group.chunks {
                    related.insert((group.line, chunk), &group.chunks);
                }
            }

            for (line_idx, (line, indices)) in view.lines.iter().zip(&view.indices).enumerate() {
                groups.push(self.extractor.pair_features(line, indices)?);
                for (a, &i) in indices.iter().enumerate() {
                    for &j in &indices[a + 1..] {
                        let linked = related
                            .get(&(line_idx, i))
                            .is_some_and(|members| members.contains(&j));
                        labels.push(LinkLabel::from(linked));
                    }
                }
            }
        }

        let positives = labels.iter().filter(|l| **l == LinkLabel::Linked).count();
        info!(pairs = labels.len(), positives, "Built span pair training set");

        let options = TrainOptions {
            default_label: LinkLabel::Unlinked.code(),
            ..options.clone()
        };
        train_or_placeholder(LINK_PASS, &groups, &labels, false, &options)
    }

    // ========================================================================
    // Prediction
    // ========================================================================

    /// Extract concepts from one document
    ///
    /// Without a trained link pass (or with `use_third_pass` off) every
    /// detected span becomes its own concept.
    pub fn predict(&self, document: &Document, use_third_pass: bool) -> Result<Vec<ClusteredConcept>> {
        let passes = self.passes()?;
        let sentences = document.tokenized_sentences();

        // First pass
        let mut session = self.extractor.session(sentences)?;
        let unlabeled: Vec<Vec<IobLabel>> = vec![Vec::new(); sentences.len()];
        let parts = partition(sentences, &unlabeled, |s| session.token_features(s))?;
        let prose: Vec<Vec<IobLabel>> = predict_pass(&passes.prose, &parts.prose)?;
        let nonprose: Vec<Vec<IobLabel>> = predict_pass(&passes.nonprose, &parts.nonprose)?;
        let iobs = interleave(&parts.flags, prose, nonprose)?;
        self.extractor.log_cache_stats();

        let (chunked, indices) = document.chunk_predicted(&iobs)?;
        let span_count: usize = indices.iter().map(Vec::len).sum();
        if span_count == 0 {
            info!("No spans detected, skipping concept classification");
            return Ok(Vec::new());
        }

        // Second pass
        let span_groups = chunked
            .iter()
            .zip(&indices)
            .map(|(line, inds)| self.extractor.span_features(line, inds))
            .collect::<Result<Vec<_>>>()?;
        let labels: Vec<Vec<ConceptLabel>> = predict_pass(&passes.concept, &span_groups)?;

        let mut tuples = Vec::with_capacity(chunked.len());
        for (line_idx, ((line, inds), line_labels)) in chunked.iter().zip(&indices).zip(&labels).enumerate() {
            tuples.push(line_tuples(line_idx + 1, line, inds, line_labels)?);
        }
        debug!(spans = span_count, "Classified spans");

        // Third pass
        let link = match (use_third_pass, &passes.link) {
            (true, Some(link)) => Some(link),
            (true, None) => {
                warn!("Model has no trained link pass, emitting single-span concepts");
                None
            }
            (false, _) => None,
        };

        let Some(link) = link else {
            return Ok(tuples.into_iter().flatten().map(ClusteredConcept::from).collect());
        };

        let pair_groups = chunked
            .iter()
            .zip(&indices)
            .map(|(line, inds)| self.extractor.pair_features(line, inds))
            .collect::<Result<Vec<_>>>()?;
        let links: Vec<Vec<LinkLabel>> = predict_pass(link, &pair_groups)?;

        let mut concepts = Vec::new();
        for (spans, line_links) in tuples.iter().zip(&links) {
            concepts.extend(cluster_line(spans, line_links)?);
        }
        Ok(concepts)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Write the trained model as a versioned artifact
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let passes = self.passes()?;
        let artifact = ModelArtifact {
            format_version: ARTIFACT_VERSION,
            created_at: Utc::now(),
            sequence_mode: self.sequence_mode,
            third_pass: passes.link.is_some(),
            feature_plan: self.extractor.signature(),
            passes: passes.clone(),
        };
        artifact.write(path.as_ref())
    }

    /// Load an artifact using the default feature extractor
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(path, FeatureExtractor::new())
    }

    /// Load an artifact, featurizing with `extractor`
    ///
    /// The extractor must produce the same feature plan the model was
    /// trained with.
    pub fn load_with(path: impl AsRef<Path>, extractor: FeatureExtractor) -> Result<Self> {
        let artifact = ModelArtifact::read(path.as_ref())?;
        Self::from_artifact(artifact, extractor)
    }

    pub fn from_artifact(artifact: ModelArtifact, extractor: FeatureExtractor) -> Result<Self> {
        let signature = extractor.signature();
        if artifact.feature_plan != signature {
            return Err(ClinerError::Artifact(format!(
                "model was trained with feature plan {:?}, extractor provides {:?}",
                artifact.feature_plan, signature
            )));
        }
        if artifact.third_pass != artifact.passes.link.is_some() {
            return Err(ClinerError::Artifact(
                "third pass flag disagrees with stored passes".to_string(),
            ));
        }
        if artifact.passes.prose.is_sequence() != artifact.sequence_mode
            || artifact.passes.nonprose.is_sequence() != artifact.sequence_mode
        {
            return Err(ClinerError::Artifact(
                "first pass classifiers disagree with sequence mode".to_string(),
            ));
        }

        Ok(Self {
            sequence_mode: artifact.sequence_mode,
            options: TrainOptions::default(),
            extractor,
            state: ModelState::Trained(artifact.passes),
        })
    }
}

/// Train a pass, falling back to a single placeholder example when there is
/// no training data so the pass stays usable
fn train_or_placeholder<L: Label>(
    pass: &str,
    groups: &[Vec<FeatureDict>],
    labels: &[L],
    sequence_mode: bool,
    options: &TrainOptions,
) -> Result<PassModel> {
    match train_pass(pass, groups, labels, sequence_mode, options) {
        Err(ClinerError::EmptyTrainingSet { .. }) => {
            warn!(pass, "No training data, fitting placeholder example");
            let placeholder: FeatureDict = [(FeatureKey::new("dummy", "*"), 1.0)].into_iter().collect();
            train_pass(pass, &[vec![placeholder]], &[L::from_code(0)?], sequence_mode, options)
        }
        other => other,
    }
}

/// Classification tuples of one chunked line
///
/// Chunk offsets are converted back to token offsets by counting the tokens
/// of every chunk before it.
fn line_tuples(
    line_number: usize,
    chunked: &ChunkedLine,
    indices: &[usize],
    labels: &[ConceptLabel],
) -> Result<Vec<ClassificationTuple>> {
    if indices.len() != labels.len() {
        return Err(ClinerError::LengthMismatch {
            context: format!("concept labels on line {line_number}"),
            expected: indices.len(),
            found: labels.len(),
        });
    }

    let mut starts = Vec::with_capacity(chunked.len());
    let mut position = 0;
    for chunk in chunked {
        starts.push(position);
        position += chunk.split_whitespace().count();
    }

    indices
        .iter()
        .zip(labels)
        .map(|(&ind, &label)| {
            let (Some(&start), Some(chunk)) = (starts.get(ind), chunked.get(ind)) else {
                return Err(ClinerError::SpanOutOfRange {
                    context: format!("chunks of line {line_number}"),
                    index: ind,
                    len: chunked.len(),
                });
            };
            let width = chunk.split_whitespace().count().max(1);
            ClassificationTuple::new(label, line_number, start, start + width - 1)
        })
        .collect()
}

/// Merge the spans of one line along positive links
///
/// `links` holds one decision per span pair in lexicographic order. Links
/// are applied transitively: spans connected through any chain of positive
/// pairs share a concept. Each concept takes the label and line of its first
/// span; concepts are ordered by their first span.
pub fn cluster_line(tuples: &[ClassificationTuple], links: &[LinkLabel]) -> Result<Vec<ClusteredConcept>> {
    let n = tuples.len();
    let expected = n * n.saturating_sub(1) / 2;
    if links.len() != expected {
        return Err(ClinerError::LengthMismatch {
            context: "span pair links".to_string(),
            expected,
            found: links.len(),
        });
    }

    let mut sets = UnionFind::<usize>::new(n);
    let mut pair = 0;
    for a in 0..n {
        for b in a + 1..n {
            if links[pair] == LinkLabel::Linked {
                sets.union(a, b);
            }
            pair += 1;
        }
    }

    let mut concepts: Vec<ClusteredConcept> = Vec::new();
    let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
    for (member, tuple) in tuples.iter().enumerate() {
        let root = sets.find(member);
        match slot_of_root.get(&root) {
            Some(&slot) => concepts[slot].spans.push(tuple.span()),
            None => {
                slot_of_root.insert(root, concepts.len());
                concepts.push(ClusteredConcept::from(*tuple));
            }
        }
    }
    Ok(concepts)
}
