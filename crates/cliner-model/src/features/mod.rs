//! Feature extraction
//!
//! Produces keyed feature dictionaries for every pass of the pipeline:
//! - token features per sentence (first pass), with a prose flag
//! - span features per detected chunk (second pass)
//! - pair features per candidate span pair on a line (third pass)
//!
//! External annotators (tagger, lexicon) are explicit handles owned by the
//! [`FeatureExtractor`]; nothing here touches global state.

pub mod cache;
pub mod lexicon;
pub mod plan;
pub mod tagger;
pub mod word;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use cliner_core::{ClinerError, FeaturesConfig, Result, TokenizedLine};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use cache::{AnnotationCache, CacheStats, CacheStatsReport};
pub use lexicon::{CachedLexicon, Lexicon, LexiconLookup};
pub use plan::{FeaturePlan, FeatureStep, SentenceContext};
pub use tagger::{CachedTagger, RuleTagger, SentenceTagger, TaggerQueue, TokenTag};
pub use word::{is_test_result, WordStyle};

// ============================================================================
// Feature Keys
// ============================================================================

/// Composite feature name: a feature class and its value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub class: String,
    pub value: String,
}

impl FeatureKey {
    pub fn new(class: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.class, self.value)
    }
}

/// Sparse feature weights of one item (token, span or span pair)
pub type FeatureDict = BTreeMap<FeatureKey, f64>;

// ============================================================================
// Prose Detection
// ============================================================================

fn is_prose_word(word: &str) -> bool {
    let has_punct = word.chars().any(|c| c.is_ascii_punctuation());
    let leading_digit = word.chars().next().is_some_and(|c| c.is_ascii_digit());
    let all_caps = word.chars().any(char::is_alphabetic)
        && word.chars().filter(|c| c.is_alphabetic()).all(char::is_uppercase);
    !has_punct && !leading_digit && !all_caps
}

/// Classify a tokenized line as running prose or tabular/list text
///
/// Questions are prose, headers ending in `:` and short lines are not;
/// otherwise at least half of the tokens must look like ordinary words.
pub fn is_prose_sentence(sentence: &[String]) -> bool {
    let Some(last) = sentence.last() else {
        return false;
    };
    if last.ends_with('?') {
        return true;
    }
    if last.ends_with(':') || sentence.len() <= 5 {
        return false;
    }
    let prose_words = sentence.iter().filter(|w| is_prose_word(w)).count();
    prose_words * 2 >= sentence.len()
}

// ============================================================================
// Feature Extractor
// ============================================================================

/// Step names of both first-pass plans, persisted with trained models
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSignature {
    pub prose: Vec<String>,
    pub nonprose: Vec<String>,
}

/// Entry point of the feature layer
pub struct FeatureExtractor {
    tagger: Option<Arc<dyn SentenceTagger>>,
    lexicon: Option<Arc<dyn LexiconLookup>>,
    window: bool,
    prose_plan: FeaturePlan,
    nonprose_plan: FeaturePlan,
}

impl FeatureExtractor {
    /// Word and window features only
    pub fn new() -> Self {
        Self::assemble(None, None, true)
    }

    /// Build the extractor described by a features configuration
    ///
    /// Opens the lexicon file when one is configured.
    pub fn from_config(config: &FeaturesConfig) -> Result<Self> {
        let mut extractor = Self::new().with_window(config.window);
        if config.tagger {
            extractor = extractor.with_tagger(Arc::new(CachedTagger::new(RuleTagger::new())));
        }
        if let Some(path) = &config.lexicon_path {
            extractor = extractor.with_lexicon(Arc::new(CachedLexicon::new(Lexicon::open(path)?)));
        }
        Ok(extractor)
    }

    fn assemble(
        tagger: Option<Arc<dyn SentenceTagger>>,
        lexicon: Option<Arc<dyn LexiconLookup>>,
        window: bool,
    ) -> Self {
        let prose_plan = FeaturePlan::prose(tagger.is_some(), lexicon.is_some(), window);
        let nonprose_plan = FeaturePlan::nonprose(lexicon.is_some(), window);
        Self {
            tagger,
            lexicon,
            window,
            prose_plan,
            nonprose_plan,
        }
    }

    pub fn with_tagger(self, tagger: Arc<dyn SentenceTagger>) -> Self {
        Self::assemble(Some(tagger), self.lexicon, self.window)
    }

    pub fn with_lexicon(self, lexicon: Arc<dyn LexiconLookup>) -> Self {
        Self::assemble(self.tagger, Some(lexicon), self.window)
    }

    pub fn with_window(self, window: bool) -> Self {
        Self::assemble(self.tagger, self.lexicon, window)
    }

    pub fn signature(&self) -> FeatureSignature {
        FeatureSignature {
            prose: self.prose_plan.step_names(),
            nonprose: self.nonprose_plan.step_names(),
        }
    }

    /// Hit/miss statistics of the memoizing annotators
    pub fn cache_reports(&self) -> Vec<CacheStatsReport> {
        let tagger = self.tagger.as_ref().and_then(|t| t.cache_report());
        let lexicon = self.lexicon.as_ref().and_then(|l| l.cache_report());
        tagger.into_iter().chain(lexicon).collect()
    }

    pub fn log_cache_stats(&self) {
        for report in self.cache_reports() {
            debug!(
                cache = %report.name,
                hits = report.hits,
                misses = report.misses,
                hit_rate = report.hit_rate,
                "Annotation cache statistics"
            );
        }
    }

    /// Start token featurization for an ordered batch of sentences
    ///
    /// The tagger (if any) is primed with the prose sentences of the batch;
    /// the returned session must then see every sentence exactly once, in
    /// batch order.
    pub fn session(&self, sentences: &[TokenizedLine]) -> Result<TokenSession<'_>> {
        let queue = match &self.tagger {
            Some(tagger) => {
                let prose: Vec<TokenizedLine> = sentences
                    .iter()
                    .filter(|s| is_prose_sentence(s))
                    .cloned()
                    .collect();
                TaggerQueue::prime(tagger.as_ref(), prose)?
            }
            None => TaggerQueue::default(),
        };
        Ok(TokenSession {
            extractor: self,
            queue,
        })
    }

    /// One feature dictionary per requested chunk of a chunked line
    pub fn span_features(&self, chunked: &[String], indices: &[usize]) -> Result<Vec<FeatureDict>> {
        check_indices(chunked, indices)?;
        Ok(indices.iter().map(|&ind| self.chunk_features(chunked, ind)).collect())
    }

    fn chunk_features(&self, chunked: &[String], ind: usize) -> FeatureDict {
        let chunk = &chunked[ind];
        let words: Vec<&str> = chunk.split_whitespace().collect();
        let mut features = FeatureDict::new();

        features.insert(FeatureKey::new("phrase", chunk.to_lowercase()), 1.0);
        for word in &words {
            let lower = word.to_lowercase();
            features.insert(FeatureKey::new("shape", word::collapsed_shape(word)), 1.0);
            features.insert(FeatureKey::new("unigram", lower), 1.0);
        }
        if let (Some(first), Some(last)) = (words.first(), words.last()) {
            features.insert(FeatureKey::new("first", first.to_lowercase()), 1.0);
            features.insert(FeatureKey::new("last", last.to_lowercase()), 1.0);
        }
        features.insert(FeatureKey::new("length", words.len().to_string()), 1.0);

        let prev = match ind.checked_sub(1) {
            Some(p) => chunked[p].to_lowercase(),
            None => "<s>".to_string(),
        };
        let next = chunked
            .get(ind + 1)
            .map(|c| c.to_lowercase())
            .unwrap_or_else(|| "</s>".to_string());
        features.insert(FeatureKey::new("prev_chunk", prev), 1.0);
        features.insert(FeatureKey::new("next_chunk", next), 1.0);

        if is_test_result(&chunked[ind..].join(" ")) {
            features.insert(FeatureKey::new("test_result", "*"), 1.0);
        }

        if let Some(lexicon) = &self.lexicon {
            let types = lexicon.semantic_types(chunk);
            if !types.is_empty() {
                features.insert(FeatureKey::new("in_lexicon", "*"), 1.0);
            }
            for semantic_type in types {
                features.insert(FeatureKey::new("sem_type", semantic_type), 1.0);
            }
        }

        features
    }

    /// One feature dictionary per pair of requested chunks
    ///
    /// Pairs are taken by position in `indices`, in lexicographic order:
    /// `(0,1), (0,2), .., (1,2), ..`. Fewer than two indices yield nothing.
    pub fn pair_features(&self, chunked: &[String], indices: &[usize]) -> Result<Vec<FeatureDict>> {
        check_indices(chunked, indices)?;

        let mut pairs = Vec::new();
        for (a, &first) in indices.iter().enumerate() {
            for &second in &indices[a + 1..] {
                let (i, j) = (first.min(second), first.max(second));
                let mut features = FeatureDict::new();

                add_unigrams(&mut features, "left_unigram", &chunked[..i]);
                add_unigrams(&mut features, "inner_unigram", &chunked[i + 1..j]);
                add_unigrams(&mut features, "right_unigram", &chunked[j + 1..]);
                features.insert(FeatureKey::new("first_phrase", chunked[i].to_lowercase()), 1.0);
                features.insert(FeatureKey::new("second_phrase", chunked[j].to_lowercase()), 1.0);
                features.insert(FeatureKey::new("distance", "*"), (j - i) as f64);

                pairs.push(features);
            }
        }
        Ok(pairs)
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("tagger", &self.tagger.is_some())
            .field("lexicon", &self.lexicon.is_some())
            .field("signature", &self.signature())
            .finish()
    }
}

fn check_indices(chunked: &[String], indices: &[usize]) -> Result<()> {
    match indices.iter().find(|&&ind| ind >= chunked.len()) {
        Some(&ind) => Err(ClinerError::SpanOutOfRange {
            context: "chunked line".to_string(),
            index: ind,
            len: chunked.len(),
        }),
        None => Ok(()),
    }
}

fn add_unigrams(features: &mut FeatureDict, class: &str, chunks: &[String]) {
    for word in chunks.iter().flat_map(|c| c.split_whitespace()) {
        features.insert(FeatureKey::new(class, word.to_lowercase()), 1.0);
    }
}

// ============================================================================
// Token Session
// ============================================================================

/// Ordered first-pass featurization over one primed batch
pub struct TokenSession<'a> {
    extractor: &'a FeatureExtractor,
    queue: TaggerQueue,
}

impl TokenSession<'_> {
    /// Prose flag and one feature dictionary per token
    pub fn token_features(&mut self, sentence: &[String]) -> Result<(bool, Vec<FeatureDict>)> {
        let is_prose = is_prose_sentence(sentence);
        let tags = if is_prose && self.extractor.tagger.is_some() {
            Some(self.queue.next_for(sentence)?)
        } else {
            None
        };

        let ctx = SentenceContext {
            tokens: sentence,
            tags: tags.as_deref(),
            lexicon: self.extractor.lexicon.as_deref(),
        };
        let plan = if is_prose {
            &self.extractor.prose_plan
        } else {
            &self.extractor.nonprose_plan
        };
        let features = plan.extract(&ctx)?;

        debug!(tokens = sentence.len(), is_prose, "Extracted token features");
        Ok((is_prose, features))
    }

    /// Primed tagger results not yet consumed
    pub fn remaining(&self) -> usize {
        self.queue.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_prose_rule() {
        assert!(!is_prose_sentence(&[]));
        assert!(is_prose_sentence(&toks("Any pain?")));
        assert!(!is_prose_sentence(&toks("The patient reported the following history today :")));
        assert!(!is_prose_sentence(&toks("he is doing well now")));
        assert!(is_prose_sentence(&toks("The score stood four to two")));
        assert!(!is_prose_sentence(&toks("WBC 11.2 , HGB 12.5 , PLT 250")));
    }

    #[test]
    fn test_pair_order_and_distance() {
        let extractor = FeatureExtractor::new();
        let line = toks("a b c d e");
        let pairs = extractor.pair_features(&line, &[0, 2, 4]).unwrap();

        assert_eq!(pairs.len(), 3);
        let distances: Vec<f64> = pairs
            .iter()
            .map(|p| p[&FeatureKey::new("distance", "*")])
            .collect();
        assert_eq!(distances, vec![2.0, 4.0, 2.0]);
        assert!(pairs[0].contains_key(&FeatureKey::new("inner_unigram", "b")));
        assert!(pairs[2].contains_key(&FeatureKey::new("left_unigram", "a")));
        assert!(pairs[2].contains_key(&FeatureKey::new("first_phrase", "c")));
    }

    #[test]
    fn test_pair_features_need_two_spans() {
        let extractor = FeatureExtractor::new();
        let line = toks("a b");
        assert!(extractor.pair_features(&line, &[1]).unwrap().is_empty());
        assert!(extractor.pair_features(&line, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_span_features() {
        let extractor = FeatureExtractor::new();
        let line = vec!["Hgb".to_string(), "12.5".to_string(), "chest pain".to_string()];
        let features = extractor.span_features(&line, &[0, 2]).unwrap();

        assert_eq!(features.len(), 2);
        assert!(features[0].contains_key(&FeatureKey::new("test_result", "*")));
        assert!(features[0].contains_key(&FeatureKey::new("prev_chunk", "<s>")));
        assert!(features[1].contains_key(&FeatureKey::new("phrase", "chest pain")));
        assert!(features[1].contains_key(&FeatureKey::new("length", "2")));
        assert!(features[1].contains_key(&FeatureKey::new("next_chunk", "</s>")));
    }

    #[test]
    fn test_out_of_range_index() {
        let extractor = FeatureExtractor::new();
        let line = toks("a b");
        assert!(matches!(
            extractor.span_features(&line, &[2]),
            Err(ClinerError::SpanOutOfRange { index: 2, len: 2, .. })
        ));
        assert!(extractor.pair_features(&line, &[0, 5]).is_err());
    }

    #[test]
    fn test_session_consumes_tagger_in_prose_order() {
        let extractor = FeatureExtractor::new().with_tagger(Arc::new(RuleTagger::new()));
        let sentences = vec![
            toks("The patient was admitted for chest pain"),
            toks("Vitals :"),
            toks("She was started on aspirin and heparin"),
        ];
        let mut session = extractor.session(&sentences).unwrap();
        assert_eq!(session.remaining(), 2);

        let flags: Vec<bool> = sentences
            .iter()
            .map(|s| session.token_features(s).unwrap().0)
            .collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(session.remaining(), 0);
    }

    #[test]
    fn test_session_out_of_order_is_fatal() {
        let extractor = FeatureExtractor::new().with_tagger(Arc::new(RuleTagger::new()));
        let sentences = vec![
            toks("The patient was admitted for chest pain"),
            toks("She was started on aspirin and heparin"),
        ];
        let mut session = extractor.session(&sentences).unwrap();
        let err = session.token_features(&sentences[1]).unwrap_err();
        assert!(matches!(err, ClinerError::ExhaustedSource(_)));
    }

    #[test]
    fn test_signature_tracks_configuration() {
        let plain = FeatureExtractor::new().signature();
        assert_eq!(plain.prose, vec!["word", "window"]);

        let tagged = FeatureExtractor::new()
            .with_window(false)
            .with_tagger(Arc::new(RuleTagger::new()))
            .signature();
        assert_eq!(tagged.prose, vec!["word", "tagger"]);
        assert_eq!(tagged.nonprose, vec!["word_nonprose", "test_result"]);
    }

    #[test]
    fn test_cache_reports_follow_sessions() {
        assert!(FeatureExtractor::new().cache_reports().is_empty());

        let extractor = FeatureExtractor::new().with_tagger(Arc::new(CachedTagger::new(RuleTagger::new())));
        let sentences = vec![toks("The patient was admitted for chest pain")];
        extractor.session(&sentences).unwrap();
        extractor.session(&sentences).unwrap();

        let reports = extractor.cache_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].name, "tagger");
        assert_eq!((reports[0].hits, reports[0].misses), (1, 1));
        assert!((reports[0].hit_rate - 0.5).abs() < 1e-9);
    }
}
