//! Sequential sentence tagger
//!
//! A tagger annotates a whole batch of prose sentences up front; feature
//! extraction then consumes one result per prose sentence, strictly in the
//! order the batch was submitted. [`TaggerQueue`] makes that ordering an
//! explicit, checked contract.

use std::collections::VecDeque;

use cliner_core::{ClinerError, Result, TokenizedLine};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::cache::{AnnotationCache, CacheStatsReport};
use super::word::is_punctuation;

/// Per-token tagger output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTag {
    pub stem: String,
    pub pos: String,
    /// Phrase chunk tag (`B-NP`, `I-NP`, `O`)
    pub chunk: String,
}

impl TokenTag {
    pub fn new(stem: impl Into<String>, pos: impl Into<String>, chunk: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            pos: pos.into(),
            chunk: chunk.into(),
        }
    }
}

/// Trait for batch sentence taggers
pub trait SentenceTagger: Send + Sync {
    /// Tag every sentence of the batch, one tag per token
    fn tag_batch(&self, sentences: &[TokenizedLine]) -> Result<Vec<Vec<TokenTag>>>;

    /// Hit/miss statistics when the tagger memoizes its output
    fn cache_report(&self) -> Option<CacheStatsReport> {
        None
    }
}

// ============================================================================
// Tagger Queue
// ============================================================================

/// Ordered results of one primed tagger batch
#[derive(Debug, Default)]
pub struct TaggerQueue {
    pending: VecDeque<(TokenizedLine, Vec<TokenTag>)>,
}

impl TaggerQueue {
    /// Tag `sentences` and queue the results in submission order
    pub fn prime(tagger: &dyn SentenceTagger, sentences: Vec<TokenizedLine>) -> Result<Self> {
        let tags = tagger.tag_batch(&sentences)?;
        if tags.len() != sentences.len() {
            return Err(ClinerError::LengthMismatch {
                context: "tagger batch".to_string(),
                expected: sentences.len(),
                found: tags.len(),
            });
        }
        for (sentence, sentence_tags) in sentences.iter().zip(&tags) {
            if sentence.len() != sentence_tags.len() {
                return Err(ClinerError::LengthMismatch {
                    context: format!("tags for '{}'", sentence.join(" ")),
                    expected: sentence.len(),
                    found: sentence_tags.len(),
                });
            }
        }

        debug!(sentences = sentences.len(), "Primed tagger queue");
        Ok(Self {
            pending: sentences.into_iter().zip(tags).collect(),
        })
    }

    /// Take the result for `sentence`, which must be the next primed sentence
    pub fn next_for(&mut self, sentence: &[String]) -> Result<Vec<TokenTag>> {
        match self.pending.front() {
            None => Err(ClinerError::ExhaustedSource(format!(
                "no tagger output left for '{}'",
                sentence.join(" ")
            ))),
            Some((expected, _)) if expected.as_slice() != sentence => {
                Err(ClinerError::ExhaustedSource(format!(
                    "tagger output out of order: expected '{}', got '{}'",
                    expected.join(" "),
                    sentence.join(" ")
                )))
            }
            Some(_) => Ok(self.pending.pop_front().map(|(_, tags)| tags).unwrap_or_default()),
        }
    }

    /// Results not yet consumed
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Cached Tagger
// ============================================================================

/// Wraps a tagger so each distinct sentence is tagged at most once
pub struct CachedTagger<T> {
    inner: T,
    cache: AnnotationCache<Vec<TokenTag>>,
}

impl<T: SentenceTagger> CachedTagger<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            cache: AnnotationCache::new("tagger"),
        }
    }

    pub fn cache(&self) -> &AnnotationCache<Vec<TokenTag>> {
        &self.cache
    }
}

impl<T: SentenceTagger> SentenceTagger for CachedTagger<T> {
    fn tag_batch(&self, sentences: &[TokenizedLine]) -> Result<Vec<Vec<TokenTag>>> {
        let keys: Vec<String> = sentences.iter().map(|s| s.join(" ")).collect();
        let mut results: Vec<Option<Vec<TokenTag>>> = keys.iter().map(|k| self.cache.get(k)).collect();

        let missing: Vec<usize> = (0..sentences.len()).filter(|i| results[*i].is_none()).collect();
        if !missing.is_empty() {
            let batch: Vec<TokenizedLine> = missing.iter().map(|i| sentences[*i].clone()).collect();
            let tagged = self.inner.tag_batch(&batch)?;
            if tagged.len() != batch.len() {
                return Err(ClinerError::LengthMismatch {
                    context: "tagger batch".to_string(),
                    expected: batch.len(),
                    found: tagged.len(),
                });
            }
            for (i, tags) in missing.into_iter().zip(tagged) {
                self.cache.insert(keys[i].clone(), tags.clone());
                results[i] = Some(tags);
            }
        }

        Ok(results.into_iter().map(Option::unwrap_or_default).collect())
    }

    fn cache_report(&self) -> Option<CacheStatsReport> {
        Some(self.cache.stats().report())
    }
}

// ============================================================================
// Rule-based Tagger
// ============================================================================

const DETERMINERS: &[&str] = &["a", "an", "the", "this", "that", "these", "those", "no", "any"];
const PREPOSITIONS: &[&str] = &[
    "of", "in", "on", "at", "for", "with", "to", "from", "by", "without", "after", "before", "per",
];
const CONJUNCTIONS: &[&str] = &["and", "or", "but", "nor"];
const PRONOUNS: &[&str] = &["he", "she", "it", "they", "we", "i", "you", "his", "her", "their"];

/// Suffix and closed-class heuristics standing in for a trained tagger
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTagger;

impl RuleTagger {
    pub fn new() -> Self {
        Self
    }

    fn pos(word: &str) -> &'static str {
        let lower = word.to_lowercase();
        let lower = lower.as_str();

        if is_punctuation(word) {
            "PUNCT"
        } else if word.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',' || c == '/') {
            "CD"
        } else if DETERMINERS.contains(&lower) {
            "DT"
        } else if PREPOSITIONS.contains(&lower) {
            "IN"
        } else if CONJUNCTIONS.contains(&lower) {
            "CC"
        } else if PRONOUNS.contains(&lower) {
            "PRP"
        } else if lower.ends_with("ly") && lower.len() > 4 {
            "RB"
        } else if lower.ends_with("ing") && lower.len() > 4 {
            "VBG"
        } else if lower.ends_with("ed") && lower.len() > 3 {
            "VBD"
        } else if lower.ends_with("ous") || lower.ends_with("al") || lower.ends_with("ic") {
            "JJ"
        } else if word.chars().next().is_some_and(char::is_uppercase) {
            "NNP"
        } else if lower.ends_with('s') && !lower.ends_with("ss") && lower.len() > 3 {
            "NNS"
        } else {
            "NN"
        }
    }

    fn stem(word: &str) -> String {
        let lower = word.to_lowercase();
        for suffix in ["ing", "ed", "ly", "es", "s"] {
            if let Some(stem) = lower.strip_suffix(suffix) {
                if stem.chars().count() >= 3 && !lower.ends_with("ss") {
                    return stem.to_string();
                }
            }
        }
        lower
    }

    fn tag_sentence(sentence: &[String]) -> Vec<TokenTag> {
        let mut in_phrase = false;
        sentence
            .iter()
            .map(|word| {
                let pos = Self::pos(word);
                let nominal = matches!(pos, "DT" | "CD" | "JJ" | "NN" | "NNS" | "NNP");
                let chunk = match (nominal, in_phrase) {
                    (true, true) => "I-NP",
                    (true, false) => "B-NP",
                    (false, _) => "O",
                };
                in_phrase = nominal;
                TokenTag::new(Self::stem(word), pos, chunk)
            })
            .collect()
    }
}

impl SentenceTagger for RuleTagger {
    fn tag_batch(&self, sentences: &[TokenizedLine]) -> Result<Vec<Vec<TokenTag>>> {
        Ok(sentences.iter().map(|s| Self::tag_sentence(s)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn toks(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    struct CountingTagger {
        tagged: AtomicUsize,
    }

    impl SentenceTagger for CountingTagger {
        fn tag_batch(&self, sentences: &[TokenizedLine]) -> Result<Vec<Vec<TokenTag>>> {
            self.tagged.fetch_add(sentences.len(), Ordering::SeqCst);
            RuleTagger.tag_batch(sentences)
        }
    }

    struct ShortTagger;

    impl SentenceTagger for ShortTagger {
        fn tag_batch(&self, sentences: &[TokenizedLine]) -> Result<Vec<Vec<TokenTag>>> {
            Ok(sentences.iter().map(|_| Vec::new()).collect())
        }
    }

    #[test]
    fn test_queue_serves_in_order() {
        let first = toks("patient denies chest pain");
        let second = toks("she was given aspirin");
        let mut queue = TaggerQueue::prime(&RuleTagger, vec![first.clone(), second.clone()]).unwrap();

        assert_eq!(queue.next_for(&first).unwrap().len(), 4);
        assert_eq!(queue.remaining(), 1);
        assert_eq!(queue.next_for(&second).unwrap()[3].stem, "aspirin");
    }

    #[test]
    fn test_queue_exhausted() {
        let sentence = toks("no acute distress");
        let mut queue = TaggerQueue::prime(&RuleTagger, vec![sentence.clone()]).unwrap();
        queue.next_for(&sentence).unwrap();

        let err = queue.next_for(&sentence).unwrap_err();
        assert!(matches!(err, ClinerError::ExhaustedSource(_)));
    }

    #[test]
    fn test_queue_rejects_out_of_order_request() {
        let first = toks("patient denies chest pain");
        let second = toks("she was given aspirin");
        let mut queue = TaggerQueue::prime(&RuleTagger, vec![first, second.clone()]).unwrap();

        let err = queue.next_for(&second).unwrap_err();
        assert!(matches!(err, ClinerError::ExhaustedSource(_)));
    }

    #[test]
    fn test_prime_checks_token_alignment() {
        let err = TaggerQueue::prime(&ShortTagger, vec![toks("a b")]).unwrap_err();
        assert!(matches!(err, ClinerError::LengthMismatch { .. }));
    }

    #[test]
    fn test_cached_tagger_tags_each_sentence_once() {
        let tagger = CachedTagger::new(CountingTagger {
            tagged: AtomicUsize::new(0),
        });
        let batch = vec![toks("chest pain"), toks("fever"), toks("chest pain")];

        let first = tagger.tag_batch(&batch).unwrap();
        let second = tagger.tag_batch(&batch[..2]).unwrap();

        assert_eq!(first[0], first[2]);
        assert_eq!(second[1], first[1]);
        // duplicates inside one cold batch are all misses
        assert_eq!(tagger.inner.tagged.load(Ordering::SeqCst), 3);
        assert_eq!(tagger.cache().len(), 2);
    }

    #[test]
    fn test_rule_tagger_heuristics() {
        let tags = RuleTagger.tag_batch(&[toks("The patient was treated with 325 mg aspirin .")]).unwrap();
        let pos: Vec<&str> = tags[0].iter().map(|t| t.pos.as_str()).collect();
        assert_eq!(pos, vec!["DT", "NN", "NN", "VBD", "IN", "CD", "NN", "NN", "PUNCT"]);
        assert_eq!(tags[0][3].stem, "treat");
        assert_eq!(tags[0][0].chunk, "B-NP");
        assert_eq!(tags[0][1].chunk, "I-NP");
        assert_eq!(tags[0][4].chunk, "O");
    }
}
