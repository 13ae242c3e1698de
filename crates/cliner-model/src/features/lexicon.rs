//! Lexical lookup service
//!
//! A lexicon maps normalized terms to semantic types. It is opened once,
//! shared by reference with the feature layer and dropped with it.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use cliner_core::{ClinerError, Result};
use tracing::info;

use super::cache::{AnnotationCache, CacheStatsReport};

/// Trait for term to semantic type lookups
pub trait LexiconLookup: Send + Sync {
    /// Semantic types of a phrase, empty when unknown
    fn semantic_types(&self, phrase: &str) -> Vec<String>;

    fn contains(&self, phrase: &str) -> bool {
        !self.semantic_types(phrase).is_empty()
    }

    /// Hit/miss statistics when lookups are memoized
    fn cache_report(&self) -> Option<CacheStatsReport> {
        None
    }
}

/// Strip punctuation, lowercase and collapse whitespace
pub fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| !c.is_ascii_punctuation())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// In-memory lexicon loaded from a tab-separated `term<TAB>type` table
#[derive(Debug, Clone, Default)]
pub struct Lexicon {
    entries: HashMap<String, BTreeSet<String>>,
}

impl Lexicon {
    /// Load a lexicon file
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ClinerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lexicon = Self::parse(&content)
            .map_err(|e| ClinerError::ConfigError(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), terms = lexicon.len(), "Loaded lexicon");
        Ok(lexicon)
    }

    /// Parse lexicon table content
    pub fn parse(content: &str) -> Result<Self> {
        let mut lexicon = Self::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let (term, semantic_type) = line.split_once('\t').ok_or_else(|| {
                ClinerError::ConfigError(format!("lexicon line {} has no tab separator", line_no + 1))
            })?;
            lexicon.insert(term, semantic_type.trim());
        }
        Ok(lexicon)
    }

    pub fn from_entries<I, T, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, S)>,
        T: AsRef<str>,
        S: Into<String>,
    {
        let mut lexicon = Self::default();
        for (term, semantic_type) in entries {
            lexicon.insert(term.as_ref(), semantic_type);
        }
        lexicon
    }

    fn insert(&mut self, term: &str, semantic_type: impl Into<String>) {
        let key = normalize_term(term);
        if key.is_empty() {
            return;
        }
        self.entries.entry(key).or_default().insert(semantic_type.into());
    }

    /// Number of distinct terms
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl LexiconLookup for Lexicon {
    fn semantic_types(&self, phrase: &str) -> Vec<String> {
        self.entries
            .get(&normalize_term(phrase))
            .map(|types| types.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Memoizing wrapper around any lexicon
pub struct CachedLexicon<L> {
    inner: L,
    cache: AnnotationCache<Vec<String>>,
}

impl<L: LexiconLookup> CachedLexicon<L> {
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            cache: AnnotationCache::new("lexicon"),
        }
    }

    pub fn cache(&self) -> &AnnotationCache<Vec<String>> {
        &self.cache
    }
}

impl<L: LexiconLookup> LexiconLookup for CachedLexicon<L> {
    fn semantic_types(&self, phrase: &str) -> Vec<String> {
        self.cache
            .get_with(phrase, || self.inner.semantic_types(phrase))
    }

    fn cache_report(&self) -> Option<CacheStatsReport> {
        Some(self.cache.stats().report())
    }
}
