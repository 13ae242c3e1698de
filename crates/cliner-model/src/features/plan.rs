//! Feature plans
//!
//! A plan is a fixed, ordered list of feature steps assembled once per
//! sentence style. Each step extends the per-token dictionaries produced by
//! the steps before it; the window step runs last so it can copy everything
//! its neighbours accumulated.

use std::fmt;

use cliner_core::{ClinerError, Result};

use super::lexicon::LexiconLookup;
use super::tagger::TokenTag;
use super::word::{is_test_result, word_features, WordStyle};
use super::{FeatureDict, FeatureKey};

/// Everything a step may inspect about the sentence being featurized
pub struct SentenceContext<'a> {
    pub tokens: &'a [String],
    /// Tagger output, present for prose sentences when a tagger is configured
    pub tags: Option<&'a [TokenTag]>,
    pub lexicon: Option<&'a dyn LexiconLookup>,
}

/// One named feature-extraction step
pub trait FeatureStep: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Add this step's features; `features` holds one dictionary per token
    fn extend(&self, ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()>;
}

// ============================================================================
// Steps
// ============================================================================

#[derive(Debug)]
pub struct WordStep {
    pub style: WordStyle,
}

impl FeatureStep for WordStep {
    fn name(&self) -> &'static str {
        match self.style {
            WordStyle::Prose => "word",
            WordStyle::Nonprose => "word_nonprose",
        }
    }

    fn extend(&self, ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()> {
        for (token, dict) in ctx.tokens.iter().zip(features.iter_mut()) {
            dict.extend(word_features(token, self.style));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TaggerStep;

impl FeatureStep for TaggerStep {
    fn name(&self) -> &'static str {
        "tagger"
    }

    fn extend(&self, ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()> {
        let Some(tags) = ctx.tags else {
            return Ok(());
        };
        if tags.len() != features.len() {
            return Err(ClinerError::LengthMismatch {
                context: "tagger output for sentence".to_string(),
                expected: features.len(),
                found: tags.len(),
            });
        }
        for (tag, dict) in tags.iter().zip(features.iter_mut()) {
            dict.insert(FeatureKey::new("tag_stem", &tag.stem), 1.0);
            dict.insert(FeatureKey::new("tag_pos", &tag.pos), 1.0);
            dict.insert(FeatureKey::new("tag_chunk", &tag.chunk), 1.0);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct LexiconStep;

impl FeatureStep for LexiconStep {
    fn name(&self) -> &'static str {
        "lexicon"
    }

    fn extend(&self, ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()> {
        let Some(lexicon) = ctx.lexicon else {
            return Ok(());
        };
        for (token, dict) in ctx.tokens.iter().zip(features.iter_mut()) {
            let types = lexicon.semantic_types(token);
            if !types.is_empty() {
                dict.insert(FeatureKey::new("in_lexicon", "*"), 1.0);
            }
            for semantic_type in types {
                dict.insert(FeatureKey::new("sem_type", semantic_type), 1.0);
            }
        }
        Ok(())
    }
}

/// Flags tokens whose right context reads like a lab value
#[derive(Debug)]
pub struct TestResultStep;

impl FeatureStep for TestResultStep {
    fn name(&self) -> &'static str {
        "test_result"
    }

    fn extend(&self, ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()> {
        for (index, dict) in features.iter_mut().enumerate() {
            if is_test_result(&ctx.tokens[index..].join(" ")) {
                dict.insert(FeatureKey::new("test_result", "*"), 1.0);
            }
        }
        Ok(())
    }
}

/// Copies each neighbour's features under `prev_*` / `next_*` classes
#[derive(Debug)]
pub struct WindowStep;

impl WindowStep {
    fn shifted<'a>(prefix: &'a str, dict: &'a FeatureDict) -> impl Iterator<Item = (FeatureKey, f64)> + 'a {
        let prefix = prefix.to_string();
        dict.iter().map(move |(key, value)| {
            (
                FeatureKey::new(format!("{prefix}_{}", key.class), &key.value),
                *value,
            )
        })
    }
}

impl FeatureStep for WindowStep {
    fn name(&self) -> &'static str {
        "window"
    }

    fn extend(&self, _ctx: &SentenceContext<'_>, features: &mut [FeatureDict]) -> Result<()> {
        let snapshot = features.to_vec();
        let last = snapshot.len().saturating_sub(1);

        for (i, dict) in features.iter_mut().enumerate() {
            if i == 0 {
                dict.insert(FeatureKey::new("prev", "*"), 1.0);
            } else {
                dict.extend(Self::shifted("prev", &snapshot[i - 1]));
            }
            if i == last {
                dict.insert(FeatureKey::new("next", "*"), 1.0);
            } else {
                dict.extend(Self::shifted("next", &snapshot[i + 1]));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Ordered feature steps for one sentence style
#[derive(Debug)]
pub struct FeaturePlan {
    steps: Vec<Box<dyn FeatureStep>>,
}

impl FeaturePlan {
    pub fn new(steps: Vec<Box<dyn FeatureStep>>) -> Self {
        Self { steps }
    }

    /// word, tagger, lexicon, window
    pub fn prose(tagger: bool, lexicon: bool, window: bool) -> Self {
        let mut steps: Vec<Box<dyn FeatureStep>> = vec![Box::new(WordStep {
            style: WordStyle::Prose,
        })];
        if tagger {
            steps.push(Box::new(TaggerStep));
        }
        if lexicon {
            steps.push(Box::new(LexiconStep));
        }
        if window {
            steps.push(Box::new(WindowStep));
        }
        Self::new(steps)
    }

    /// word, test_result, lexicon, window
    pub fn nonprose(lexicon: bool, window: bool) -> Self {
        let mut steps: Vec<Box<dyn FeatureStep>> = vec![
            Box::new(WordStep {
                style: WordStyle::Nonprose,
            }),
            Box::new(TestResultStep),
        ];
        if lexicon {
            steps.push(Box::new(LexiconStep));
        }
        if window {
            steps.push(Box::new(WindowStep));
        }
        Self::new(steps)
    }

    /// Run every step in order; one dictionary per token
    pub fn extract(&self, ctx: &SentenceContext<'_>) -> Result<Vec<FeatureDict>> {
        let mut features = vec![FeatureDict::new(); ctx.tokens.len()];
        for step in &self.steps {
            step.extend(ctx, &mut features)?;
        }
        Ok(features)
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }
}
