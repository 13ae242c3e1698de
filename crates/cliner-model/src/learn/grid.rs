//! Cross-validated hyperparameter search

use cliner_core::{LearnerConfig, Result};
use tracing::{debug, info};

use super::TrainOptions;

/// Candidate epoch counts and fold count for the search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridSpec {
    pub epochs: Vec<usize>,
    pub folds: usize,
}

impl From<&LearnerConfig> for GridSpec {
    fn from(config: &LearnerConfig) -> Self {
        Self {
            epochs: config.grid_epochs.clone(),
            folds: config.grid_folds,
        }
    }
}

impl GridSpec {
    /// Every `(epochs, averaged)` combination derived from `base`, in search order
    fn candidates(&self, base: &TrainOptions) -> Vec<TrainOptions> {
        self.epochs
            .iter()
            .flat_map(|&epochs| {
                [false, true].into_iter().map(move |averaged| TrainOptions {
                    epochs,
                    averaged,
                    grid: None,
                    default_label: base.default_label,
                })
            })
            .collect()
    }
}

/// Pick the candidate with the best mean held-out score
///
/// Example `i` is held out in fold `i % folds`. `evaluate` trains on the
/// first slice and scores on the second. Ties keep the earlier candidate.
/// With fewer examples than folds the base options are returned unchanged.
pub fn select_options<X, F>(
    examples: &[X],
    base: &TrainOptions,
    spec: &GridSpec,
    mut evaluate: F,
) -> Result<TrainOptions>
where
    X: Clone,
    F: FnMut(&[X], &[X], &TrainOptions) -> Result<f64>,
{
    let fallback = TrainOptions {
        grid: None,
        ..base.clone()
    };
    if spec.folds < 2 || examples.len() < spec.folds || spec.epochs.is_empty() {
        debug!(examples = examples.len(), folds = spec.folds, "Skipping grid search");
        return Ok(fallback);
    }

    let mut best: Option<(TrainOptions, f64)> = None;
    for candidate in spec.candidates(base) {
        let mut total = 0.0;
        for fold in 0..spec.folds {
            let (held, train): (Vec<(usize, &X)>, Vec<(usize, &X)>) = examples
                .iter()
                .enumerate()
                .partition(|(i, _)| i % spec.folds == fold);
            let held: Vec<X> = held.into_iter().map(|(_, x)| x.clone()).collect();
            let train: Vec<X> = train.into_iter().map(|(_, x)| x.clone()).collect();
            total += evaluate(&train, &held, &candidate)?;
        }
        let score = total / spec.folds as f64;
        debug!(epochs = candidate.epochs, averaged = candidate.averaged, score, "Grid candidate");

        if best.as_ref().map_or(true, |(_, b)| score > *b) {
            best = Some((candidate, score));
        }
    }

    match best {
        Some((options, score)) => {
            info!(epochs = options.epochs, averaged = options.averaged, score, "Grid search selected");
            Ok(options)
        }
        None => Ok(fallback),
    }
}

/// Fraction of positions where `predicted` equals `gold`
pub fn accuracy(predicted: &[usize], gold: &[usize]) -> f64 {
    if gold.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(gold).filter(|(p, g)| p == g).count();
    correct as f64 / gold.len() as f64
}
