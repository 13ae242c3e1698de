//! Generic pass trainer and predictor
//!
//! Every pass has the same shape: grouped feature dictionaries in, grouped
//! labels out. The pass owns a vectorizer fitted on its training data and a
//! classifier trained either per item (flat) or per group (sequence).

use cliner_core::{ClinerError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::features::FeatureDict;
use crate::learn::grid::{accuracy, select_options};
use crate::learn::{Classifier, Label, LinearClassifier, SequenceClassifier, TrainOptions};
use crate::structure::{flatten, reconstruct, save_structure};
use crate::vectorize::{DictVectorizer, SparseVector};

/// Fitted vectorizer and trained classifier of one pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassModel {
    pub vectorizer: DictVectorizer,
    pub classifier: Classifier,
}

impl PassModel {
    pub fn is_sequence(&self) -> bool {
        self.classifier.is_sequence()
    }
}

/// Train one pass
///
/// `labels` holds one label per item, concatenated over all groups. In
/// sequence mode they are regrouped to match `feature_groups` before
/// training. Fails with `EmptyTrainingSet` when there is nothing to fit.
pub fn train_pass<L: Label>(
    pass: &str,
    feature_groups: &[Vec<FeatureDict>],
    labels: &[L],
    sequence_mode: bool,
    options: &TrainOptions,
) -> Result<PassModel> {
    let offsets = save_structure(feature_groups);
    let flat = flatten(feature_groups);
    if flat.is_empty() {
        return Err(ClinerError::EmptyTrainingSet {
            pass: pass.to_string(),
        });
    }
    if labels.len() != flat.len() {
        return Err(ClinerError::LengthMismatch {
            context: format!("{pass} labels"),
            expected: flat.len(),
            found: labels.len(),
        });
    }

    let mut vectorizer = DictVectorizer::new();
    let rows = vectorizer.fit_transform(&flat);
    let codes: Vec<usize> = labels.iter().map(|l| l.code()).collect();
    info!(
        pass,
        items = rows.len(),
        groups = feature_groups.len(),
        features = vectorizer.dimension(),
        sequence_mode,
        "Training pass"
    );

    let classifier = if sequence_mode {
        let sequences = reconstruct(rows, &offsets)?;
        let label_groups = reconstruct(codes, &offsets)?;
        let options = tune(options, &pairs(sequences.clone(), label_groups.clone()), |train, held, candidate| {
            let (x, y): (Vec<_>, Vec<_>) = train.iter().cloned().unzip();
            let model = SequenceClassifier::train(&x, &y, L::COUNT, candidate)?;
            let predicted: Vec<usize> = held.iter().flat_map(|(seq, _)| model.viterbi(seq)).collect();
            let gold: Vec<usize> = held.iter().flat_map(|(_, g)| g.iter().copied()).collect();
            Ok(accuracy(&predicted, &gold))
        })?;
        Classifier::Sequence(SequenceClassifier::train(&sequences, &label_groups, L::COUNT, &options)?)
    } else {
        let options = tune(options, &pairs(rows.clone(), codes.clone()), |train, held, candidate| {
            let (x, y): (Vec<SparseVector>, Vec<usize>) = train.iter().cloned().unzip();
            let model = LinearClassifier::train(&x, &y, L::COUNT, candidate)?;
            let predicted: Vec<usize> = held.iter().map(|(row, _)| model.predict_one(row)).collect();
            let gold: Vec<usize> = held.iter().map(|(_, g)| *g).collect();
            Ok(accuracy(&predicted, &gold))
        })?;
        Classifier::Flat(LinearClassifier::train(&rows, &codes, L::COUNT, &options)?)
    };

    Ok(PassModel {
        vectorizer,
        classifier,
    })
}

fn pairs<X, Y>(xs: Vec<X>, ys: Vec<Y>) -> Vec<(X, Y)> {
    xs.into_iter().zip(ys).collect()
}

fn tune<X, F>(options: &TrainOptions, examples: &[X], evaluate: F) -> Result<TrainOptions>
where
    X: Clone,
    F: FnMut(&[X], &[X], &TrainOptions) -> Result<f64>,
{
    match &options.grid {
        Some(spec) => select_options(examples, options, spec, evaluate),
        None => Ok(options.clone()),
    }
}

/// Predict labels for grouped feature dictionaries
///
/// Uses the vectorizer fitted at train time, so unseen features are dropped.
/// Groups with no items, or no groups at all, never reach the classifier.
pub fn predict_pass<L: Label>(model: &PassModel, feature_groups: &[Vec<FeatureDict>]) -> Result<Vec<Vec<L>>> {
    if feature_groups.is_empty() {
        return Ok(Vec::new());
    }
    let offsets = save_structure(feature_groups);
    let flat = flatten(feature_groups);
    if flat.is_empty() {
        return Ok(vec![Vec::new(); feature_groups.len()]);
    }

    let rows = model.vectorizer.transform(&flat);
    let code_groups = if model.is_sequence() {
        let sequences = reconstruct(rows, &offsets)?;
        model.classifier.predict_sequences(&sequences)?
    } else {
        let codes = model.classifier.predict_flat(&rows)?;
        reconstruct(codes, &offsets)?
    };
    debug!(items = flat.len(), groups = feature_groups.len(), "Predicted pass");

    code_groups
        .into_iter()
        .map(|codes| codes.into_iter().map(L::from_code).collect::<Result<Vec<L>>>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureKey;
    use crate::learn::GridSpec;
    use cliner_core::{ConceptLabel, IobLabel};

    fn dict(word: &str) -> FeatureDict {
        [(FeatureKey::new("word", word), 1.0)].into_iter().collect()
    }

    fn group(words: &[&str]) -> Vec<FeatureDict> {
        words.iter().map(|w| dict(w)).collect()
    }

    #[test]
    fn test_empty_training_set() {
        let err = train_pass::<ConceptLabel>("concept", &[], &[], false, &TrainOptions::default()).unwrap_err();
        assert!(matches!(err, ClinerError::EmptyTrainingSet { .. }));

        let err = train_pass::<ConceptLabel>("concept", &[vec![], vec![]], &[], false, &TrainOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClinerError::EmptyTrainingSet { .. }));
    }

    #[test]
    fn test_label_count_must_match_items() {
        let err = train_pass("concept", &[group(&["a", "b"])], &[ConceptLabel::Test], false, &TrainOptions::default())
            .unwrap_err();
        assert!(matches!(err, ClinerError::LengthMismatch { .. }));
    }

    #[test]
    fn test_flat_pass_restores_grouping() {
        use ConceptLabel::*;
        let groups = vec![group(&["aspirin", "cbc"]), vec![], group(&["fever"])];
        let model = train_pass("concept", &groups, &[Treatment, Test, Problem], false, &TrainOptions::default()).unwrap();

        let predicted: Vec<Vec<ConceptLabel>> = predict_pass(&model, &groups).unwrap();
        assert_eq!(predicted, vec![vec![Treatment, Test], vec![], vec![Problem]]);
    }

    #[test]
    fn test_sequence_pass() {
        use IobLabel::*;
        let groups = vec![group(&["denies", "chest", "pain"]), group(&["fever", "noted"])];
        let labels = [Outside, Begin, Inside, Begin, Outside];
        let model = train_pass("prose", &groups, &labels, true, &TrainOptions::default()).unwrap();
        assert!(model.is_sequence());

        let predicted: Vec<Vec<IobLabel>> = predict_pass(&model, &groups).unwrap();
        assert_eq!(predicted, vec![vec![Outside, Begin, Inside], vec![Begin, Outside]]);
    }

    #[test]
    fn test_predict_with_unseen_features_does_not_fail() {
        use ConceptLabel::*;
        let model = train_pass("concept", &[group(&["aspirin", "cbc"])], &[Treatment, Test], false, &TrainOptions::default())
            .unwrap();
        let predicted: Vec<Vec<ConceptLabel>> = predict_pass(&model, &[group(&["zzz"])]).unwrap();
        assert_eq!(predicted, vec![vec![Treatment]]);
    }

    #[test]
    fn test_predict_empty_input() {
        let model = train_pass("link", &[group(&["a"])], &[ConceptLabel::Test], false, &TrainOptions::default()).unwrap();
        let none: Vec<Vec<ConceptLabel>> = predict_pass(&model, &[]).unwrap();
        assert!(none.is_empty());
        let blank: Vec<Vec<ConceptLabel>> = predict_pass(&model, &[vec![], vec![]]).unwrap();
        assert_eq!(blank, vec![vec![], vec![]]);
    }

    #[test]
    fn test_grid_search_pass() {
        use ConceptLabel::*;
        let groups = vec![group(&["aspirin", "cbc", "fever", "heparin", "mri", "cough"])];
        let labels = [Treatment, Test, Problem, Treatment, Test, Problem];
        let options = TrainOptions {
            grid: Some(GridSpec {
                epochs: vec![1, 10],
                folds: 2,
            }),
            ..TrainOptions::default()
        };
        let model = train_pass("concept", &groups, &labels, false, &options).unwrap();
        let predicted: Vec<Vec<ConceptLabel>> = predict_pass(&model, &groups).unwrap();
        assert_eq!(predicted[0].len(), 6);
    }

    #[test]
    fn test_averaged_weights_survive_json_exactly() {
        use ConceptLabel::*;
        let codes = [Treatment, Problem, Test];
        // labels cycle independently of the words, so training never converges
        let groups: Vec<Vec<FeatureDict>> = (0..60)
            .map(|i| {
                let mut features = dict(&format!("w{}", i % 7));
                features.insert(FeatureKey::new("suffix", format!("s{}", i % 5)), 0.5);
                vec![features]
            })
            .collect();
        let labels: Vec<ConceptLabel> = (0..60).map(|i| codes[i % 3]).collect();
        let options = TrainOptions {
            epochs: 7,
            averaged: true,
            ..TrainOptions::default()
        };
        let model = train_pass("concept", &groups, &labels, false, &options).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: PassModel = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, model);
    }
}
