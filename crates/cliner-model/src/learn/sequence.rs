//! Structured perceptron for label sequences
//!
//! Scores a labelling as the sum of per-token emission scores and
//! label-to-label transition scores, decoded exactly with Viterbi.

use cliner_core::{ClinerError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{argmax, seen_classes, TrainOptions};
use crate::vectorize::SparseVector;

/// Sequence labeller over a fixed label code space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceClassifier {
    /// `n_classes x dim`
    emission: Array2<f64>,
    /// `(n_classes + 1) x n_classes`; the last row scores the sequence start
    transition: Array2<f64>,
    /// Codes seen at train time; the only codes ever predicted
    classes: Vec<usize>,
    default_label: usize,
}

/// Weight updates for one sequence, applied to live and accumulated weights
struct Update<'a> {
    emission: &'a mut Array2<f64>,
    transition: &'a mut Array2<f64>,
    start: usize,
}

impl Update<'_> {
    fn apply(&mut self, sequence: &[SparseVector], labels: &[usize], scale: f64) {
        let mut previous = self.start;
        for (row, &label) in sequence.iter().zip(labels) {
            for &(i, v) in &row.entries {
                self.emission[[label, i]] += scale * v;
            }
            self.transition[[previous, label]] += scale;
            previous = label;
        }
    }
}

impl SequenceClassifier {
    /// Train on `(sequence, codes)` pairs
    pub fn train(
        sequences: &[Vec<SparseVector>],
        labels: &[Vec<usize>],
        n_classes: usize,
        options: &TrainOptions,
    ) -> Result<Self> {
        if sequences.len() != labels.len() {
            return Err(ClinerError::LengthMismatch {
                context: "sequence training labels".to_string(),
                expected: sequences.len(),
                found: labels.len(),
            });
        }
        for (sequence, codes) in sequences.iter().zip(labels) {
            if sequence.len() != codes.len() {
                return Err(ClinerError::LengthMismatch {
                    context: "labels within a training sequence".to_string(),
                    expected: sequence.len(),
                    found: codes.len(),
                });
            }
        }

        let classes = seen_classes(labels.iter().flatten(), n_classes)?;
        let dim = sequences.iter().flatten().next().map_or(0, |r| r.dim);

        let mut model = Self {
            emission: Array2::zeros((n_classes, dim)),
            transition: Array2::zeros((n_classes + 1, n_classes)),
            classes,
            default_label: options.default_label,
        };
        if model.classes.len() < 2 {
            return Ok(model);
        }

        let mut acc_emission = Array2::<f64>::zeros((n_classes, dim));
        let mut acc_transition = Array2::<f64>::zeros((n_classes + 1, n_classes));
        let mut step = 1.0;

        for epoch in 0..options.epochs {
            let mut mistakes = 0;
            for (sequence, gold) in sequences.iter().zip(labels) {
                let predicted = model.viterbi(sequence);
                if &predicted != gold {
                    mistakes += 1;
                    let mut live = Update {
                        emission: &mut model.emission,
                        transition: &mut model.transition,
                        start: n_classes,
                    };
                    live.apply(sequence, gold, 1.0);
                    live.apply(sequence, &predicted, -1.0);

                    if options.averaged {
                        let mut acc = Update {
                            emission: &mut acc_emission,
                            transition: &mut acc_transition,
                            start: n_classes,
                        };
                        acc.apply(sequence, gold, step);
                        acc.apply(sequence, &predicted, -step);
                    }
                }
                step += 1.0;
            }

            debug!(epoch, mistakes, "Structured perceptron epoch");
            if mistakes == 0 {
                break;
            }
        }

        if options.averaged {
            model.emission = &model.emission - &(acc_emission / step);
            model.transition = &model.transition - &(acc_transition / step);
        }
        Ok(model)
    }

    fn start_row(&self) -> usize {
        self.transition.nrows() - 1
    }

    /// Best-scoring label codes for one sequence
    pub fn viterbi(&self, sequence: &[SparseVector]) -> Vec<usize> {
        match self.classes.as_slice() {
            _ if sequence.is_empty() => Vec::new(),
            [] => vec![self.default_label; sequence.len()],
            [only] => vec![*only; sequence.len()],
            classes => self.decode(classes, sequence),
        }
    }

    fn decode(&self, classes: &[usize], sequence: &[SparseVector]) -> Vec<usize> {
        let positions: Vec<usize> = (0..classes.len()).collect();
        let emit = |t: usize, c: usize| sequence[t].dot(self.emission.row(c));

        // scores[a] = best score of a path ending in classes[a]
        let mut scores: Vec<f64> = classes
            .iter()
            .map(|&c| self.transition[[self.start_row(), c]] + emit(0, c))
            .collect();
        let mut backpointers: Vec<Vec<usize>> = Vec::with_capacity(sequence.len());

        for t in 1..sequence.len() {
            let mut next = Vec::with_capacity(classes.len());
            let mut pointers = Vec::with_capacity(classes.len());
            for &c in classes {
                let from = argmax(&positions, |b| scores[b] + self.transition[[classes[b], c]])
                    .unwrap_or(0);
                next.push(scores[from] + self.transition[[classes[from], c]] + emit(t, c));
                pointers.push(from);
            }
            scores = next;
            backpointers.push(pointers);
        }

        let mut best = argmax(&positions, |a| scores[a]).unwrap_or(0);
        let mut path = vec![classes[best]];
        for pointers in backpointers.iter().rev() {
            best = pointers[best];
            path.push(classes[best]);
        }
        path.reverse();
        path
    }

    pub fn predict(&self, sequences: &[Vec<SparseVector>]) -> Vec<Vec<usize>> {
        sequences.iter().map(|s| self.viterbi(s)).collect()
    }

    /// Codes this classifier can emit
    pub fn classes(&self) -> &[usize] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entries: &[(usize, f64)], dim: usize) -> SparseVector {
        SparseVector {
            entries: entries.to_vec(),
            dim,
        }
    }

    /// One indicator feature per distinct word
    fn sentence(words: &[usize], dim: usize) -> Vec<SparseVector> {
        words.iter().map(|&w| row(&[(w, 1.0)], dim)).collect()
    }

    #[test]
    fn test_learns_span_pattern() {
        // O=0, B=1, I=2 over a four word vocabulary
        let sequences = vec![sentence(&[0, 1, 2, 3], 4), sentence(&[3, 1, 2], 4)];
        let labels = vec![vec![0, 1, 2, 0], vec![0, 1, 2]];

        let model = SequenceClassifier::train(&sequences, &labels, 3, &TrainOptions::default()).unwrap();
        assert_eq!(model.predict(&sequences), labels);
    }

    #[test]
    fn test_averaged_training() {
        let sequences = vec![sentence(&[0, 1, 2, 3], 4), sentence(&[3, 1, 2], 4)];
        let labels = vec![vec![0, 1, 2, 0], vec![0, 1, 2]];
        let options = TrainOptions {
            averaged: true,
            epochs: 50,
            ..TrainOptions::default()
        };

        let model = SequenceClassifier::train(&sequences, &labels, 3, &options).unwrap();
        assert_eq!(model.predict(&sequences), labels);
    }

    #[test]
    fn test_single_class_sequence() {
        let sequences = vec![sentence(&[0, 0], 1)];
        let model = SequenceClassifier::train(&sequences, &[vec![0, 0]], 3, &TrainOptions::default()).unwrap();
        assert_eq!(model.viterbi(&sentence(&[0, 0, 0], 1)), vec![0, 0, 0]);
        assert!(model.viterbi(&[]).is_empty());
    }

    #[test]
    fn test_predicts_only_seen_classes() {
        let sequences = vec![sentence(&[0, 1], 2)];
        let model = SequenceClassifier::train(&sequences, &[vec![1, 2]], 3, &TrainOptions::default()).unwrap();
        let predicted = model.viterbi(&sentence(&[1, 0, 1], 2));
        assert!(predicted.iter().all(|c| *c != 0));
    }

    #[test]
    fn test_ragged_labels_rejected() {
        let sequences = vec![sentence(&[0, 1], 2)];
        let result = SequenceClassifier::train(&sequences, &[vec![1]], 3, &TrainOptions::default());
        assert!(matches!(result, Err(ClinerError::LengthMismatch { .. })));
    }
}
