//! Multiclass perceptron

use cliner_core::{ClinerError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{argmax, seen_classes, TrainOptions};
use crate::vectorize::SparseVector;

/// Linear classifier with one weight row per label code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearClassifier {
    /// `n_classes x dim`
    weights: Array2<f64>,
    /// Codes seen at train time; the only codes ever predicted
    classes: Vec<usize>,
    default_label: usize,
}

impl LinearClassifier {
    /// Train on independent `(row, code)` examples
    pub fn train(
        rows: &[SparseVector],
        labels: &[usize],
        n_classes: usize,
        options: &TrainOptions,
    ) -> Result<Self> {
        if rows.len() != labels.len() {
            return Err(ClinerError::LengthMismatch {
                context: "flat training labels".to_string(),
                expected: rows.len(),
                found: labels.len(),
            });
        }
        let classes = seen_classes(labels, n_classes)?;
        let dim = rows.first().map_or(0, |r| r.dim);

        let mut model = Self {
            weights: Array2::zeros((n_classes, dim)),
            classes,
            default_label: options.default_label,
        };
        if model.classes.len() < 2 {
            return Ok(model);
        }

        // Averaging accumulates `step * delta`; final = w - acc / step
        let mut accumulated = Array2::<f64>::zeros((n_classes, dim));
        let mut step = 1.0;

        for epoch in 0..options.epochs {
            let mut mistakes = 0;
            for (row, &gold) in rows.iter().zip(labels) {
                let predicted = model.predict_one(row);
                if predicted != gold {
                    mistakes += 1;
                    for &(i, v) in &row.entries {
                        model.weights[[gold, i]] += v;
                        model.weights[[predicted, i]] -= v;
                        if options.averaged {
                            accumulated[[gold, i]] += step * v;
                            accumulated[[predicted, i]] -= step * v;
                        }
                    }
                }
                step += 1.0;
            }

            debug!(epoch, mistakes, "Perceptron epoch");
            if mistakes == 0 {
                break;
            }
        }

        if options.averaged {
            model.weights = &model.weights - &(accumulated / step);
        }
        Ok(model)
    }

    /// Label code for one row
    pub fn predict_one(&self, row: &SparseVector) -> usize {
        match self.classes.as_slice() {
            [] => self.default_label,
            [only] => *only,
            classes => argmax(classes, |c| row.dot(self.weights.row(c))).unwrap_or(self.default_label),
        }
    }

    pub fn predict(&self, rows: &[SparseVector]) -> Vec<usize> {
        rows.iter().map(|row| self.predict_one(row)).collect()
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

    fn separable() -> (Vec<SparseVector>, Vec<usize>) {
        (
            vec![
                row(&[(0, 1.0), (3, 1.0)], 4),
                row(&[(1, 1.0), (3, 1.0)], 4),
                row(&[(2, 1.0), (3, 1.0)], 4),
                row(&[(0, 1.0)], 4),
            ],
            vec![1, 2, 3, 1],
        )
    }

    #[test]
    fn test_learns_separable_data() {
        let (rows, labels) = separable();
        let model = LinearClassifier::train(&rows, &labels, 4, &TrainOptions::default()).unwrap();
        assert_eq!(model.predict(&rows), labels);
        assert_eq!(model.classes(), &[1, 2, 3]);
    }

    #[test]
    fn test_averaged_learns_separable_data() {
        let (rows, labels) = separable();
        let options = TrainOptions {
            averaged: true,
            ..TrainOptions::default()
        };
        let model = LinearClassifier::train(&rows, &labels, 4, &options).unwrap();
        assert_eq!(model.predict(&rows), labels);
    }

    #[test]
    fn test_single_class_always_predicted() {
        let rows = vec![row(&[(0, 1.0)], 1)];
        let model = LinearClassifier::train(&rows, &[2], 4, &TrainOptions::default()).unwrap();
        assert_eq!(model.predict_one(&row(&[], 1)), 2);
    }

    #[test]
    fn test_no_labels_uses_default() {
        let model = LinearClassifier::train(&[], &[], 2, &TrainOptions::default()).unwrap();
        assert_eq!(model.predict_one(&row(&[], 0)), 0);
    }

    #[test]
    fn test_zero_vector_resolves_to_lowest_seen_class() {
        let (rows, labels) = separable();
        let model = LinearClassifier::train(&rows, &labels, 4, &TrainOptions::default()).unwrap();
        assert_eq!(model.predict_one(&row(&[], 4)), 1);
    }

    #[test]
    fn test_rejects_unknown_code() {
        let rows = vec![row(&[(0, 1.0)], 1)];
        assert!(LinearClassifier::train(&rows, &[5], 4, &TrainOptions::default()).is_err());
    }
}
