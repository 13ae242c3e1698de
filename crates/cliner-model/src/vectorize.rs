//! Dictionary vectorizer
//!
//! Maps sparse feature dictionaries onto a fixed index space discovered at
//! fit time. Transforming after the fit never grows the space: keys that
//! were not seen during fitting are dropped.

use std::collections::{BTreeSet, HashMap};

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::features::{FeatureDict, FeatureKey};

/// Sparse row over a vectorizer's feature space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// `(feature index, weight)`, ascending by index
    pub entries: Vec<(usize, f64)>,
    pub dim: usize,
}

impl SparseVector {
    /// Dot product with a dense weight row of the same dimension
    pub fn dot(&self, weights: ArrayView1<'_, f64>) -> f64 {
        self.entries.iter().map(|&(i, v)| weights[i] * v).sum()
    }

    pub fn to_dense(&self) -> Array1<f64> {
        let mut dense = Array1::zeros(self.dim);
        for &(i, v) in &self.entries {
            dense[i] = v;
        }
        dense
    }

    /// Whether no feature is active
    pub fn is_zero(&self) -> bool {
        self.entries.iter().all(|&(_, v)| v == 0.0)
    }
}

/// Fit-once feature index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<FeatureKey>", into = "Vec<FeatureKey>")]
pub struct DictVectorizer {
    features: Vec<FeatureKey>,
    index: HashMap<FeatureKey, usize>,
}

impl DictVectorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover the feature space, replacing any previous fit
    pub fn fit(&mut self, dicts: &[FeatureDict]) {
        let keys: BTreeSet<&FeatureKey> = dicts.iter().flat_map(|d| d.keys()).collect();
        *self = Self::from(keys.into_iter().cloned().collect::<Vec<_>>());
    }

    /// Project dictionaries onto the fitted space
    pub fn transform(&self, dicts: &[FeatureDict]) -> Vec<SparseVector> {
        dicts
            .iter()
            .map(|dict| {
                let mut entries: Vec<(usize, f64)> = dict
                    .iter()
                    .filter_map(|(key, value)| self.index.get(key).map(|&i| (i, *value)))
                    .collect();
                entries.sort_unstable_by_key(|&(i, _)| i);
                SparseVector {
                    entries,
                    dim: self.features.len(),
                }
            })
            .collect()
    }

    pub fn fit_transform(&mut self, dicts: &[FeatureDict]) -> Vec<SparseVector> {
        self.fit(dicts);
        self.transform(dicts)
    }

    /// Size of the fitted feature space
    pub fn dimension(&self) -> usize {
        self.features.len()
    }

    /// Feature names in index order
    pub fn feature_names(&self) -> &[FeatureKey] {
        &self.features
    }
}

impl From<Vec<FeatureKey>> for DictVectorizer {
    fn from(features: Vec<FeatureKey>) -> Self {
        let index = features
            .iter()
            .enumerate()
            .map(|(i, key)| (key.clone(), i))
            .collect();
        Self { features, index }
    }
}

impl From<DictVectorizer> for Vec<FeatureKey> {
    fn from(vectorizer: DictVectorizer) -> Self {
        vectorizer.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: &[(&str, &str, f64)]) -> FeatureDict {
        pairs
            .iter()
            .map(|(c, v, w)| (FeatureKey::new(*c, *v), *w))
            .collect()
    }

    #[test]
    fn test_fit_sorts_feature_space() {
        let mut vectorizer = DictVectorizer::new();
        vectorizer.fit(&[
            dict(&[("word", "pain", 1.0), ("distance", "*", 2.0)]),
            dict(&[("word", "chest", 1.0)]),
        ]);
        assert_eq!(vectorizer.dimension(), 3);
        assert_eq!(vectorizer.feature_names()[0], FeatureKey::new("distance", "*"));
    }

    #[test]
    fn test_unseen_keys_are_dropped() {
        let mut vectorizer = DictVectorizer::new();
        let train = vectorizer.fit_transform(&[dict(&[("word", "pain", 1.0), ("shape", "x", 1.0)])]);

        let unseen = vectorizer.transform(&[dict(&[("word", "fever", 1.0), ("orth", "title", 1.0)])]);
        assert_eq!(unseen[0].dim, train[0].dim);
        assert!(unseen[0].is_zero());
        assert_eq!(unseen[0].to_dense(), Array1::<f64>::zeros(2));
    }

    #[test]
    fn test_transform_keeps_weights() {
        let mut vectorizer = DictVectorizer::new();
        vectorizer.fit(&[dict(&[("a", "1", 1.0), ("b", "1", 1.0)])]);
        let rows = vectorizer.transform(&[dict(&[("b", "1", 3.5), ("c", "1", 1.0)])]);
        assert_eq!(rows[0].entries, vec![(1, 3.5)]);

        let weights = ndarray::arr1(&[2.0, 4.0]);
        assert!((rows[0].dot(weights.view()) - 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_serde_keeps_index() {
        let mut vectorizer = DictVectorizer::new();
        vectorizer.fit(&[dict(&[("word", "pain", 1.0), ("word", "chest", 1.0)])]);

        let json = serde_json::to_string(&vectorizer).unwrap();
        let restored: DictVectorizer = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, vectorizer);
        assert_eq!(
            restored.transform(&[dict(&[("word", "pain", 1.0)])]),
            vectorizer.transform(&[dict(&[("word", "pain", 1.0)])])
        );
    }
}
