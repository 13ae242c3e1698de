//! Prose / non-prose partitioning
//!
//! First-pass training and prediction run separate vectorizers and
//! classifiers for free-flowing prose and for tabular or list-like lines.
//! The prose flag comes from the feature layer together with the feature
//! set, so partitioning and feature extraction happen in a single sweep.

use cliner_core::{ClinerError, Result};

/// Sentences (or their feature sets) split by style, plus the flags needed
/// to restore the original order
#[derive(Debug, Clone, PartialEq)]
pub struct Partition<F, L> {
    pub prose: Vec<F>,
    pub nonprose: Vec<F>,
    /// Labels of all prose sentences, concatenated
    pub prose_labels: Vec<L>,
    /// Labels of all non-prose sentences, concatenated
    pub nonprose_labels: Vec<L>,
    /// Prose flag per input sentence, in input order
    pub flags: Vec<bool>,
}

impl<F, L> Default for Partition<F, L> {
    fn default() -> Self {
        Self {
            prose: Vec::new(),
            nonprose: Vec::new(),
            prose_labels: Vec::new(),
            nonprose_labels: Vec::new(),
            flags: Vec::new(),
        }
    }
}

/// Split sentences into prose and non-prose groups
///
/// `classify` is called exactly once per sentence, in input order, and
/// returns the prose flag alongside whatever item should be grouped (usually
/// the sentence's feature dictionaries). Relative order inside each group is
/// the input order.
pub fn partition<S, F, L, C>(sentences: &[S], labels: &[Vec<L>], mut classify: C) -> Result<Partition<F, L>>
where
    L: Clone,
    C: FnMut(&S) -> Result<(bool, F)>,
{
    if sentences.len() != labels.len() {
        return Err(ClinerError::LengthMismatch {
            context: "label sequences for partition".to_string(),
            expected: sentences.len(),
            found: labels.len(),
        });
    }

    let mut out = Partition::default();
    for (sentence, sentence_labels) in sentences.iter().zip(labels) {
        let (is_prose, item) = classify(sentence)?;
        out.flags.push(is_prose);
        if is_prose {
            out.prose.push(item);
            out.prose_labels.extend(sentence_labels.iter().cloned());
        } else {
            out.nonprose.push(item);
            out.nonprose_labels.extend(sentence_labels.iter().cloned());
        }
    }
    Ok(out)
}

/// Merge per-group results back into input order using the partition flags
pub fn interleave<T>(flags: &[bool], prose: Vec<T>, nonprose: Vec<T>) -> Result<Vec<T>> {
    let prose_count = flags.iter().filter(|f| **f).count();
    if prose.len() != prose_count || nonprose.len() != flags.len() - prose_count {
        return Err(ClinerError::LengthMismatch {
            context: "prose/non-prose stitching".to_string(),
            expected: flags.len(),
            found: prose.len() + nonprose.len(),
        });
    }

    let mut prose = prose.into_iter();
    let mut nonprose = nonprose.into_iter();
    Ok(flags
        .iter()
        .filter_map(|is_prose| {
            if *is_prose {
                prose.next()
            } else {
                nonprose.next()
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_concatenates_labels() {
        let sentences = vec!["long prose", "x", "more prose"];
        let labels = vec![vec![1, 2], vec![3], vec![4, 5]];
        let parts = partition(&sentences, &labels, |s| Ok((s.contains("prose"), s.len()))).unwrap();

        assert_eq!(parts.prose, vec![10, 10]);
        assert_eq!(parts.nonprose, vec![1]);
        assert_eq!(parts.prose_labels, vec![1, 2, 4, 5]);
        assert_eq!(parts.nonprose_labels, vec![3]);
        assert_eq!(parts.flags, vec![true, false, true]);
    }

    #[test]
    fn test_partition_propagates_classifier_error() {
        let sentences = vec![1, 2];
        let labels: Vec<Vec<u8>> = vec![vec![], vec![]];
        let result = partition(&sentences, &labels, |s| {
            if *s == 2 {
                Err(ClinerError::ExhaustedSource("primed batch consumed".to_string()))
            } else {
                Ok((true, *s))
            }
        });
        assert!(matches!(result, Err(ClinerError::ExhaustedSource(_))));
    }

    #[test]
    fn test_partition_requires_aligned_labels() {
        let result = partition(&[1, 2], &[vec![0u8]], |s| Ok((true, *s)));
        assert!(matches!(result, Err(ClinerError::LengthMismatch { .. })));
    }

    #[test]
    fn test_interleave_rejects_short_group() {
        let result = interleave(&[true, false, true], vec!['a'], vec!['b']);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn prop_partition_then_interleave_restores_order(flags in prop::collection::vec(any::<bool>(), 0..40)) {
            let sentences: Vec<usize> = (0..flags.len()).collect();
            let labels: Vec<Vec<usize>> = sentences.iter().map(|s| vec![*s]).collect();
            let parts = partition(&sentences, &labels, |s| Ok((flags[*s], *s))).unwrap();

            prop_assert_eq!(&parts.flags, &flags);
            let restored = interleave(&parts.flags, parts.prose, parts.nonprose).unwrap();
            prop_assert_eq!(restored, sentences);
        }
    }
}
