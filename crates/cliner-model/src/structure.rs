//! List structure codec
//!
//! Vectorizers work on flat lists while sequence learners need one inner list
//! per sentence (or per line). These helpers record how a nested list was
//! grouped, flatten it, and rebuild the grouping afterwards.

use cliner_core::{ClinerError, Result};

/// Cumulative group lengths: `offsets[i]` is the item count through group `i`
///
/// A repeated value marks an empty group at that position.
pub fn save_structure<T>(groups: &[Vec<T>]) -> Vec<usize> {
    groups
        .iter()
        .scan(0, |total, group| {
            *total += group.len();
            Some(*total)
        })
        .collect()
}

/// Concatenate all groups, preserving order within and across groups
pub fn flatten<T: Clone>(groups: &[Vec<T>]) -> Vec<T> {
    groups.iter().flatten().cloned().collect()
}

/// Inverse of [`flatten`] given the offsets from [`save_structure`]
pub fn reconstruct<T>(flat: Vec<T>, offsets: &[usize]) -> Result<Vec<Vec<T>>> {
    let expected = offsets.last().copied().unwrap_or(0);
    if expected != flat.len() {
        return Err(ClinerError::LengthMismatch {
            context: "structure reconstruction".to_string(),
            expected,
            found: flat.len(),
        });
    }

    let mut items = flat.into_iter();
    let mut groups = Vec::with_capacity(offsets.len());
    let mut previous = 0;

    for &offset in offsets {
        if offset < previous {
            return Err(ClinerError::InvalidStructure(format!(
                "offsets decrease from {previous} to {offset}"
            )));
        }
        groups.push(items.by_ref().take(offset - previous).collect());
        previous = offset;
    }

    Ok(groups)
}
