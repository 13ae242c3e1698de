//! Quality Metrics module
//!
//! Scores predicted concepts against gold annotations: per-label precision,
//! recall and F1, plus a confusion count between gold and predicted labels.

use std::collections::BTreeMap;

use cliner_core::{ClusteredConcept, ConceptLabel};
use serde::{Deserialize, Serialize};

// ============================================================================
// Concept Metrics
// ============================================================================

/// Match counts for one label (or all labels together)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptMetrics {
    /// Predicted concepts matching a gold concept of the same label
    pub true_positives: usize,
    /// Predicted concepts with no matching gold concept
    pub false_positives: usize,
    /// Gold concepts no prediction matched
    pub false_negatives: usize,
    pub gold_total: usize,
    pub predicted_total: usize,
}

impl ConceptMetrics {
    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f32 {
        if self.true_positives + self.false_positives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_positives) as f32
        }
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f32 {
        if self.true_positives + self.false_negatives == 0 {
            0.0
        } else {
            self.true_positives as f32 / (self.true_positives + self.false_negatives) as f32
        }
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f32 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    fn add(&mut self, other: &ConceptMetrics) {
        self.true_positives += other.true_positives;
        self.false_positives += other.false_positives;
        self.false_negatives += other.false_negatives;
        self.gold_total += other.gold_total;
        self.predicted_total += other.predicted_total;
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for extraction quality
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    /// Exact span match required; otherwise any token overlap counts
    strict: bool,
}

impl Evaluator {
    /// Overlap matching
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Enable strict span matching
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Span agreement on the same line, ignoring labels
    fn spans_match(&self, predicted: &ClusteredConcept, gold: &ClusteredConcept) -> bool {
        if predicted.line != gold.line {
            return false;
        }
        if self.strict {
            let mut p = predicted.spans.clone();
            let mut g = gold.spans.clone();
            p.sort_unstable();
            g.sort_unstable();
            p == g
        } else {
            predicted
                .spans
                .iter()
                .any(|&(ps, pe)| gold.spans.iter().any(|&(gs, ge)| ps <= ge && gs <= pe))
        }
    }

    /// Evaluate the concepts of one document
    ///
    /// Matching is greedy and one-to-one. Same-label matches are taken first
    /// and count as true positives; remaining span matches only feed the
    /// confusion table.
    pub fn evaluate(&self, predicted: &[ClusteredConcept], gold: &[ClusteredConcept]) -> EvaluationReport {
        let mut report = EvaluationReport {
            num_documents: 1,
            ..EvaluationReport::default()
        };
        let mut gold_used = vec![false; gold.len()];
        let mut pred_used = vec![false; predicted.len()];

        for (p_idx, pred) in predicted.iter().enumerate() {
            let hit = gold
                .iter()
                .enumerate()
                .position(|(g_idx, g)| !gold_used[g_idx] && g.label == pred.label && self.spans_match(pred, g));
            if let Some(g_idx) = hit {
                gold_used[g_idx] = true;
                pred_used[p_idx] = true;
                report.metrics_mut(pred.label).true_positives += 1;
                report.confuse(pred.label, pred.label);
            }
        }

        for (p_idx, pred) in predicted.iter().enumerate() {
            if pred_used[p_idx] {
                continue;
            }
            let hit = gold
                .iter()
                .enumerate()
                .position(|(g_idx, g)| !gold_used[g_idx] && self.spans_match(pred, g));
            if let Some(g_idx) = hit {
                gold_used[g_idx] = true;
                pred_used[p_idx] = true;
                report.confuse(gold[g_idx].label, pred.label);
            }
        }

        for pred in predicted {
            report.metrics_mut(pred.label).predicted_total += 1;
        }
        for (g_idx, g) in gold.iter().enumerate() {
            report.metrics_mut(g.label).gold_total += 1;
            if !gold_used[g_idx] {
                report.confuse(g.label, ConceptLabel::None);
            }
        }
        for (p_idx, pred) in predicted.iter().enumerate() {
            if !pred_used[p_idx] {
                report.confuse(ConceptLabel::None, pred.label);
            }
        }

        for metrics in report.per_label.values_mut() {
            metrics.false_positives = metrics.predicted_total - metrics.true_positives;
            metrics.false_negatives = metrics.gold_total - metrics.true_positives;
        }
        report.overall = report.per_label.values().fold(ConceptMetrics::default(), |mut acc, m| {
            acc.add(m);
            acc
        });
        report
    }
}

// ============================================================================
// Evaluation Report
// ============================================================================

/// Aggregate metrics for a batch of evaluations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub per_label: BTreeMap<ConceptLabel, ConceptMetrics>,
    pub overall: ConceptMetrics,
    /// `confusion[gold][predicted]`; `none` stands for a missing counterpart
    pub confusion: BTreeMap<ConceptLabel, BTreeMap<ConceptLabel, usize>>,
    pub num_documents: usize,
}

impl EvaluationReport {
    fn metrics_mut(&mut self, label: ConceptLabel) -> &mut ConceptMetrics {
        self.per_label.entry(label).or_default()
    }

    fn confuse(&mut self, gold: ConceptLabel, predicted: ConceptLabel) {
        *self.confusion.entry(gold).or_default().entry(predicted).or_default() += 1;
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: &EvaluationReport) {
        for (label, metrics) in &other.per_label {
            self.metrics_mut(*label).add(metrics);
        }
        self.overall.add(&other.overall);
        for (gold, row) in &other.confusion {
            for (predicted, count) in row {
                *self.confusion.entry(*gold).or_default().entry(*predicted).or_default() += count;
            }
        }
        self.num_documents += other.num_documents;
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let mut out = format!(
            "=== Concept Extraction Report ===\n\n\
             Documents evaluated: {}\n\n",
            self.num_documents
        );
        out.push_str(&format!(
            "{:<10} {:>9} {:>9} {:>9} {:>6} {:>6} {:>6}\n",
            "label", "precision", "recall", "f1", "TP", "FP", "FN"
        ));
        let rows = self
            .per_label
            .iter()
            .map(|(label, m)| (label.as_str(), m))
            .chain(std::iter::once(("overall", &self.overall)));
        for (name, m) in rows {
            out.push_str(&format!(
                "{:<10} {:>8.1}% {:>8.1}% {:>8.1}% {:>6} {:>6} {:>6}\n",
                name,
                m.precision() * 100.0,
                m.recall() * 100.0,
                m.f1_score() * 100.0,
                m.true_positives,
                m.false_positives,
                m.false_negatives,
            ));
        }

        out.push_str("\nConfusion (gold -> predicted):\n");
        for (gold, row) in &self.confusion {
            for (predicted, count) in row {
                out.push_str(&format!("  {gold} -> {predicted}: {count}\n"));
            }
        }
        out
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn concept(label: ConceptLabel, line: usize, spans: &[(usize, usize)]) -> ClusteredConcept {
        ClusteredConcept::new(label, line, spans.to_vec())
    }

    #[test]
    fn test_concept_metrics_f1() {
        let metrics = ConceptMetrics {
            true_positives: 80,
            false_positives: 20,
            false_negatives: 20,
            gold_total: 100,
            predicted_total: 100,
        };

        // P = 0.8, R = 0.8, F1 = 0.8
        assert!((metrics.precision() - 0.8).abs() < 0.001);
        assert!((metrics.recall() - 0.8).abs() < 0.001);
        assert!((metrics.f1_score() - 0.8).abs() < 0.001);
        assert_eq!(ConceptMetrics::default().f1_score(), 0.0);
    }

    #[test]
    fn test_evaluate_perfect() {
        let gold = vec![
            concept(ConceptLabel::Problem, 1, &[(0, 1)]),
            concept(ConceptLabel::Treatment, 2, &[(3, 3)]),
        ];
        let report = Evaluator::new().strict().evaluate(&gold, &gold);

        assert_eq!(report.overall.true_positives, 2);
        assert_eq!(report.overall.false_positives, 0);
        assert_eq!(report.overall.false_negatives, 0);
        assert_eq!(report.confusion[&ConceptLabel::Problem][&ConceptLabel::Problem], 1);
    }

    #[test]
    fn test_strict_requires_exact_spans() {
        let gold = vec![concept(ConceptLabel::Problem, 1, &[(0, 2)])];
        let predicted = vec![concept(ConceptLabel::Problem, 1, &[(1, 2)])];

        let strict = Evaluator::new().strict().evaluate(&predicted, &gold);
        assert_eq!(strict.overall.true_positives, 0);
        assert_eq!(strict.overall.false_positives, 1);
        assert_eq!(strict.overall.false_negatives, 1);

        let relaxed = Evaluator::new().evaluate(&predicted, &gold);
        assert_eq!(relaxed.overall.true_positives, 1);
    }

    #[test]
    fn test_overlap_needs_same_line() {
        let gold = vec![concept(ConceptLabel::Test, 1, &[(0, 2)])];
        let predicted = vec![concept(ConceptLabel::Test, 2, &[(0, 2)])];
        let report = Evaluator::new().evaluate(&predicted, &gold);
        assert_eq!(report.overall.true_positives, 0);
    }

    #[test]
    fn test_label_mismatch_lands_in_confusion() {
        let gold = vec![
            concept(ConceptLabel::Problem, 1, &[(0, 0)]),
            concept(ConceptLabel::Test, 1, &[(4, 4)]),
        ];
        let predicted = vec![
            concept(ConceptLabel::Treatment, 1, &[(0, 0)]),
            concept(ConceptLabel::Test, 1, &[(6, 6)]),
        ];
        let report = Evaluator::new().strict().evaluate(&predicted, &gold);

        assert_eq!(report.overall.true_positives, 0);
        assert_eq!(report.per_label[&ConceptLabel::Problem].false_negatives, 1);
        assert_eq!(report.per_label[&ConceptLabel::Treatment].false_positives, 1);
        assert_eq!(report.confusion[&ConceptLabel::Problem][&ConceptLabel::Treatment], 1);
        assert_eq!(report.confusion[&ConceptLabel::Test][&ConceptLabel::None], 1);
        assert_eq!(report.confusion[&ConceptLabel::None][&ConceptLabel::Test], 1);
    }

    #[test]
    fn test_multi_span_strict_ignores_span_order() {
        let gold = vec![concept(ConceptLabel::Problem, 3, &[(1, 2), (5, 5)])];
        let predicted = vec![concept(ConceptLabel::Problem, 3, &[(5, 5), (1, 2)])];
        let report = Evaluator::new().strict().evaluate(&predicted, &gold);
        assert_eq!(report.overall.true_positives, 1);
    }

    #[test]
    fn test_merge_and_report() {
        let gold = vec![concept(ConceptLabel::Problem, 1, &[(0, 1)])];
        let mut total = EvaluationReport::default();
        total.merge(&Evaluator::new().evaluate(&gold, &gold));
        total.merge(&Evaluator::new().evaluate(&[], &gold));

        assert_eq!(total.num_documents, 2);
        assert_eq!(total.overall.true_positives, 1);
        assert_eq!(total.overall.false_negatives, 1);
        assert!((total.overall.recall() - 0.5).abs() < 0.001);

        let text = total.report();
        assert!(text.contains("Documents evaluated: 2"));
        assert!(text.contains("problem"));
        assert!(text.contains("overall"));
    }
}
