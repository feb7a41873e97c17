// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Classification metrics for the training-stage report
//!
//! Implements standard ML metrics over 0/1 labels:
//! - Confusion Matrix
//! - Accuracy, Precision, Recall, F1-Score
//! - Matthews Correlation Coefficient (MCC)
//! - AUC-ROC and Brier score (for probabilistic predictions)

use serde::{Deserialize, Serialize};

/// Confusion matrix for binary classification (positive = re-offended)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: usize,
    pub tn: usize,
    pub fp: usize,
    pub fn_: usize,
}

impl ConfusionMatrix {
    /// Create from predictions and ground truth labels
    pub fn from_predictions(predictions: &[u8], ground_truth: &[u8]) -> Self {
        let mut matrix = Self::default();

        for (&pred, &truth) in predictions.iter().zip(ground_truth.iter()) {
            match (pred == 1, truth == 1) {
                (true, true) => matrix.tp += 1,
                (false, false) => matrix.tn += 1,
                (true, false) => matrix.fp += 1,
                (false, true) => matrix.fn_ += 1,
            }
        }

        matrix
    }

    pub fn total(&self) -> usize {
        self.tp + self.tn + self.fp + self.fn_
    }

    /// Accuracy: (TP + TN) / Total
    pub fn accuracy(&self) -> f64 {
        ratio(self.tp + self.tn, self.total())
    }

    /// Precision: TP / (TP + FP)
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.tp + self.fp)
    }

    /// Recall (Sensitivity): TP / (TP + FN)
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.tp + self.fn_)
    }

    /// Specificity: TN / (TN + FP)
    pub fn specificity(&self) -> f64 {
        ratio(self.tn, self.tn + self.fp)
    }

    pub fn f1_score(&self) -> f64 {
        let precision = self.precision();
        let recall = self.recall();
        let denom = precision + recall;
        if denom == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / denom
    }

    /// Matthews Correlation Coefficient, in [-1, 1]
    pub fn mcc(&self) -> f64 {
        let tp = self.tp as f64;
        let tn = self.tn as f64;
        let fp = self.fp as f64;
        let fn_ = self.fn_ as f64;

        let numerator = tp * tn - fp * fn_;
        let denominator = ((tp + fp) * (tp + fn_) * (tn + fp) * (tn + fn_)).sqrt();

        if denominator == 0.0 {
            return 0.0;
        }
        numerator / denominator
    }

    pub fn balanced_accuracy(&self) -> f64 {
        (self.recall() + self.specificity()) / 2.0
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    num as f64 / denom as f64
}

/// Full classification report with all metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub mcc: f64,
    pub specificity: f64,
    pub support: usize,
    /// AUC-ROC score (if probabilities available)
    pub auc_roc: Option<f64>,
    /// Brier score (calibration metric, lower is better)
    pub brier_score: Option<f64>,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(cm: ConfusionMatrix) -> Self {
        Self {
            accuracy: cm.accuracy(),
            balanced_accuracy: cm.balanced_accuracy(),
            precision: cm.precision(),
            recall: cm.recall(),
            f1_score: cm.f1_score(),
            mcc: cm.mcc(),
            specificity: cm.specificity(),
            support: cm.total(),
            confusion_matrix: cm,
            auc_roc: None,
            brier_score: None,
        }
    }

    pub fn from_predictions(predictions: &[u8], ground_truth: &[u8]) -> Self {
        Self::from_confusion_matrix(ConfusionMatrix::from_predictions(predictions, ground_truth))
    }

    /// Report including the probabilistic metrics
    pub fn from_predictions_with_probs(predictions: &[u8], ground_truth: &[u8], probabilities: &[f64]) -> Self {
        let mut report = Self::from_predictions(predictions, ground_truth);
        report.auc_roc = Some(calculate_auc_roc(ground_truth, probabilities));
        report.brier_score = Some(calculate_brier_score(ground_truth, probabilities));
        report
    }

    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut output = format!(
            r#"Classification Report
=====================
Accuracy:          {:.4} ({:.2}%)
Balanced Accuracy: {:.4} ({:.2}%)
Precision:         {:.4}
Recall:            {:.4}
F1 Score:          {:.4}
MCC:               {:.4}
Specificity:       {:.4}
Support:           {}

Confusion Matrix:
                  Predicted
                  Recid     No recid
Actual Recid     {:>6}    {:>6}
       No recid  {:>6}    {:>6}
"#,
            self.accuracy,
            self.accuracy * 100.0,
            self.balanced_accuracy,
            self.balanced_accuracy * 100.0,
            self.precision,
            self.recall,
            self.f1_score,
            self.mcc,
            self.specificity,
            self.support,
            self.confusion_matrix.tp,
            self.confusion_matrix.fn_,
            self.confusion_matrix.fp,
            self.confusion_matrix.tn,
        );

        if let Some(auc) = self.auc_roc {
            output.push_str(&format!("\nAUC-ROC:           {:.4}\n", auc));
        }
        if let Some(brier) = self.brier_score {
            output.push_str(&format!("Brier Score:       {:.4}\n", brier));
        }
        output
    }
}

/// AUC-ROC via the trapezoidal rule; tied scores are swept together
fn calculate_auc_roc(ground_truth: &[u8], probabilities: &[f64]) -> f64 {
    let mut pairs: Vec<(u8, f64)> = ground_truth
        .iter()
        .zip(probabilities.iter())
        .map(|(&l, &p)| (l, p))
        .collect();
    pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let n_pos = pairs.iter().filter(|(l, _)| *l == 1).count() as f64;
    let n_neg = pairs.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut tpr_prev = 0.0;
    let mut fpr_prev = 0.0;
    let mut auc = 0.0;

    let mut i = 0;
    while i < pairs.len() {
        let score = pairs[i].1;
        while i < pairs.len() && pairs[i].1 == score {
            if pairs[i].0 == 1 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            i += 1;
        }
        let tpr = tp / n_pos;
        let fpr = fp / n_neg;
        auc += (fpr - fpr_prev) * (tpr + tpr_prev) / 2.0;
        tpr_prev = tpr;
        fpr_prev = fpr;
    }

    auc
}

fn calculate_brier_score(ground_truth: &[u8], probabilities: &[f64]) -> f64 {
    if ground_truth.is_empty() {
        return 1.0;
    }
    let sum: f64 = ground_truth
        .iter()
        .zip(probabilities.iter())
        .map(|(&l, &p)| (p - l as f64).powi(2))
        .sum();
    sum / ground_truth.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_perfect() {
        let cm = ConfusionMatrix::from_predictions(&[1, 1, 0, 0], &[1, 1, 0, 0]);

        assert_eq!(cm.tp, 2);
        assert_eq!(cm.tn, 2);
        assert_eq!(cm.fp, 0);
        assert_eq!(cm.fn_, 0);
        assert!((cm.accuracy() - 1.0).abs() < 1e-6);
        assert!((cm.f1_score() - 1.0).abs() < 1e-6);
        assert!((cm.mcc() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_confusion_matrix_worst() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1, 1], &[1, 1, 0, 0]);

        assert_eq!(cm.fp, 2);
        assert_eq!(cm.fn_, 2);
        assert!(cm.accuracy().abs() < 1e-6);
        assert!((cm.mcc() + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_is_zero_not_nan() {
        let cm = ConfusionMatrix::default();
        assert_eq!(cm.accuracy(), 0.0);
        assert_eq!(cm.precision(), 0.0);
        assert_eq!(cm.mcc(), 0.0);
    }

    #[test]
    fn test_auc_roc() {
        assert!((calculate_auc_roc(&[1, 1, 0, 0], &[0.9, 0.8, 0.2, 0.1]) - 1.0).abs() < 1e-9);
        assert!(calculate_auc_roc(&[1, 1, 0, 0], &[0.1, 0.2, 0.8, 0.9]).abs() < 1e-9);
        // All scores tied: the diagonal
        assert!((calculate_auc_roc(&[1, 0, 1, 0], &[0.5; 4]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_brier_score() {
        assert!(calculate_brier_score(&[1, 0], &[1.0, 0.0]).abs() < 1e-9);
        assert!((calculate_brier_score(&[1, 0], &[0.5, 0.5]) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_report_format() {
        let report = ClassificationReport::from_predictions_with_probs(&[1, 1, 0, 0], &[1, 0, 0, 0], &[0.9, 0.6, 0.2, 0.1]);
        let formatted = report.format();

        assert!(formatted.contains("Classification Report"));
        assert!(formatted.contains("Confusion Matrix"));
        assert!(formatted.contains("AUC-ROC"));
        assert!((report.accuracy - 0.75).abs() < 1e-9);
    }
}
