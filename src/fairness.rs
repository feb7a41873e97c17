// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fairness gate: demographic parity over the protected attribute
//!
//! The protected attribute never enters the feature matrix. It is re-joined
//! to the test predictions here, by row id, from the unencoded dataset. Each
//! group's selection rate (share predicted positive) is computed, and the
//! spread between the highest and lowest rate is compared to the threshold.
//!
//! Decision rule: `passed = |difference| <= threshold`. A difference equal
//! to the threshold passes.

use crate::classifier::Predictions;
use crate::datasets::{Dataset, RowId};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A per-group statistic over true labels and predictions
pub trait GroupMetric {
    fn name(&self) -> &str;

    /// Statistic for one group; both slices are non-empty and equally long
    fn compute(&self, y_true: &[u8], y_pred: &[u8]) -> f64;
}

/// Fraction of a group predicted positive
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectionRate;

impl GroupMetric for SelectionRate {
    fn name(&self) -> &str {
        "selection_rate"
    }

    fn compute(&self, _y_true: &[u8], y_pred: &[u8]) -> f64 {
        let positives = y_pred.iter().filter(|&&p| p == 1).count();
        positives as f64 / y_pred.len() as f64
    }
}

/// Statistic for one protected group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRate {
    pub group: String,
    pub rows: usize,
    pub predicted_positive: usize,
    /// Share of the group that actually re-offended
    pub base_rate: f64,
    /// Value of the gate's metric for this group
    pub rate: f64,
}

/// Outcome of one gate evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub metric: String,
    /// Per-group statistics, in domain order
    pub groups: Vec<GroupRate>,
    /// max(rate) - min(rate) over all groups
    pub difference: f64,
    /// rate(first group) - rate(second group) for two groups, else `difference`
    pub signed_difference: f64,
    pub threshold: f64,
    pub passed: bool,
}

impl Verdict {
    pub fn status_line(&self) -> String {
        if self.passed {
            "VALIDATION PASSED: Model is within fairness thresholds.".to_string()
        } else {
            format!(
                "VALIDATION FAILED: Bias ({:.4}) is above the threshold ({}).",
                self.difference.abs(),
                self.threshold
            )
        }
    }
}

/// Unencoded protected attribute for each row, looked up by row id
pub fn align_attribute(rows: &[RowId], dataset: &Dataset) -> Result<Vec<String>> {
    rows.iter()
        .map(|&id| {
            dataset
                .get(id)
                .map(|r| r.protected.clone())
                .ok_or_else(|| PipelineError::MisalignedInputs(format!("row {} is not in the dataset", id)))
        })
        .collect()
}

fn check_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "fairness threshold must be a non-negative number, got {}",
            threshold
        )));
    }
    Ok(())
}

/// Demographic parity gate over a fixed group domain
#[derive(Debug, Clone)]
pub struct FairnessGate<M: GroupMetric = SelectionRate> {
    threshold: f64,
    groups: Vec<String>,
    metric: M,
}

impl FairnessGate<SelectionRate> {
    pub fn new(threshold: f64, groups: Vec<String>) -> Result<Self> {
        Self::with_metric(threshold, groups, SelectionRate)
    }
}

impl<M: GroupMetric> FairnessGate<M> {
    pub fn with_metric(threshold: f64, groups: Vec<String>, metric: M) -> Result<Self> {
        check_threshold(threshold)?;
        let distinct: HashSet<&str> = groups.iter().map(String::as_str).collect();
        if groups.is_empty() || distinct.len() != groups.len() {
            return Err(PipelineError::InvalidConfig(
                "fairness gate needs a non-empty list of distinct groups".to_string(),
            ));
        }
        Ok(Self {
            threshold,
            groups,
            metric,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    /// Evaluate positionally aligned vectors: index i of each refers to the
    /// same test record
    pub fn evaluate(&self, predictions: &[u8], true_labels: &[u8], attribute_values: &[String]) -> Result<Verdict> {
        if predictions.len() != true_labels.len() || predictions.len() != attribute_values.len() {
            return Err(PipelineError::MisalignedInputs(format!(
                "{} predictions, {} labels, {} attribute values",
                predictions.len(),
                true_labels.len(),
                attribute_values.len()
            )));
        }
        if let Some(pos) = predictions.iter().chain(true_labels.iter()).position(|&v| v > 1) {
            return Err(PipelineError::MisalignedInputs(format!(
                "non-binary value at position {}",
                pos % predictions.len().max(1)
            )));
        }

        let index: HashMap<&str, usize> = self
            .groups
            .iter()
            .enumerate()
            .map(|(i, g)| (g.as_str(), i))
            .collect();
        let mut y_true: Vec<Vec<u8>> = vec![Vec::new(); self.groups.len()];
        let mut y_pred: Vec<Vec<u8>> = vec![Vec::new(); self.groups.len()];

        for ((value, &pred), &truth) in attribute_values.iter().zip(predictions).zip(true_labels) {
            let slot = *index
                .get(value.as_str())
                .ok_or_else(|| PipelineError::UnexpectedGroup {
                    value: value.clone(),
                    permitted: self.groups.clone(),
                })?;
            y_true[slot].push(truth);
            y_pred[slot].push(pred);
        }

        let mut groups = Vec::with_capacity(self.groups.len());
        for (slot, group) in self.groups.iter().enumerate() {
            let (truth, pred) = (&y_true[slot], &y_pred[slot]);
            if pred.is_empty() {
                return Err(PipelineError::EmptyGroup { group: group.clone() });
            }
            groups.push(GroupRate {
                group: group.clone(),
                rows: pred.len(),
                predicted_positive: pred.iter().filter(|&&p| p == 1).count(),
                base_rate: truth.iter().filter(|&&t| t == 1).count() as f64 / truth.len() as f64,
                rate: self.metric.compute(truth, pred),
            });
        }

        let max = groups.iter().map(|g| g.rate).fold(f64::NEG_INFINITY, f64::max);
        let min = groups.iter().map(|g| g.rate).fold(f64::INFINITY, f64::min);
        let difference = max - min;
        let signed_difference = match groups.as_slice() {
            [a, b] => a.rate - b.rate,
            _ => difference,
        };

        Ok(Verdict {
            metric: self.metric.name().to_string(),
            groups,
            difference,
            signed_difference,
            threshold: self.threshold,
            passed: difference.abs() <= self.threshold,
        })
    }

    /// Evaluate row-keyed predictions; labels and the protected attribute
    /// are fetched from `dataset` by the predictions' own row ids
    pub fn evaluate_aligned(&self, predictions: &Predictions, dataset: &Dataset) -> Result<Verdict> {
        if predictions.row_ids.len() != predictions.predicted.len() {
            return Err(PipelineError::MisalignedInputs(format!(
                "{} row ids for {} predictions",
                predictions.row_ids.len(),
                predictions.predicted.len()
            )));
        }
        let mut seen = HashSet::with_capacity(predictions.row_ids.len());
        if let Some(dup) = predictions.row_ids.iter().find(|id| !seen.insert(**id)) {
            return Err(PipelineError::MisalignedInputs(format!("row {} predicted twice", dup)));
        }

        let labels = dataset.labels_for(&predictions.row_ids)?;
        let attributes = align_attribute(&predictions.row_ids, dataset)?;
        self.evaluate(&predictions.predicted, &labels, &attributes)
    }
}

/// Selection-rate gate with the observed groups (sorted) as the domain
pub fn evaluate(
    predictions: &[u8],
    true_labels: &[u8],
    attribute_values: &[String],
    threshold: f64,
) -> Result<Verdict> {
    let groups: Vec<String> = attribute_values
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if groups.is_empty() {
        check_threshold(threshold)?;
        return Err(PipelineError::MisalignedInputs("no rows to evaluate".to_string()));
    }
    FairnessGate::new(threshold, groups)?.evaluate(predictions, true_labels, attribute_values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups() -> Vec<String> {
        vec!["African-American".to_string(), "Caucasian".to_string()]
    }

    /// `n` rows per group; the first `pos_a` / `pos_b` of each are predicted positive
    fn two_groups(n: usize, pos_a: usize, pos_b: usize) -> (Vec<u8>, Vec<u8>, Vec<String>) {
        let mut preds = Vec::new();
        let mut attrs = Vec::new();
        for i in 0..n {
            preds.push(u8::from(i < pos_a));
            attrs.push("African-American".to_string());
        }
        for i in 0..n {
            preds.push(u8::from(i < pos_b));
            attrs.push("Caucasian".to_string());
        }
        let labels = (0..2 * n).map(|i| (i % 2) as u8).collect();
        (preds, labels, attrs)
    }

    #[test]
    fn test_difference_of_selection_rates() {
        let (preds, labels, attrs) = two_groups(10, 6, 4);
        let verdict = FairnessGate::new(0.10, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap();

        assert!((verdict.groups[0].rate - 0.6).abs() < 1e-12);
        assert!((verdict.groups[1].rate - 0.4).abs() < 1e-12);
        assert!((verdict.difference - 0.2).abs() < 1e-12);
        assert!((verdict.signed_difference - 0.2).abs() < 1e-12);
        assert!(!verdict.passed);
        assert_eq!(verdict.metric, "selection_rate");
    }

    #[test]
    fn test_signed_difference_follows_domain_order() {
        let (preds, labels, attrs) = two_groups(10, 4, 6);
        let verdict = FairnessGate::new(0.5, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap();
        assert!((verdict.signed_difference + 0.2).abs() < 1e-12);
        assert!((verdict.difference - 0.2).abs() < 1e-12);
        assert!(verdict.passed);
    }

    #[test]
    fn test_threshold_boundary_passes() {
        // 0.75 - 0.25 is exactly 0.5 in binary floating point
        let (preds, labels, attrs) = two_groups(4, 3, 1);

        let at = FairnessGate::new(0.5, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap();
        assert_eq!(at.difference, 0.5);
        assert!(at.passed);

        let below = FairnessGate::new(0.5 - 1e-9, groups())
            .unwrap()
            .evaluate(&preds, &labels, &attrs)
            .unwrap();
        assert!(!below.passed);
        assert_eq!(below.difference, 0.5);
    }

    #[test]
    fn test_empty_group_is_an_error() {
        let preds = vec![1, 0, 1];
        let labels = vec![1, 0, 0];
        let attrs = vec!["African-American".to_string(); 3];

        let err = FairnessGate::new(0.1, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap_err();
        match err {
            PipelineError::EmptyGroup { group } => assert_eq!(group, "Caucasian"),
            other => panic!("expected EmptyGroup, got {:?}", other),
        }
    }

    #[test]
    fn test_length_mismatch_is_misaligned() {
        let (preds, labels, attrs) = two_groups(5, 2, 2);
        let gate = FairnessGate::new(0.1, groups()).unwrap();

        assert!(matches!(
            gate.evaluate(&preds[1..], &labels, &attrs),
            Err(PipelineError::MisalignedInputs(_))
        ));
        assert!(matches!(
            gate.evaluate(&preds, &labels, &attrs[1..]),
            Err(PipelineError::MisalignedInputs(_))
        ));
    }

    #[test]
    fn test_group_outside_domain() {
        let (preds, labels, mut attrs) = two_groups(5, 2, 2);
        attrs[0] = "Hispanic".to_string();
        let err = FairnessGate::new(0.1, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap_err();
        assert!(matches!(err, PipelineError::UnexpectedGroup { .. }));
    }

    #[test]
    fn test_invalid_gate_configuration() {
        assert!(FairnessGate::new(-0.1, groups()).is_err());
        assert!(FairnessGate::new(f64::INFINITY, groups()).is_err());
        assert!(FairnessGate::new(0.1, vec![]).is_err());
        assert!(FairnessGate::new(0.1, vec!["a".to_string(), "a".to_string()]).is_err());
    }

    #[test]
    fn test_scenario_group_determined_predictions_fail() {
        let dataset = Dataset::synthetic(1000, 42);
        let predictions = Predictions {
            row_ids: dataset.row_ids(),
            predicted: dataset
                .records()
                .iter()
                .map(|r| u8::from(r.protected == "African-American"))
                .collect(),
        };

        let verdict = FairnessGate::new(0.10, groups())
            .unwrap()
            .evaluate_aligned(&predictions, &dataset)
            .unwrap();

        assert_eq!(verdict.groups[0].rows, 500);
        assert_eq!(verdict.groups[1].rows, 500);
        assert_eq!(verdict.difference, 1.0);
        assert_eq!(verdict.signed_difference, 1.0);
        assert!(!verdict.passed);
        assert!(verdict.status_line().starts_with("VALIDATION FAILED"));
    }

    #[test]
    fn test_scenario_identical_predictions_pass() {
        let dataset = Dataset::synthetic(1000, 42);
        let predictions = Predictions {
            row_ids: dataset.row_ids(),
            predicted: vec![1; 1000],
        };

        let verdict = FairnessGate::new(0.10, groups())
            .unwrap()
            .evaluate_aligned(&predictions, &dataset)
            .unwrap();

        assert_eq!(verdict.difference, 0.0);
        assert!(verdict.passed);
        assert!(verdict.status_line().starts_with("VALIDATION PASSED"));
    }

    #[test]
    fn test_attribute_joined_by_row_id_not_position() {
        let dataset = Dataset::synthetic(20, 1);
        // Every even row is African-American; the test rows are all even
        let test_rows: Vec<RowId> = (0..10).map(|i| RowId(i * 2)).collect();
        let mut rows_and_more = test_rows.clone();
        rows_and_more.push(RowId(1));
        let predictions = Predictions {
            row_ids: rows_and_more,
            predicted: vec![1; 11],
        };

        let aligned = align_attribute(&test_rows, &dataset).unwrap();
        assert!(aligned.iter().all(|g| g == "African-American"));

        // Positional pairing against the full dataset would mix both groups
        let positional: Vec<String> = dataset.records()[..10].iter().map(|r| r.protected.clone()).collect();
        assert!(positional.iter().any(|g| g == "Caucasian"));

        let verdict = FairnessGate::new(0.1, groups())
            .unwrap()
            .evaluate_aligned(&predictions, &dataset)
            .unwrap();
        assert_eq!(verdict.groups[0].rows, 10);
        assert_eq!(verdict.groups[1].rows, 1);
    }

    #[test]
    fn test_shuffled_records_give_the_same_verdict() {
        use rand::seq::SliceRandom;
        use rand::SeedableRng;
        use rand_chacha::ChaCha8Rng;

        let dataset = Dataset::synthetic(200, 5);
        let mut records = dataset.records().to_vec();
        records.shuffle(&mut ChaCha8Rng::seed_from_u64(3));
        let shuffled = dataset.with_records(records).unwrap();

        // Every fifth row left out, every third predicted positive
        let row_ids: Vec<RowId> = (0..200).filter(|i| i % 5 != 0).map(RowId).collect();
        let predictions = Predictions {
            predicted: row_ids.iter().map(|id| u8::from(id.0 % 3 == 0)).collect(),
            row_ids,
        };

        let gate = FairnessGate::new(0.1, groups()).unwrap();
        let in_order = gate.evaluate_aligned(&predictions, &dataset).unwrap();
        let reordered = gate.evaluate_aligned(&predictions, &shuffled).unwrap();
        assert_eq!(in_order, reordered);
        assert_eq!(in_order.groups[0].rows, 80);
        assert_eq!(in_order.groups[1].rows, 80);
    }

    #[test]
    fn test_unknown_or_duplicate_rows_are_misaligned() {
        let dataset = Dataset::synthetic(10, 1);
        let gate = FairnessGate::new(0.1, groups()).unwrap();

        let unknown = Predictions {
            row_ids: vec![RowId(0), RowId(1), RowId(42)],
            predicted: vec![1, 0, 1],
        };
        assert!(matches!(
            gate.evaluate_aligned(&unknown, &dataset),
            Err(PipelineError::MisalignedInputs(_))
        ));

        let duplicate = Predictions {
            row_ids: vec![RowId(0), RowId(1), RowId(1)],
            predicted: vec![1, 0, 1],
        };
        assert!(matches!(
            gate.evaluate_aligned(&duplicate, &dataset),
            Err(PipelineError::MisalignedInputs(_))
        ));
    }

    #[test]
    fn test_free_function_uses_observed_groups() {
        let (preds, labels, attrs) = two_groups(10, 6, 4);
        let verdict = evaluate(&preds, &labels, &attrs, 0.25).unwrap();
        assert_eq!(verdict.groups.len(), 2);
        assert!(verdict.passed);

        assert!(matches!(
            evaluate(&[], &[], &[], 0.1),
            Err(PipelineError::MisalignedInputs(_))
        ));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let (preds, labels, attrs) = two_groups(25, 11, 7);
        let gate = FairnessGate::new(0.1, groups()).unwrap();
        assert_eq!(
            gate.evaluate(&preds, &labels, &attrs).unwrap(),
            gate.evaluate(&preds, &labels, &attrs).unwrap()
        );
    }

    #[test]
    fn test_base_rate_reported() {
        let (preds, labels, attrs) = two_groups(10, 6, 4);
        let verdict = FairnessGate::new(0.1, groups()).unwrap().evaluate(&preds, &labels, &attrs).unwrap();
        assert!((verdict.groups[0].base_rate - 0.5).abs() < 1e-12);
        assert_eq!(verdict.groups[0].predicted_positive, 6);
    }
}
