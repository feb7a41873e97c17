// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Classifiers for two-year recidivism prediction
//!
//! Implements:
//! - Random forest (bootstrap-aggregated CART trees, Gini impurity)
//! - Majority class baseline (always predict the most common class)
//!
//! Both sit behind the `Classifier` trait, so the training and validation
//! stages never depend on a concrete learner.

use crate::datasets::RowId;
use crate::encoding::EncodedMatrix;
use crate::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Predictions keyed by the rows they were made for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predictions {
    pub row_ids: Vec<RowId>,
    pub predicted: Vec<u8>,
}

/// Trait for all classifiers
pub trait Classifier: Send + Sync {
    /// Fit on an encoded matrix and 0/1 labels in the same row order
    fn fit(&mut self, x: &EncodedMatrix, y: &[u8]) -> Result<()>;

    /// P(label = 1) per row, in input row order
    fn predict_proba(&self, x: &EncodedMatrix) -> Result<Vec<f64>>;

    /// 0/1 predictions, in input row order
    fn predict(&self, x: &EncodedMatrix) -> Result<Vec<u8>> {
        Ok(self
            .predict_proba(x)?
            .into_iter()
            .map(|p| u8::from(p > 0.5))
            .collect())
    }

    /// Predict and keep the row ids attached
    fn predict_rows(&self, x: &EncodedMatrix) -> Result<Predictions> {
        Ok(Predictions {
            row_ids: x.row_ids.clone(),
            predicted: self.predict(x)?,
        })
    }

    /// Get model name
    fn name(&self) -> &str;

    /// Get model description
    fn description(&self) -> &str;
}

fn check_training_input(x: &EncodedMatrix, y: &[u8]) -> Result<()> {
    if x.n_rows() != y.len() {
        return Err(PipelineError::MisalignedInputs(format!(
            "{} encoded rows but {} labels",
            x.n_rows(),
            y.len()
        )));
    }
    if y.is_empty() {
        return Err(PipelineError::MisalignedInputs("no training rows".to_string()));
    }
    Ok(())
}

/// Majority class baseline: always predicts the most common class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MajorityClassifier {
    /// Training positive rate; predictions follow whichever class it favours
    positive_rate: Option<f64>,
}

impl MajorityClassifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Classifier for MajorityClassifier {
    fn fit(&mut self, x: &EncodedMatrix, y: &[u8]) -> Result<()> {
        check_training_input(x, y)?;
        let positives = y.iter().filter(|&&l| l == 1).count();
        self.positive_rate = Some(positives as f64 / y.len() as f64);
        Ok(())
    }

    fn predict_proba(&self, x: &EncodedMatrix) -> Result<Vec<f64>> {
        let p = self
            .positive_rate
            .ok_or_else(|| PipelineError::InvalidConfig("classifier has not been fitted".to_string()))?;
        Ok(vec![p; x.n_rows()])
    }

    fn name(&self) -> &str {
        "Majority"
    }

    fn description(&self) -> &str {
        "Always predicts the majority class from training data"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        /// Fraction of positive training rows reaching this leaf
        p: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single CART tree stored as a flat node arena (root at 0)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

struct TreeParams {
    max_depth: usize,
    min_samples_split: usize,
    max_features: usize,
}

fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

impl DecisionTree {
    fn fit(x: &EncodedMatrix, y: &[u8], samples: Vec<usize>, params: &TreeParams, rng: &mut ChaCha8Rng) -> Self {
        let mut tree = Self::default();
        tree.grow(x, y, samples, 0, params, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &EncodedMatrix,
        y: &[u8],
        mut samples: Vec<usize>,
        depth: usize,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> usize {
        let n = samples.len();
        let positives = samples.iter().filter(|&&i| y[i] == 1).count();
        let node = self.nodes.len();
        self.nodes.push(Node::Leaf {
            p: if n == 0 { 0.0 } else { positives as f64 / n as f64 },
        });

        if depth >= params.max_depth || n < params.min_samples_split || positives == 0 || positives == n {
            return node;
        }

        let Some((feature, threshold)) = Self::best_split(x, y, &mut samples, positives, params, rng) else {
            return node;
        };

        let (left, right): (Vec<usize>, Vec<usize>) =
            samples.into_iter().partition(|&i| x.get(i, feature) <= threshold);
        let left = self.grow(x, y, left, depth + 1, params, rng);
        let right = self.grow(x, y, right, depth + 1, params, rng);
        self.nodes[node] = Node::Split {
            feature,
            threshold,
            left,
            right,
        };
        node
    }

    /// Best Gini split over a random feature subset; keeps drawing features
    /// past `max_features` until at least one valid split is found
    fn best_split(
        x: &EncodedMatrix,
        y: &[u8],
        samples: &mut [usize],
        positives: usize,
        params: &TreeParams,
        rng: &mut ChaCha8Rng,
    ) -> Option<(usize, f64)> {
        let n = samples.len();
        let mut features: Vec<usize> = (0..x.n_cols).collect();
        features.shuffle(rng);

        let mut best: Option<(f64, usize, f64)> = None;
        for (visited, &feature) in features.iter().enumerate() {
            if visited >= params.max_features && best.is_some() {
                break;
            }

            samples.sort_by(|&a, &b| {
                x.get(a, feature)
                    .partial_cmp(&x.get(b, feature))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_pos = 0usize;
            for k in 0..n - 1 {
                if y[samples[k]] == 1 {
                    left_pos += 1;
                }
                let current = x.get(samples[k], feature);
                let next = x.get(samples[k + 1], feature);
                if current >= next {
                    continue;
                }

                let n_left = k + 1;
                let n_right = n - n_left;
                let impurity = n_left as f64 * gini(left_pos, n_left)
                    + n_right as f64 * gini(positives - left_pos, n_right);

                if best.map_or(true, |(b, _, _)| impurity < b) {
                    let mut threshold = current + (next - current) / 2.0;
                    if threshold >= next {
                        threshold = current;
                    }
                    best = Some((impurity, feature, threshold));
                }
            }
        }

        best.map(|(_, feature, threshold)| (feature, threshold))
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { p } => return *p,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Random forest: bootstrap-sampled CART trees, probabilities averaged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
    n_features: usize,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize, max_depth: usize, min_samples_split: usize, seed: u64) -> Self {
        Self {
            n_estimators,
            max_depth,
            min_samples_split,
            seed,
            n_features: 0,
            trees: Vec::new(),
        }
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(100, 10, 2, 42)
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &EncodedMatrix, y: &[u8]) -> Result<()> {
        check_training_input(x, y)?;
        if x.n_cols == 0 {
            return Err(PipelineError::InvalidConfig("cannot fit on zero feature columns".to_string()));
        }

        let n = y.len();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_split: self.min_samples_split.max(2),
            max_features: ((x.n_cols as f64).sqrt().ceil() as usize).max(1),
        };
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        self.trees = (0..self.n_estimators)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(x, y, bootstrap, &params, &mut rng)
            })
            .collect();
        self.n_features = x.n_cols;

        tracing::debug!(
            "Fitted {} trees on {} rows x {} columns",
            self.trees.len(),
            n,
            x.n_cols
        );
        Ok(())
    }

    fn predict_proba(&self, x: &EncodedMatrix) -> Result<Vec<f64>> {
        if !self.is_fitted() {
            return Err(PipelineError::InvalidConfig("classifier has not been fitted".to_string()));
        }
        if x.n_cols != self.n_features {
            return Err(PipelineError::schema_mismatch(
                vec![],
                vec![format!("{} encoded columns, model expects {}", x.n_cols, self.n_features)],
            ));
        }

        let n_trees = self.trees.len() as f64;
        Ok((0..x.n_rows())
            .map(|i| {
                let row = x.row(i);
                self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / n_trees
            })
            .collect())
    }

    fn name(&self) -> &str {
        "RandomForest"
    }

    fn description(&self) -> &str {
        "Bootstrap-aggregated CART trees with Gini splits over sqrt(n_features) candidates"
    }
}
