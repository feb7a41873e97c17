// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Fairness-gated recidivism prediction pipeline
//!
//! This crate provides:
//! - Preprocessing of the COMPAS two-year export (ProPublica filters)
//! - Seeded stratified train/test partitioning keyed by row id
//! - One-hot encoding with a recorded, checked column schema
//! - A random forest classifier and a majority baseline
//! - Classification metrics (Accuracy, Precision, Recall, F1, AUC-ROC)
//! - A demographic parity gate over the protected attribute
//! - Train/validate stages with a persisted model artifact

pub mod artifact;
pub mod classifier;
pub mod config;
pub mod datasets;
pub mod encoding;
pub mod error;
pub mod fairness;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod preprocess;

pub use artifact::ModelArtifact;
pub use classifier::{Classifier, MajorityClassifier, Predictions, RandomForest};
pub use config::PipelineConfig;
pub use datasets::{Dataset, Record, RowId, Value};
pub use encoding::{encode, ColumnSchema, EncodedMatrix, FeatureEncoder};
pub use error::{PipelineError, Result};
pub use fairness::{align_attribute, FairnessGate, GroupMetric, GroupRate, SelectionRate, Verdict};
pub use metrics::{ClassificationReport, ConfusionMatrix};
pub use partition::{partition, Partition, PartitionParams};
pub use pipeline::{Pipeline, RunReport, TrainingReport, ValidationReport};
pub use preprocess::{PreprocessSummary, Preprocessor, RowFilter};
