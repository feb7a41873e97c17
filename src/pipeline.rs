// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Preprocess, train and validate stages
//!
//! Orchestrates:
//! - Cleaning the raw COMPAS export
//! - Stratified partitioning and one-hot encoding
//! - Random forest training, with a majority-class baseline for reference
//! - Reloading the artifact, reproducing the test partition and running the
//!   fairness gate on it
//! - Results serialization (JSON and Markdown)

use crate::artifact::{ModelArtifact, FORMAT_VERSION};
use crate::classifier::{Classifier, MajorityClassifier, RandomForest};
use crate::config::PipelineConfig;
use crate::datasets::Dataset;
use crate::encoding::FeatureEncoder;
use crate::error::{PipelineError, Result};
use crate::fairness::{FairnessGate, Verdict};
use crate::metrics::ClassificationReport;
use crate::partition::{partition, Partition, PartitionParams};
use crate::preprocess::{PreprocessSummary, Preprocessor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Results of the training stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub model_name: String,
    pub model_description: String,
    pub total_rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Outcome counts in the training partition, keyed by label
    pub train_label_distribution: BTreeMap<String, usize>,
    pub schema_columns: Vec<String>,
    pub schema_fingerprint: String,
    pub partition_fingerprint: String,
    /// Held-out performance of the trained forest
    pub classification: ClassificationReport,
    /// Held-out accuracy of always predicting the majority class
    pub baseline_accuracy: f64,
    pub model_path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

/// Results of the validation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub protected_attribute: String,
    pub test_rows: usize,
    pub verdict: Verdict,
    pub classification: ClassificationReport,
    pub model_path: PathBuf,
    pub model_trained_at: DateTime<Utc>,
    /// Groups the model was trained and reported against
    pub trained_groups: Vec<String>,
    /// Held-out accuracy recorded at training time
    pub trained_test_accuracy: f64,
    pub partition_fingerprint: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.verdict.passed
    }
}

/// All three stages run back to back
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub preprocess: PreprocessSummary,
    pub training: TrainingReport,
    pub validation: ValidationReport,
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Build a pipeline; the configuration is validated up front
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn partition_params(&self) -> PartitionParams {
        PartitionParams {
            seed: self.config.split.seed,
            held_out_fraction: self.config.split.held_out_fraction,
            stratify_by: self.config.split.stratify_by.clone(),
        }
    }

    fn split(&self, dataset: &Dataset, params: &PartitionParams) -> Result<Partition> {
        let split = partition(dataset, params.held_out_fraction, params.seed, &params.stratify_by)?;
        tracing::info!(
            "Partition: {} train / {} test rows (seed={}, held out={}, stratified by {})",
            split.train.len(),
            split.test.len(),
            params.seed,
            params.held_out_fraction,
            params.stratify_by
        );
        Ok(split)
    }

    /// Clean the raw export into the processed CSV
    pub fn preprocess(&self) -> Result<PreprocessSummary> {
        tracing::info!(
            "Preprocessing {} -> {}",
            self.config.raw_data_path.display(),
            self.config.processed_data_path.display()
        );
        Preprocessor::from_config(&self.config).run(&self.config.raw_data_path, &self.config.processed_data_path)
    }

    /// Train on the processed data and save the model artifact
    pub fn train(&self) -> Result<TrainingReport> {
        let dataset = Dataset::load_processed(&self.config.processed_data_path, &self.config)?;
        let schema = FeatureEncoder::fit(&dataset);

        let split = self.split(&dataset, &self.partition_params())?;
        let x_train = schema.transform(&dataset, &split.train)?;
        let y_train = dataset.labels_for(&split.train)?;
        let x_test = schema.transform(&dataset, &split.test)?;
        let y_test = dataset.labels_for(&split.test)?;

        let mut baseline = MajorityClassifier::new();
        baseline.fit(&x_train, &y_train)?;
        let baseline_accuracy = ClassificationReport::from_predictions(&baseline.predict(&x_test)?, &y_test).accuracy;

        let model_cfg = &self.config.model;
        let mut model = RandomForest::new(
            model_cfg.n_estimators,
            model_cfg.max_depth,
            model_cfg.min_samples_split,
            model_cfg.seed,
        );
        tracing::info!("Training {} on {} rows", model.name(), x_train.n_rows());
        model.fit(&x_train, &y_train)?;

        let probabilities = model.predict_proba(&x_test)?;
        let predicted = model.predict(&x_test)?;
        let classification = ClassificationReport::from_predictions_with_probs(&predicted, &y_test, &probabilities);
        tracing::info!(
            "Model accuracy on test data: {:.4} (majority baseline {:.4})",
            classification.accuracy,
            baseline_accuracy
        );

        let train_label_distribution = dataset
            .label_distribution(&split.train)?
            .into_iter()
            .map(|(label, count)| (label.to_string(), count))
            .collect();

        let artifact = ModelArtifact {
            format_version: FORMAT_VERSION,
            model,
            schema,
            partition_params: split.params.clone(),
            partition_fingerprint: split.fingerprint(),
            target: self.config.target.clone(),
            protected_attribute: self.config.protected_attribute.clone(),
            permitted_groups: self.config.permitted_groups.clone(),
            test_accuracy: classification.accuracy,
            trained_at: Utc::now(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        };
        artifact.save(&self.config.model_path)?;

        Ok(TrainingReport {
            model_name: artifact.model.name().to_string(),
            model_description: artifact.model.description().to_string(),
            total_rows: dataset.len(),
            train_rows: split.train.len(),
            test_rows: split.test.len(),
            train_label_distribution,
            schema_columns: artifact.schema.names().iter().map(|s| s.to_string()).collect(),
            schema_fingerprint: artifact.schema.fingerprint(),
            partition_fingerprint: artifact.partition_fingerprint.clone(),
            classification,
            baseline_accuracy,
            model_path: self.config.model_path.clone(),
            timestamp: artifact.trained_at,
            version: artifact.crate_version.clone(),
        })
    }

    /// Reload the artifact, reproduce the test partition and run the fairness gate
    pub fn validate(&self) -> Result<ValidationReport> {
        let artifact = ModelArtifact::load(&self.config.model_path)?;
        if artifact.target != self.config.target || artifact.protected_attribute != self.config.protected_attribute {
            return Err(PipelineError::InvalidConfig(format!(
                "artifact was trained for target '{}' / attribute '{}', configuration names '{}' / '{}'",
                artifact.target, artifact.protected_attribute, self.config.target, self.config.protected_attribute
            )));
        }

        let dataset = Dataset::load_processed(&self.config.processed_data_path, &self.config)?;
        FeatureEncoder::fit(&dataset).ensure_matches(&artifact.schema)?;

        let configured = self.partition_params();
        if configured != artifact.partition_params {
            return Err(PipelineError::PartitionMismatch(format!(
                "configured {:?}, model was trained with {:?}",
                configured, artifact.partition_params
            )));
        }
        let split = self.split(&dataset, &artifact.partition_params)?;
        let fingerprint = split.fingerprint();
        if fingerprint != artifact.partition_fingerprint {
            return Err(PipelineError::PartitionMismatch(
                "test rows differ from the ones held out at training time; the processed data has changed".to_string(),
            ));
        }

        let x_test = artifact.schema.transform(&dataset, &split.test)?;
        let predictions = artifact.model.predict_rows(&x_test)?;
        let y_test = dataset.labels_for(&predictions.row_ids)?;
        let classification = ClassificationReport::from_predictions(&predictions.predicted, &y_test);
        if (classification.accuracy - artifact.test_accuracy).abs() > 1e-12 {
            tracing::warn!(
                "Held-out accuracy {:.4} differs from the {:.4} recorded at training time",
                classification.accuracy,
                artifact.test_accuracy
            );
        }
        if artifact.permitted_groups != self.config.permitted_groups {
            tracing::warn!(
                "Configured groups {:?} differ from the groups {:?} the model was trained with",
                self.config.permitted_groups,
                artifact.permitted_groups
            );
        }

        let gate = FairnessGate::new(self.config.fairness_threshold, self.config.permitted_groups.clone())?;
        let verdict = gate.evaluate_aligned(&predictions, &dataset)?;
        for group in &verdict.groups {
            tracing::info!(
                "  {}: {} rows, selection rate {:.4}, base rate {:.4}",
                group.group,
                group.rows,
                group.rate,
                group.base_rate
            );
        }
        if verdict.passed {
            tracing::info!("Fairness gate passed: difference {:.4}", verdict.difference);
        } else {
            tracing::warn!(
                "Fairness gate failed: difference {:.4} exceeds {}",
                verdict.difference,
                verdict.threshold
            );
        }

        Ok(ValidationReport {
            protected_attribute: self.config.protected_attribute.clone(),
            test_rows: predictions.row_ids.len(),
            verdict,
            classification,
            model_path: self.config.model_path.clone(),
            model_trained_at: artifact.trained_at,
            trained_groups: artifact.permitted_groups,
            trained_test_accuracy: artifact.test_accuracy,
            partition_fingerprint: fingerprint,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Preprocess, train and validate in sequence
    pub fn run(&self) -> Result<RunReport> {
        let preprocess = self.preprocess()?;
        let training = self.train()?;
        let validation = self.validate()?;
        Ok(RunReport {
            preprocess,
            training,
            validation,
        })
    }

    /// Save any report as pretty JSON
    pub fn save_report<T: Serialize>(report: &T, output_path: &Path) -> Result<()> {
        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(output_path, json)?;
        tracing::info!("Report saved to {}", output_path.display());
        Ok(())
    }

    /// Generate a markdown fairness report
    pub fn generate_report(report: &ValidationReport) -> String {
        let verdict = &report.verdict;
        let mut out = String::new();

        out.push_str("# Recidivism Model Fairness Report\n\n");
        out.push_str(&format!("**Generated:** {}\n\n", report.timestamp.format("%Y-%m-%d %H:%M:%S UTC")));
        out.push_str(&format!("**Version:** {}\n\n", report.version));
        out.push_str(&format!(
            "**Model:** {} (trained {})\n\n",
            report.model_path.display(),
            report.model_trained_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        out.push_str("## Verdict\n\n");
        out.push_str(&format!(
            "**{}**\n\n",
            if verdict.passed { "PASSED" } else { "FAILED" }
        ));
        out.push_str(&format!("- **Metric:** {}\n", verdict.metric));
        out.push_str(&format!("- **Demographic parity difference:** {:.4}\n", verdict.difference));
        out.push_str(&format!("- **Signed difference:** {:.4}\n", verdict.signed_difference));
        out.push_str(&format!("- **Threshold:** {}\n", verdict.threshold));
        out.push_str(&format!("- **Test rows:** {}\n\n", report.test_rows));

        out.push_str(&format!("### Rates by {}\n\n", report.protected_attribute));
        out.push_str("| Group | Rows | Predicted positive | Selection rate | Base rate |\n");
        out.push_str("|-------|------|--------------------|----------------|-----------|\n");
        for group in &verdict.groups {
            out.push_str(&format!(
                "| {} | {} | {} | {:.4} | {:.4} |\n",
                group.group, group.rows, group.predicted_positive, group.rate, group.base_rate
            ));
        }

        out.push_str("\n## Held-out Performance\n\n");
        out.push_str(&format!("```\n{}\n```\n\n", report.classification.format()));

        out.push_str("## Partition\n\n");
        out.push_str(&format!("Fingerprint: `{}`\n", report.partition_fingerprint));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.processed_data_path = dir.join("processed").join("compas_cleaned.csv");
        config.model_path = dir.join("recidivism_model.json");
        config.report_dir = dir.join("results");
        config.model.n_estimators = 10;
        config.model.max_depth = 5;
        config
    }

    fn write_synthetic(config: &PipelineConfig, size: usize) {
        Dataset::synthetic(size, 42).write_csv(&config.processed_data_path).unwrap();
    }

    #[test]
    fn test_train_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 400);
        let pipeline = Pipeline::new(config).unwrap();

        let training = pipeline.train().unwrap();
        assert_eq!(training.total_rows, 400);
        assert_eq!(training.test_rows, 120);
        assert_eq!(training.train_rows, 280);
        assert!(training.classification.accuracy >= 0.0 && training.classification.accuracy <= 1.0);
        assert!(!training.schema_columns.iter().any(|c| c.starts_with("race")));

        let validation = pipeline.validate().unwrap();
        assert_eq!(validation.test_rows, 120);
        assert_eq!(validation.partition_fingerprint, training.partition_fingerprint);
        assert_eq!(validation.verdict.groups.len(), 2);
        assert!((validation.classification.accuracy - training.classification.accuracy).abs() < 1e-12);
        assert_eq!(validation.trained_test_accuracy, training.classification.accuracy);
        assert_eq!(validation.trained_groups, vec!["African-American".to_string(), "Caucasian".to_string()]);

        let counted: usize = training.train_label_distribution.values().sum();
        assert_eq!(counted, training.train_rows);
        assert!(training.train_label_distribution.keys().all(|k| k == "0" || k == "1"));
    }

    #[test]
    fn test_validation_reports_training_groups() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 300);
        Pipeline::new(config.clone()).unwrap().train().unwrap();

        let mut reordered = config;
        reordered.permitted_groups.reverse();
        let validation = Pipeline::new(reordered).unwrap().validate().unwrap();

        assert_eq!(validation.trained_groups[0], "African-American");
        assert_eq!(validation.verdict.groups[0].group, "Caucasian");
        assert!((validation.verdict.signed_difference + validation.verdict.groups[1].rate
            - validation.verdict.groups[0].rate)
            .abs()
            < 1e-12);
    }

    #[test]
    fn test_validation_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 300);
        let pipeline = Pipeline::new(config).unwrap();
        pipeline.train().unwrap();

        let first = pipeline.validate().unwrap();
        let second = pipeline.validate().unwrap();
        assert_eq!(first.verdict, second.verdict);
    }

    #[test]
    fn test_changed_split_seed_is_partition_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 300);
        Pipeline::new(config.clone()).unwrap().train().unwrap();

        let mut reseeded = config;
        reseeded.split.seed = 7;
        let err = Pipeline::new(reseeded).unwrap().validate().unwrap_err();
        assert!(matches!(err, PipelineError::PartitionMismatch(_)));
    }

    #[test]
    fn test_changed_data_is_partition_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 300);
        let pipeline = Pipeline::new(config.clone()).unwrap();
        pipeline.train().unwrap();

        write_synthetic(&config, 320);
        assert!(matches!(
            pipeline.validate(),
            Err(PipelineError::PartitionMismatch(_))
        ));
    }

    #[test]
    fn test_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 100);

        let err = Pipeline::new(config).unwrap().validate().unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound { .. }));
    }

    #[test]
    fn test_generate_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = small_config(dir.path());
        write_synthetic(&config, 300);
        let pipeline = Pipeline::new(config.clone()).unwrap();
        pipeline.train().unwrap();
        let validation = pipeline.validate().unwrap();

        let report = Pipeline::generate_report(&validation);
        assert!(report.contains("Recidivism Model Fairness Report"));
        assert!(report.contains("African-American"));
        assert!(report.contains("Caucasian"));

        let json_path = config.report_dir.join("validation.json");
        Pipeline::save_report(&validation, &json_path).unwrap();
        let reloaded: ValidationReport =
            serde_json::from_str(&std::fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(reloaded.verdict, validation.verdict);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = PipelineConfig::default();
        config.features.push("race".to_string());
        assert!(matches!(Pipeline::new(config), Err(PipelineError::InvalidConfig(_))));
    }
}
