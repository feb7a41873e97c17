// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Pipeline configuration
//!
//! One immutable value is built up front (defaults, optional TOML file, CLI
//! overrides) and handed to every stage, so fixtures can swap paths, groups
//! or thresholds without touching process state.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Parameters that fully determine the train/test partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Fraction of rows held out for testing, in (0, 1)
    pub held_out_fraction: f64,
    /// Seed for the stratified shuffle
    pub seed: u64,
    /// Column whose values define the strata
    pub stratify_by: String,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            held_out_fraction: 0.3,
            seed: 42,
            stratify_by: "two_year_recid".to_string(),
        }
    }
}

/// Random forest settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

/// Configuration shared by the preprocess, train and validate stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw COMPAS export
    pub raw_data_path: PathBuf,
    /// Cleaned dataset written by preprocessing
    pub processed_data_path: PathBuf,
    /// Serialized model artifact
    pub model_path: PathBuf,
    /// Directory for JSON/Markdown reports
    pub report_dir: PathBuf,
    /// Binary outcome column: 1 if the person re-offended within two years
    pub target: String,
    /// Protected attribute used for fairness analysis; never a model feature
    pub protected_attribute: String,
    /// Groups of interest, in reporting order
    pub permitted_groups: Vec<String>,
    /// Model feature columns
    pub features: Vec<String>,
    pub split: SplitConfig,
    pub model: ModelConfig,
    /// Maximum tolerated demographic parity difference
    pub fairness_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            raw_data_path: PathBuf::from("compas-scores-two-years.csv"),
            processed_data_path: Path::new("data").join("processed").join("compas_cleaned.csv"),
            model_path: PathBuf::from("recidivism_model.json"),
            report_dir: PathBuf::from("eval/results"),
            target: "two_year_recid".to_string(),
            protected_attribute: "race".to_string(),
            permitted_groups: vec!["African-American".to_string(), "Caucasian".to_string()],
            features: [
                "sex",
                "age",
                "age_cat",
                "juv_fel_count",
                "juv_misd_count",
                "juv_other_count",
                "priors_count",
                "c_charge_degree",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            split: SplitConfig::default(),
            model: ModelConfig::default(),
            fairness_threshold: 0.10,
        }
    }
}

impl PipelineConfig {
    /// Load a TOML file; keys that are absent fall back to the defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no stage could run correctly with
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(PipelineError::InvalidConfig("feature list is empty".to_string()));
        }
        if self.features.iter().any(|f| *f == self.protected_attribute) {
            return Err(PipelineError::InvalidConfig(format!(
                "protected attribute '{}' must not be a model feature",
                self.protected_attribute
            )));
        }
        if self.features.iter().any(|f| *f == self.target) {
            return Err(PipelineError::InvalidConfig(format!(
                "target '{}' must not be a model feature",
                self.target
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.features.iter().find(|f| !seen.insert(f.as_str())) {
            return Err(PipelineError::InvalidConfig(format!("feature '{}' listed twice", dup)));
        }

        let distinct: HashSet<&str> = self.permitted_groups.iter().map(|g| g.as_str()).collect();
        if distinct.len() < 2 || distinct.len() != self.permitted_groups.len() {
            return Err(PipelineError::InvalidConfig(
                "permitted_groups must list at least 2 distinct groups".to_string(),
            ));
        }

        let fraction = self.split.held_out_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "held_out_fraction must be in (0, 1), got {}",
                fraction
            )));
        }

        if !self.fairness_threshold.is_finite() || self.fairness_threshold < 0.0 {
            return Err(PipelineError::InvalidConfig(format!(
                "fairness_threshold must be a non-negative number, got {}",
                self.fairness_threshold
            )));
        }

        if self.model.n_estimators == 0 {
            return Err(PipelineError::InvalidConfig("n_estimators must be at least 1".to_string()));
        }
        if self.model.min_samples_split < 2 {
            return Err(PipelineError::InvalidConfig("min_samples_split must be at least 2".to_string()));
        }

        Ok(())
    }

    /// Columns kept by preprocessing, in output order
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = self.features.clone();
        columns.push(self.protected_attribute.clone());
        columns.push(self.target.clone());
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().expect("default config should validate");
        assert_eq!(config.split.seed, 42);
        assert!((config.fairness_threshold - 0.10).abs() < 1e-12);
        assert!(!config.features.contains(&config.protected_attribute));
    }

    #[test]
    fn test_protected_attribute_rejected_as_feature() {
        let mut config = PipelineConfig::default();
        config.features.push("race".to_string());
        assert!(matches!(config.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_fraction_bounds() {
        let mut config = PipelineConfig::default();
        config.split.held_out_fraction = 1.0;
        assert!(config.validate().is_err());
        config.split.held_out_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_threshold_rejected() {
        let mut config = PipelineConfig::default();
        config.fairness_threshold = -0.01;
        assert!(config.validate().is_err());
        config.fairness_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_single_group_rejected() {
        let mut config = PipelineConfig::default();
        config.permitted_groups = vec!["Caucasian".to_string(), "Caucasian".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml() {
        let config: PipelineConfig = toml::from_str(
            r#"
            fairness_threshold = 0.05

            [split]
            seed = 7
            "#,
        )
        .unwrap();

        assert!((config.fairness_threshold - 0.05).abs() < 1e-12);
        assert_eq!(config.split.seed, 7);
        assert!((config.split.held_out_fraction - 0.3).abs() < 1e-12);
        assert_eq!(config.target, "two_year_recid");
    }

    #[test]
    fn test_output_columns_order() {
        let config = PipelineConfig::default();
        let columns = config.output_columns();
        assert_eq!(columns.last().map(String::as_str), Some("two_year_recid"));
        assert_eq!(columns[columns.len() - 2], "race");
    }
}
