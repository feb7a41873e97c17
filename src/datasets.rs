// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Row-indexed recidivism dataset: loading, writing and synthetic generation
//!
//! Every record keeps the `RowId` it was loaded with. Partitions, encoded
//! matrices and prediction vectors all refer back to records through it.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::Path;

/// Position of a record in the cleaned file (0-based, header excluded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single feature cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Numeric(f64),
    Categorical(String),
}

impl Value {
    /// Numeric when the cell parses as a finite float, categorical otherwise
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Numeric(v),
            _ => Value::Categorical(trimmed.to_string()),
        }
    }

    /// Textual form, used for category domains and stratum keys
    pub fn as_text(&self) -> String {
        match self {
            Value::Numeric(v) => format!("{}", v),
            Value::Categorical(s) => s.clone(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Numeric(_))
    }
}

/// One individual's row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub row_id: RowId,
    /// Feature values, ordered like `Dataset::feature_names`
    pub features: Vec<Value>,
    /// Unencoded protected attribute
    pub protected: String,
    /// Two-year recidivism outcome (0 or 1)
    pub label: u8,
}

/// A loaded dataset with a row id index over its records
///
/// Records are only reachable through `records()`, so the index always
/// agrees with them whatever order they are held in.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub protected_attribute: String,
    pub target: String,
    records: Vec<Record>,
    index: HashMap<RowId, usize>,
}

fn index_rows(records: &[Record]) -> HashMap<RowId, usize> {
    records.iter().enumerate().map(|(i, r)| (r.row_id, i)).collect()
}

impl Dataset {
    /// Build a dataset; row ids must be unique and every record must carry
    /// one value per feature
    pub fn new(
        feature_names: Vec<String>,
        protected_attribute: String,
        target: String,
        records: Vec<Record>,
    ) -> Result<Self> {
        let index = index_rows(&records);
        if index.len() != records.len() {
            let mut seen = HashSet::with_capacity(records.len());
            let dup = records
                .iter()
                .find(|r| !seen.insert(r.row_id))
                .map_or_else(String::new, |r| r.row_id.to_string());
            return Err(PipelineError::MisalignedInputs(format!("row {} appears more than once", dup)));
        }
        if let Some(record) = records.iter().find(|r| r.features.len() != feature_names.len()) {
            return Err(PipelineError::MalformedRecord {
                row: record.row_id.0,
                reason: format!(
                    "{} feature values for {} feature columns",
                    record.features.len(),
                    feature_names.len()
                ),
            });
        }
        Ok(Self {
            feature_names,
            protected_attribute,
            target,
            records,
            index,
        })
    }

    /// Same columns, different records
    pub fn with_records(&self, records: Vec<Record>) -> Result<Self> {
        Self::new(
            self.feature_names.clone(),
            self.protected_attribute.clone(),
            self.target.clone(),
            records,
        )
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Load the cleaned CSV written by preprocessing
    pub fn load_processed(path: &Path, config: &PipelineConfig) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound {
                path: path.to_path_buf(),
            });
        }

        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers()?.clone();

        let column_index = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::MissingColumn {
                    column: name.to_string(),
                    path: path.to_path_buf(),
                })
        };

        let feature_idx = config
            .features
            .iter()
            .map(|f| column_index(f.as_str()))
            .collect::<Result<Vec<_>>>()?;
        let protected_idx = column_index(config.protected_attribute.as_str())?;
        let target_idx = column_index(config.target.as_str())?;

        let mut records = Vec::new();
        for (row, result) in reader.records().enumerate() {
            let record = result?;
            let field = |idx: usize| record.get(idx).unwrap_or("");

            let label = parse_label(field(target_idx)).ok_or_else(|| PipelineError::MalformedRecord {
                row,
                reason: format!("{} must be 0 or 1, got '{}'", config.target, field(target_idx)),
            })?;

            records.push(Record {
                row_id: RowId(row),
                features: feature_idx.iter().map(|&i| Value::parse(field(i))).collect(),
                protected: field(protected_idx).trim().to_string(),
                label,
            });
        }

        tracing::info!("Loaded {} records from {}", records.len(), path.display());

        Self::new(
            config.features.clone(),
            config.protected_attribute.clone(),
            config.target.clone(),
            records,
        )
    }

    /// Write the dataset as CSV: features, protected attribute, target
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let mut header: Vec<&str> = self.feature_names.iter().map(String::as_str).collect();
        header.push(&self.protected_attribute);
        header.push(&self.target);
        writer.write_record(&header)?;

        for record in &self.records {
            let mut row: Vec<String> = record.features.iter().map(Value::as_text).collect();
            row.push(record.protected.clone());
            row.push(record.label.to_string());
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Look up a record by its row id
    pub fn get(&self, row_id: RowId) -> Option<&Record> {
        self.index.get(&row_id).map(|&i| &self.records[i])
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn row_ids(&self) -> Vec<RowId> {
        self.records.iter().map(|r| r.row_id).collect()
    }

    /// Index of a feature column by name
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    /// Labels for the given rows, in the given order
    pub fn labels_for(&self, rows: &[RowId]) -> Result<Vec<u8>> {
        rows.iter()
            .map(|&id| {
                self.get(id).map(|r| r.label).ok_or_else(|| {
                    PipelineError::MisalignedInputs(format!("row {} is not in the dataset", id))
                })
            })
            .collect()
    }

    /// Outcome counts over the given rows, keyed by label
    pub fn label_distribution(&self, rows: &[RowId]) -> Result<BTreeMap<u8, usize>> {
        let mut dist = BTreeMap::new();
        for label in self.labels_for(rows)? {
            *dist.entry(label).or_insert(0) += 1;
        }
        Ok(dist)
    }

    /// Generate a COMPAS-shaped dataset for development/testing
    ///
    /// Groups alternate row by row, so a balanced split across the two
    /// default groups is exact. Outcomes depend on priors and age only.
    pub fn synthetic(size: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let config = PipelineConfig::default();

        let records = (0..size)
            .map(|i| {
                let age: u32 = rng.gen_range(18..70);
                let age_cat = if age < 25 {
                    "Less than 25"
                } else if age <= 45 {
                    "25 - 45"
                } else {
                    "Greater than 45"
                };
                let priors: u32 = rng.gen_range(0..15);
                let sex = if rng.gen_bool(0.8) { "Male" } else { "Female" };
                let degree = if rng.gen_bool(0.65) { "F" } else { "M" };
                let juv_fel: u32 = if rng.gen_bool(0.1) { rng.gen_range(1..3) } else { 0 };
                let juv_misd: u32 = if rng.gen_bool(0.1) { rng.gen_range(1..3) } else { 0 };
                let juv_other: u32 = if rng.gen_bool(0.1) { rng.gen_range(1..3) } else { 0 };

                let risk = (0.25 + 0.04 * priors as f64 - 0.004 * (age as f64 - 18.0)).clamp(0.05, 0.9);
                let label = u8::from(rng.gen_bool(risk));

                Record {
                    row_id: RowId(i),
                    features: vec![
                        Value::Categorical(sex.to_string()),
                        Value::Numeric(age as f64),
                        Value::Categorical(age_cat.to_string()),
                        Value::Numeric(juv_fel as f64),
                        Value::Numeric(juv_misd as f64),
                        Value::Numeric(juv_other as f64),
                        Value::Numeric(priors as f64),
                        Value::Categorical(degree.to_string()),
                    ],
                    protected: config.permitted_groups[i % config.permitted_groups.len()].clone(),
                    label,
                }
            })
            .collect::<Vec<_>>();

        Self {
            feature_names: config.features.clone(),
            protected_attribute: config.protected_attribute.clone(),
            target: config.target.clone(),
            index: index_rows(&records),
            records,
        }
    }
}

fn parse_label(raw: &str) -> Option<u8> {
    match raw.trim() {
        "0" | "0.0" => Some(0),
        "1" | "1.0" => Some(1),
        _ => None,
    }
}
