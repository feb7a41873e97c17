// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Feature encoding: mixed categorical/numeric records to a numeric matrix
//!
//! Numeric columns pass through first, in feature order. Each categorical
//! column then expands to one indicator per observed value, values sorted
//! lexicographically with the first dropped as the baseline. The schema is
//! recorded at training time and any divergence at validation time is an
//! error, never a silent reindex.

use crate::datasets::{Dataset, RowId, Value};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnKind {
    /// Source value copied as is
    Numeric,
    /// 1.0 when the source equals `value`, 0.0 otherwise
    Indicator { value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedColumn {
    pub name: String,
    pub source: String,
    pub kind: ColumnKind,
}

/// Dropped reference category of a categorical source column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub source: String,
    pub value: String,
}

/// Ordered output columns of the encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub columns: Vec<EncodedColumn>,
    pub baselines: Vec<Baseline>,
}

/// Row-keyed numeric matrix, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedMatrix {
    pub row_ids: Vec<RowId>,
    pub n_cols: usize,
    pub values: Vec<f64>,
}

impl EncodedMatrix {
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.n_cols..(i + 1) * self.n_cols]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.n_cols + col]
    }
}

pub struct FeatureEncoder;

impl FeatureEncoder {
    /// Derive the column schema from the value domains observed in `dataset`
    pub fn fit(dataset: &Dataset) -> ColumnSchema {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();
        let mut baselines = Vec::new();

        for (idx, name) in dataset.feature_names.iter().enumerate() {
            let is_numeric = dataset.records().iter().all(|r| r.features[idx].is_numeric());
            if is_numeric {
                numeric.push(EncodedColumn {
                    name: name.clone(),
                    source: name.clone(),
                    kind: ColumnKind::Numeric,
                });
                continue;
            }

            let domain: BTreeSet<String> = dataset.records().iter().map(|r| r.features[idx].as_text()).collect();
            let mut values = domain.into_iter();
            if let Some(baseline) = values.next() {
                baselines.push(Baseline {
                    source: name.clone(),
                    value: baseline,
                });
            }
            categorical.extend(values.map(|value| EncodedColumn {
                name: format!("{}_{}", name, value),
                source: name.clone(),
                kind: ColumnKind::Indicator { value },
            }));
        }

        numeric.extend(categorical);
        let schema = ColumnSchema {
            columns: numeric,
            baselines,
        };
        tracing::debug!("Encoded columns: {:?}", schema.names());
        schema
    }
}

/// Fit a schema on `dataset` and encode every row with it
pub fn encode(dataset: &Dataset) -> Result<(EncodedMatrix, ColumnSchema)> {
    let schema = FeatureEncoder::fit(dataset);
    let matrix = schema.transform(dataset, &dataset.row_ids())?;
    Ok((matrix, schema))
}

/// Per-source lookup built once per transform
enum SourcePlan {
    Numeric { feature: usize },
    Categorical { feature: usize, known: HashSet<String> },
}

impl ColumnSchema {
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// SHA-256 over the ordered column names
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    /// Fail with `SchemaMismatch` unless names and order equal `recorded`
    pub fn ensure_matches(&self, recorded: &ColumnSchema) -> Result<()> {
        if self.names() == recorded.names() {
            return Ok(());
        }
        let ours: HashSet<&str> = self.names().into_iter().collect();
        let theirs: HashSet<&str> = recorded.names().into_iter().collect();
        let missing = recorded
            .names()
            .into_iter()
            .filter(|n| !ours.contains(n))
            .map(str::to_string)
            .collect();
        let unexpected = self
            .names()
            .into_iter()
            .filter(|n| !theirs.contains(n))
            .map(str::to_string)
            .collect();
        Err(PipelineError::schema_mismatch(missing, unexpected))
    }

    fn plan(&self, dataset: &Dataset) -> Result<HashMap<String, SourcePlan>> {
        let mut plans: HashMap<String, SourcePlan> = HashMap::new();
        for column in &self.columns {
            let feature = dataset
                .feature_index(&column.source)
                .ok_or_else(|| PipelineError::schema_mismatch(vec![column.source.clone()], vec![]))?;
            match &column.kind {
                ColumnKind::Numeric => {
                    plans.insert(column.source.clone(), SourcePlan::Numeric { feature });
                }
                ColumnKind::Indicator { value } => {
                    let entry = plans.entry(column.source.clone()).or_insert_with(|| SourcePlan::Categorical {
                        feature,
                        known: HashSet::new(),
                    });
                    if let SourcePlan::Categorical { known, .. } = entry {
                        known.insert(value.clone());
                    }
                }
            }
        }
        for baseline in &self.baselines {
            let feature = dataset
                .feature_index(&baseline.source)
                .ok_or_else(|| PipelineError::schema_mismatch(vec![baseline.source.clone()], vec![]))?;
            let entry = plans.entry(baseline.source.clone()).or_insert_with(|| SourcePlan::Categorical {
                feature,
                known: HashSet::new(),
            });
            if let SourcePlan::Categorical { known, .. } = entry {
                known.insert(baseline.value.clone());
            }
        }
        Ok(plans)
    }

    /// Encode `rows` of `dataset`, in the order given
    pub fn transform(&self, dataset: &Dataset, rows: &[RowId]) -> Result<EncodedMatrix> {
        let plans = self.plan(dataset)?;
        let n_cols = self.columns.len();
        let mut values = Vec::with_capacity(rows.len() * n_cols);

        for &row_id in rows {
            let record = dataset
                .get(row_id)
                .ok_or_else(|| PipelineError::MisalignedInputs(format!("row {} is not in the dataset", row_id)))?;

            for (source, plan) in &plans {
                match plan {
                    SourcePlan::Numeric { feature } => {
                        if let Value::Categorical(v) = &record.features[*feature] {
                            return Err(PipelineError::schema_mismatch(
                                vec![],
                                vec![format!("{}_{}", source, v)],
                            ));
                        }
                    }
                    SourcePlan::Categorical { feature, known } => {
                        let text = record.features[*feature].as_text();
                        if !known.contains(&text) {
                            return Err(PipelineError::schema_mismatch(
                                vec![],
                                vec![format!("{}_{}", source, text)],
                            ));
                        }
                    }
                }
            }

            for column in &self.columns {
                let feature = match &plans[&column.source] {
                    SourcePlan::Numeric { feature } | SourcePlan::Categorical { feature, .. } => *feature,
                };
                let cell = &record.features[feature];
                values.push(match (&column.kind, cell) {
                    (ColumnKind::Numeric, Value::Numeric(v)) => *v,
                    (ColumnKind::Numeric, Value::Categorical(_)) => 0.0,
                    (ColumnKind::Indicator { value }, cell) => {
                        if cell.as_text() == *value {
                            1.0
                        } else {
                            0.0
                        }
                    }
                });
            }
        }

        Ok(EncodedMatrix {
            row_ids: rows.to_vec(),
            n_cols,
            values,
        })
    }
}
