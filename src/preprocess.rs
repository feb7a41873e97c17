// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Raw COMPAS export to cleaned dataset
//!
//! Applies the ProPublica screening filters, keeps the groups of interest and
//! projects the configured columns. Rows are streamed; nothing is buffered.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// A single row predicate over one raw column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowFilter {
    /// Keep rows whose value parses and lies in `[min, max]`
    NumericRange { column: String, min: f64, max: f64 },
    /// Keep rows whose value parses and differs from `value`
    NumericNotEqual { column: String, value: f64 },
    /// Keep rows whose text differs from `value`
    TextNotEqual { column: String, value: String },
    /// Keep rows whose text is one of `values`
    TextOneOf { column: String, values: Vec<String> },
}

impl RowFilter {
    pub fn column(&self) -> &str {
        match self {
            RowFilter::NumericRange { column, .. }
            | RowFilter::NumericNotEqual { column, .. }
            | RowFilter::TextNotEqual { column, .. }
            | RowFilter::TextOneOf { column, .. } => column,
        }
    }

    pub fn keep(&self, raw: &str) -> bool {
        let raw = raw.trim();
        match self {
            RowFilter::NumericRange { min, max, .. } => {
                matches!(raw.parse::<f64>(), Ok(v) if v >= *min && v <= *max)
            }
            // Missing or non-numeric cells never equal the value, so they stay
            RowFilter::NumericNotEqual { value, .. } => !matches!(raw.parse::<f64>(), Ok(v) if v == *value),
            RowFilter::TextNotEqual { value, .. } => raw != value,
            RowFilter::TextOneOf { values, .. } => values.iter().any(|v| v == raw),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            RowFilter::NumericRange { column, min, max } => format!("{} in [{}, {}]", column, min, max),
            RowFilter::NumericNotEqual { column, value } => format!("{} != {}", column, value),
            RowFilter::TextNotEqual { column, value } => format!("{} != '{}'", column, value),
            RowFilter::TextOneOf { column, values } => format!("{} in {:?}", column, values),
        }
    }
}

/// The ProPublica screening filters followed by the group restriction
pub fn propublica_filters(config: &PipelineConfig) -> Vec<RowFilter> {
    vec![
        RowFilter::NumericRange {
            column: "days_b_screening_arrest".to_string(),
            min: -30.0,
            max: 30.0,
        },
        RowFilter::NumericNotEqual {
            column: "is_recid".to_string(),
            value: -1.0,
        },
        RowFilter::TextNotEqual {
            column: "c_charge_degree".to_string(),
            value: "O".to_string(),
        },
        RowFilter::TextNotEqual {
            column: "score_text".to_string(),
            value: "N/A".to_string(),
        },
        RowFilter::TextOneOf {
            column: config.protected_attribute.clone(),
            values: config.permitted_groups.clone(),
        },
    ]
}

/// Row counts observed while preprocessing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreprocessSummary {
    pub raw_rows: usize,
    /// Rows still present after each filter, in application order
    pub remaining_after: Vec<(String, usize)>,
    pub written_rows: usize,
    pub columns: Vec<String>,
}

pub struct Preprocessor {
    filters: Vec<RowFilter>,
    columns: Vec<String>,
}

impl Preprocessor {
    pub fn new(filters: Vec<RowFilter>, columns: Vec<String>) -> Self {
        Self { filters, columns }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(propublica_filters(config), config.output_columns())
    }

    /// Filter `input` and write the selected columns to `output`
    pub fn run(&self, input: &Path, output: &Path) -> Result<PreprocessSummary> {
        if !input.exists() {
            return Err(PipelineError::InputNotFound {
                path: input.to_path_buf(),
            });
        }

        let file = File::open(input)?;
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers()?.clone();

        let index_of = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::MissingColumn {
                    column: name.to_string(),
                    path: input.to_path_buf(),
                })
        };

        let filter_idx = self
            .filters
            .iter()
            .map(|f| index_of(f.column()))
            .collect::<Result<Vec<_>>>()?;
        let column_idx = self
            .columns
            .iter()
            .map(|c| index_of(c.as_str()))
            .collect::<Result<Vec<_>>>()?;

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(output)?;
        writer.write_record(&self.columns)?;

        let mut raw_rows = 0usize;
        let mut remaining = vec![0usize; self.filters.len()];

        for result in reader.records() {
            let record = result?;
            raw_rows += 1;

            let mut kept = true;
            for (stage, (filter, &idx)) in self.filters.iter().zip(filter_idx.iter()).enumerate() {
                if !filter.keep(record.get(idx).unwrap_or("")) {
                    kept = false;
                    break;
                }
                remaining[stage] += 1;
            }
            if !kept {
                continue;
            }

            writer.write_record(column_idx.iter().map(|&i| record.get(i).unwrap_or("")))?;
        }
        writer.flush()?;

        tracing::info!("Raw rows: {}", raw_rows);
        let remaining_after: Vec<(String, usize)> = self
            .filters
            .iter()
            .zip(remaining.iter())
            .map(|(filter, &count)| {
                tracing::info!("  after {}: {} rows", filter.describe(), count);
                (filter.describe(), count)
            })
            .collect();
        let written_rows = remaining.last().copied().unwrap_or(raw_rows);

        tracing::info!("Wrote {} rows x {} columns to {}", written_rows, self.columns.len(), output.display());

        Ok(PreprocessSummary {
            raw_rows,
            remaining_after,
            written_rows,
            columns: self.columns.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_HEADER: &str = "id,sex,age,age_cat,race,juv_fel_count,juv_misd_count,juv_other_count,priors_count,\
days_b_screening_arrest,c_charge_degree,is_recid,score_text,two_year_recid";

    fn write_raw(dir: &Path, rows: &[&str]) -> std::path::PathBuf {
        let path = dir.join("raw.csv");
        let mut body = String::from(RAW_HEADER);
        for row in rows {
            body.push('\n');
            body.push_str(row);
        }
        body.push('\n');
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_filter_predicates() {
        let range = RowFilter::NumericRange {
            column: "d".to_string(),
            min: -30.0,
            max: 30.0,
        };
        assert!(range.keep("-30"));
        assert!(range.keep("30"));
        assert!(!range.keep("31"));
        assert!(!range.keep(""));

        let not_minus_one = RowFilter::NumericNotEqual {
            column: "r".to_string(),
            value: -1.0,
        };
        assert!(not_minus_one.keep("0"));
        assert!(!not_minus_one.keep("-1"));
        assert!(!not_minus_one.keep("-1.0"));
        assert!(not_minus_one.keep(""));
        assert!(not_minus_one.keep("NaN"));

        let one_of = RowFilter::TextOneOf {
            column: "race".to_string(),
            values: vec!["Caucasian".to_string()],
        };
        assert!(one_of.keep("Caucasian"));
        assert!(!one_of.keep("Hispanic"));
    }

    #[test]
    fn test_preprocess_applies_filters_and_projection() {
        let dir = tempfile::tempdir().unwrap();
        let raw = write_raw(
            dir.path(),
            &[
                "1,Male,30,25 - 45,Caucasian,0,0,0,2,0,F,1,Low,1",
                "2,Female,22,Less than 25,African-American,0,1,0,0,-1,M,0,Medium,0",
                "3,Male,40,25 - 45,Caucasian,0,0,0,5,45,F,1,High,1",
                "4,Male,50,Greater than 45,Hispanic,0,0,0,1,0,F,0,Low,0",
                "5,Male,35,25 - 45,Caucasian,0,0,0,3,0,O,0,Low,0",
                "6,Male,35,25 - 45,Caucasian,0,0,0,3,0,F,-1,Low,0",
                "7,Male,35,25 - 45,Caucasian,0,0,0,3,0,F,0,N/A,0",
                "8,Female,29,25 - 45,African-American,0,0,0,3,,F,0,Low,0",
                "9,Male,33,25 - 45,Caucasian,0,0,0,1,0,F,,Low,0",
            ],
        );
        let output = dir.path().join("processed").join("cleaned.csv");

        let config = PipelineConfig::default();
        let summary = Preprocessor::from_config(&config).run(&raw, &output).unwrap();

        assert_eq!(summary.raw_rows, 9);
        assert_eq!(summary.written_rows, 3);
        assert_eq!(summary.remaining_after.len(), 5);
        assert_eq!(summary.remaining_after[0].1, 7);
        // Row 9 has no is_recid value and is kept
        assert_eq!(summary.remaining_after[1].1, 6);

        let text = std::fs::read_to_string(&output).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), config.output_columns().join(","));
        assert_eq!(lines.count(), 3);
    }

    #[test]
    fn test_missing_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Preprocessor::from_config(&PipelineConfig::default())
            .run(&dir.path().join("absent.csv"), &dir.path().join("out.csv"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InputNotFound { .. }));
    }

    #[test]
    fn test_missing_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        std::fs::write(&path, "race,two_year_recid\nCaucasian,1\n").unwrap();

        let err = Preprocessor::from_config(&PipelineConfig::default())
            .run(&path, &dir.path().join("out.csv"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }
}
