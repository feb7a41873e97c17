// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error taxonomy for the preprocessing, training and validation stages
//!
//! Every variant is a deterministic precondition violation: nothing here is
//! retried, and every stage either completes or aborts with one of these.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Raw data, cleaned data or model artifact missing on disk
    #[error("input not found: {}", path.display())]
    InputNotFound { path: PathBuf },

    #[error("stratify column '{column}' has {found} distinct value(s), at least 2 are required")]
    InsufficientStrata { column: String, found: usize },

    #[error("stratum '{stratum}' has {size} row(s), at least 2 are required to populate both splits")]
    InsufficientStratumSize { stratum: String, size: usize },

    #[error("encoded column schema does not match the training schema (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("misaligned inputs: {0}")]
    MisalignedInputs(String),

    #[error("protected group '{group}' has no rows in the test partition")]
    EmptyGroup { group: String },

    #[error("protected attribute value '{value}' is outside the permitted groups {permitted:?}")]
    UnexpectedGroup { value: String, permitted: Vec<String> },

    #[error("partition does not match the one used at training time: {0}")]
    PartitionMismatch(String),

    #[error("column '{column}' not found in {}", path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("malformed record at row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model artifact {}: {reason}", path.display())]
    ArtifactFormat { path: PathBuf, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// Process exit code reported for this error
    ///
    /// Missing inputs share code 1 with a failed fairness gate; everything
    /// else is 2 so callers can tell a bias failure from a broken run.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::InputNotFound { .. } => 1,
            _ => 2,
        }
    }

    pub(crate) fn schema_mismatch(missing: Vec<String>, unexpected: Vec<String>) -> Self {
        PipelineError::SchemaMismatch { missing, unexpected }
    }
}
