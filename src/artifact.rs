// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Persisted model artifact
//!
//! The trained forest travels together with everything validation needs to
//! reproduce the training conditions: the encoded column schema, the
//! partition parameters and the partition fingerprint.

use crate::classifier::RandomForest;
use crate::encoding::ColumnSchema;
use crate::error::{PipelineError, Result};
use crate::partition::PartitionParams;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bumped whenever the on-disk layout changes
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model: RandomForest,
    pub schema: ColumnSchema,
    pub partition_params: PartitionParams,
    pub partition_fingerprint: String,
    pub target: String,
    pub protected_attribute: String,
    pub permitted_groups: Vec<String>,
    pub test_accuracy: f64,
    pub trained_at: DateTime<Utc>,
    pub crate_version: String,
}

impl ModelArtifact {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Model artifact saved to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;

        // Check the version before decoding the rest, so an older layout
        // reports a version problem rather than a missing field
        let raw: serde_json::Value = serde_json::from_str(&text).map_err(|e| PipelineError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let version = raw.get("format_version").and_then(serde_json::Value::as_u64);
        if version != Some(u64::from(FORMAT_VERSION)) {
            return Err(PipelineError::ArtifactFormat {
                path: path.to_path_buf(),
                reason: format!(
                    "format version {} is not supported (expected {})",
                    version.map_or("missing".to_string(), |v| v.to_string()),
                    FORMAT_VERSION
                ),
            });
        }

        let artifact: Self = serde_json::from_value(raw).map_err(|e| PipelineError::ArtifactFormat {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !artifact.model.is_fitted() {
            return Err(PipelineError::ArtifactFormat {
                path: path.to_path_buf(),
                reason: "model has no trees".to_string(),
            });
        }
        tracing::debug!(
            "Loaded artifact: {} trees, {} columns, trained {}",
            artifact.model.trees().len(),
            artifact.schema.len(),
            artifact.trained_at
        );
        Ok(artifact)
    }
}
