// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Seeded stratified train/test partitioning
//!
//! The split is a pure function of (row ids, stratum keys, seed, fraction).
//! Training and validation both call `partition` with the parameters stored
//! in the model artifact, and the resulting fingerprint is compared so a
//! changed dataset or changed parameters cannot go unnoticed.

use crate::datasets::{Dataset, Record, RowId};
use crate::error::{PipelineError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Parameters that determine a partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionParams {
    pub seed: u64,
    pub held_out_fraction: f64,
    pub stratify_by: String,
}

/// Disjoint train/test cover of a dataset's row ids, both sorted ascending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    pub train: Vec<RowId>,
    pub test: Vec<RowId>,
    pub params: PartitionParams,
}

impl Partition {
    /// SHA-256 over the parameters and the test row ids
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.params.seed.to_le_bytes());
        hasher.update(self.params.held_out_fraction.to_le_bytes());
        hasher.update(self.params.stratify_by.as_bytes());
        hasher.update([0u8]);
        for id in &self.test {
            hasher.update((id.0 as u64).to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.test.is_empty()
    }
}

/// Resolve the stratum key of every record for the named column
fn stratum_keys(dataset: &Dataset, stratify_by: &str) -> Result<Vec<(RowId, String)>> {
    let key: Box<dyn Fn(&Record) -> String> = if stratify_by == dataset.target {
        Box::new(|r: &Record| r.label.to_string())
    } else if stratify_by == dataset.protected_attribute {
        Box::new(|r: &Record| r.protected.clone())
    } else if let Some(idx) = dataset.feature_index(stratify_by) {
        Box::new(move |r: &Record| r.features[idx].as_text())
    } else {
        return Err(PipelineError::InvalidConfig(format!(
            "stratify column '{}' is not the target, the protected attribute or a feature",
            stratify_by
        )));
    };

    Ok(dataset.records().iter().map(|r| (r.row_id, key(r))).collect())
}

/// Split `dataset` into train and test rows, preserving stratum proportions
pub fn partition(dataset: &Dataset, held_out_fraction: f64, seed: u64, stratify_by: &str) -> Result<Partition> {
    if !(held_out_fraction > 0.0 && held_out_fraction < 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "held_out_fraction must be in (0, 1), got {}",
            held_out_fraction
        )));
    }

    let mut strata: BTreeMap<String, Vec<RowId>> = BTreeMap::new();
    for (row_id, key) in stratum_keys(dataset, stratify_by)? {
        strata.entry(key).or_default().push(row_id);
    }

    if strata.len() < 2 {
        return Err(PipelineError::InsufficientStrata {
            column: stratify_by.to_string(),
            found: strata.len(),
        });
    }
    if let Some((stratum, rows)) = strata.iter().find(|(_, rows)| rows.len() < 2) {
        return Err(PipelineError::InsufficientStratumSize {
            stratum: stratum.clone(),
            size: rows.len(),
        });
    }

    let sizes: Vec<usize> = strata.values().map(Vec::len).collect();
    let allocation = allocate_test_rows(&sizes, held_out_fraction);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(dataset.len());
    let mut test = Vec::new();

    for (mut rows, n_test) in strata.into_values().zip(allocation) {
        rows.sort_unstable();
        rows.shuffle(&mut rng);
        let (held_out, kept) = rows.split_at(n_test);
        test.extend_from_slice(held_out);
        train.extend_from_slice(kept);
    }

    train.sort_unstable();
    test.sort_unstable();

    tracing::debug!(
        "Partitioned {} rows into {} train / {} test (seed={}, stratify_by={})",
        train.len() + test.len(),
        train.len(),
        test.len(),
        seed,
        stratify_by
    );

    Ok(Partition {
        train,
        test,
        params: PartitionParams {
            seed,
            held_out_fraction,
            stratify_by: stratify_by.to_string(),
        },
    })
}

/// Test rows per stratum: proportional floor, largest remainders first,
/// then clamped so every stratum keeps at least one row on each side
fn allocate_test_rows(sizes: &[usize], fraction: f64) -> Vec<usize> {
    let total: usize = sizes.iter().sum();
    let n_test = ((fraction * total as f64).ceil() as usize).clamp(1, total.saturating_sub(1));

    let exact: Vec<f64> = sizes
        .iter()
        .map(|&s| n_test as f64 * s as f64 / total as f64)
        .collect();
    let mut allocation: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal).then(a.cmp(&b))
    });

    let mut missing = n_test.saturating_sub(allocation.iter().sum());
    for &i in order.iter().cycle().take(order.len() * 2) {
        if missing == 0 {
            break;
        }
        if allocation[i] < sizes[i] {
            allocation[i] += 1;
            missing -= 1;
        }
    }

    for (alloc, &size) in allocation.iter_mut().zip(sizes.iter()) {
        *alloc = (*alloc).clamp(1, size - 1);
    }
    allocation
}
