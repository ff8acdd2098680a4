// SPDX-License-Identifier: MIT OR Apache-2.0
//! Construction parameters for sparse tables.

use serde::{Deserialize, Serialize};

use crate::optimizer::OptimizerConfig;

/// Parameters fixed when a table is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseTableConfig {
    /// Optimizer family and hyperparameters.
    pub optimizer: OptimizerConfig,
    /// Weight vector dimension; identical for every key in the table and
    /// for every pull/push request it serves.
    pub dimension: usize,
    /// Number of shards the parameter space is partitioned into.
    pub shard_num: usize,
    /// This shard's index; used only for snapshot path naming.
    pub shard_id: usize,
}

impl Default for SparseTableConfig {
    fn default() -> Self {
        Self {
            optimizer: OptimizerConfig::default(),
            dimension: 8,
            shard_num: 1,
            shard_id: 0,
        }
    }
}
