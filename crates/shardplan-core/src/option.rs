//! Candidate realizations of a table: `ShardingOption` and its `Shard`s.

use serde::{Deserialize, Serialize};

use crate::sharding::{EmbeddingComputeKernel, PartitionByType, ShardingType};
use crate::storage::{Perf, Storage};
use crate::table::DataType;

/// Contiguous `[row, col]` block of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub offsets: [u64; 2],
    pub sizes: [u64; 2],
    /// Filled in by the partitioner.
    pub rank: Option<usize>,
    pub storage: Storage,
    pub perf: Perf,
}

impl Shard {
    pub fn new(offsets: [u64; 2], sizes: [u64; 2]) -> Self {
        Self {
            offsets,
            sizes,
            rank: None,
            storage: Storage::zero(),
            perf: Perf::zero(),
        }
    }

    pub fn rows(&self) -> u64 {
        self.sizes[0]
    }

    pub fn cols(&self) -> u64 {
        self.sizes[1]
    }

    /// Placeholder shards keep per-rank symmetry but hold nothing.
    pub fn is_empty(&self) -> bool {
        self.rows() == 0 || self.cols() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardingOption {
    /// Table name.
    pub name: String,
    /// `[num_embeddings, embedding_dim]` of the whole table.
    pub tensor_shape: [u64; 2],
    pub data_type: DataType,
    pub is_pooled: bool,
    pub sharding_type: ShardingType,
    pub compute_kernel: EmbeddingComputeKernel,
    pub partition_by: PartitionByType,
    /// Average ids per sample for each feature of the table.
    pub pooling_factors: Vec<f64>,
    /// Fraction of rows cached in the fast tier (UVM caching kernels only).
    pub caching_ratio: Option<f64>,
    pub shards: Vec<Shard>,
}

impl ShardingOption {
    pub fn num_embeddings(&self) -> u64 {
        self.tensor_shape[0]
    }

    pub fn embedding_dim(&self) -> u64 {
        self.tensor_shape[1]
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn pooling_factor_sum(&self) -> f64 {
        self.pooling_factors.iter().sum()
    }

    /// Per-tier totals, saturating at `u64::MAX`.
    pub fn total_storage(&self) -> Storage {
        self.shards.iter().map(|s| s.storage).sum()
    }

    /// Exact bytes over every shard and tier.
    pub fn total_bytes(&self) -> u128 {
        self.shards.iter().map(|s| s.storage.total()).sum()
    }

    /// Ranking key: sum of every shard's modeled time.
    pub fn total_perf(&self) -> f64 {
        self.shards.iter().map(|s| s.perf.total()).sum()
    }

    pub fn is_placed(&self) -> bool {
        self.shards.iter().all(|s| s.rank.is_some())
    }

    /// Ranks this option touches, in shard order.
    pub fn ranks(&self) -> Vec<usize> {
        self.shards.iter().filter_map(|s| s.rank).collect()
    }

    /// Short human label, e.g. `table_0/row_wise/batched_fused`.
    pub fn label(&self) -> String {
        format!("{}/{}/{}", self.name, self.sharding_type, self.compute_kernel)
    }
}
