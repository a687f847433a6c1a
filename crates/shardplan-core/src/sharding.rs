//! Closed sets of sharding strategies and compute kernels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a table is split across ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardingType {
    /// Full replica on every rank.
    DataParallel,
    /// Whole table on one rank.
    TableWise,
    /// Row blocks across every rank.
    RowWise,
    /// Column blocks, each on some rank.
    ColumnWise,
    /// Row blocks across the ranks of one host.
    TableRowWise,
    /// Column blocks kept within one host.
    TableColumnWise,
}

impl ShardingType {
    pub const ALL: [ShardingType; 6] = [
        ShardingType::DataParallel,
        ShardingType::TableWise,
        ShardingType::RowWise,
        ShardingType::ColumnWise,
        ShardingType::TableRowWise,
        ShardingType::TableColumnWise,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShardingType::DataParallel => "data_parallel",
            ShardingType::TableWise => "table_wise",
            ShardingType::RowWise => "row_wise",
            ShardingType::ColumnWise => "column_wise",
            ShardingType::TableRowWise => "table_row_wise",
            ShardingType::TableColumnWise => "table_column_wise",
        }
    }

    pub fn partition_by(&self) -> PartitionByType {
        match self {
            ShardingType::DataParallel | ShardingType::RowWise => PartitionByType::Uniform,
            ShardingType::TableWise | ShardingType::ColumnWise => PartitionByType::Device,
            ShardingType::TableRowWise | ShardingType::TableColumnWise => PartitionByType::Host,
        }
    }

    /// Whether the shards tile the table (everything except replication).
    pub fn is_partitioned(&self) -> bool {
        !matches!(self, ShardingType::DataParallel)
    }
}

impl fmt::Display for ShardingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShardingType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShardingType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown sharding type '{s}'")))
    }
}

/// Execution backend for a table's lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingComputeKernel {
    Dense,
    Sparse,
    BatchedDense,
    BatchedFused,
    BatchedFusedUvm,
    BatchedFusedUvmCaching,
    Quant,
}

impl EmbeddingComputeKernel {
    pub const ALL: [EmbeddingComputeKernel; 7] = [
        EmbeddingComputeKernel::Dense,
        EmbeddingComputeKernel::Sparse,
        EmbeddingComputeKernel::BatchedDense,
        EmbeddingComputeKernel::BatchedFused,
        EmbeddingComputeKernel::BatchedFusedUvm,
        EmbeddingComputeKernel::BatchedFusedUvmCaching,
        EmbeddingComputeKernel::Quant,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingComputeKernel::Dense => "dense",
            EmbeddingComputeKernel::Sparse => "sparse",
            EmbeddingComputeKernel::BatchedDense => "batched_dense",
            EmbeddingComputeKernel::BatchedFused => "batched_fused",
            EmbeddingComputeKernel::BatchedFusedUvm => "batched_fused_uvm",
            EmbeddingComputeKernel::BatchedFusedUvmCaching => "batched_fused_uvm_caching",
            EmbeddingComputeKernel::Quant => "quant",
        }
    }

    /// Kernels that fuse the optimizer into the backward pass and therefore
    /// keep optimizer state next to the weights.
    pub fn is_fused(&self) -> bool {
        matches!(
            self,
            EmbeddingComputeKernel::BatchedFused
                | EmbeddingComputeKernel::BatchedFusedUvm
                | EmbeddingComputeKernel::BatchedFusedUvmCaching
        )
    }

    pub fn is_uvm(&self) -> bool {
        matches!(
            self,
            EmbeddingComputeKernel::BatchedFusedUvm | EmbeddingComputeKernel::BatchedFusedUvmCaching
        )
    }
}

impl fmt::Display for EmbeddingComputeKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbeddingComputeKernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmbeddingComputeKernel::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown compute kernel '{s}'")))
    }
}

/// Placement strategy the partitioner applies to an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionByType {
    /// Each shard is bin-packed onto a device.
    Device,
    /// All shards stay on one host.
    Host,
    /// Fixed layout, shard i on rank i.
    Uniform,
}
