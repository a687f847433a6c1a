//! Sharder registry interface.
//!
//! A sharder stands for one kind of embedding module. The planner only queries
//! it: which sharding types and kernels it supports on a device kind, and
//! which tables it can shard.

use shardplan_core::sharding::{EmbeddingComputeKernel, ShardingType};
use shardplan_core::table::EmbeddingTable;
use shardplan_core::topology::ComputeDevice;

pub trait Sharder: Send + Sync {
    fn name(&self) -> &str;

    /// Module path the claimed tables are planned under. Empty for top level.
    fn module_path(&self) -> &str {
        ""
    }

    fn sharding_types(&self, device: ComputeDevice) -> Vec<ShardingType>;

    fn compute_kernels(
        &self,
        sharding_type: ShardingType,
        device: ComputeDevice,
    ) -> Vec<EmbeddingComputeKernel>;

    /// Names of the tables this sharder can shard.
    fn shardable_parameters(&self, tables: &[EmbeddingTable]) -> Vec<String>;
}

/// Trainable pooled embedding bags in floating point.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingBagCollectionSharder {
    module_path: String,
}

impl EmbeddingBagCollectionSharder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_module(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
        }
    }
}

impl Sharder for EmbeddingBagCollectionSharder {
    fn name(&self) -> &str {
        "EmbeddingBagCollectionSharder"
    }

    fn module_path(&self) -> &str {
        &self.module_path
    }

    fn sharding_types(&self, device: ComputeDevice) -> Vec<ShardingType> {
        let mut types = vec![
            ShardingType::DataParallel,
            ShardingType::TableWise,
            ShardingType::ColumnWise,
        ];
        if device.is_accelerator() {
            types.extend([
                ShardingType::RowWise,
                ShardingType::TableRowWise,
                ShardingType::TableColumnWise,
            ]);
        }
        types
    }

    fn compute_kernels(
        &self,
        sharding_type: ShardingType,
        device: ComputeDevice,
    ) -> Vec<EmbeddingComputeKernel> {
        use EmbeddingComputeKernel::*;
        if sharding_type == ShardingType::DataParallel {
            return vec![Dense, BatchedDense];
        }
        let mut kernels = vec![Dense, Sparse, BatchedDense, BatchedFused];
        if device.is_accelerator() {
            kernels.extend([BatchedFusedUvm, BatchedFusedUvmCaching]);
        }
        kernels
    }

    fn shardable_parameters(&self, tables: &[EmbeddingTable]) -> Vec<String> {
        tables
            .iter()
            .filter(|t| !t.data_type.is_integer())
            .map(|t| t.name.clone())
            .collect()
    }
}

/// Inference-only bags holding integer-quantized rows.
#[derive(Debug, Clone, Default)]
pub struct QuantEmbeddingBagCollectionSharder {
    module_path: String,
}

impl QuantEmbeddingBagCollectionSharder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_module(module_path: impl Into<String>) -> Self {
        Self {
            module_path: module_path.into(),
        }
    }
}

impl Sharder for QuantEmbeddingBagCollectionSharder {
    fn name(&self) -> &str {
        "QuantEmbeddingBagCollectionSharder"
    }

    fn module_path(&self) -> &str {
        &self.module_path
    }

    fn sharding_types(&self, device: ComputeDevice) -> Vec<ShardingType> {
        if device.is_accelerator() {
            vec![
                ShardingType::TableWise,
                ShardingType::RowWise,
                ShardingType::ColumnWise,
            ]
        } else {
            vec![ShardingType::TableWise]
        }
    }

    fn compute_kernels(
        &self,
        _sharding_type: ShardingType,
        _device: ComputeDevice,
    ) -> Vec<EmbeddingComputeKernel> {
        vec![EmbeddingComputeKernel::Quant]
    }

    fn shardable_parameters(&self, tables: &[EmbeddingTable]) -> Vec<String> {
        tables
            .iter()
            .filter(|t| t.data_type.is_integer())
            .map(|t| t.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::table::DataType;

    #[test]
    fn test_ebc_types_depend_on_device() {
        let s = EmbeddingBagCollectionSharder::new();
        assert_eq!(s.sharding_types(ComputeDevice::Cpu).len(), 3);
        assert_eq!(s.sharding_types(ComputeDevice::Cuda).len(), 6);
        assert!(!s
            .compute_kernels(ShardingType::TableWise, ComputeDevice::Cpu)
            .iter()
            .any(|k| k.is_uvm()));
        assert_eq!(
            s.compute_kernels(ShardingType::DataParallel, ComputeDevice::Cuda),
            vec![EmbeddingComputeKernel::Dense, EmbeddingComputeKernel::BatchedDense]
        );
    }

    #[test]
    fn test_sharders_split_tables_by_dtype() {
        let tables = vec![
            EmbeddingTable::new("f", 10, 8, ["a"]),
            EmbeddingTable::new("q", 10, 8, ["b"]).with_data_type(DataType::Int8),
        ];
        assert_eq!(
            EmbeddingBagCollectionSharder::new().shardable_parameters(&tables),
            vec!["f".to_string()]
        );
        assert_eq!(
            QuantEmbeddingBagCollectionSharder::for_module("sparse.qebc")
                .shardable_parameters(&tables),
            vec!["q".to_string()]
        );
    }
}
